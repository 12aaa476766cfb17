use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use vizora_shared::protocol::PairOutcome;
use vizora_shared::types::{normalize_code, DeviceInfo, PairingSessionView};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::pairing::{CredentialsOutcome, PairingManager};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub pairing: Arc<PairingManager>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pairing: Arc<PairingManager>, config: ServerConfig) -> Self {
        Self {
            pairing,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/pairing/sessions", post(create_session))
        .route("/pairing/sessions/:code", get(get_session))
        .route("/pairing/sessions/:code/pair", post(pair_device))
        .route("/pairing/sessions/:code/credentials", post(take_credentials))
        .route("/ws", get(ws::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    protocol_version: &'static str,
    live_sessions: usize,
    pairing_ttl_secs: u64,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct PendingResponse {
    status: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        protocol_version: vizora_shared::constants::PROTOCOL_VERSION,
        live_sessions: state.pairing.live_session_count().await,
        pairing_ttl_secs: state.config.pairing_ttl.as_secs(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn create_session(
    State(state): State<AppState>,
) -> Result<Json<PairingSessionView>, ServerError> {
    let view = state.pairing.create_session().await?;
    Ok(Json(view))
}

async fn get_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<PairingSessionView>, ServerError> {
    let code = normalize_code(&code)?;
    state
        .pairing
        .get_session(&code)
        .await
        .map(Json)
        .ok_or(ServerError::SessionNotFound(code))
}

async fn pair_device(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(device_info): Json<DeviceInfo>,
) -> Result<Response, ServerError> {
    let code = normalize_code(&code)?;
    if device_info.device_id.trim().is_empty() {
        return Err(ServerError::BadRequest("device_id must not be empty".into()));
    }

    let outcome = state.pairing.pair_device(&code, device_info).await;
    match outcome {
        PairOutcome::Paired(_) | PairOutcome::AlreadyPaired(_) => {
            Ok((StatusCode::OK, Json(outcome)).into_response())
        }
        PairOutcome::Expired(_) => Err(ServerError::SessionExpired(code)),
        PairOutcome::NotFound => Err(ServerError::SessionNotFound(code)),
    }
}

async fn take_credentials(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, ServerError> {
    let code = normalize_code(&code)?;
    match state.pairing.take_credentials(&code).await {
        CredentialsOutcome::Ready(credentials) => Ok(Json(credentials).into_response()),
        CredentialsOutcome::NotReady => {
            Ok((StatusCode::ACCEPTED, Json(PendingResponse { status: "pending" })).into_response())
        }
        CredentialsOutcome::Expired | CredentialsOutcome::NotFound => {
            Err(ServerError::SessionNotFound(code))
        }
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
