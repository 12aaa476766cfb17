//! Pairing session store.
//!
//! A pairing session binds an anonymous device to the backend through a short
//! code that a person can read off a screen and type into the dashboard. The
//! [`PairingManager`] owns every live session together with the transport
//! listeners waiting on it, and pushes a [`PairingSessionView`] to those
//! listeners on each status transition.
//!
//! Status only ever moves forward: `Pending -> Paired` or `Pending ->
//! Expired`. Expiry is applied lazily on every read as well as by the
//! periodic sweep, and each transition is announced exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vizora_shared::clock::Clock;
use vizora_shared::constants::{
    DEFAULT_PAIRING_TTL_SECS, DEVICE_TOKEN_SIZE, MAX_CODE_ATTEMPTS, PAIRING_CODE_ALPHABET,
    PAIRING_CODE_LENGTH,
};
use vizora_shared::protocol::PairOutcome;
use vizora_shared::types::{DeviceCredentials, DeviceInfo, PairingSessionView, PairingStatus};

use crate::error::ServerError;

/// Identifies one transport listener (one WebSocket connection).
pub type SubscriberId = Uuid;

/// Channel a listener receives session updates on.
pub type UpdateSender = mpsc::Sender<PairingSessionView>;

#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// How long a freshly issued code stays claimable.
    pub code_ttl: Duration,
    /// Number of characters in a code.
    pub code_length: usize,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::seconds(DEFAULT_PAIRING_TTL_SECS as i64),
            code_length: PAIRING_CODE_LENGTH,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum SessionState {
    Pending,
    Paired {
        device_info: DeviceInfo,
        paired_at: DateTime<Utc>,
        device_token: String,
    },
    Expired,
}

#[derive(Debug)]
struct PairingSession {
    id: Uuid,
    code: String,
    state: SessionState,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    subscribers: HashMap<SubscriberId, UpdateSender>,
}

impl PairingSession {
    fn new(code: String, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            state: SessionState::Pending,
            created_at: now,
            expires_at: now + ttl,
            subscribers: HashMap::new(),
        }
    }

    fn status(&self) -> PairingStatus {
        match self.state {
            SessionState::Pending => PairingStatus::Pending,
            SessionState::Paired { .. } => PairingStatus::Paired,
            SessionState::Expired => PairingStatus::Expired,
        }
    }

    fn view(&self) -> PairingSessionView {
        let device_info = match &self.state {
            SessionState::Paired { device_info, .. } => Some(device_info.clone()),
            SessionState::Pending | SessionState::Expired => None,
        };

        PairingSessionView {
            id: self.id,
            code: self.code.clone(),
            status: self.status(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            device_info,
        }
    }

    /// Apply `Pending -> Expired` once the TTL has passed. Returns `true` only
    /// for the call that performed the transition.
    fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            SessionState::Pending if now > self.expires_at => {
                self.state = SessionState::Expired;
                true
            }
            _ => false,
        }
    }

    /// Push the current view to every listener without waiting on any of them.
    fn notify(&self) -> usize {
        let view = self.view();
        let mut delivered = 0;

        for (subscriber, tx) in &self.subscribers {
            match tx.try_send(view.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        code = %self.code,
                        subscriber = %subscriber,
                        "Dropping pairing update for slow subscriber"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(code = %self.code, subscriber = %subscriber, "Subscriber gone");
                }
            }
        }

        delivered
    }
}

/// Result of a device collecting its credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsOutcome {
    /// The session was paired; it has now been removed from the store.
    Ready(DeviceCredentials),
    /// Nobody has claimed the code yet.
    NotReady,
    Expired,
    NotFound,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions that transitioned to `Expired` during this sweep.
    pub expired: usize,
    /// Sessions dropped from the store.
    pub removed: usize,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns all live pairing sessions. Create one per process and share it by
/// `Arc`; the sweeper is started separately with [`PairingManager::spawn_sweeper`].
pub struct PairingManager {
    sessions: RwLock<HashMap<String, PairingSession>>,
    config: PairingConfig,
    clock: Arc<dyn Clock>,
}

impl PairingManager {
    pub fn new(config: PairingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    /// Issue a fresh code and open a `Pending` session for it.
    pub async fn create_session(&self) -> Result<PairingSessionView, ServerError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;

        let mut code = None;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = generate_code(self.config.code_length);
            if !sessions.contains_key(&candidate) {
                code = Some(candidate);
                break;
            }
        }
        let code = code.ok_or(ServerError::CodeSpaceExhausted)?;

        let session = PairingSession::new(code.clone(), now, self.config.code_ttl);
        let view = session.view();
        sessions.insert(code, session);

        info!(
            code = %view.code,
            session = %view.id,
            expires_at = %view.expires_at,
            "Created pairing session"
        );

        Ok(view)
    }

    /// Read a session. A session past its TTL reads as `Expired` even if the
    /// sweep has not run yet.
    pub async fn get_session(&self, code: &str) -> Option<PairingSessionView> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(code)?;

        if session.expire_if_due(now) {
            info!(code = %code, "Pairing session expired on read");
            session.notify();
        }

        Some(session.view())
    }

    /// Claim `code` for a device.
    pub async fn pair_device(&self, code: &str, device_info: DeviceInfo) -> PairOutcome {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(code) else {
            debug!(code = %code, "Pair attempt for unknown code");
            return PairOutcome::NotFound;
        };

        if session.expire_if_due(now) {
            info!(code = %code, "Pairing session expired before it was claimed");
            session.notify();
        }

        match session.state {
            SessionState::Expired => PairOutcome::Expired(session.view()),
            SessionState::Paired { .. } => {
                debug!(code = %code, "Code already paired, ignoring repeat claim");
                PairOutcome::AlreadyPaired(session.view())
            }
            SessionState::Pending => {
                info!(
                    code = %code,
                    device = %device_info.device_id,
                    name = %device_info.name,
                    "Device paired"
                );
                session.state = SessionState::Paired {
                    device_info,
                    paired_at: now,
                    device_token: generate_device_token(),
                };
                let notified = session.notify();
                debug!(code = %code, notified, "Announced pairing");
                PairOutcome::Paired(session.view())
            }
        }
    }

    /// Register a listener for `code`. Returns `false` for unknown codes.
    pub async fn subscribe(&self, code: &str, subscriber: SubscriberId, tx: UpdateSender) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(code) {
            Some(session) => {
                session.subscribers.insert(subscriber, tx);
                debug!(
                    code = %code,
                    subscriber = %subscriber,
                    subscribers = session.subscribers.len(),
                    "Subscribed to pairing session"
                );
                true
            }
            None => false,
        }
    }

    pub async fn unsubscribe(&self, code: &str, subscriber: SubscriberId) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions
            .get_mut(code)
            .map(|session| session.subscribers.remove(&subscriber).is_some())
            .unwrap_or(false)
    }

    /// Drop a listener from every session, e.g. when its connection closes.
    pub async fn unsubscribe_all(&self, subscriber: SubscriberId) -> usize {
        let mut sessions = self.sessions.write().await;
        sessions
            .values_mut()
            .map(|session| session.subscribers.remove(&subscriber).is_some())
            .filter(|removed| *removed)
            .count()
    }

    /// Hand the device its credentials. A paired session is removed once its
    /// credentials have been collected.
    pub async fn take_credentials(&self, code: &str) -> CredentialsOutcome {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(code) else {
            return CredentialsOutcome::NotFound;
        };

        if session.expire_if_due(now) {
            session.notify();
        }

        let credentials = match &session.state {
            SessionState::Pending => return CredentialsOutcome::NotReady,
            SessionState::Expired => return CredentialsOutcome::Expired,
            SessionState::Paired {
                paired_at,
                device_token,
                ..
            } => DeviceCredentials {
                display_id: session.id,
                device_token: device_token.clone(),
                paired_at: *paired_at,
            },
        };

        sessions.remove(code);
        info!(code = %code, display = %credentials.display_id, "Credentials collected, session closed");

        CredentialsOutcome::Ready(credentials)
    }

    /// Expire sessions past their TTL, notify their listeners once, and drop
    /// them. Paired sessions whose credentials were never collected are
    /// dropped one TTL after their own expiry time.
    pub async fn sweep_expired(&self) -> SweepReport {
        let now = self.clock.now();
        let grace = self.config.code_ttl;
        let mut report = SweepReport::default();
        let mut sessions = self.sessions.write().await;

        sessions.retain(|code, session| {
            if session.expire_if_due(now) {
                report.expired += 1;
                session.notify();
            }

            let keep = match session.state {
                SessionState::Pending => true,
                SessionState::Expired => false,
                SessionState::Paired { .. } => now <= session.expires_at + grace,
            };

            if !keep {
                debug!(code = %code, status = %session.status(), "Removing pairing session");
                report.removed += 1;
            }
            keep
        });

        if report.removed > 0 {
            info!(
                expired = report.expired,
                removed = report.removed,
                live = sessions.len(),
                "Swept pairing sessions"
            );
        }

        report
    }

    pub async fn live_session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until the
    /// returned handle is shut down or dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) -> SweeperHandle {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep_expired().await;
            }
        });

        SweeperHandle {
            handle: Some(handle),
        }
    }
}

/// Owner of the background sweep task.
pub struct SweeperHandle {
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            info!("Pairing sweeper stopped");
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..PAIRING_CODE_ALPHABET.len());
            PAIRING_CODE_ALPHABET[idx] as char
        })
        .collect()
}

fn generate_device_token() -> String {
    let mut bytes = [0u8; DEVICE_TOKEN_SIZE];
    rand::thread_rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use vizora_shared::clock::ManualClock;

    fn manager_with_clock() -> (Arc<PairingManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let manager = Arc::new(PairingManager::new(PairingConfig::default(), clock.clone()));
        (manager, clock)
    }

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo {
            device_id: id.to_string(),
            name: format!("Screen {id}"),
            metadata: serde_json::json!({ "model": "tv" }),
        }
    }

    #[tokio::test]
    async fn test_create_session_shape() {
        let (manager, clock) = manager_with_clock();
        let view = manager.create_session().await.unwrap();

        assert_eq!(view.code.len(), PAIRING_CODE_LENGTH);
        assert!(view.code.bytes().all(|b| PAIRING_CODE_ALPHABET.contains(&b)));
        assert_eq!(view.status, PairingStatus::Pending);
        assert_eq!(view.created_at, clock.now());
        assert_eq!(view.expires_at, clock.now() + Duration::minutes(10));
        assert!(view.device_info.is_none());
        assert_eq!(manager.live_session_count().await, 1);
    }

    #[tokio::test]
    async fn test_codes_never_collide_with_live_sessions() {
        let clock = Arc::new(ManualClock::default());
        let config = PairingConfig {
            code_length: 1,
            ..PairingConfig::default()
        };
        let manager = PairingManager::new(config, clock);

        let mut codes = HashSet::new();
        let mut failures = 0;
        for _ in 0..100 {
            match manager.create_session().await {
                Ok(view) => assert!(codes.insert(view.code), "duplicate live code"),
                Err(ServerError::CodeSpaceExhausted) => failures += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert!(codes.len() <= PAIRING_CODE_ALPHABET.len());
        assert!(failures >= 100 - PAIRING_CODE_ALPHABET.len());
    }

    #[tokio::test]
    async fn test_get_session_reads_expired_before_sweep() {
        let (manager, clock) = manager_with_clock();
        let view = manager.create_session().await.unwrap();

        clock.advance(Duration::minutes(11));

        let read = manager.get_session(&view.code).await.unwrap();
        assert_eq!(read.status, PairingStatus::Expired);
        // Still in the store until the sweep runs.
        assert_eq!(manager.live_session_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_code_is_absent() {
        let (manager, _clock) = manager_with_clock();
        assert!(manager.get_session("ZZZZZZ").await.is_none());
        assert_eq!(
            manager.pair_device("ZZZZZZ", device("a")).await,
            PairOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_pair_twice_notifies_once() {
        let (manager, _clock) = manager_with_clock();
        let view = manager.create_session().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        assert!(manager.subscribe(&view.code, Uuid::new_v4(), tx).await);

        let first = manager.pair_device(&view.code, device("a")).await;
        let PairOutcome::Paired(paired) = first else {
            panic!("expected Paired, got {first:?}");
        };
        assert_eq!(paired.status, PairingStatus::Paired);
        assert_eq!(paired.device_info.as_ref().unwrap().device_id, "a");

        let second = manager.pair_device(&view.code, device("b")).await;
        let PairOutcome::AlreadyPaired(again) = second else {
            panic!("expected AlreadyPaired, got {second:?}");
        };
        // The second claim does not overwrite the first device.
        assert_eq!(again.device_info.as_ref().unwrap().device_id, "a");

        let update = rx.try_recv().unwrap();
        assert_eq!(update.status, PairingStatus::Paired);
        assert!(rx.try_recv().is_err(), "duplicate notification");
    }

    #[tokio::test]
    async fn test_pair_after_ttl_reports_expired_without_pairing() {
        let (manager, clock) = manager_with_clock();
        let view = manager.create_session().await.unwrap();

        clock.advance(Duration::minutes(10) + Duration::seconds(1));

        match manager.pair_device(&view.code, device("late")).await {
            PairOutcome::Expired(s) => {
                assert_eq!(s.status, PairingStatus::Expired);
                assert!(s.device_info.is_none());
            }
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let (manager, clock) = manager_with_clock();
        let paired = manager.create_session().await.unwrap();
        let expired = manager.create_session().await.unwrap();

        manager.pair_device(&paired.code, device("a")).await;
        clock.advance(Duration::minutes(11));
        assert_eq!(
            manager.get_session(&expired.code).await.unwrap().status,
            PairingStatus::Expired
        );

        // Time passing does not expire a paired session...
        assert_eq!(
            manager.get_session(&paired.code).await.unwrap().status,
            PairingStatus::Paired
        );
        // ...and a claim does not revive an expired one.
        manager.pair_device(&expired.code, device("b")).await;
        assert_eq!(
            manager.get_session(&expired.code).await.unwrap().status,
            PairingStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_sweep_notifies_once_and_removes() {
        let (manager, clock) = manager_with_clock();
        let view = manager.create_session().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        manager.subscribe(&view.code, Uuid::new_v4(), tx).await;

        clock.advance(Duration::minutes(11));

        // Lazy read performs the transition and the single notification.
        manager.get_session(&view.code).await;
        let report = manager.sweep_expired().await;
        assert_eq!(report, SweepReport { expired: 0, removed: 1 });

        assert_eq!(rx.try_recv().unwrap().status, PairingStatus::Expired);
        assert!(rx.try_recv().is_err());
        assert!(manager.get_session(&view.code).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_expires_untouched_sessions() {
        let (manager, clock) = manager_with_clock();
        let stale = manager.create_session().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        manager.subscribe(&stale.code, Uuid::new_v4(), tx).await;

        clock.advance(Duration::minutes(5));
        let fresh = manager.create_session().await.unwrap();
        clock.advance(Duration::minutes(6));

        let report = manager.sweep_expired().await;
        assert_eq!(report, SweepReport { expired: 1, removed: 1 });
        assert_eq!(rx.try_recv().unwrap().status, PairingStatus::Expired);
        assert!(manager.get_session(&fresh.code).await.is_some());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_updates() {
        let (manager, _clock) = manager_with_clock();
        let view = manager.create_session().await.unwrap();
        let subscriber = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);

        manager.subscribe(&view.code, subscriber, tx).await;
        assert!(manager.unsubscribe(&view.code, subscriber).await);
        manager.pair_device(&view.code, device("a")).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_all_covers_every_session() {
        let (manager, _clock) = manager_with_clock();
        let a = manager.create_session().await.unwrap();
        let b = manager.create_session().await.unwrap();
        let subscriber = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(8);

        manager.subscribe(&a.code, subscriber, tx.clone()).await;
        manager.subscribe(&b.code, subscriber, tx).await;
        assert_eq!(manager.unsubscribe_all(subscriber).await, 2);
        assert!(!manager.subscribe("ZZZZZZ", subscriber, mpsc::channel(1).0).await);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_pairing() {
        let (manager, _clock) = manager_with_clock();
        let view = manager.create_session().await.unwrap();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        slow_tx.try_send(view.clone()).unwrap(); // fill the buffer
        let (tx, mut rx) = mpsc::channel(8);

        manager.subscribe(&view.code, Uuid::new_v4(), slow_tx).await;
        manager.subscribe(&view.code, Uuid::new_v4(), tx).await;

        assert!(matches!(
            manager.pair_device(&view.code, device("a")).await,
            PairOutcome::Paired(_)
        ));
        assert_eq!(rx.try_recv().unwrap().status, PairingStatus::Paired);
    }

    #[tokio::test]
    async fn test_take_credentials_lifecycle() {
        let (manager, _clock) = manager_with_clock();
        let view = manager.create_session().await.unwrap();

        assert_eq!(
            manager.take_credentials(&view.code).await,
            CredentialsOutcome::NotReady
        );

        manager.pair_device(&view.code, device("a")).await;
        let CredentialsOutcome::Ready(creds) = manager.take_credentials(&view.code).await else {
            panic!("expected credentials");
        };
        assert_eq!(creds.display_id, view.id);
        assert_eq!(creds.device_token.len(), DEVICE_TOKEN_SIZE * 2);

        // Collected credentials close the session.
        assert_eq!(
            manager.take_credentials(&view.code).await,
            CredentialsOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_uncollected_pairing_is_eventually_swept() {
        let (manager, clock) = manager_with_clock();
        let view = manager.create_session().await.unwrap();
        manager.pair_device(&view.code, device("a")).await;

        clock.advance(Duration::minutes(15));
        assert_eq!(manager.sweep_expired().await.removed, 0);

        clock.advance(Duration::minutes(6));
        assert_eq!(manager.sweep_expired().await, SweepReport { expired: 0, removed: 1 });
    }

    #[tokio::test]
    async fn test_sweeper_shutdown() {
        let (manager, _clock) = manager_with_clock();
        let handle = manager.spawn_sweeper(std::time::Duration::from_millis(5));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.shutdown().await;
    }
}
