//! Connection state tracking.
//!
//! The monitor publishes the current [`ConnectionState`] on a watch channel.
//! Components that only care about "are we online right now" read the latest
//! value; the queue's drain loop waits on changes to catch reconnect edges.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use vizora_shared::types::ConnectionState;

#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectionState>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Publish `state`. Returns `true` if it differs from the previous one.
    pub fn set_state(&self, state: ConnectionState) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(?state, "Connection state changed");
        }
        changed
    }

    /// Poll `health_url` every `interval` and publish the result.
    pub fn spawn_probe(
        self: &std::sync::Arc<Self>,
        client: reqwest::Client,
        health_url: String,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let state = probe(&client, &health_url).await;
                monitor.set_state(state);
            }
        })
    }
}

async fn probe(client: &reqwest::Client, health_url: &str) -> ConnectionState {
    match client.get(health_url).send().await {
        Ok(resp) if resp.status().is_success() => ConnectionState::Connected,
        Ok(resp) => {
            debug!(status = %resp.status(), "Health probe rejected");
            ConnectionState::Disconnected
        }
        Err(e) => {
            debug!(error = %e, "Health probe failed");
            ConnectionState::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_are_published_once() {
        let monitor = ConnectivityMonitor::new(ConnectionState::Disconnected);
        let mut rx = monitor.subscribe();

        assert!(!monitor.set_state(ConnectionState::Disconnected));
        assert!(!rx.has_changed().unwrap());

        assert!(monitor.set_state(ConnectionState::Connected));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);
        assert!(monitor.state().is_connected());
    }

    #[tokio::test]
    async fn test_unreachable_backend_reads_as_disconnected() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        // Port 9 (discard) on localhost is not expected to serve HTTP.
        assert_eq!(
            probe(&client, "http://127.0.0.1:9/health").await,
            ConnectionState::Disconnected
        );
    }
}
