use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vizora_shared::clock::Clock;
use vizora_shared::constants::{
    DEFAULT_DEDUPE_WINDOW_SECS, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY_MS, QUEUE_STORAGE_KEY,
};
use vizora_shared::types::{ActionType, ConnectionState};
use vizora_store::kv::{load_json, KeyValueStore};

use super::action::{ActionState, QueuedAction};
use super::sender::ActionSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub dedupe_window: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            dedupe_window: Duration::from_secs(DEFAULT_DEDUPE_WINDOW_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// An equivalent action is already waiting; nothing was added.
    Coalesced,
    /// Queued, and the oldest action was dropped to stay within the bound.
    QueuedDroppingOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Offline,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub skipped: Option<SkipReason>,
    pub delivered: usize,
    pub discarded: usize,
    /// The pass stopped at a failed or backed-off action.
    pub halted: bool,
    pub remaining: usize,
}

impl DrainReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub total: usize,
    pub by_type: BTreeMap<ActionType, usize>,
}

/// Durable FIFO of device events, delivered in order once the device is
/// online.
pub struct OfflineActionQueue {
    actions: Mutex<VecDeque<QueuedAction>>,
    drain_lock: Mutex<()>,
    config: QueueConfig,
    store: Arc<dyn KeyValueStore>,
    sender: Arc<dyn ActionSender>,
    connectivity: watch::Receiver<ConnectionState>,
    clock: Arc<dyn Clock>,
}

impl OfflineActionQueue {
    /// Build the queue, picking up whatever was persisted before the last
    /// shutdown.
    pub fn restore(
        config: QueueConfig,
        store: Arc<dyn KeyValueStore>,
        sender: Arc<dyn ActionSender>,
        connectivity: watch::Receiver<ConnectionState>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut actions: VecDeque<QueuedAction> =
            match load_json::<Vec<QueuedAction>>(store.as_ref(), QUEUE_STORAGE_KEY) {
                Ok(Some(saved)) => saved.into(),
                Ok(None) => VecDeque::new(),
                Err(e) => {
                    warn!(error = %e, "Stored offline queue unreadable, starting empty");
                    VecDeque::new()
                }
            };

        while actions.len() > config.max_queue_size {
            actions.pop_front();
        }
        if !actions.is_empty() {
            info!(pending = actions.len(), "Restored offline action queue");
        }

        Self {
            actions: Mutex::new(actions),
            drain_lock: Mutex::new(()),
            config,
            store,
            sender,
            connectivity,
            clock,
        }
    }

    /// Queue an event and try to deliver right away.
    pub async fn enqueue(&self, action_type: ActionType, payload: serde_json::Value) -> EnqueueOutcome {
        let outcome = self.push(action_type, payload).await;
        if outcome != EnqueueOutcome::Coalesced {
            self.process_queue().await;
        }
        outcome
    }

    pub async fn enqueue_content_update(&self, content_id: &str) -> EnqueueOutcome {
        self.enqueue(ActionType::ContentUpdate, json!({ "content_id": content_id }))
            .await
    }

    pub async fn enqueue_schedule_update(&self, schedule_id: &str) -> EnqueueOutcome {
        self.enqueue(ActionType::ScheduleUpdate, json!({ "schedule_id": schedule_id }))
            .await
    }

    pub async fn enqueue_status_report(&self, data: serde_json::Value) -> EnqueueOutcome {
        self.enqueue(ActionType::StatusReport, data).await
    }

    pub async fn enqueue_health_update(&self, data: serde_json::Value) -> EnqueueOutcome {
        self.enqueue(ActionType::HealthUpdate, data).await
    }

    pub async fn enqueue_settings_update(&self, data: serde_json::Value) -> EnqueueOutcome {
        self.enqueue(ActionType::SettingsUpdate, data).await
    }

    async fn push(&self, action_type: ActionType, payload: serde_json::Value) -> EnqueueOutcome {
        let now = self.clock.now();
        let action = QueuedAction::new(action_type, payload, now);
        let window = chrono::Duration::from_std(self.config.dedupe_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_DEDUPE_WINDOW_SECS as i64));

        let mut actions = self.actions.lock().await;

        // An action already handed to the sender may still be discarded, so
        // it cannot absorb a newer copy.
        let duplicate = actions.iter().any(|queued| {
            queued.state != ActionState::Delivering
                && queued.dedupe_key == action.dedupe_key
                && now - queued.enqueued_at < window
        });
        if duplicate {
            debug!(action_type = %action_type, "Coalesced duplicate action");
            return EnqueueOutcome::Coalesced;
        }

        debug!(action_type = %action_type, id = %action.id, "Queued action");
        actions.push_back(action);

        let mut outcome = EnqueueOutcome::Queued;
        while actions.len() > self.config.max_queue_size {
            if let Some(dropped) = actions.pop_front() {
                warn!(
                    action_type = %dropped.action_type,
                    id = %dropped.id,
                    "Offline queue full, dropped oldest action"
                );
            }
            outcome = EnqueueOutcome::QueuedDroppingOldest;
        }

        self.persist(&actions).await;
        outcome
    }

    /// Deliver queued actions through the configured sender.
    pub async fn process_queue(&self) -> DrainReport {
        self.process_queue_with(self.sender.as_ref()).await
    }

    /// Deliver queued actions in order through `sender`. At most one pass
    /// runs at a time; overlapping calls return immediately.
    pub async fn process_queue_with(&self, sender: &dyn ActionSender) -> DrainReport {
        let Ok(_pass) = self.drain_lock.try_lock() else {
            return DrainReport::skipped(SkipReason::AlreadyRunning);
        };
        if !self.is_connected() {
            return DrainReport::skipped(SkipReason::Offline);
        }

        let mut report = DrainReport::default();
        let mut changed = false;

        loop {
            if !self.is_connected() {
                report.halted = true;
                break;
            }

            let now = self.clock.now();
            let head = {
                let mut actions = self.actions.lock().await;
                let Some(head) = actions.front_mut() else {
                    break;
                };
                if !head.is_due(now) {
                    debug!(id = %head.id, next_attempt_at = %head.next_attempt_at, "Head action backing off");
                    report.halted = true;
                    break;
                }
                head.state = ActionState::Delivering;
                head.clone()
            };

            let result = sender.send(&head).await;

            let now = self.clock.now();
            let mut actions = self.actions.lock().await;
            let Some(pos) = actions.iter().position(|a| a.id == head.id) else {
                // Cleared or dropped while in flight.
                continue;
            };
            changed = true;

            match result {
                Ok(()) => {
                    actions.remove(pos);
                    report.delivered += 1;
                    debug!(id = %head.id, event = head.action_type.event_name(), "Delivered action");
                }
                Err(e) => {
                    let action = &mut actions[pos];
                    let state =
                        action.record_failure(now, self.config.retry_delay, self.config.max_retries);
                    if state == ActionState::Discarded {
                        error!(
                            id = %head.id,
                            action_type = %head.action_type,
                            attempts = action.attempt_count,
                            error = %e,
                            "Discarding action after repeated failures"
                        );
                        actions.remove(pos);
                        report.discarded += 1;
                        continue;
                    }
                    warn!(
                        id = %head.id,
                        attempts = action.attempt_count,
                        next_attempt_at = %action.next_attempt_at,
                        error = %e,
                        "Delivery failed, will retry"
                    );
                    report.halted = true;
                    break;
                }
            }
        }

        let actions = self.actions.lock().await;
        if changed {
            self.persist(&actions).await;
        }
        report.remaining = actions.len();

        if report.delivered > 0 || report.discarded > 0 {
            info!(
                delivered = report.delivered,
                discarded = report.discarded,
                remaining = report.remaining,
                "Drained offline queue"
            );
        }
        report
    }

    pub async fn get_queue_status(&self) -> QueueStatus {
        let actions = self.actions.lock().await;
        let mut by_type = BTreeMap::new();
        for action in actions.iter() {
            *by_type.entry(action.action_type).or_insert(0) += 1;
        }
        QueueStatus {
            total: actions.len(),
            by_type,
        }
    }

    /// Drop every queued action without delivering it.
    pub async fn clear_queue(&self) -> usize {
        let mut actions = self.actions.lock().await;
        let cleared = actions.len();
        for action in actions.iter_mut() {
            action.state = ActionState::Discarded;
        }
        actions.clear();
        self.persist(&actions).await;
        info!(cleared, "Cleared offline queue");
        cleared
    }

    /// Drain on every reconnect and every `retry_tick` until aborted.
    pub fn spawn_drain_loop(self: &Arc<Self>, retry_tick: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut connectivity = self.connectivity.clone();
        tokio::spawn(async move {
            let mut was_connected = connectivity.borrow_and_update().is_connected();
            let mut ticker = tokio::time::interval(retry_tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            debug!("Connectivity source closed, stopping drain loop");
                            break;
                        }
                        let connected = connectivity.borrow_and_update().is_connected();
                        if connected && !was_connected {
                            info!("Reconnected, draining offline queue");
                            queue.process_queue().await;
                        }
                        was_connected = connected;
                    }
                    _ = ticker.tick() => {
                        queue.process_queue().await;
                    }
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.connectivity.borrow().is_connected()
    }

    /// Snapshot `actions` and write it on the blocking pool. Callers hold the
    /// actions lock across the await, so writes land in order.
    async fn persist(&self, actions: &VecDeque<QueuedAction>) {
        let raw = match serde_json::to_string(actions) {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Failed to encode offline queue");
                return;
            }
        };
        let store = Arc::clone(&self.store);
        let written =
            tokio::task::spawn_blocking(move || store.put(QUEUE_STORAGE_KEY, &raw)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Failed to persist offline queue"),
            Err(e) => error!(error = %e, "Offline queue write task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use uuid::Uuid;
    use vizora_shared::clock::ManualClock;
    use vizora_store::kv::MemoryStore;

    use crate::queue::sender::SendError;

    #[derive(Default)]
    struct MockSender {
        sent: StdMutex<Vec<(String, serde_json::Value)>>,
        calls: AtomicUsize,
        /// Fail every call while set.
        failing: std::sync::atomic::AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    impl MockSender {
        fn failing() -> Self {
            let sender = Self::default();
            sender.failing.store(true, Ordering::SeqCst);
            sender
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn sent(&self) -> Vec<(String, serde_json::Value)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionSender for MockSender {
        async fn send(&self, action: &QueuedAction) -> Result<(), SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(SendError::Unavailable("offline".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((action.action_type.event_name().to_string(), action.payload.clone()));
            Ok(())
        }
    }

    fn ids(actions: &VecDeque<QueuedAction>) -> Vec<Uuid> {
        actions.iter().map(|a| a.id).collect()
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        link: watch::Sender<ConnectionState>,
    }

    impl Fixture {
        fn new(initial: ConnectionState) -> Self {
            let (link, _) = watch::channel(initial);
            Self {
                store: Arc::new(MemoryStore::new()),
                clock: Arc::new(ManualClock::default()),
                link,
            }
        }

        fn queue(&self, config: QueueConfig, sender: Arc<MockSender>) -> Arc<OfflineActionQueue> {
            Arc::new(OfflineActionQueue::restore(
                config,
                self.store.clone(),
                sender,
                self.link.subscribe(),
                self.clock.clone(),
            ))
        }

        fn set(&self, state: ConnectionState) {
            self.link.send_replace(state);
        }
    }

    #[tokio::test]
    async fn test_offline_event_delivered_once_after_reconnect() {
        let fx = Fixture::new(ConnectionState::Disconnected);
        let sender = Arc::new(MockSender::default());
        let queue = fx.queue(QueueConfig::default(), sender.clone());
        let drain = queue.spawn_drain_loop(Duration::from_secs(3600));

        assert_eq!(queue.enqueue_content_update("content-42").await, EnqueueOutcome::Queued);
        assert_eq!(sender.calls(), 0);

        fx.set(ConnectionState::Connected);
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.get_queue_status().await.total > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue drained after reconnect");

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "content:update");
        assert_eq!(sent[0].1["content_id"], "content-42");
        drain.abort();
    }

    #[tokio::test]
    async fn test_queue_is_bounded_drop_oldest() {
        let fx = Fixture::new(ConnectionState::Disconnected);
        let config = QueueConfig {
            max_queue_size: 3,
            ..QueueConfig::default()
        };
        let queue = fx.queue(config, Arc::new(MockSender::default()));

        let mut outcomes = Vec::new();
        for n in 0..5 {
            outcomes.push(queue.enqueue_status_report(json!({ "n": n })).await);
        }

        assert_eq!(&outcomes[..3], &[EnqueueOutcome::Queued; 3]);
        assert_eq!(&outcomes[3..], &[EnqueueOutcome::QueuedDroppingOldest; 2]);

        let status = queue.get_queue_status().await;
        assert_eq!(status.total, 3);
        let actions = queue.actions.lock().await;
        let kept: Vec<i64> = actions.iter().map(|a| a.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_duplicates_coalesce_within_window() {
        let fx = Fixture::new(ConnectionState::Disconnected);
        let queue = fx.queue(QueueConfig::default(), Arc::new(MockSender::default()));

        assert_eq!(queue.enqueue_schedule_update("s-1").await, EnqueueOutcome::Queued);
        fx.clock.advance(chrono::Duration::seconds(30));
        assert_eq!(queue.enqueue_schedule_update("s-1").await, EnqueueOutcome::Coalesced);
        assert_eq!(queue.enqueue_schedule_update("s-2").await, EnqueueOutcome::Queued);
        assert_eq!(queue.get_queue_status().await.total, 2);

        fx.clock.advance(chrono::Duration::seconds(31));
        assert_eq!(queue.enqueue_schedule_update("s-1").await, EnqueueOutcome::Queued);

        let status = queue.get_queue_status().await;
        assert_eq!(status.total, 3);
        assert_eq!(status.by_type.get(&ActionType::ScheduleUpdate), Some(&3));
    }

    #[tokio::test]
    async fn test_in_flight_action_does_not_absorb_duplicate() {
        let fx = Fixture::new(ConnectionState::Connected);
        let gate = Arc::new(Notify::new());
        let sender = Arc::new(MockSender {
            gate: Some(gate.clone()),
            ..MockSender::failing()
        });
        let config = QueueConfig {
            max_retries: 1,
            ..QueueConfig::default()
        };
        let queue = fx.queue(config, sender.clone());

        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue_content_update("a").await })
        };
        while sender.calls() == 0 {
            tokio::task::yield_now().await;
        }

        // The head is mid-send on its last attempt; the copy must be kept.
        assert_eq!(queue.enqueue_content_update("a").await, EnqueueOutcome::Queued);

        gate.notify_one();
        while sender.calls() < 2 {
            tokio::task::yield_now().await;
        }
        sender.failing.store(false, Ordering::SeqCst);
        gate.notify_one();
        first.await.unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1["content_id"], "a");
        assert_eq!(queue.get_queue_status().await.total, 0);
    }

    #[tokio::test]
    async fn test_delivery_preserves_enqueue_order() {
        let fx = Fixture::new(ConnectionState::Disconnected);
        let sender = Arc::new(MockSender::default());
        let queue = fx.queue(QueueConfig::default(), sender.clone());

        queue.enqueue_content_update("a").await;
        queue.enqueue_health_update(json!({ "cpu": 3 })).await;
        queue.enqueue_settings_update(json!({ "volume": 7 })).await;

        fx.set(ConnectionState::Connected);
        let report = queue.process_queue().await;
        assert_eq!(report.delivered, 3);
        assert_eq!(report.remaining, 0);

        let events: Vec<String> = sender.sent().into_iter().map(|(event, _)| event).collect();
        assert_eq!(events, ["content:update", "health:update", "settings:update"]);
    }

    #[tokio::test]
    async fn test_failure_backs_off_then_discards() {
        let fx = Fixture::new(ConnectionState::Connected);
        let sender = Arc::new(MockSender::failing());
        let config = QueueConfig {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            ..QueueConfig::default()
        };
        let queue = fx.queue(config, sender.clone());

        // Each enqueue triggers a pass; the first fails on A and halts.
        queue.enqueue_content_update("a").await;
        assert_eq!(sender.calls(), 1);
        // B waits behind A, which is backing off.
        queue.enqueue_content_update("b").await;
        assert_eq!(sender.calls(), 1);

        let report = queue.process_queue().await;
        assert!(report.halted);
        assert_eq!(sender.calls(), 1, "head inside its backoff is not sent");

        fx.clock.advance(chrono::Duration::seconds(2));
        queue.process_queue().await;
        assert_eq!(sender.calls(), 2);
        assert_eq!(queue.actions.lock().await[0].attempt_count, 2);

        // Third failure discards A and the pass moves on to B.
        fx.clock.advance(chrono::Duration::seconds(4));
        let report = queue.process_queue().await;
        assert_eq!(report.discarded, 1);
        assert_eq!(sender.calls(), 4);
        assert_eq!(report.remaining, 1);
        assert_eq!(queue.actions.lock().await[0].payload["content_id"], "b");

        sender.failing.store(false, Ordering::SeqCst);
        fx.clock.advance(chrono::Duration::seconds(2));
        let report = queue.process_queue().await;
        assert_eq!(report.delivered, 1);
        assert_eq!(sender.sent()[0].1["content_id"], "b");
    }

    #[tokio::test]
    async fn test_single_flight_drain() {
        let fx = Fixture::new(ConnectionState::Connected);
        let gate = Arc::new(Notify::new());
        let sender = Arc::new(MockSender {
            gate: Some(gate.clone()),
            ..MockSender::default()
        });
        let queue = fx.queue(QueueConfig::default(), sender.clone());

        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue_content_update("a").await })
        };
        while sender.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            queue.process_queue().await,
            DrainReport::skipped(SkipReason::AlreadyRunning)
        );

        gate.notify_one();
        assert_eq!(first.await.unwrap(), EnqueueOutcome::Queued);
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_drain_releases_guard() {
        let fx = Fixture::new(ConnectionState::Connected);
        let gate = Arc::new(Notify::new());
        let blocked = Arc::new(MockSender {
            gate: Some(gate),
            ..MockSender::default()
        });
        let queue = fx.queue(QueueConfig::default(), blocked.clone());

        let stuck = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue_content_update("a").await })
        };
        while blocked.calls() == 0 {
            tokio::task::yield_now().await;
        }
        stuck.abort();
        let _ = stuck.await;

        let healthy = MockSender::default();
        let report = queue.process_queue_with(&healthy).await;
        assert_eq!(report.skipped, None);
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_offline_pass_is_skipped() {
        let fx = Fixture::new(ConnectionState::Disconnected);
        let queue = fx.queue(QueueConfig::default(), Arc::new(MockSender::default()));
        queue.enqueue_content_update("a").await;
        assert_eq!(
            queue.process_queue().await,
            DrainReport::skipped(SkipReason::Offline)
        );
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let fx = Fixture::new(ConnectionState::Disconnected);
        let saved = {
            let queue = fx.queue(QueueConfig::default(), Arc::new(MockSender::default()));
            queue.enqueue_content_update("a").await;
            queue.enqueue_status_report(json!({ "up": true })).await;
            let actions = queue.actions.lock().await;
            ids(&actions)
        };

        let queue = fx.queue(QueueConfig::default(), Arc::new(MockSender::default()));
        let actions = queue.actions.lock().await;
        assert_eq!(ids(&actions), saved);
    }

    #[tokio::test]
    async fn test_corrupt_store_starts_empty() {
        let fx = Fixture::new(ConnectionState::Disconnected);
        fx.store.put(QUEUE_STORAGE_KEY, "[{\"broken\":").unwrap();
        let queue = fx.queue(QueueConfig::default(), Arc::new(MockSender::default()));
        assert_eq!(queue.get_queue_status().await.total, 0);
    }

    #[tokio::test]
    async fn test_clear_queue() {
        let fx = Fixture::new(ConnectionState::Disconnected);
        let sender = Arc::new(MockSender::default());
        let queue = fx.queue(QueueConfig::default(), sender.clone());
        queue.enqueue_content_update("a").await;
        queue.enqueue_content_update("b").await;

        assert_eq!(queue.clear_queue().await, 2);
        fx.set(ConnectionState::Connected);
        queue.process_queue().await;
        assert_eq!(sender.calls(), 0);

        let restored: Option<Vec<QueuedAction>> =
            load_json(fx.store.as_ref(), QUEUE_STORAGE_KEY).unwrap();
        assert_eq!(restored, Some(Vec::new()));
    }
}
