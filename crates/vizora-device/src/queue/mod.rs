//! Device-side offline action queue.
//!
//! Events the device produces while offline are persisted and delivered to
//! the backend, in order and without duplicates, once a connection exists.

pub mod action;
pub mod manager;
pub mod sender;

pub use action::{ActionState, QueuedAction};
pub use manager::{DrainReport, EnqueueOutcome, OfflineActionQueue, QueueConfig, QueueStatus, SkipReason};
pub use sender::{ActionSender, HttpActionSender, SendError};
