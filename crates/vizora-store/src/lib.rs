//! # vizora-store
//!
//! Device-local durable storage for the Vizora playback agent, backed by
//! SQLite.
//!
//! The device keeps a handful of small documents that must survive reboots
//! and long offline stretches: the pending offline action queue and the
//! credentials obtained from pairing. Both live in a single key/value table.
//! The crate exposes a synchronous [`Database`] handle plus the
//! [`KeyValueStore`] trait that the device components are written against,
//! so tests can swap in [`MemoryStore`].

pub mod credentials;
pub mod database;
pub mod kv;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use kv::{KeyValueStore, MemoryStore, SharedDatabase};
