//! # vizora-shared
//!
//! Types shared between the Vizora backend and the playback device agent:
//! pairing session views, device identity, outbound action types, the JSON
//! messages carried over the pairing event channel, and a small clock
//! abstraction so expiry logic can be driven deterministically in tests.

pub mod clock;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SharedError;
