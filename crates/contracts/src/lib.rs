//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the frame core.
//! All business crates depend only on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Frame timestamps are milliseconds (`f64`) in the domain named by [`TimestampDomain`]
//! - [`SyncKey`] is the nanosecond capture timestamp used to join frames with
//!   metadata that travelled on a separate channel

mod config;
mod error;
mod frame;
mod stream;
mod sync;

pub use config::*;
pub use error::*;
pub use frame::*;
pub use stream::*;
pub use sync::*;
