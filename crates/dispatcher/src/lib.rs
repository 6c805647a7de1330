//! # Dispatcher
//!
//! Threading primitives of the frame core.
//!
//! - `WaitingOn` / `InThread`: wait/signal cell safe against late signals
//! - `SingleConsumerQueue`: bounded queue with drop-oldest overflow
//! - `Dispatcher`: single worker thread executing queued actions
//! - `ActiveObject` / `Watchdog`: repeating operations on a dispatcher

pub mod active_object;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod waiting_on;

pub use active_object::{ActiveObject, Operation, Watchdog};
pub use dispatcher::{Action, CancellableTimer, Dispatcher, DropCallback};
pub use error::DispatcherError;
pub use metrics::{DispatcherMetrics, MetricsSnapshot};
pub use queue::{QueueDropCallback, SingleConsumerQueue};
pub use waiting_on::{InThread, ValueGuard, WaitingOn};
