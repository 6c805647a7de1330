//! # Sync Engine
//!
//! Joins frames with metadata delivered on a separate channel.
//!
//! Responsibilities:
//! - Key-ordered join with bounded frame and metadata queues
//! - Release of frames nobody consumed
//! - Applying network metadata (frame numbers, metadata fields) to frames
//!
//! ## Usage
//!
//! ```ignore
//! use sync_engine::MetadataSyncer;
//!
//! let syncer = MetadataSyncer::new("depth", &config.syncer);
//! syncer.on_frame_ready(Arc::new(|frame, md| {
//!     // hand off to a dispatcher
//!     Ok(())
//! }));
//!
//! // capture thread
//! syncer.enqueue_frame(key, syncer.hold(frame));
//! // network thread
//! syncer.enqueue_metadata(key, md);
//! ```

pub mod apply;
mod holder;
mod queue;
mod syncer;

pub use apply::{apply_metadata, FrameNumbering};
pub use holder::{FrameHolder, FrameReleaser};
pub use syncer::{FrameReadyCallback, MetadataDroppedCallback, MetadataSyncer, SyncerStats};

pub use contracts::{Metadata, SyncKey, SyncerConfig};
