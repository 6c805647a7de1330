//! # Frame Source
//!
//! Frame lifecycle of the capture path.
//!
//! Responsibilities:
//! - One archive (frame pool) per stream key, created on first use
//! - Publication limit (`frame_queue_size` option) per archive
//! - Exactly-once hand-off of frame ownership to the application callback
//! - Mock capture streams for tests and the simulated pipeline

pub mod archive;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod mock;
pub mod option;
pub mod sensor;
pub mod source;

pub use archive::{
    Archive, ArchiveFactory, ArchiveSettings, ArchiveStats, FrameArchive, FrameArchiveFactory,
};
pub use error::FrameSourceError;
pub use frame::{CallbackToken, Frame, FrameHandle, FrameOwner, ReleasedFrame};
pub use metadata::{HeaderParser, MetadataParser, MetadataParsers};
pub use mock::{simulated_metadata, MetadataSink, MockStream, MockStreamConfig};
pub use option::{FrameQueueSizeOption, OptionRange};
pub use sensor::{sensor_ref, NamedSensor, Sensor, SensorRef};
pub use source::{FrameCallback, FrameSource};
