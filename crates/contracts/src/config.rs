//! CoreConfig - Config Loader output
//!
//! Tunables of the frame core plus the stream set used by the simulated
//! capture pipeline.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{PayloadKind, StreamKey, StreamKind};

/// Upper bound of the `frame_queue_size` option
pub const MAX_FRAME_QUEUE_SIZE: u32 = 32;

/// Default of the `frame_queue_size` option
pub const DEFAULT_FRAME_QUEUE_SIZE: u32 = 16;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CoreConfig {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Dispatcher tuning
    #[serde(default)]
    #[validate(nested)]
    pub dispatcher: DispatcherConfig,

    /// Metadata syncer tuning
    #[serde(default)]
    #[validate(nested)]
    pub syncer: SyncerConfig,

    /// Frame source tuning
    #[serde(default)]
    #[validate(nested)]
    pub frame_source: FrameSourceConfig,

    /// Streams produced by the capture simulation
    #[serde(default)]
    #[validate(nested)]
    pub streams: Vec<StreamConfig>,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Queue capacity (pending actions)
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// How long the worker waits for "started" before re-checking liveness
    #[validate(range(min = 1))]
    pub poll_timeout_ms: u64,

    /// Default flush timeout
    pub flush_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            poll_timeout_ms: 50,
            flush_timeout_ms: 10_000,
        }
    }
}

/// Metadata syncer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SyncerConfig {
    /// Frames held waiting for metadata before the oldest is released without it
    pub max_frame_queue_size: usize,

    /// Metadata held waiting for its frame before the oldest is dropped
    #[validate(range(min = 1))]
    pub max_md_queue_size: usize,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            max_frame_queue_size: 2,
            max_md_queue_size: 8,
        }
    }
}

/// Frame source configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FrameSourceConfig {
    /// Initial `frame_queue_size` option value (max published frames per archive)
    #[validate(range(max = 32))]
    pub frame_queue_size: u32,

    /// Freelist buffers older than this (relative to a new frame) are discarded
    pub recycle_age_ms: u64,

    /// How long `flush` waits for published frames to be released
    pub flush_timeout_ms: u64,

    /// Payload kinds the frame source accepts (empty = all)
    pub payload_kinds: Vec<PayloadKind>,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            frame_queue_size: DEFAULT_FRAME_QUEUE_SIZE,
            recycle_age_ms: 1000,
            flush_timeout_ms: 1000,
            payload_kinds: Vec::new(),
        }
    }
}

impl FrameSourceConfig {
    /// Payload kinds accepted by the frame source
    pub fn supported_payloads(&self) -> Vec<PayloadKind> {
        if self.payload_kinds.is_empty() {
            PayloadKind::ALL.to_vec()
        } else {
            self.payload_kinds.clone()
        }
    }
}

/// One simulated stream
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StreamConfig {
    /// Unique stream name
    #[validate(length(min = 1))]
    pub name: String,

    /// Stream kind
    pub stream_kind: StreamKind,

    /// Payload kind (defaults to the stream's default payload)
    #[serde(default)]
    pub payload_kind: Option<PayloadKind>,

    /// Frames per second, must be > 0
    #[validate(range(exclusive_min = 0.0))]
    pub fps: f64,

    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Bytes per pixel
    #[serde(default = "default_bpp")]
    #[validate(range(min = 1))]
    pub bytes_per_pixel: u32,

    /// Whether metadata travels on a separate channel and must be synced
    #[serde(default)]
    pub metadata: bool,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_bpp() -> u32 {
    2
}

impl StreamConfig {
    /// Archive key of this stream
    pub fn key(&self) -> StreamKey {
        StreamKey::new(
            self.stream_kind,
            self.payload_kind
                .unwrap_or_else(|| self.stream_kind.default_payload()),
        )
    }

    /// Payload size of one frame in bytes
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }
}
