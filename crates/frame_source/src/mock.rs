//! Mock capture stream
//!
//! Produces frames for one stream key at a fixed rate on its own thread,
//! through the regular producer path of a [`FrameSource`]:
//! `alloc_frame` -> fill -> `begin_callback` -> `invoke_callback`.
//! Streams whose metadata travels separately emit it to a sink before the
//! frame, the way network metadata usually arrives first.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use contracts::{
    FrameHeader, Metadata, MetadataBlob, MetadataField, StreamConfig, StreamKey, SyncKey,
    TimestampDomain,
};
use serde_json::json;
use tracing::{debug, error, trace};

use crate::error::{FrameSourceError, Result};
use crate::source::FrameSource;

/// Receives metadata sent on the separate channel
pub type MetadataSink = Arc<dyn Fn(SyncKey, Metadata) + Send + Sync>;

/// Mock stream configuration
#[derive(Debug, Clone)]
pub struct MockStreamConfig {
    /// Stream name (also the thread name)
    pub name: String,

    /// Archive key
    pub key: StreamKey,

    /// Frames per second
    pub fps: f64,

    /// Payload size in bytes
    pub frame_size: usize,

    /// Clock domain stamped on frames
    pub timestamp_domain: TimestampDomain,

    /// Stop after this many frames
    pub max_frames: Option<u64>,
}

impl Default for MockStreamConfig {
    fn default() -> Self {
        Self {
            name: "mock_stream".to_string(),
            key: StreamKey::for_stream(contracts::StreamKind::Depth),
            fps: 30.0,
            frame_size: 640 * 480 * 2,
            timestamp_domain: TimestampDomain::HardwareClock,
            max_frames: None,
        }
    }
}

impl From<&StreamConfig> for MockStreamConfig {
    fn from(stream: &StreamConfig) -> Self {
        Self {
            name: stream.name.clone(),
            key: stream.key(),
            fps: stream.fps,
            frame_size: stream.frame_size(),
            ..Default::default()
        }
    }
}

/// Simulated device metadata of one frame, in network form
pub fn simulated_metadata(header: &FrameHeader, fps: f64) -> serde_json::Value {
    json!({
        "header": {
            "frame_number": header.frame_number,
            "timestamp_domain": header.timestamp_domain.as_str(),
        },
        "metadata": {
            "frame_counter": header.frame_number,
            "frame_timestamp": (header.timestamp * 1000.0) as i64,
            "actual_exposure": 8500,
            "gain_level": 16,
            "temperature": 38,
            "actual_fps": fps.round() as i64,
        }
    })
}

fn simulated_blob(header: &FrameHeader, fps: f64) -> MetadataBlob {
    let mut blob = MetadataBlob::new();
    if let Ok(counter) = i64::try_from(header.frame_number) {
        blob.set(MetadataField::FrameCounter, counter);
    }
    blob.set(MetadataField::ActualExposure, 8500);
    blob.set(MetadataField::GainLevel, 16);
    blob.set(MetadataField::ActualFps, fps.round() as i64);
    blob
}

fn epoch_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Frame-producing thread for one stream
pub struct MockStream {
    config: MockStreamConfig,
    source: Arc<FrameSource>,
    metadata_sink: Option<MetadataSink>,
    running: Arc<AtomicBool>,
    produced: Arc<AtomicU64>,
    refused: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl MockStream {
    /// Create a stopped stream feeding `source`
    pub fn new(config: MockStreamConfig, source: Arc<FrameSource>) -> Self {
        Self {
            config,
            source,
            metadata_sink: None,
            running: Arc::new(AtomicBool::new(false)),
            produced: Arc::new(AtomicU64::new(0)),
            refused: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    /// Send metadata through `sink` instead of embedding it in frames
    pub fn with_metadata_sink(mut self, sink: MetadataSink) -> Self {
        self.metadata_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &MockStreamConfig {
        &self.config
    }

    /// Start producing; no-op when already running
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // a previous run that ended by itself
        self.join_worker();

        let config = self.config.clone();
        let source = Arc::clone(&self.source);
        let sink = self.metadata_sink.clone();
        let running = Arc::clone(&self.running);
        let produced = Arc::clone(&self.produced);
        let refused = Arc::clone(&self.refused);

        let worker = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || capture_loop(config, source, sink, running, produced, refused))
            .map_err(|source| {
                self.running.store(false, Ordering::SeqCst);
                FrameSourceError::Spawn {
                    name: self.config.name.clone(),
                    source,
                }
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop producing and join the capture thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(stream = %self.config.name, "Capture thread panicked");
            }
        }
    }

    /// Whether the capture thread is producing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Frames handed to the frame source callback
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Frames the archive refused (publish limit or flushing)
    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears the running flag however the capture thread ends
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn capture_loop(
    config: MockStreamConfig,
    source: Arc<FrameSource>,
    sink: Option<MetadataSink>,
    running: Arc<AtomicBool>,
    produced: Arc<AtomicU64>,
    refused: Arc<AtomicU64>,
) {
    let _running_guard = RunningGuard(Arc::clone(&running));
    let interval = Duration::from_secs_f64(1.0 / config.fps.max(0.001));
    let started = Instant::now();
    let mut next_due = started;
    let mut frame_number: u64 = 0;

    debug!(
        stream = %config.name,
        key = %config.key,
        fps = config.fps,
        "Mock stream started"
    );

    while running.load(Ordering::Relaxed) {
        if config.max_frames.is_some_and(|max| frame_number >= max) {
            break;
        }
        frame_number += 1;

        let mut header = FrameHeader::new(frame_number, started.elapsed().as_secs_f64() * 1000.0);
        header.timestamp_domain = config.timestamp_domain;
        header.system_time = epoch_ms();
        header.raw_size = config.frame_size;

        if let Some(sink) = &sink {
            sink(
                header.sync_key(),
                Arc::new(simulated_metadata(&header, config.fps)),
            );
        }

        let blob = simulated_blob(&header, config.fps);
        match source.alloc_frame(config.key, config.frame_size, header, true) {
            Ok(mut handle) => {
                if let Some(frame) = handle.as_mut() {
                    frame.data_mut().fill(frame_number as u8);
                    if sink.is_none() {
                        *frame.metadata_blob_mut() = blob;
                    }
                    match source.begin_callback(config.key) {
                        Ok(_token) => source.invoke_callback(handle),
                        Err(e) => error!(stream = %config.name, error = %e, "begin_callback failed"),
                    }
                    produced.fetch_add(1, Ordering::Relaxed);
                } else {
                    refused.fetch_add(1, Ordering::Relaxed);
                    trace!(stream = %config.name, frame_number, "Frame refused by archive");
                }
            }
            Err(e) => {
                error!(stream = %config.name, error = %e, "Frame allocation failed, stopping");
                break;
            }
        }

        next_due += interval;
        let now = Instant::now();
        if now > next_due + interval {
            // fell behind; don't burst to catch up
            next_due = now;
        }
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= next_due {
                break;
            }
            thread::sleep((next_due - now).min(Duration::from_millis(5)));
        }
    }

    debug!(stream = %config.name, frames = frame_number, "Mock stream stopped");
}
