//! Archive - per-stream frame pool
//!
//! One archive exists per [`StreamKey`]. It allocates frames, tracks which
//! of them are published (held by the application) and refuses new frames
//! once the publish limit is reached.
//!
//! [`FrameArchive`] is the default pool:
//! - Published frames are tracked in a `Slab`; the frame carries its slot
//! - Released payload buffers go to a freelist and are reused for frames of
//!   exactly the same size
//! - Freelist buffers older than `recycle_age` (relative to the new frame's
//!   timestamp) are discarded

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use contracts::{ContractError, FrameHeader, FrameSourceConfig, StreamKey};
use metrics::{counter, gauge};
use parking_lot::{Condvar, Mutex};
use slab::Slab;
use tracing::{debug, info, instrument, trace, warn};

use crate::frame::{CallbackToken, Frame, FrameOwner, ReleasedFrame};
use crate::metadata::MetadataParsers;
use crate::sensor::SensorRef;

/// Upper bound of buffers kept for recycling
const MAX_FREELIST: usize = contracts::MAX_FRAME_QUEUE_SIZE as usize;

/// Frame callbacks taking longer than this are reported
const CALLBACK_WARN_AFTER: Duration = Duration::from_millis(100);

/// Frame pool of one stream key
pub trait Archive: Send + Sync {
    /// Key this archive serves
    fn key(&self) -> StreamKey;

    /// Allocate and publish a frame
    ///
    /// Returns `None` when the publish limit is reached or the archive is
    /// flushing. With `requires_memory` the payload holds exactly `size` bytes.
    fn alloc_and_track(
        &self,
        size: usize,
        header: FrameHeader,
        requires_memory: bool,
    ) -> Option<Frame>;

    /// Scope token for one frame callback
    fn begin_callback(&self) -> CallbackToken;

    /// Sensor reference attached to frames allocated from now on
    fn set_sensor(&self, sensor: Option<SensorRef>);

    /// Wait until every published frame is released; true if drained
    fn flush(&self) -> bool;

    /// Counters
    fn stats(&self) -> ArchiveStats {
        ArchiveStats::default()
    }
}

/// Creates archives for a frame source
pub trait ArchiveFactory: Send + Sync {
    /// Create the archive of `key`
    ///
    /// `publish_limit` is the shared `frame_queue_size` value, read on every
    /// allocation.
    fn create(
        &self,
        key: StreamKey,
        publish_limit: Arc<AtomicU32>,
        parsers: Arc<MetadataParsers>,
    ) -> Result<Arc<dyn Archive>, ContractError>;
}

/// Archive counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Frames handed out
    pub allocated: u64,
    /// Frames currently published (not yet released)
    pub published: u64,
    /// Allocations refused (publish limit or flushing)
    pub dropped: u64,
    /// Allocations served from the freelist
    pub recycled: u64,
    /// Frames released back
    pub released: u64,
    /// Frame callbacks currently running
    pub in_callback: u64,
}

/// Tunables of [`FrameArchive`]
#[derive(Debug, Clone, Copy)]
pub struct ArchiveSettings {
    /// Freelist buffers older than this are discarded
    pub recycle_age_ms: f64,
    /// How long `flush` waits for published frames
    pub flush_timeout: Duration,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self::from(&FrameSourceConfig::default())
    }
}

impl From<&FrameSourceConfig> for ArchiveSettings {
    fn from(config: &FrameSourceConfig) -> Self {
        Self {
            recycle_age_ms: config.recycle_age_ms as f64,
            flush_timeout: Duration::from_millis(config.flush_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PublishedEntry {
    id: u64,
    frame_number: u64,
}

struct FreeBuffer {
    payload: BytesMut,
    timestamp: f64,
}

struct PoolState {
    published: Slab<PublishedEntry>,
    freelist: Vec<FreeBuffer>,
    flushing: bool,
    sensor: Option<SensorRef>,
}

#[derive(Default)]
struct Counters {
    allocated: AtomicU64,
    dropped: AtomicU64,
    recycled: AtomicU64,
    released: AtomicU64,
    in_callback: AtomicU64,
}

struct ArchiveInner {
    key: StreamKey,
    label: String,
    publish_limit: Arc<AtomicU32>,
    parsers: Arc<MetadataParsers>,
    settings: ArchiveSettings,
    state: Mutex<PoolState>,
    /// Signalled whenever a published frame is released
    released_cv: Condvar,
    next_id: AtomicU64,
    counters: Counters,
}

impl FrameOwner for ArchiveInner {
    fn release(&self, released: ReleasedFrame) {
        let mut state = self.state.lock();
        if state.published.try_remove(released.slot).is_none() {
            warn!(stream = %self.label, id = released.id, "Release of an untracked frame");
            return;
        }

        if released.payload.capacity() > 0 {
            if state.freelist.len() >= MAX_FREELIST {
                state.freelist.remove(0);
            }
            state.freelist.push(FreeBuffer {
                payload: released.payload,
                timestamp: released.header.timestamp,
            });
        }
        let published = state.published.len();
        drop(state);

        self.counters.released.fetch_add(1, Ordering::Relaxed);
        gauge!("depthcore_frames_published", "stream" => self.label.clone()).set(published as f64);
        trace!(
            stream = %self.label,
            id = released.id,
            frame_number = released.header.frame_number,
            "Frame released"
        );
        self.released_cv.notify_all();
    }
}

impl ArchiveInner {
    fn refuse(&self, reason: &'static str, header: &FrameHeader) -> Option<Frame> {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        counter!(
            "depthcore_frames_dropped_total",
            "stream" => self.label.clone(),
            "reason" => reason
        )
        .increment(1);
        debug!(
            stream = %self.label,
            frame_number = header.frame_number,
            reason,
            "Frame allocation refused"
        );
        None
    }

    /// Take a recycled buffer of `size` bytes, or allocate one
    fn payload_for(&self, state: &mut PoolState, size: usize) -> BytesMut {
        if let Some(pos) = state.freelist.iter().position(|b| b.payload.len() == size) {
            self.counters.recycled.fetch_add(1, Ordering::Relaxed);
            return state.freelist.swap_remove(pos).payload;
        }
        BytesMut::zeroed(size)
    }
}

/// Default pooled archive
#[derive(Clone)]
pub struct FrameArchive {
    inner: Arc<ArchiveInner>,
}

impl FrameArchive {
    /// Create an archive for `key`
    pub fn new(
        key: StreamKey,
        publish_limit: Arc<AtomicU32>,
        parsers: Arc<MetadataParsers>,
        settings: ArchiveSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ArchiveInner {
                key,
                label: key.to_string(),
                publish_limit,
                parsers,
                settings,
                state: Mutex::new(PoolState {
                    published: Slab::new(),
                    freelist: Vec::new(),
                    flushing: false,
                    sensor: None,
                }),
                released_cv: Condvar::new(),
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    /// Number of published frames
    pub fn published_count(&self) -> usize {
        self.inner.state.lock().published.len()
    }

    /// Number of buffers waiting for reuse
    pub fn freelist_len(&self) -> usize {
        self.inner.state.lock().freelist.len()
    }

    /// Flush with an explicit timeout
    #[instrument(name = "archive_flush", skip(self), fields(stream = %self.inner.label))]
    pub fn flush_within(&self, timeout: Duration) -> bool {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        state.flushing = true;

        inner
            .released_cv
            .wait_while_for(&mut state, |s| !s.published.is_empty(), timeout);

        let drained = state.published.is_empty();
        if !drained {
            let outstanding: Vec<u64> = state.published.iter().map(|(_, e)| e.frame_number).collect();
            let ids: Vec<u64> = state.published.iter().map(|(_, e)| e.id).collect();
            warn!(
                outstanding = ?outstanding,
                ids = ?ids,
                "Archive flush timed out with frames still held by the application"
            );
        }

        state.freelist.clear();
        state.flushing = false;
        drained
    }
}

impl Archive for FrameArchive {
    fn key(&self) -> StreamKey {
        self.inner.key
    }

    fn alloc_and_track(
        &self,
        size: usize,
        header: FrameHeader,
        requires_memory: bool,
    ) -> Option<Frame> {
        let inner = &self.inner;
        let limit = inner.publish_limit.load(Ordering::Acquire) as usize;

        let mut state = inner.state.lock();
        if state.flushing {
            drop(state);
            return inner.refuse("flushing", &header);
        }
        if state.published.len() >= limit {
            drop(state);
            return inner.refuse("publish_limit", &header);
        }

        let payload = if requires_memory {
            inner.payload_for(&mut state, size)
        } else {
            BytesMut::new()
        };

        let recycle_age = inner.settings.recycle_age_ms;
        state
            .freelist
            .retain(|b| header.timestamp <= b.timestamp + recycle_age);

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = state.published.insert(PublishedEntry {
            id,
            frame_number: header.frame_number,
        });
        let sensor = state.sensor.clone();
        let published = state.published.len();
        drop(state);

        inner.counters.allocated.fetch_add(1, Ordering::Relaxed);
        counter!("depthcore_frames_allocated_total", "stream" => inner.label.clone()).increment(1);
        gauge!("depthcore_frames_published", "stream" => inner.label.clone()).set(published as f64);

        let owner: Arc<dyn FrameOwner> = self.inner.clone();
        Some(
            Frame::new(id, inner.key, header, payload, Arc::clone(&inner.parsers))
                .with_owner(owner, slot)
                .with_sensor(sensor),
        )
    }

    fn begin_callback(&self) -> CallbackToken {
        let inner = Arc::clone(&self.inner);
        inner.counters.in_callback.fetch_add(1, Ordering::Relaxed);
        CallbackToken::new(move |elapsed| {
            inner.counters.in_callback.fetch_sub(1, Ordering::Relaxed);
            if elapsed > CALLBACK_WARN_AFTER {
                info!(
                    stream = %inner.label,
                    duration_ms = elapsed.as_millis() as u64,
                    "Frame callback took too long to complete"
                );
            }
        })
    }

    fn set_sensor(&self, sensor: Option<SensorRef>) {
        self.inner.state.lock().sensor = sensor;
    }

    fn flush(&self) -> bool {
        self.flush_within(self.inner.settings.flush_timeout)
    }

    fn stats(&self) -> ArchiveStats {
        let counters = &self.inner.counters;
        ArchiveStats {
            allocated: counters.allocated.load(Ordering::Relaxed),
            published: self.published_count() as u64,
            dropped: counters.dropped.load(Ordering::Relaxed),
            recycled: counters.recycled.load(Ordering::Relaxed),
            released: counters.released.load(Ordering::Relaxed),
            in_callback: counters.in_callback.load(Ordering::Relaxed),
        }
    }
}

/// Factory of [`FrameArchive`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameArchiveFactory {
    settings: ArchiveSettings,
}

impl FrameArchiveFactory {
    pub fn new(settings: ArchiveSettings) -> Self {
        Self { settings }
    }
}

impl ArchiveFactory for FrameArchiveFactory {
    fn create(
        &self,
        key: StreamKey,
        publish_limit: Arc<AtomicU32>,
        parsers: Arc<MetadataParsers>,
    ) -> Result<Arc<dyn Archive>, ContractError> {
        Ok(Arc::new(FrameArchive::new(
            key,
            publish_limit,
            parsers,
            self.settings,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::StreamKind;
    use std::thread;

    fn archive(limit: u32) -> FrameArchive {
        FrameArchive::new(
            StreamKey::for_stream(StreamKind::Depth),
            Arc::new(AtomicU32::new(limit)),
            Arc::new(MetadataParsers::new()),
            ArchiveSettings {
                recycle_age_ms: 1000.0,
                flush_timeout: Duration::from_millis(200),
            },
        )
    }

    #[test]
    fn test_publish_limit_refuses_and_recovers() {
        let archive = archive(2);

        let a = archive.alloc_and_track(64, FrameHeader::new(1, 0.0), true).unwrap();
        let b = archive.alloc_and_track(64, FrameHeader::new(2, 10.0), true).unwrap();
        assert!(archive.alloc_and_track(64, FrameHeader::new(3, 20.0), true).is_none());
        assert_ne!(a.id(), b.id());

        drop(a);
        let c = archive.alloc_and_track(64, FrameHeader::new(4, 30.0), true).unwrap();
        assert_eq!(c.size(), 64);

        let stats = archive.stats();
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.recycled, 1);
        assert_eq!(stats.released, 1);
    }

    #[test]
    fn test_limit_change_applies_to_next_allocation() {
        let archive = archive(1);
        let limit = Arc::clone(&archive.inner.publish_limit);

        let _a = archive.alloc_and_track(8, FrameHeader::new(1, 0.0), true).unwrap();
        assert!(archive.alloc_and_track(8, FrameHeader::new(2, 0.0), true).is_none());

        limit.store(3, Ordering::Release);
        assert!(archive.alloc_and_track(8, FrameHeader::new(3, 0.0), true).is_some());

        limit.store(0, Ordering::Release);
        assert!(archive.alloc_and_track(8, FrameHeader::new(4, 0.0), true).is_none());
    }

    #[test]
    fn test_freelist_recycles_only_same_size() {
        let archive = archive(4);

        drop(archive.alloc_and_track(32, FrameHeader::new(1, 0.0), true).unwrap());
        assert_eq!(archive.freelist_len(), 1);

        let other = archive.alloc_and_track(16, FrameHeader::new(2, 1.0), true).unwrap();
        assert_eq!(other.size(), 16);
        assert_eq!(archive.freelist_len(), 1);

        let same = archive.alloc_and_track(32, FrameHeader::new(3, 2.0), true).unwrap();
        assert_eq!(same.size(), 32);
        assert_eq!(archive.freelist_len(), 0);
        assert_eq!(archive.stats().recycled, 1);
    }

    #[test]
    fn test_freelist_discards_stale_buffers() {
        let archive = archive(4);

        drop(archive.alloc_and_track(32, FrameHeader::new(1, 0.0), true).unwrap());
        assert_eq!(archive.freelist_len(), 1);

        let late = archive.alloc_and_track(16, FrameHeader::new(2, 1500.0), true).unwrap();
        assert_eq!(archive.freelist_len(), 0);
        drop(late);
    }

    #[test]
    fn test_no_memory_frames_have_empty_payload() {
        let archive = archive(4);
        let frame = archive.alloc_and_track(1024, FrameHeader::new(1, 0.0), false).unwrap();
        assert_eq!(frame.size(), 0);
    }

    #[test]
    fn test_flush_waits_for_release() {
        let archive = archive(4);
        let frame = archive.alloc_and_track(8, FrameHeader::new(1, 0.0), true).unwrap();

        let holder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            drop(frame);
        });

        assert!(archive.flush_within(Duration::from_secs(5)));
        assert_eq!(archive.published_count(), 0);
        holder.join().unwrap();
    }

    #[test]
    fn test_flush_times_out_then_resumes() {
        let archive = archive(4);
        let held = archive.alloc_and_track(8, FrameHeader::new(1, 0.0), true).unwrap();

        assert!(!archive.flush());
        assert!(archive.alloc_and_track(8, FrameHeader::new(2, 0.0), true).is_some());
        drop(held);
    }

    #[test]
    fn test_callback_token_tracks_in_callback() {
        let archive = archive(4);
        let token = archive.begin_callback();
        assert_eq!(archive.stats().in_callback, 1);
        drop(token);
        assert_eq!(archive.stats().in_callback, 0);
    }
}
