//! Metadata syncer
//!
//! Joins frames with metadata that travelled on a separate channel. Frames
//! arrive from one thread in increasing key order; metadata arrives whenever
//! the transport delivers it, usually before its frame. Both queues are
//! bounded: a frame waits for its metadata only while the frame queue is
//! within `max_frame_queue_size`, metadata waits only while the metadata queue
//! is within `max_md_queue_size`.
//!
//! The join runs under one mutex on every enqueue, and callbacks run
//! synchronously on the enqueuing thread while that mutex is held. Callbacks
//! must stay cheap (or hand off to a dispatcher) and must not call back into
//! the same syncer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use contracts::{invoke_guarded, CallbackResult, Metadata, SyncKey, SyncerConfig};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use crate::holder::{FrameHolder, FrameReleaser};
use crate::queue::KeyedQueue;

/// Receives every frame leaving the syncer, with its metadata when matched
pub type FrameReadyCallback<F> =
    Arc<dyn Fn(FrameHolder<F>, Option<Metadata>) -> CallbackResult + Send + Sync>;

/// Receives metadata that can no longer match a frame
pub type MetadataDroppedCallback = Arc<dyn Fn(SyncKey, Metadata) -> CallbackResult + Send + Sync>;

/// Point-in-time syncer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncerStats {
    pub frames_enqueued: u64,
    pub metadata_enqueued: u64,
    /// Frames delivered together with their metadata
    pub matched: u64,
    /// Frames delivered without metadata
    pub without_metadata: u64,
    pub metadata_dropped: u64,
    pub callback_failures: u64,
    pub frame_queue_len: usize,
    pub md_queue_len: usize,
}

#[derive(Debug, Default)]
struct Counters {
    frames_enqueued: AtomicU64,
    metadata_enqueued: AtomicU64,
    matched: AtomicU64,
    without_metadata: AtomicU64,
    metadata_dropped: AtomicU64,
    callback_failures: AtomicU64,
}

struct Callbacks<F> {
    on_frame_ready: Option<FrameReadyCallback<F>>,
    on_metadata_dropped: Option<MetadataDroppedCallback>,
    on_frame_release: Option<FrameReleaser<F>>,
}

impl<F> Default for Callbacks<F> {
    fn default() -> Self {
        Self {
            on_frame_ready: None,
            on_metadata_dropped: None,
            on_frame_release: None,
        }
    }
}

impl<F> Clone for Callbacks<F> {
    fn clone(&self) -> Self {
        Self {
            on_frame_ready: self.on_frame_ready.clone(),
            on_metadata_dropped: self.on_metadata_dropped.clone(),
            on_frame_release: self.on_frame_release.clone(),
        }
    }
}

struct SyncState<F> {
    frames: KeyedQueue<FrameHolder<F>>,
    metadata: KeyedQueue<Metadata>,
    /// Key of the last frame accepted into the frame queue
    last_frame_key: Option<SyncKey>,
    /// Highest key of a frame that left the frame queue
    released_up_to: Option<SyncKey>,
}

/// Key-ordered join of frames and metadata
pub struct MetadataSyncer<F> {
    name: String,
    max_frame_queue_size: usize,
    max_md_queue_size: usize,
    state: Mutex<SyncState<F>>,
    callbacks: RwLock<Callbacks<F>>,
    counters: Counters,
}

impl<F> fmt::Debug for MetadataSyncer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataSyncer")
            .field("name", &self.name)
            .field("max_frame_queue_size", &self.max_frame_queue_size)
            .field("max_md_queue_size", &self.max_md_queue_size)
            .finish()
    }
}

impl<F> MetadataSyncer<F> {
    /// Syncer with the configured queue bounds
    pub fn new(name: impl Into<String>, config: &SyncerConfig) -> Self {
        Self::with_limits(name, config.max_frame_queue_size, config.max_md_queue_size)
    }

    /// Syncer with explicit queue bounds
    pub fn with_limits(
        name: impl Into<String>,
        max_frame_queue_size: usize,
        max_md_queue_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            max_frame_queue_size,
            max_md_queue_size,
            state: Mutex::new(SyncState {
                // one over the bound: the join runs right after each push
                frames: KeyedQueue::new(max_frame_queue_size + 1),
                metadata: KeyedQueue::new(max_md_queue_size + 1),
                last_frame_key: None,
                released_up_to: None,
            }),
            callbacks: RwLock::new(Callbacks::default()),
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_frame_queue_size(&self) -> usize {
        self.max_frame_queue_size
    }

    pub fn max_md_queue_size(&self) -> usize {
        self.max_md_queue_size
    }

    /// Register the frame delivery callback
    pub fn on_frame_ready(&self, callback: FrameReadyCallback<F>) {
        self.callbacks.write().on_frame_ready = Some(callback);
    }

    /// Register the dropped-metadata callback
    pub fn on_metadata_dropped(&self, callback: MetadataDroppedCallback) {
        self.callbacks.write().on_metadata_dropped = Some(callback);
    }

    /// Register how frames dropped unconsumed are released
    pub fn on_frame_release(&self, releaser: FrameReleaser<F>) {
        self.callbacks.write().on_frame_release = Some(releaser);
    }

    /// Wrap a frame in a holder using the registered releaser
    pub fn hold(&self, frame: F) -> FrameHolder<F> {
        match &self.callbacks.read().on_frame_release {
            Some(releaser) => FrameHolder::new(frame, Arc::clone(releaser)),
            None => FrameHolder::owned(frame),
        }
    }

    /// Add a frame; keys must increase from call to call
    pub fn enqueue_frame(&self, key: SyncKey, frame: FrameHolder<F>) {
        let callbacks = self.callbacks.read().clone();
        let mut state = self.state.lock();
        self.counters.frames_enqueued.fetch_add(1, Ordering::Relaxed);

        if let Some(last) = state.last_frame_key.filter(|last| key <= *last) {
            warn!(
                syncer = %self.name,
                key,
                last,
                "Frame key not increasing, delivering without metadata"
            );
            self.deliver(&callbacks, key, frame, None);
            return;
        }
        state.last_frame_key = Some(key);

        if let Err(frame) = state.frames.push(key, frame) {
            self.deliver(&callbacks, key, frame, None);
        }
        self.sync(&mut state, &callbacks);
    }

    /// Add metadata for the frame with the same key
    pub fn enqueue_metadata(&self, key: SyncKey, metadata: Metadata) {
        let callbacks = self.callbacks.read().clone();
        let mut state = self.state.lock();
        self.counters.metadata_enqueued.fetch_add(1, Ordering::Relaxed);

        // its frame already left the queue
        if state.released_up_to.is_some_and(|up_to| key <= up_to) {
            debug!(syncer = %self.name, key, "Late metadata, frame already delivered");
            self.drop_metadata(&callbacks, key, metadata);
            return;
        }

        if let Err(metadata) = state.metadata.push(key, metadata) {
            self.drop_metadata(&callbacks, key, metadata);
        }
        self.sync(&mut state, &callbacks);
    }

    /// Deliver every queued frame without metadata and drop queued metadata
    pub fn flush(&self) {
        let callbacks = self.callbacks.read().clone();
        let mut state = self.state.lock();

        while let Some((key, frame)) = state.frames.pop() {
            state.released_up_to = Some(key);
            self.deliver(&callbacks, key, frame, None);
        }
        while let Some((key, metadata)) = state.metadata.pop() {
            self.drop_metadata(&callbacks, key, metadata);
        }
    }

    /// Discard queued frames (released, not delivered) and metadata, and
    /// forget key history
    pub fn reset(&self) {
        let (frames, metadata) = {
            let mut state = self.state.lock();
            state.last_frame_key = None;
            state.released_up_to = None;
            (state.frames.drain(), state.metadata.drain())
        };
        debug!(
            syncer = %self.name,
            frames = frames.len(),
            metadata = metadata.len(),
            "Syncer reset"
        );
        // releasers run outside the lock
        drop(frames);
        drop(metadata);
    }

    pub fn stats(&self) -> SyncerStats {
        let (frame_queue_len, md_queue_len) = {
            let state = self.state.lock();
            (state.frames.len(), state.metadata.len())
        };
        SyncerStats {
            frames_enqueued: self.counters.frames_enqueued.load(Ordering::Relaxed),
            metadata_enqueued: self.counters.metadata_enqueued.load(Ordering::Relaxed),
            matched: self.counters.matched.load(Ordering::Relaxed),
            without_metadata: self.counters.without_metadata.load(Ordering::Relaxed),
            metadata_dropped: self.counters.metadata_dropped.load(Ordering::Relaxed),
            callback_failures: self.counters.callback_failures.load(Ordering::Relaxed),
            frame_queue_len,
            md_queue_len,
        }
    }

    fn sync(&self, state: &mut SyncState<F>, callbacks: &Callbacks<F>) {
        loop {
            if let (Some(frame_key), Some(md_key)) =
                (state.frames.front_key(), state.metadata.front_key())
            {
                if frame_key == md_key {
                    if let (Some((key, frame)), Some((_, metadata))) =
                        (state.frames.pop(), state.metadata.pop())
                    {
                        state.released_up_to = Some(key);
                        self.deliver(callbacks, key, frame, Some(metadata));
                    }
                    continue;
                }
                if md_key < frame_key {
                    // frames only move forward, this can never match
                    if let Some((key, metadata)) = state.metadata.pop() {
                        self.drop_metadata(callbacks, key, metadata);
                    }
                    continue;
                }
            }

            if state.frames.len() > self.max_frame_queue_size {
                if let Some((key, frame)) = state.frames.pop() {
                    state.released_up_to = Some(key);
                    self.deliver(callbacks, key, frame, None);
                }
                continue;
            }

            if state.metadata.len() > self.max_md_queue_size {
                if let Some((key, metadata)) = state.metadata.pop() {
                    self.drop_metadata(callbacks, key, metadata);
                }
                continue;
            }

            break;
        }
    }

    fn deliver(
        &self,
        callbacks: &Callbacks<F>,
        key: SyncKey,
        frame: FrameHolder<F>,
        metadata: Option<Metadata>,
    ) {
        if metadata.is_some() {
            self.counters.matched.fetch_add(1, Ordering::Relaxed);
            counter!("depthcore_syncer_matched_total", "syncer" => self.name.clone()).increment(1);
            trace!(syncer = %self.name, key, "Frame matched with metadata");
        } else {
            self.counters.without_metadata.fetch_add(1, Ordering::Relaxed);
            counter!(
                "depthcore_syncer_frames_without_metadata_total",
                "syncer" => self.name.clone()
            )
            .increment(1);
            debug!(syncer = %self.name, key, "Frame delivered without metadata");
        }

        let Some(callback) = &callbacks.on_frame_ready else {
            // nobody listening: the holder releases the frame
            return;
        };
        if let Err(e) = invoke_guarded(|| callback(frame, metadata)) {
            self.counters.callback_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                syncer = %self.name,
                boundary = "syncer.on_frame_ready",
                key,
                error = %e,
                "Frame ready callback failed"
            );
        }
    }

    fn drop_metadata(&self, callbacks: &Callbacks<F>, key: SyncKey, metadata: Metadata) {
        self.counters.metadata_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("depthcore_syncer_metadata_dropped_total", "syncer" => self.name.clone())
            .increment(1);
        trace!(syncer = %self.name, key, "Metadata dropped");

        let Some(callback) = &callbacks.on_metadata_dropped else {
            return;
        };
        if let Err(e) = invoke_guarded(|| callback(key, metadata)) {
            self.counters.callback_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                syncer = %self.name,
                boundary = "syncer.on_metadata_dropped",
                key,
                error = %e,
                "Metadata dropped callback failed"
            );
        }
    }
}
