//! FrameSource - archive registry and callback owner
//!
//! Owns one archive per stream key and the single frame callback. Every
//! public operation runs under one re-entrant lock, so a frame callback may
//! call back into the source (e.g. to allocate the next frame). The state
//! cell is never borrowed while user code runs: the callback is cloned out
//! first. `flush` only takes the lock to collect the archives and waits on
//! them after releasing it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use contracts::{
    invoke_guarded, CallbackResult, FrameHeader, FrameSourceConfig, PayloadKind, StreamKey,
};
use metrics::counter;
use parking_lot::ReentrantMutex;
use tracing::{debug, error, info, instrument, trace};

use crate::archive::{
    Archive, ArchiveFactory, ArchiveSettings, ArchiveStats, FrameArchiveFactory,
};
use crate::error::{FrameSourceError, Result};
use crate::frame::{CallbackToken, Frame, FrameHandle};
use crate::metadata::MetadataParsers;
use crate::option::FrameQueueSizeOption;
use crate::sensor::SensorRef;

/// Application frame callback; receives exclusive ownership of the frame
pub type FrameCallback = Arc<dyn Fn(Frame) -> CallbackResult + Send + Sync>;

#[derive(Default)]
struct SourceState {
    initialized: bool,
    supported: Vec<PayloadKind>,
    parsers: Option<Arc<MetadataParsers>>,
    archives: HashMap<StreamKey, Arc<dyn Archive>>,
    callback: Option<FrameCallback>,
    sensor: Option<SensorRef>,
}

/// Per-stream archive registry
pub struct FrameSource {
    state: ReentrantMutex<RefCell<SourceState>>,
    factory: Arc<dyn ArchiveFactory>,
    frame_queue_size: FrameQueueSizeOption,
    supported_payloads: Vec<PayloadKind>,
}

impl FrameSource {
    /// Frame source using the default [`FrameArchive`](crate::FrameArchive) pool
    pub fn new(config: &FrameSourceConfig) -> Self {
        let factory = FrameArchiveFactory::new(ArchiveSettings::from(config));
        Self::with_factory(config, Arc::new(factory))
    }

    /// Frame source using a custom archive factory
    pub fn with_factory(config: &FrameSourceConfig, factory: Arc<dyn ArchiveFactory>) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(SourceState::default())),
            factory,
            frame_queue_size: FrameQueueSizeOption::new(config.frame_queue_size),
            supported_payloads: config.supported_payloads(),
        }
    }

    /// Enable allocation with the given metadata parser table
    #[instrument(name = "frame_source_init", skip_all, fields(parsers = parsers.len()))]
    pub fn init(&self, parsers: Arc<MetadataParsers>) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.initialized {
            return Err(FrameSourceError::AlreadyInitialized);
        }

        state.supported = self.supported_payloads.clone();
        state.parsers = Some(parsers);
        state.initialized = true;
        debug!(supported = ?state.supported, "Frame source initialized");
        Ok(())
    }

    /// Whether `init` was called (and not undone by `reset`)
    pub fn is_initialized(&self) -> bool {
        self.state.lock().borrow().initialized
    }

    /// The `frame_queue_size` option shared by all archives
    pub fn frame_queue_size(&self) -> &FrameQueueSizeOption {
        &self.frame_queue_size
    }

    /// Archive of `key`, created on first use
    #[instrument(name = "frame_source_create_archive", skip(self), fields(key = %key))]
    pub fn create_archive(&self, key: StreamKey) -> Result<Arc<dyn Archive>> {
        let guard = self.state.lock();

        let (parsers, sensor) = {
            let state = guard.borrow();
            if !state.initialized {
                return Err(FrameSourceError::NotInitialized);
            }
            if let Some(archive) = state.archives.get(&key) {
                return Ok(Arc::clone(archive));
            }
            if !state.supported.contains(&key.payload) {
                return Err(FrameSourceError::unsupported_payload(key));
            }
            let parsers = state.parsers.clone().unwrap_or_default();
            (parsers, state.sensor.clone())
        };

        let archive = self
            .factory
            .create(key, self.frame_queue_size.shared(), parsers)
            .map_err(|e| FrameSourceError::archive_creation(key, e.to_string()))?;
        archive.set_sensor(sensor);

        guard
            .borrow_mut()
            .archives
            .insert(key, Arc::clone(&archive));
        info!(limit = self.frame_queue_size.get(), "Archive created");
        Ok(archive)
    }

    /// Existing archive of `key`, without creating one
    pub fn archive(&self, key: StreamKey) -> Option<Arc<dyn Archive>> {
        self.state.lock().borrow().archives.get(&key).cloned()
    }

    /// Allocate a frame for `key`
    ///
    /// The returned handle is empty when the archive refused the frame
    /// (publish limit reached or flushing).
    pub fn alloc_frame(
        &self,
        key: StreamKey,
        size: usize,
        header: FrameHeader,
        requires_memory: bool,
    ) -> Result<FrameHandle> {
        let _guard = self.state.lock();
        let archive = self.create_archive(key)?;
        Ok(FrameHandle::from(
            archive.alloc_and_track(size, header, requires_memory),
        ))
    }

    /// Scope token bounding the callback of one frame of `key`
    pub fn begin_callback(&self, key: StreamKey) -> Result<CallbackToken> {
        let _guard = self.state.lock();
        Ok(self.create_archive(key)?.begin_callback())
    }

    /// Register the frame callback, replacing any previous one
    pub fn set_callback(&self, callback: FrameCallback) {
        self.state.lock().borrow_mut().callback = Some(callback);
    }

    /// Remove the frame callback
    pub fn clear_callback(&self) {
        self.state.lock().borrow_mut().callback = None;
    }

    /// Currently registered callback
    pub fn get_callback(&self) -> Option<FrameCallback> {
        self.state.lock().borrow().callback.clone()
    }

    /// Hand a frame to the application callback
    ///
    /// The frame moves out of the handle and into the callback. Callback
    /// errors and panics are logged, never propagated. Without a callback the
    /// frame is released.
    pub fn invoke_callback(&self, mut handle: FrameHandle) {
        let _guard = self.state.lock();
        let Some(frame) = handle.take() else {
            return;
        };
        if !frame.is_owned() {
            trace!(id = frame.id(), "Detached frame ignored");
            return;
        }

        let Some(callback) = self.get_callback() else {
            trace!(key = %frame.key(), frame_number = frame.frame_number(), "No callback, frame released");
            return;
        };

        let key = frame.key();
        let frame_number = frame.frame_number();
        if let Err(e) = invoke_guarded(move || callback(frame)) {
            counter!("depthcore_frame_callback_failures_total", "stream" => key.to_string())
                .increment(1);
            error!(key = %key, frame_number, error = %e, "Frame callback failed");
        }
    }

    /// Attach a sensor to all current and future archives
    pub fn set_sensor(&self, sensor: SensorRef) {
        let guard = self.state.lock();
        let archives: Vec<Arc<dyn Archive>> = {
            let mut state = guard.borrow_mut();
            state.sensor = Some(sensor.clone());
            state.archives.values().cloned().collect()
        };
        for archive in archives {
            archive.set_sensor(Some(sensor.clone()));
        }
    }

    /// Flush every archive; true if all drained
    #[instrument(name = "frame_source_flush", skip(self))]
    pub fn flush(&self) -> bool {
        let archives: Vec<Arc<dyn Archive>> = {
            let guard = self.state.lock();
            let state = guard.borrow();
            state.archives.values().cloned().collect()
        };

        // outside the lock: the wait may outlast frames other threads publish
        let mut drained = true;
        for archive in archives {
            drained &= archive.flush();
        }
        debug!(drained, "Frame source flushed");
        drained
    }

    /// Drop the callback, the archives and the parser table
    #[instrument(name = "frame_source_reset", skip(self))]
    pub fn reset(&self) {
        let guard = self.state.lock();
        let released = {
            let mut state = guard.borrow_mut();
            state.initialized = false;
            state.supported.clear();
            state.parsers = None;
            (std::mem::take(&mut state.archives), state.callback.take())
        };
        debug!(archives = released.0.len(), "Frame source reset");
        // archives (and a callback owning resources) drop outside the borrow
        drop(released);
    }

    /// Counters of every archive
    pub fn stats(&self) -> Vec<(StreamKey, ArchiveStats)> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut stats: Vec<_> = state
            .archives
            .iter()
            .map(|(key, archive)| (*key, archive.stats()))
            .collect();
        stats.sort_by_key(|(key, _)| *key);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{sensor_ref, NamedSensor};
    use contracts::{ContractError, StreamKind};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn depth() -> StreamKey {
        StreamKey::for_stream(StreamKind::Depth)
    }

    fn initialized_source(config: &FrameSourceConfig) -> FrameSource {
        let source = FrameSource::new(config);
        source
            .init(Arc::new(MetadataParsers::with_header_defaults()))
            .unwrap();
        source
    }

    #[test]
    fn test_alloc_before_init_is_sequence_error() {
        let source = FrameSource::new(&FrameSourceConfig::default());
        let err = source
            .alloc_frame(depth(), 16, FrameHeader::default(), true)
            .unwrap_err();
        assert!(matches!(err, FrameSourceError::NotInitialized));

        let err: ContractError = err.into();
        assert!(matches!(err, ContractError::WrongApiCallSequence { .. }));
    }

    #[test]
    fn test_unsupported_payload_is_rejected() {
        let config = FrameSourceConfig {
            payload_kinds: vec![PayloadKind::Video],
            ..Default::default()
        };
        let source = initialized_source(&config);

        assert!(source.create_archive(StreamKey::for_stream(StreamKind::Color)).is_ok());
        let err = source.create_archive(depth()).err().unwrap();
        assert!(matches!(err, FrameSourceError::UnsupportedPayload { .. }));
    }

    #[test]
    fn test_archive_created_once_per_key() {
        let source = initialized_source(&FrameSourceConfig::default());
        let a = source.create_archive(depth()).unwrap();
        let b = source.create_archive(depth()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.stats().len(), 1);
    }

    #[test]
    fn test_factory_failure_is_runtime_error() {
        struct FailingFactory;
        impl ArchiveFactory for FailingFactory {
            fn create(
                &self,
                _key: StreamKey,
                _publish_limit: Arc<AtomicU32>,
                _parsers: Arc<MetadataParsers>,
            ) -> std::result::Result<Arc<dyn Archive>, ContractError> {
                Err(ContractError::runtime("pool exhausted"))
            }
        }

        let source =
            FrameSource::with_factory(&FrameSourceConfig::default(), Arc::new(FailingFactory));
        source.init(Arc::new(MetadataParsers::new())).unwrap();

        let err: ContractError = source.create_archive(depth()).err().unwrap().into();
        assert!(matches!(err, ContractError::Runtime { .. }));
    }

    #[test]
    fn test_callback_takes_ownership_without_duplicates() {
        let source = initialized_source(&FrameSourceConfig::default());
        source.frame_queue_size().set(1.0).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        source.set_callback(Arc::new(move |frame: Frame| {
            sink.lock().push(frame.id());
            Ok(())
        }));

        let a = source.alloc_frame(depth(), 32, FrameHeader::new(1, 0.0), true).unwrap();
        assert!(a.is_some());
        source.invoke_callback(a);

        let b = source.alloc_frame(depth(), 32, FrameHeader::new(2, 33.0), true).unwrap();
        assert!(b.is_some());
        source.invoke_callback(b);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
    }

    #[test]
    fn test_held_frame_blocks_next_allocation() {
        let source = initialized_source(&FrameSourceConfig::default());
        source.frame_queue_size().set(1.0).unwrap();

        let held = Arc::new(Mutex::new(Vec::new()));
        let keep = Arc::clone(&held);
        source.set_callback(Arc::new(move |frame: Frame| {
            keep.lock().push(frame);
            Ok(())
        }));

        let a = source.alloc_frame(depth(), 8, FrameHeader::new(1, 0.0), true).unwrap();
        source.invoke_callback(a);

        let b = source.alloc_frame(depth(), 8, FrameHeader::new(2, 1.0), true).unwrap();
        assert!(b.is_none());

        held.lock().clear();
        let c = source.alloc_frame(depth(), 8, FrameHeader::new(3, 2.0), true).unwrap();
        assert!(c.is_some());
    }

    #[test]
    fn test_failing_callback_is_contained() {
        let source = initialized_source(&FrameSourceConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        source.set_callback(Arc::new(move |frame: Frame| -> CallbackResult {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Err(format!("bad frame {}", frame.frame_number()).into());
            }
            panic!("callback panicked");
        }));

        for i in 0..2 {
            let frame = source.alloc_frame(depth(), 8, FrameHeader::new(i, 0.0), true).unwrap();
            source.invoke_callback(frame);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // both frames were released despite the failures
        assert_eq!(source.archive(depth()).unwrap().stats().published, 0);
    }

    #[test]
    fn test_without_callback_frame_is_released() {
        let source = initialized_source(&FrameSourceConfig::default());
        let frame = source.alloc_frame(depth(), 8, FrameHeader::new(1, 0.0), true).unwrap();
        source.invoke_callback(frame);

        let stats = source.archive(depth()).unwrap().stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.published, 0);
    }

    #[test]
    fn test_callback_may_reenter_source() {
        let source = Arc::new(initialized_source(&FrameSourceConfig::default()));
        let weak = Arc::downgrade(&source);
        let nested = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&nested);

        source.set_callback(Arc::new(move |frame: Frame| -> CallbackResult {
            let Some(source) = weak.upgrade() else {
                return Ok(());
            };
            if frame.frame_number() == 1 {
                let next = source.alloc_frame(frame.key(), 8, FrameHeader::new(2, 1.0), true)?;
                source.invoke_callback(next);
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let first = source.alloc_frame(depth(), 8, FrameHeader::new(1, 0.0), true).unwrap();
        source.invoke_callback(first);
        assert_eq!(nested.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_set_sensor_reaches_existing_and_new_archives() {
        let source = initialized_source(&FrameSourceConfig::default());
        let color = StreamKey::for_stream(StreamKind::Color);
        source.create_archive(depth()).unwrap();

        let sensor = NamedSensor::new("stereo module");
        source.set_sensor(sensor_ref(&sensor));

        for key in [depth(), color] {
            let mut handle = source.alloc_frame(key, 8, FrameHeader::new(1, 0.0), true).unwrap();
            let frame = handle.take().unwrap();
            assert_eq!(frame.sensor().unwrap().name(), "stereo module");
        }

        drop(sensor);
        let mut handle = source.alloc_frame(depth(), 8, FrameHeader::new(2, 0.0), true).unwrap();
        assert!(handle.take().unwrap().sensor().is_none());
    }

    #[test]
    fn test_flush_and_reset() {
        let source = initialized_source(&FrameSourceConfig::default());
        source.set_callback(Arc::new(|_frame: Frame| Ok(())));
        let frame = source.alloc_frame(depth(), 8, FrameHeader::new(1, 0.0), true).unwrap();
        source.invoke_callback(frame);

        assert!(source.flush());

        source.reset();
        assert!(!source.is_initialized());
        assert!(source.get_callback().is_none());
        assert!(source.stats().is_empty());
        assert!(matches!(
            source.create_archive(depth()),
            Err(FrameSourceError::NotInitialized)
        ));

        source.init(Arc::new(MetadataParsers::new())).unwrap();
        assert!(source.create_archive(depth()).is_ok());
    }

    #[test]
    fn test_flush_waiting_does_not_block_other_callers() {
        let config = FrameSourceConfig {
            flush_timeout_ms: 5000,
            ..Default::default()
        };
        let source = Arc::new(initialized_source(&config));

        let held = Arc::new(Mutex::new(Vec::new()));
        let keep = Arc::clone(&held);
        source.set_callback(Arc::new(move |frame: Frame| {
            keep.lock().push(frame);
            Ok(())
        }));
        let frame = source.alloc_frame(depth(), 8, FrameHeader::new(1, 0.0), true).unwrap();
        source.invoke_callback(frame);

        let flusher = {
            let source = Arc::clone(&source);
            thread::spawn(move || source.flush())
        };
        thread::sleep(Duration::from_millis(50));

        let begin = Instant::now();
        let color = StreamKey::for_stream(StreamKind::Color);
        assert!(source.create_archive(color).is_ok());
        assert_eq!(source.stats().len(), 2);
        assert!(begin.elapsed() < Duration::from_secs(1));
        assert!(!flusher.is_finished());

        held.lock().clear();
        assert!(flusher.join().unwrap());
    }

    #[test]
    fn test_double_init_rejected() {
        let source = initialized_source(&FrameSourceConfig::default());
        assert!(matches!(
            source.init(Arc::new(MetadataParsers::new())),
            Err(FrameSourceError::AlreadyInitialized)
        ));
    }
}
