//! Frame - uniquely owned captured frame
//!
//! A frame is owned by exactly one party at a time (producer, archive or
//! application callback). Ownership moves; frames are never cloned. Dropping a
//! frame that belongs to an archive releases it back to that archive exactly
//! once.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use contracts::{FrameHeader, MetadataBlob, MetadataField, StreamKey};

use crate::metadata::MetadataParsers;
use crate::sensor::{Sensor, SensorRef};

/// Receives frames released by the application
pub trait FrameOwner: Send + Sync {
    /// Take back a frame's resources
    fn release(&self, released: ReleasedFrame);
}

/// What an owner gets back when one of its frames is dropped
#[derive(Debug)]
pub struct ReleasedFrame {
    /// Owner-assigned slot of the frame
    pub slot: usize,
    /// Frame id
    pub id: u64,
    /// Payload buffer, for recycling
    pub payload: BytesMut,
    /// Header at release time
    pub header: FrameHeader,
}

/// One captured frame
pub struct Frame {
    id: u64,
    key: StreamKey,
    header: FrameHeader,
    payload: BytesMut,
    blob: MetadataBlob,
    parsers: Arc<MetadataParsers>,
    sensor: Option<SensorRef>,
    owner: Option<(Arc<dyn FrameOwner>, usize)>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("frame_number", &self.header.frame_number)
            .field("timestamp", &self.header.timestamp)
            .field("size", &self.payload.len())
            .field("owned", &self.owner.is_some())
            .finish()
    }
}

impl Frame {
    /// Create a detached frame (no owner to release to)
    pub fn new(
        id: u64,
        key: StreamKey,
        header: FrameHeader,
        payload: BytesMut,
        parsers: Arc<MetadataParsers>,
    ) -> Self {
        Self {
            id,
            key,
            header,
            payload,
            blob: MetadataBlob::new(),
            parsers,
            sensor: None,
            owner: None,
        }
    }

    /// Attach the owner this frame is released to on drop
    pub fn with_owner(mut self, owner: Arc<dyn FrameOwner>, slot: usize) -> Self {
        self.owner = Some((owner, slot));
        self
    }

    /// Attach the producing sensor
    pub fn with_sensor(mut self, sensor: Option<SensorRef>) -> Self {
        self.sensor = sensor;
        self
    }

    /// Unique id within the archive that allocated the frame
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Archive key
    pub fn key(&self) -> StreamKey {
        self.key
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    /// Frame number
    pub fn frame_number(&self) -> u64 {
        self.header.frame_number
    }

    /// Capture timestamp (milliseconds)
    pub fn timestamp(&self) -> f64 {
        self.header.timestamp
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    /// Mutable payload bytes, filled by the producer before publication
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Raw metadata values
    pub fn metadata_blob(&self) -> &MetadataBlob {
        &self.blob
    }

    pub fn metadata_blob_mut(&mut self) -> &mut MetadataBlob {
        &mut self.blob
    }

    /// Value of a metadata field: the blob first, then the parser table
    pub fn metadata(&self, field: MetadataField) -> Option<i64> {
        self.blob
            .get(field)
            .or_else(|| self.parsers.get(field).and_then(|p| p.parse(self)))
    }

    /// Whether a metadata field is available for this frame
    pub fn supports_metadata(&self, field: MetadataField) -> bool {
        self.blob.get(field).is_some()
            || self
                .parsers
                .get(field)
                .is_some_and(|p| p.supports(self))
    }

    /// Producing sensor, if still alive
    pub fn sensor(&self) -> Option<Arc<dyn Sensor>> {
        self.sensor.as_ref().and_then(|s| s.upgrade())
    }

    /// Whether an archive still backs this frame
    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some((owner, slot)) = self.owner.take() {
            owner.release(ReleasedFrame {
                slot,
                id: self.id,
                payload: std::mem::take(&mut self.payload),
                header: self.header.clone(),
            });
        }
    }
}

/// Producer-side holder of a frame not yet handed to the application
///
/// Empty when the archive refused the allocation. `take` moves the frame out,
/// leaving the holder empty.
#[derive(Debug, Default)]
pub struct FrameHandle {
    frame: Option<Frame>,
}

impl FrameHandle {
    pub fn new(frame: Frame) -> Self {
        Self { frame: Some(frame) }
    }

    /// Holder with no frame
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_some(&self) -> bool {
        self.frame.is_some()
    }

    pub fn is_none(&self) -> bool {
        self.frame.is_none()
    }

    /// Move the frame out
    pub fn take(&mut self) -> Option<Frame> {
        self.frame.take()
    }

    pub fn as_ref(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn as_mut(&mut self) -> Option<&mut Frame> {
        self.frame.as_mut()
    }
}

impl From<Option<Frame>> for FrameHandle {
    fn from(frame: Option<Frame>) -> Self {
        Self { frame }
    }
}

/// Scope of one frame callback
///
/// Runs its completion hook with the elapsed time when dropped, on every exit
/// path.
pub struct CallbackToken {
    started: Instant,
    on_end: Option<Box<dyn FnOnce(Duration) + Send>>,
}

impl fmt::Debug for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackToken")
            .field("elapsed", &self.started.elapsed())
            .finish()
    }
}

impl CallbackToken {
    /// Token running `on_end` when dropped
    pub fn new<F>(on_end: F) -> Self
    where
        F: FnOnce(Duration) + Send + 'static,
    {
        Self {
            started: Instant::now(),
            on_end: Some(Box::new(on_end)),
        }
    }

    /// Token with no completion hook
    pub fn noop() -> Self {
        Self {
            started: Instant::now(),
            on_end: None,
        }
    }

    /// Time since the callback began
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for CallbackToken {
    fn drop(&mut self) {
        if let Some(on_end) = self.on_end.take() {
            on_end(self.started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::StreamKind;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingOwner {
        released: Mutex<Vec<(usize, u64, usize)>>,
    }

    impl FrameOwner for RecordingOwner {
        fn release(&self, released: ReleasedFrame) {
            self.released
                .lock()
                .push((released.slot, released.id, released.payload.len()));
        }
    }

    fn owned_frame(owner: &Arc<RecordingOwner>, id: u64, slot: usize) -> Frame {
        let owner: Arc<dyn FrameOwner> = owner.clone();
        Frame::new(
            id,
            StreamKey::for_stream(StreamKind::Color),
            FrameHeader::new(id, 0.0),
            BytesMut::zeroed(16),
            Arc::new(MetadataParsers::new()),
        )
        .with_owner(owner, slot)
    }

    #[test]
    fn test_drop_releases_exactly_once() {
        let owner = Arc::new(RecordingOwner::default());
        let frame = owned_frame(&owner, 9, 3);
        assert!(frame.is_owned());

        drop(frame);
        assert_eq!(*owner.released.lock(), vec![(3, 9, 16)]);
    }

    #[test]
    fn test_handle_take_moves_ownership() {
        let owner = Arc::new(RecordingOwner::default());
        let mut handle = FrameHandle::new(owned_frame(&owner, 1, 0));

        let frame = handle.take().unwrap();
        assert!(handle.is_none());
        assert!(handle.take().is_none());

        drop(handle);
        assert!(owner.released.lock().is_empty());
        drop(frame);
        assert_eq!(owner.released.lock().len(), 1);
    }

    #[test]
    fn test_callback_token_runs_hook_on_drop() {
        let ended = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ended);
        {
            let _token = CallbackToken::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }
}
