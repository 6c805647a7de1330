//! Owning holder of a frame waiting in the syncer
//!
//! A holder releases its frame exactly once: either by handing it out
//! (`into_inner`) or through the releaser when dropped.

use std::fmt;
use std::sync::Arc;

/// Takes back a frame nobody consumed
pub type FrameReleaser<F> = Arc<dyn Fn(F) + Send + Sync>;

/// Uniquely owned frame plus what to do with it if it is dropped unconsumed
pub struct FrameHolder<F> {
    frame: Option<F>,
    releaser: Option<FrameReleaser<F>>,
}

impl<F> FrameHolder<F> {
    /// Holder releasing through `releaser` on drop
    pub fn new(frame: F, releaser: FrameReleaser<F>) -> Self {
        Self {
            frame: Some(frame),
            releaser: Some(releaser),
        }
    }

    /// Holder that simply drops the frame
    pub fn owned(frame: F) -> Self {
        Self {
            frame: Some(frame),
            releaser: None,
        }
    }

    pub fn get(&self) -> Option<&F> {
        self.frame.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut F> {
        self.frame.as_mut()
    }

    /// Take the frame; the releaser is not called
    pub fn into_inner(mut self) -> Option<F> {
        self.frame.take()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_none()
    }
}

impl<F> Drop for FrameHolder<F> {
    fn drop(&mut self) {
        if let (Some(frame), Some(releaser)) = (self.frame.take(), self.releaser.take()) {
            releaser(frame);
        }
    }
}

impl<F: fmt::Debug> fmt::Debug for FrameHolder<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHolder")
            .field("frame", &self.frame)
            .field("has_releaser", &self.releaser.is_some())
            .finish()
    }
}
