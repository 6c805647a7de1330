//! `frame_queue_size` option
//!
//! Caps how many published frames of one archive may be outstanding
//! (unreleased by the application) at a time. The value lives in a shared
//! atomic read by every archive on each allocation, so changes apply to the
//! next frame.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use contracts::{DEFAULT_FRAME_QUEUE_SIZE, MAX_FRAME_QUEUE_SIZE};

use crate::error::{FrameSourceError, Result};

/// Float range description of an option
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
}

/// User-tunable publication limit shared by all archives of a frame source
#[derive(Debug, Clone)]
pub struct FrameQueueSizeOption {
    value: Arc<AtomicU32>,
}

impl Default for FrameQueueSizeOption {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_QUEUE_SIZE)
    }
}

impl FrameQueueSizeOption {
    /// Option name
    pub const NAME: &'static str = "frame_queue_size";

    /// Accepted range
    pub const RANGE: OptionRange = OptionRange {
        min: 0.0,
        max: MAX_FRAME_QUEUE_SIZE as f32,
        step: 1.0,
        default: DEFAULT_FRAME_QUEUE_SIZE as f32,
    };

    /// Create the option with an initial value (clamped to the range)
    pub fn new(initial: u32) -> Self {
        Self {
            value: Arc::new(AtomicU32::new(initial.min(MAX_FRAME_QUEUE_SIZE))),
        }
    }

    /// Human readable description
    pub fn description(&self) -> &'static str {
        "Max number of frames you can hold at a given time. Increasing this number \
         will reduce frame drops but increase latency, and vice versa"
    }

    /// Current value
    pub fn query(&self) -> f32 {
        self.get() as f32
    }

    /// Current value as an integer
    pub fn get(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Set a new value; must lie in the range and on a step
    pub fn set(&self, value: f32) -> Result<()> {
        let range = Self::RANGE;
        if !value.is_finite() || value < range.min || value > range.max {
            return Err(FrameSourceError::InvalidOption {
                option: Self::NAME,
                value,
                message: format!("must be within [{}, {}]", range.min, range.max),
            });
        }
        if value.fract() != 0.0 {
            return Err(FrameSourceError::InvalidOption {
                option: Self::NAME,
                value,
                message: format!("must be a multiple of {}", range.step),
            });
        }

        self.value.store(value as u32, Ordering::Release);
        Ok(())
    }

    /// Atomic handed to archives
    pub fn shared(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.value)
    }
}
