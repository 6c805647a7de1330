//! Sensor identity seen from frames
//!
//! Archives keep only a weak reference, so frames never extend a sensor's
//! lifetime.

use std::sync::{Arc, Weak};

/// Identity of the sensor producing frames
pub trait Sensor: Send + Sync {
    /// Sensor name
    fn name(&self) -> &str;
}

/// Weak back-reference handed to archives
pub type SensorRef = Weak<dyn Sensor>;

/// Minimal sensor carrying just a name
#[derive(Debug, Clone)]
pub struct NamedSensor {
    name: String,
}

impl NamedSensor {
    /// Create a named sensor
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }
}

impl Sensor for NamedSensor {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Downgrade a concrete sensor into a [`SensorRef`]
pub fn sensor_ref<S: Sensor + 'static>(sensor: &Arc<S>) -> SensorRef {
    let weak: Weak<S> = Arc::downgrade(sensor);
    weak
}
