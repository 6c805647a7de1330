//! Frame header and per-frame metadata
//!
//! The header travels with every frame; the metadata blob holds the optional
//! per-field values decoded from the device or from network metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SyncKey;

/// Clock domain of a frame timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampDomain {
    /// Device hardware clock
    #[default]
    HardwareClock,
    /// Host system clock at arrival
    SystemTime,
    /// Hardware clock translated to host time
    GlobalTime,
}

impl TimestampDomain {
    /// snake_case name, as used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HardwareClock => "hardware_clock",
            Self::SystemTime => "system_time",
            Self::GlobalTime => "global_time",
        }
    }

    /// Parse the lowercase / snake_case form used on the wire
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "hardware_clock" | "hardware clock" => Some(Self::HardwareClock),
            "system_time" | "system time" => Some(Self::SystemTime),
            "global_time" | "global time" => Some(Self::GlobalTime),
            _ => None,
        }
    }
}

/// Frame header
///
/// Fixed-size information about one captured frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Frame number as reported by the device (or generated)
    pub frame_number: u64,

    /// Previous frame number seen on the same stream
    pub last_frame_number: u64,

    /// Capture timestamp (milliseconds)
    pub timestamp: f64,

    /// Previous capture timestamp on the same stream (milliseconds)
    pub last_timestamp: f64,

    /// Clock domain of `timestamp`
    pub timestamp_domain: TimestampDomain,

    /// Host time of arrival (milliseconds since the UNIX epoch)
    pub system_time: f64,

    /// Time the transport backend received the frame (milliseconds)
    pub backend_timestamp: f64,

    /// Raw payload size as delivered by the producer
    pub raw_size: usize,
}

impl FrameHeader {
    /// Create a header stamped with the given frame number and timestamp
    pub fn new(frame_number: u64, timestamp: f64) -> Self {
        Self {
            frame_number,
            timestamp,
            ..Default::default()
        }
    }

    /// Key joining this frame with metadata sent separately (timestamp in ns)
    pub fn sync_key(&self) -> SyncKey {
        (self.timestamp * 1_000_000.0).round().max(0.0) as SyncKey
    }
}

/// Known per-frame metadata fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    FrameCounter,
    FrameTimestamp,
    SensorTimestamp,
    ActualExposure,
    GainLevel,
    AutoExposure,
    WhiteBalance,
    TimeOfArrival,
    Temperature,
    BackendTimestamp,
    ActualFps,
    FrameLaserPower,
    FrameEmitterMode,
    ExposurePriority,
}

impl MetadataField {
    /// Number of known fields
    pub const COUNT: usize = 14;

    /// All fields in declaration order
    pub const ALL: [MetadataField; Self::COUNT] = [
        MetadataField::FrameCounter,
        MetadataField::FrameTimestamp,
        MetadataField::SensorTimestamp,
        MetadataField::ActualExposure,
        MetadataField::GainLevel,
        MetadataField::AutoExposure,
        MetadataField::WhiteBalance,
        MetadataField::TimeOfArrival,
        MetadataField::Temperature,
        MetadataField::BackendTimestamp,
        MetadataField::ActualFps,
        MetadataField::FrameLaserPower,
        MetadataField::FrameEmitterMode,
        MetadataField::ExposurePriority,
    ];

    /// Stable snake_case name, as used in network metadata
    pub fn name(self) -> &'static str {
        match self {
            MetadataField::FrameCounter => "frame_counter",
            MetadataField::FrameTimestamp => "frame_timestamp",
            MetadataField::SensorTimestamp => "sensor_timestamp",
            MetadataField::ActualExposure => "actual_exposure",
            MetadataField::GainLevel => "gain_level",
            MetadataField::AutoExposure => "auto_exposure",
            MetadataField::WhiteBalance => "white_balance",
            MetadataField::TimeOfArrival => "time_of_arrival",
            MetadataField::Temperature => "temperature",
            MetadataField::BackendTimestamp => "backend_timestamp",
            MetadataField::ActualFps => "actual_fps",
            MetadataField::FrameLaserPower => "frame_laser_power",
            MetadataField::FrameEmitterMode => "frame_emitter_mode",
            MetadataField::ExposurePriority => "exposure_priority",
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-frame metadata values, one optional slot per [`MetadataField`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataBlob {
    values: [Option<i64>; MetadataField::COUNT],
}

impl MetadataBlob {
    /// Empty blob (no field present)
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a field, if present
    #[inline]
    pub fn get(&self, field: MetadataField) -> Option<i64> {
        self.values[field.index()]
    }

    /// Set a field value
    #[inline]
    pub fn set(&mut self, field: MetadataField, value: i64) {
        self.values[field.index()] = Some(value);
    }

    /// Whether any field is present
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Iterate over present fields
    pub fn iter(&self) -> impl Iterator<Item = (MetadataField, i64)> + '_ {
        MetadataField::ALL
            .iter()
            .filter_map(|&field| self.get(field).map(|v| (field, v)))
    }
}
