//! StreamKey - identity of one frame archive
//!
//! A stream kind (what the sensor sees) paired with a payload kind (how the
//! frame bytes are interpreted).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of hardware stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Depth,
    Color,
    Infrared,
    Fisheye,
    Gyro,
    Accel,
    Motion,
    Pose,
    Confidence,
}

impl StreamKind {
    /// Payload kind frames of this stream carry unless told otherwise
    pub fn default_payload(self) -> PayloadKind {
        match self {
            StreamKind::Depth => PayloadKind::Depth,
            StreamKind::Color
            | StreamKind::Infrared
            | StreamKind::Fisheye
            | StreamKind::Confidence => PayloadKind::Video,
            StreamKind::Gyro | StreamKind::Accel | StreamKind::Motion => PayloadKind::Motion,
            StreamKind::Pose => PayloadKind::Pose,
        }
    }

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Depth => "depth",
            StreamKind::Color => "color",
            StreamKind::Infrared => "infrared",
            StreamKind::Fisheye => "fisheye",
            StreamKind::Gyro => "gyro",
            StreamKind::Accel => "accel",
            StreamKind::Motion => "motion",
            StreamKind::Pose => "pose",
            StreamKind::Confidence => "confidence",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Video,
    Depth,
    Disparity,
    Motion,
    Pose,
    Points,
    Composite,
}

impl PayloadKind {
    /// Payload kinds a frame source supports unless configured otherwise
    pub const ALL: [PayloadKind; 7] = [
        PayloadKind::Video,
        PayloadKind::Depth,
        PayloadKind::Disparity,
        PayloadKind::Motion,
        PayloadKind::Pose,
        PayloadKind::Points,
        PayloadKind::Composite,
    ];

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadKind::Video => "video",
            PayloadKind::Depth => "depth",
            PayloadKind::Disparity => "disparity",
            PayloadKind::Motion => "motion",
            PayloadKind::Pose => "pose",
            PayloadKind::Points => "points",
            PayloadKind::Composite => "composite",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier of one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    /// Stream kind
    pub stream: StreamKind,
    /// Payload kind
    pub payload: PayloadKind,
}

impl StreamKey {
    /// Create a new stream key
    #[inline]
    pub fn new(stream: StreamKind, payload: PayloadKind) -> Self {
        Self { stream, payload }
    }

    /// Key using the stream's default payload kind
    #[inline]
    pub fn for_stream(stream: StreamKind) -> Self {
        Self::new(stream, stream.default_payload())
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_payload_mapping() {
        assert_eq!(StreamKind::Depth.default_payload(), PayloadKind::Depth);
        assert_eq!(StreamKind::Infrared.default_payload(), PayloadKind::Video);
        assert_eq!(StreamKind::Gyro.default_payload(), PayloadKind::Motion);
        assert_eq!(StreamKind::Pose.default_payload(), PayloadKind::Pose);
    }

    #[test]
    fn test_stream_key_display() {
        let key = StreamKey::for_stream(StreamKind::Color);
        assert_eq!(key.to_string(), "color/video");
    }

    #[test]
    fn test_stream_key_deserialize() {
        let key: StreamKey =
            serde_json::from_str(r#"{"stream":"depth","payload":"depth"}"#).unwrap();
        assert_eq!(key, StreamKey::new(StreamKind::Depth, PayloadKind::Depth));
    }
}
