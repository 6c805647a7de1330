//! Applying network metadata to frames
//!
//! Metadata travelling separately from its frame is JSON of the form
//! `{"header": {"frame_number", "timestamp_domain"}, "metadata": {<field>: <int>}}`.
//! Both parts are optional.

use contracts::{FrameHeader, MetadataBlob, MetadataField, TimestampDomain};
use serde_json::Value;
use tracing::debug;

/// Frame numbers for one stream
///
/// The device frame number is only known when metadata carries it; frames
/// without it get one past the last number seen.
#[derive(Debug, Clone)]
pub struct FrameNumbering {
    stream: String,
    last: u64,
}

impl FrameNumbering {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            last: 0,
        }
    }

    /// Last frame number handed out (0 before the first frame)
    pub fn last(&self) -> u64 {
        self.last
    }

    /// Number a frame that arrived without metadata
    pub fn assign_next(&mut self, header: &mut FrameHeader) {
        header.last_frame_number = self.last;
        self.last = self.last.wrapping_add(1);
        header.frame_number = self.last;
    }

    /// Number a frame from its metadata, falling back to the next number
    pub fn assign_from(&mut self, header: &mut FrameHeader, md: &Value) {
        let Some(frame_number) = md
            .pointer("/header/frame_number")
            .and_then(Value::as_u64)
        else {
            self.assign_next(header);
            return;
        };

        let last = std::mem::replace(&mut self.last, frame_number);
        header.frame_number = frame_number;
        header.last_frame_number = last;
        let expected = last.wrapping_add(1);
        if last != 0 && frame_number != expected {
            debug!(
                stream = %self.stream,
                expected,
                got = frame_number,
                "frame drop?"
            );
        }
    }
}

/// Copy the timestamp domain and known integer fields into the frame
///
/// Unknown fields and values of the wrong type are ignored. Returns how many
/// metadata fields were set.
pub fn apply_metadata(header: &mut FrameHeader, blob: &mut MetadataBlob, md: &Value) -> usize {
    if let Some(domain) = md
        .pointer("/header/timestamp_domain")
        .and_then(Value::as_str)
        .and_then(TimestampDomain::from_name)
    {
        header.timestamp_domain = domain;
    }

    let Some(fields) = md.get("metadata").and_then(Value::as_object) else {
        return 0;
    };
    let mut applied = 0;
    for field in MetadataField::ALL {
        if let Some(value) = fields.get(field.name()).and_then(Value::as_i64) {
            blob.set(field, value);
            applied += 1;
        }
    }
    applied
}
