//! Metadata parsers
//!
//! A parser derives one [`MetadataField`] value from a frame. The parser table
//! is built once and handed to every archive at construction; frames keep a
//! shared reference to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use contracts::{FrameHeader, MetadataField};

use crate::frame::Frame;

/// Decodes one metadata field of a frame
pub trait MetadataParser: Send + Sync {
    /// Field value, if the frame carries it
    fn parse(&self, frame: &Frame) -> Option<i64>;

    /// Whether the frame carries the field
    fn supports(&self, frame: &Frame) -> bool {
        self.parse(frame).is_some()
    }
}

/// Parser reading a value straight out of the frame header
#[derive(Clone, Copy)]
pub struct HeaderParser {
    read: fn(&FrameHeader) -> Option<i64>,
}

impl HeaderParser {
    /// Create a parser from a header accessor
    pub const fn new(read: fn(&FrameHeader) -> Option<i64>) -> Self {
        Self { read }
    }
}

impl MetadataParser for HeaderParser {
    fn parse(&self, frame: &Frame) -> Option<i64> {
        (self.read)(frame.header())
    }
}

/// Field -> parser table
#[derive(Clone, Default)]
pub struct MetadataParsers {
    parsers: HashMap<MetadataField, Arc<dyn MetadataParser>>,
}

impl fmt::Debug for MetadataParsers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<_> = self.parsers.keys().collect();
        fields.sort();
        f.debug_struct("MetadataParsers")
            .field("fields", &fields)
            .finish()
    }
}

impl MetadataParsers {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the parsers every frame supports through its header
    pub fn with_header_defaults() -> Self {
        Self::new()
            .with(
                MetadataField::FrameCounter,
                HeaderParser::new(|h| i64::try_from(h.frame_number).ok()),
            )
            .with(
                MetadataField::FrameTimestamp,
                HeaderParser::new(|h| Some((h.timestamp * 1000.0) as i64)),
            )
            .with(
                MetadataField::TimeOfArrival,
                HeaderParser::new(|h| (h.system_time > 0.0).then_some(h.system_time as i64)),
            )
            .with(
                MetadataField::BackendTimestamp,
                HeaderParser::new(|h| {
                    (h.backend_timestamp > 0.0).then_some(h.backend_timestamp as i64)
                }),
            )
    }

    /// Add (or replace) a parser, builder style
    pub fn with<P: MetadataParser + 'static>(mut self, field: MetadataField, parser: P) -> Self {
        self.register(field, Arc::new(parser));
        self
    }

    /// Add (or replace) a parser
    pub fn register(&mut self, field: MetadataField, parser: Arc<dyn MetadataParser>) {
        self.parsers.insert(field, parser);
    }

    /// Parser of a field
    pub fn get(&self, field: MetadataField) -> Option<&Arc<dyn MetadataParser>> {
        self.parsers.get(&field)
    }

    /// Whether a parser exists for the field
    pub fn contains(&self, field: MetadataField) -> bool {
        self.parsers.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}
