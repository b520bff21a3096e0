//! Event record delivered to user handlers.

use bytes::Bytes;
use std::collections::HashMap;

/// A single event received from one partition of an event hub.
///
/// The `offset` is an opaque string assigned by the service; it is what gets
/// persisted in a checkpoint and later fed back as a starting position. The
/// `sequence_number` is monotone within a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    /// Event payload.
    pub body: Bytes,

    /// Service-assigned offset within the partition (opaque).
    pub offset: String,

    /// Monotone sequence number within the partition.
    pub sequence_number: i64,

    /// Enqueue timestamp (ms since epoch).
    pub enqueued_time_ms: i64,

    /// Partition key the producer supplied, if any.
    pub partition_key: Option<String>,

    /// Application-defined properties.
    pub properties: HashMap<String, String>,
}

impl EventData {
    /// Create an event with the given body; positional fields default to zero.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            offset: String::new(),
            sequence_number: 0,
            enqueued_time_ms: 0,
            partition_key: None,
            properties: HashMap::new(),
        }
    }

    /// Set the offset (builder style, used heavily by tests and transports).
    pub fn with_offset(mut self, offset: impl Into<String>) -> Self {
        self.offset = offset.into();
        self
    }

    /// Set the sequence number.
    pub fn with_sequence_number(mut self, sequence_number: i64) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    /// Set the enqueue timestamp (ms since epoch).
    pub fn with_enqueued_time_ms(mut self, enqueued_time_ms: i64) -> Self {
        self.enqueued_time_ms = enqueued_time_ms;
        self
    }
}
