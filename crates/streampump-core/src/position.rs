//! Starting positions for partition reads.
//!
//! ## Types Overview
//!
//! ### EventPosition
//! A single position within one partition: a service offset, a sequence
//! number, an enqueue timestamp, or one of the stream ends.
//!
//! ### StartPositions
//! The user-supplied default applied when a partition has no checkpoint:
//! either one position for every partition, or a per-partition map. Both are
//! explicit variants rather than shape tests on a dynamic value.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a partition read begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPosition {
    /// The oldest event still retained by the partition.
    Earliest,
    /// Only events enqueued after the receiver opens.
    Latest,
    /// The event at the given service-assigned offset.
    Offset(String),
    /// The event with the given sequence number.
    SequenceNumber(i64),
    /// The first event enqueued at or after the given timestamp (ms since epoch).
    EnqueuedAt(i64),
}

impl Default for EventPosition {
    fn default() -> Self {
        EventPosition::Latest
    }
}

/// User-supplied default starting positions for a processor.
///
/// A checkpoint, when present, always wins over these; see the
/// starting-position resolution in the processor crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartPositions {
    /// One position applied to every partition.
    Single(EventPosition),
    /// Positions keyed by partition id; partitions absent from the map fall
    /// back to [`EventPosition::Latest`].
    PerPartition(HashMap<String, EventPosition>),
}

impl StartPositions {
    /// The position configured for `partition_id`, if any.
    pub fn for_partition(&self, partition_id: &str) -> Option<&EventPosition> {
        match self {
            StartPositions::Single(position) => Some(position),
            StartPositions::PerPartition(map) => map.get(partition_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_applies_to_every_partition() {
        let start = StartPositions::Single(EventPosition::Earliest);
        assert_eq!(start.for_partition("0"), Some(&EventPosition::Earliest));
        assert_eq!(start.for_partition("99"), Some(&EventPosition::Earliest));
    }

    #[test]
    fn test_per_partition_map_lookup() {
        let mut map = HashMap::new();
        map.insert("1".to_string(), EventPosition::Offset("42".to_string()));
        let start = StartPositions::PerPartition(map);

        assert_eq!(
            start.for_partition("1"),
            Some(&EventPosition::Offset("42".to_string()))
        );
        assert_eq!(start.for_partition("2"), None);
    }

    #[test]
    fn test_default_position_is_latest() {
        assert_eq!(EventPosition::default(), EventPosition::Latest);
    }

    #[test]
    fn test_position_round_trips_through_json() {
        let position = EventPosition::SequenceNumber(1234);
        let json = serde_json::to_string(&position).unwrap();
        let back: EventPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, position);
    }
}
