//! Durable record types for the checkpoint store.
//!
//! Both records share the composite key
//! `(fully_qualified_namespace, event_hub_name, consumer_group, partition_id)`.
//! Timestamps are i64 milliseconds since epoch; offsets are opaque strings
//! assigned by the service.

use serde::{Deserialize, Serialize};

/// A claim that one processor instance currently consumes a partition on
/// behalf of a consumer group.
///
/// The store guarantees at most one live record per composite key. An empty
/// `owner_id` marks the record as *abandoned*: the previous owner gave it up
/// deliberately and any peer may reclaim it immediately, reusing the etag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOwnership {
    /// Fully qualified namespace of the event hub (e.g. "ns.servicebus.example").
    pub fully_qualified_namespace: String,

    /// Event hub name.
    pub event_hub_name: String,

    /// Consumer group this ownership belongs to.
    pub consumer_group: String,

    /// Partition id (opaque string).
    pub partition_id: String,

    /// Id of the claiming processor instance; empty means abandoned.
    pub owner_id: String,

    /// Set by the store on every successful write (ms since epoch). Readers
    /// use the age of this field to detect owners that died without
    /// abandoning their claims.
    pub last_modified_time_ms: i64,

    /// Concurrency token returned by the store. `None` means the row does not
    /// exist yet and a claim must only succeed if no row exists.
    pub etag: Option<String>,
}

impl PartitionOwnership {
    /// True exactly when the previous owner deliberately gave up this
    /// partition (`owner_id` is the empty string).
    pub fn is_abandoned(&self) -> bool {
        self.owner_id.is_empty()
    }
}

/// The last persisted read position within a partition for a consumer group.
///
/// Created on the first user-driven checkpoint, updated in place afterwards;
/// never deleted by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Fully qualified namespace of the event hub.
    pub fully_qualified_namespace: String,

    /// Event hub name.
    pub event_hub_name: String,

    /// Consumer group this checkpoint belongs to.
    pub consumer_group: String,

    /// Partition id (opaque string).
    pub partition_id: String,

    /// Service-assigned offset of the last processed event (opaque).
    pub offset: String,

    /// Sequence number of the last processed event; monotone per partition.
    pub sequence_number: i64,
}
