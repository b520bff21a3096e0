//! User handler contract and the per-partition context handed to it.

use crate::error::{ProcessorError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use streampump_checkpoint::{Checkpoint, CheckpointStore};
use streampump_core::EventData;
use tracing::debug;

/// Why a pump terminated. Delivered to `process_close` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The processor is stopping.
    Shutdown,
    /// Another instance claimed the partition away.
    OwnershipLost,
    /// The pump's receiver failed and the pump closed itself.
    PumpError,
}

/// User-supplied callbacks driven by the processor and its pumps.
///
/// `process_events` is the only required method. Batch delivery is
/// serialized per partition: the next batch is not delivered until the
/// previous call returns. Errors returned from any handler are logged and
/// swallowed - they never destabilize the processor.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// A batch of events arrived on a partition this instance owns.
    async fn process_events(&self, events: &[EventData], context: &PartitionContext)
        -> Result<()>;

    /// Something failed. For coordination errors the context carries an empty
    /// partition id and a no-op `update_checkpoint`. Cancellation is never
    /// reported here.
    async fn process_error(
        &self,
        _error: &ProcessorError,
        _context: &PartitionContext,
    ) -> Result<()> {
        Ok(())
    }

    /// A pump is about to start receiving from a partition.
    async fn process_initialize(&self, _context: &PartitionContext) -> Result<()> {
        Ok(())
    }

    /// A pump terminated. Invoked exactly once per pump.
    async fn process_close(
        &self,
        _reason: CloseReason,
        _context: &PartitionContext,
    ) -> Result<()> {
        Ok(())
    }
}

/// Identifies the partition a callback refers to and lets user code persist
/// its progress.
///
/// Contexts built for coordination-scoped errors carry an empty
/// `partition_id` and no store handle; `update_checkpoint` on such a context
/// is a no-op.
#[derive(Clone)]
pub struct PartitionContext {
    fully_qualified_namespace: String,
    event_hub_name: String,
    consumer_group: String,
    partition_id: String,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl PartitionContext {
    /// Context for a live pump bound to one partition.
    pub fn new(
        fully_qualified_namespace: impl Into<String>,
        event_hub_name: impl Into<String>,
        consumer_group: impl Into<String>,
        partition_id: impl Into<String>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            fully_qualified_namespace: fully_qualified_namespace.into(),
            event_hub_name: event_hub_name.into(),
            consumer_group: consumer_group.into(),
            partition_id: partition_id.into(),
            store: Some(store),
        }
    }

    /// Context for errors that are not scoped to any partition.
    pub fn for_errors(
        fully_qualified_namespace: impl Into<String>,
        event_hub_name: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            fully_qualified_namespace: fully_qualified_namespace.into(),
            event_hub_name: event_hub_name.into(),
            consumer_group: consumer_group.into(),
            partition_id: String::new(),
            store: None,
        }
    }

    pub fn fully_qualified_namespace(&self) -> &str {
        &self.fully_qualified_namespace
    }

    pub fn event_hub_name(&self) -> &str {
        &self.event_hub_name
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Partition id, or the empty string for coordination-scoped contexts.
    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Persist the position of `event` as this partition's checkpoint.
    ///
    /// On a coordination-scoped context this quietly does nothing.
    pub async fn update_checkpoint(&self, event: &EventData) -> Result<()> {
        let Some(store) = &self.store else {
            debug!("Checkpoint requested outside a partition scope, ignoring");
            return Ok(());
        };

        let checkpoint = Checkpoint {
            fully_qualified_namespace: self.fully_qualified_namespace.clone(),
            event_hub_name: self.event_hub_name.clone(),
            consumer_group: self.consumer_group.clone(),
            partition_id: self.partition_id.clone(),
            offset: event.offset.clone(),
            sequence_number: event.sequence_number,
        };
        store.update_checkpoint(checkpoint).await?;
        Ok(())
    }
}
