//! Transport contract.
//!
//! The processor never opens network connections itself; it is handed an
//! [`EventHubTransport`] that knows how to enumerate partitions and construct
//! per-partition receivers. Production deployments back this with an AMQP
//! client; tests use in-memory implementations.

use crate::error::Result;
use async_trait::async_trait;
use streampump_core::{EventData, EventPosition};
use tokio_util::sync::CancellationToken;

/// Connection to one event hub, shared by every pump of a processor.
///
/// Implementations must be `Send + Sync`; they are injected as
/// `Arc<dyn EventHubTransport>`.
#[async_trait]
pub trait EventHubTransport: Send + Sync {
    /// Fully qualified namespace this transport is connected to.
    fn fully_qualified_namespace(&self) -> &str;

    /// Event hub name this transport is connected to.
    fn event_hub_name(&self) -> &str;

    /// Enumerate the hub's partition ids.
    ///
    /// Must observe `cancel` and return [`ProcessorError::Cancelled`]
    /// (wrapped in `Err`) instead of blocking past cancellation.
    ///
    /// [`ProcessorError::Cancelled`]: crate::ProcessorError::Cancelled
    async fn partition_ids(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Open a receiver streaming one partition from the given position.
    async fn create_receiver(
        &self,
        consumer_group: &str,
        partition_id: &str,
        position: EventPosition,
    ) -> Result<Box<dyn PartitionReceiver>>;
}

/// A receive handle bound to `(partition, consumer group, start position)`.
///
/// Receivers are driven by exactly one pump task, so `&mut self` suffices.
#[async_trait]
pub trait PartitionReceiver: Send {
    /// Wait for the next batch of events, up to `max_count`.
    ///
    /// Must observe `cancel`: a pending receive returns
    /// [`ProcessorError::Cancelled`] once the token fires. An empty batch is
    /// a valid return and does not indicate end of stream.
    ///
    /// [`ProcessorError::Cancelled`]: crate::ProcessorError::Cancelled
    async fn receive(
        &mut self,
        max_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventData>>;

    /// Release the underlying link. Called exactly once when the pump stops.
    async fn close(&mut self) -> Result<()>;
}
