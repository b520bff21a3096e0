//! Pump registry.
//!
//! The manager is the only owner of pumps: the supervisor asks it to create
//! and close them but never touches a pump directly. At most one live pump
//! exists per partition; creation and removal for the same partition are
//! serialized by the registry lock. `remove_all_pumps` is the single choke
//! point that guarantees every receiver is released on shutdown.

use crate::error::{ProcessorError, Result};
use crate::handlers::{CloseReason, EventHandler, PartitionContext};
use crate::pump::PartitionPump;
use crate::transport::EventHubTransport;
use std::collections::HashMap;
use std::sync::Arc;
use streampump_core::EventPosition;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct PumpHandle {
    cancel: CancellationToken,
    close_reason: Arc<RwLock<CloseReason>>,
    handle: JoinHandle<()>,
}

impl PumpHandle {
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the pump and wait for its clean shutdown, recording why.
    async fn close(self, reason: CloseReason) {
        *self.close_reason.write().await = reason;
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Pump task join failed");
        }
    }
}

/// Tracks active pumps by partition id.
pub struct PumpManager {
    pumps: RwLock<HashMap<String, PumpHandle>>,
    max_batch_size: usize,
}

impl PumpManager {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            pumps: RwLock::new(HashMap::new()),
            max_batch_size,
        }
    }

    /// Allocate a receive loop for one partition.
    ///
    /// Rejects with [`ProcessorError::PumpExists`] when a live pump already
    /// serves the partition. A pump that already terminated on its own (for
    /// example after a receive failure) is discarded and replaced.
    pub async fn create_pump(
        &self,
        position: EventPosition,
        transport: Arc<dyn EventHubTransport>,
        context: PartitionContext,
        handlers: Arc<dyn EventHandler>,
    ) -> Result<()> {
        let partition_id = context.partition_id().to_string();
        let mut pumps = self.pumps.write().await;

        if let Some(existing) = pumps.get(&partition_id) {
            if !existing.is_finished() {
                return Err(ProcessorError::PumpExists(partition_id));
            }
            debug!(partition_id = %partition_id, "Discarding terminated pump");
            pumps.remove(&partition_id);
        }

        let receiver = transport
            .create_receiver(context.consumer_group(), &partition_id, position)
            .await?;

        let cancel = CancellationToken::new();
        let close_reason = Arc::new(RwLock::new(CloseReason::Shutdown));
        let pump = PartitionPump::new(
            receiver,
            handlers,
            context,
            cancel.clone(),
            Arc::clone(&close_reason),
            self.max_batch_size,
        );

        let handle = tokio::spawn(pump.run());
        pumps.insert(
            partition_id.clone(),
            PumpHandle {
                cancel,
                close_reason,
                handle,
            },
        );

        info!(partition_id = %partition_id, "Started partition pump");
        Ok(())
    }

    /// Whether a live pump exists for this partition.
    pub async fn is_receiving_from_partition(&self, partition_id: &str) -> bool {
        let pumps = self.pumps.read().await;
        pumps
            .get(partition_id)
            .map(|pump| !pump.is_finished())
            .unwrap_or(false)
    }

    /// Partition ids with a live pump, sorted.
    pub async fn receiving_partitions(&self) -> Vec<String> {
        let pumps = self.pumps.read().await;
        let mut partitions: Vec<String> = pumps
            .iter()
            .filter(|(_, pump)| !pump.is_finished())
            .map(|(partition_id, _)| partition_id.clone())
            .collect();
        partitions.sort();
        partitions
    }

    /// Close the pump for one partition, waiting for its clean shutdown.
    pub async fn remove_pump(&self, partition_id: &str, reason: CloseReason) {
        let removed = self.pumps.write().await.remove(partition_id);
        if let Some(pump) = removed {
            info!(partition_id = %partition_id, reason = ?reason, "Closing partition pump");
            pump.close(reason).await;
        }
    }

    /// Close every pump, waiting for each clean shutdown, then discard them.
    pub async fn remove_all_pumps(&self, reason: CloseReason) {
        let drained: Vec<(String, PumpHandle)> = self.pumps.write().await.drain().collect();
        if drained.is_empty() {
            return;
        }

        info!(pump_count = drained.len(), reason = ?reason, "Closing all partition pumps");
        for (partition_id, pump) in drained {
            debug!(partition_id = %partition_id, "Closing partition pump");
            pump.close(reason).await;
        }
    }
}
