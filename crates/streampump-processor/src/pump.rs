//! Per-partition receive pump.
//!
//! A pump is the task that owns one partition's receiver and drives the user
//! handler. Delivery is serialized: the next batch is not requested until
//! `process_events` returns. The pump terminates on cancellation (reason set
//! by whoever cancelled it) or on a receive failure (reason `PumpError`,
//! after the user's `process_error` has been told). `process_close` runs
//! exactly once on every termination path, after the receiver is released.

use crate::handlers::{CloseReason, EventHandler, PartitionContext};
use crate::transport::PartitionReceiver;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct PartitionPump {
    receiver: Box<dyn PartitionReceiver>,
    handlers: Arc<dyn EventHandler>,
    context: PartitionContext,
    cancel: CancellationToken,
    close_reason: Arc<RwLock<CloseReason>>,
    max_batch_size: usize,
}

impl PartitionPump {
    pub(crate) fn new(
        receiver: Box<dyn PartitionReceiver>,
        handlers: Arc<dyn EventHandler>,
        context: PartitionContext,
        cancel: CancellationToken,
        close_reason: Arc<RwLock<CloseReason>>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            receiver,
            handlers,
            context,
            cancel,
            close_reason,
            max_batch_size,
        }
    }

    pub(crate) async fn run(mut self) {
        let partition_id = self.context.partition_id().to_string();
        debug!(partition_id = %partition_id, "Partition pump started");

        if let Err(e) = self.handlers.process_initialize(&self.context).await {
            warn!(partition_id = %partition_id, error = %e, "Initialize handler failed");
        }

        let cancel = self.cancel.clone();
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = self.receiver.receive(self.max_batch_size, &cancel) => batch,
            };

            match batch {
                Ok(events) => {
                    if events.is_empty() {
                        continue;
                    }
                    if let Err(e) = self.handlers.process_events(&events, &self.context).await {
                        warn!(partition_id = %partition_id, error = %e, "Event handler failed");
                    }
                }
                Err(e) if e.is_cancellation() => break,
                Err(e) => {
                    warn!(partition_id = %partition_id, error = %e, "Receive failed, closing pump");
                    if let Err(handler_error) = self.handlers.process_error(&e, &self.context).await
                    {
                        warn!(
                            partition_id = %partition_id,
                            error = %handler_error,
                            "User error handler failed"
                        );
                    }
                    *self.close_reason.write().await = CloseReason::PumpError;
                    break;
                }
            }
        }

        if let Err(e) = self.receiver.close().await {
            warn!(partition_id = %partition_id, error = %e, "Failed to close receiver");
        }

        let reason = *self.close_reason.read().await;
        if let Err(e) = self.handlers.process_close(reason, &self.context).await {
            warn!(partition_id = %partition_id, error = %e, "Close handler failed");
        }

        debug!(partition_id = %partition_id, reason = ?reason, "Partition pump stopped");
    }
}
