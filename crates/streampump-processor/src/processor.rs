//! Event processor - the top-level supervisor.
//!
//! One `EventProcessor` represents one member of a processing fleet. In
//! balanced mode its background loop repeatedly reads the fleet's ownership
//! records, asks the load balancer which partition to claim next, claims it
//! through the store's etag compare-and-swap, and hands newly won partitions
//! to the pump manager. In single-partition mode the loop just keeps one pump
//! alive for a fixed partition and never touches ownership records.
//!
//! ## Lifecycle
//!
//! 1. **Build**: configure via [`EventProcessorBuilder`]
//! 2. **Start**: spawn the loop with a fresh run-scoped cancellation token
//! 3. **Run**: claim partitions, pump events, surface errors to the handler
//! 4. **Stop**: cancel, close every pump with reason `Shutdown`, then abandon
//!    owned partitions so peers can take over without waiting for expiry
//!
//! Both `start` and `stop` are idempotent. Errors inside the loop are
//! reported through the user's `process_error` and never terminate the loop;
//! cancellation is filtered out before it can reach user code.

use crate::balancer::{FairLoadBalancer, LoadBalancer};
use crate::config::ProcessorConfig;
use crate::error::{ProcessorError, Result};
use crate::handlers::{CloseReason, EventHandler, PartitionContext};
use crate::position::resolve_start_position;
use crate::pump_manager::PumpManager;
use crate::transport::EventHubTransport;
use std::collections::HashMap;
use std::sync::Arc;
use streampump_checkpoint::{CheckpointStore, PartitionOwnership};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What this processor instance consumes: one fixed partition, or a fair
/// share of all partitions negotiated through the checkpoint store.
pub enum ProcessingTarget {
    /// Consume exactly this partition; no ownership coordination.
    Partition(String),
    /// Cooperate with the fleet using the given balancing strategy.
    Balanced(Arc<dyn LoadBalancer>),
}

/// Supervises the balance loop and the per-partition pumps of one fleet
/// member.
pub struct EventProcessor {
    id: String,
    consumer_group: String,
    transport: Arc<dyn EventHubTransport>,
    store: Arc<dyn CheckpointStore>,
    handlers: Arc<dyn EventHandler>,
    target: ProcessingTarget,
    config: ProcessorConfig,
    pumps: Arc<PumpManager>,
    running: Arc<RwLock<bool>>,
    cancel: Arc<RwLock<CancellationToken>>,
    loop_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl EventProcessor {
    /// Create a builder; the recommended way to construct a processor.
    pub fn builder() -> EventProcessorBuilder {
        EventProcessorBuilder::new()
    }

    /// Owner id of this instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Consumer group this instance belongs to.
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Whether the background loop is active.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Partition ids this instance currently pumps, sorted.
    pub async fn owned_partition_ids(&self) -> Vec<String> {
        self.pumps.receiving_partitions().await
    }

    /// Start the background loop. Calling `start` on a running processor is
    /// a logged no-op.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if *running {
            info!(
                processor_id = %self.id,
                "Event processor already running, ignoring start"
            );
            return Ok(());
        }

        // Fresh token per run so stop/start cycles are clean.
        let cancel = CancellationToken::new();
        *self.cancel.write().await = cancel.clone();

        let task = BalanceTask {
            processor_id: self.id.clone(),
            fully_qualified_namespace: self.transport.fully_qualified_namespace().to_string(),
            event_hub_name: self.transport.event_hub_name().to_string(),
            consumer_group: self.consumer_group.clone(),
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
            handlers: Arc::clone(&self.handlers),
            pumps: Arc::clone(&self.pumps),
            config: self.config.clone(),
        };

        let handle = match &self.target {
            ProcessingTarget::Partition(partition_id) => {
                let partition_id = partition_id.clone();
                info!(
                    processor_id = %self.id,
                    partition_id = %partition_id,
                    "Starting event processor for a single partition"
                );
                tokio::spawn(async move { task.run_single(partition_id, cancel).await })
            }
            ProcessingTarget::Balanced(balancer) => {
                let balancer = Arc::clone(balancer);
                info!(
                    processor_id = %self.id,
                    consumer_group = %self.consumer_group,
                    "Starting event processor with cooperative load balancing"
                );
                tokio::spawn(async move { task.run_balanced(balancer, cancel).await })
            }
        };

        *self.loop_handle.write().await = Some(handle);
        *running = true;

        Ok(())
    }

    /// Stop the processor: cancel the run, close every pump with reason
    /// `Shutdown`, wait for the loop, and (in balanced mode) abandon owned
    /// partitions so peers can claim them immediately.
    ///
    /// Idempotent; shutdown failures are logged, never returned.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if !*running {
            debug!(processor_id = %self.id, "Event processor not running, ignoring stop");
            return Ok(());
        }

        info!(processor_id = %self.id, "Stopping event processor");

        self.cancel.read().await.cancel();
        *running = false;
        drop(running);

        self.pumps.remove_all_pumps(CloseReason::Shutdown).await;

        if let Some(handle) = self.loop_handle.write().await.take() {
            if let Err(e) = handle.await {
                warn!(processor_id = %self.id, error = %e, "Balance loop join failed");
            }
        }

        // A claim already in flight when the token fired may have started a
        // pump after the first sweep.
        self.pumps.remove_all_pumps(CloseReason::Shutdown).await;

        if matches!(self.target, ProcessingTarget::Balanced(_)) {
            self.abandon_partition_ownerships().await;
        }

        info!(processor_id = %self.id, "Event processor stopped");
        Ok(())
    }

    /// Write `owner_id = ""` on every row this instance still owns,
    /// preserving etags so peers can reclaim without waiting for the
    /// inactivity timer. Rows a peer has already taken over simply fail the
    /// etag check and are skipped by the store.
    async fn abandon_partition_ownerships(&self) {
        let namespace = self.transport.fully_qualified_namespace();
        let hub = self.transport.event_hub_name();

        let ownerships = match self
            .store
            .list_ownership(namespace, hub, &self.consumer_group)
            .await
        {
            Ok(ownerships) => ownerships,
            Err(e) => {
                warn!(
                    processor_id = %self.id,
                    error = %e,
                    "Failed to list ownerships during shutdown"
                );
                return;
            }
        };

        let abandoned: Vec<PartitionOwnership> = ownerships
            .into_iter()
            .filter(|o| o.owner_id == self.id)
            .map(|mut o| {
                o.owner_id = String::new();
                o
            })
            .collect();

        if abandoned.is_empty() {
            return;
        }

        let requested = abandoned.len();
        match self.store.claim_ownership(abandoned).await {
            Ok(released) => {
                info!(
                    processor_id = %self.id,
                    released = released.len(),
                    requested = requested,
                    "Abandoned partition ownerships"
                );
            }
            Err(e) => {
                warn!(
                    processor_id = %self.id,
                    error = %e,
                    "Failed to abandon ownerships during shutdown"
                );
            }
        }
    }
}

/// The background loop, detached from the processor so it can be moved into
/// a spawned task.
struct BalanceTask {
    processor_id: String,
    fully_qualified_namespace: String,
    event_hub_name: String,
    consumer_group: String,
    transport: Arc<dyn EventHubTransport>,
    store: Arc<dyn CheckpointStore>,
    handlers: Arc<dyn EventHandler>,
    pumps: Arc<PumpManager>,
    config: ProcessorConfig,
}

impl BalanceTask {
    /// Single-partition mode: keep one pump alive, no ownership interaction.
    async fn run_single(self, partition_id: String, cancel: CancellationToken) {
        info!(
            processor_id = %self.processor_id,
            partition_id = %partition_id,
            "Partition loop started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.start_pump(&partition_id).await {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => {}
                Err(e) => self.report_error(e).await,
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.loop_interval) => {}
            }
        }

        info!(processor_id = %self.processor_id, "Partition loop stopped");
    }

    /// Balanced mode: one claim decision per iteration, errors reported and
    /// retried after the interval.
    async fn run_balanced(self, balancer: Arc<dyn LoadBalancer>, cancel: CancellationToken) {
        info!(
            processor_id = %self.processor_id,
            interval_ms = self.config.loop_interval.as_millis() as u64,
            "Ownership balancing loop started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.balance_once(balancer.as_ref(), &cancel).await {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => {}
                Err(e) => self.report_error(e).await,
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.loop_interval) => {}
            }
        }

        info!(processor_id = %self.processor_id, "Ownership balancing loop stopped");
    }

    async fn balance_once(
        &self,
        balancer: &dyn LoadBalancer,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ownerships = self
            .store
            .list_ownership(
                &self.fully_qualified_namespace,
                &self.event_hub_name,
                &self.consumer_group,
            )
            .await?;

        let mut abandoned: HashMap<String, PartitionOwnership> = HashMap::new();
        let mut live: HashMap<String, PartitionOwnership> = HashMap::new();
        for ownership in ownerships {
            if ownership.is_abandoned() {
                abandoned.insert(ownership.partition_id.clone(), ownership);
            } else {
                live.insert(ownership.partition_id.clone(), ownership);
            }
        }

        // Surrender pumps for partitions another instance has claimed away.
        for partition_id in self.pumps.receiving_partitions().await {
            let lost = match live.get(&partition_id) {
                Some(o) => o.owner_id != self.processor_id,
                None => false,
            };
            if lost {
                info!(
                    processor_id = %self.processor_id,
                    partition_id = %partition_id,
                    "Partition claimed by another processor"
                );
                self.pumps
                    .remove_pump(&partition_id, CloseReason::OwnershipLost)
                    .await;
            }
        }

        let partition_ids = self.transport.partition_ids(cancel).await?;
        if cancel.is_cancelled() {
            return Err(ProcessorError::Cancelled);
        }

        let to_claim = balancer.load_balance(&self.processor_id, &live, &partition_ids);

        for partition_id in to_claim {
            // Reuse the etag of whatever row exists: an abandoned row first
            // (immediate takeover), then a live one (steal or refresh). No
            // row at all means create-if-absent.
            let etag = abandoned
                .get(&partition_id)
                .and_then(|o| o.etag.clone())
                .or_else(|| live.get(&partition_id).and_then(|o| o.etag.clone()));

            let request = PartitionOwnership {
                fully_qualified_namespace: self.fully_qualified_namespace.clone(),
                event_hub_name: self.event_hub_name.clone(),
                consumer_group: self.consumer_group.clone(),
                partition_id: partition_id.clone(),
                owner_id: self.processor_id.clone(),
                last_modified_time_ms: 0,
                etag,
            };

            let claimed = self.store.claim_ownership(vec![request]).await?;
            if claimed.is_empty() {
                // Another instance won the row between our read and our
                // write; yield and let the next iteration re-evaluate.
                debug!(
                    processor_id = %self.processor_id,
                    partition_id = %partition_id,
                    "Lost claim race, yielding"
                );
                continue;
            }

            info!(
                processor_id = %self.processor_id,
                partition_id = %partition_id,
                "Claimed partition"
            );
            self.start_pump(&partition_id).await?;
        }

        Ok(())
    }

    /// Idempotent: a partition that already has a live pump is left alone.
    async fn start_pump(&self, partition_id: &str) -> Result<()> {
        if self.pumps.is_receiving_from_partition(partition_id).await {
            return Ok(());
        }

        let position = resolve_start_position(
            self.store.as_ref(),
            &self.fully_qualified_namespace,
            &self.event_hub_name,
            &self.consumer_group,
            partition_id,
            self.config.start_positions.as_ref(),
        )
        .await?;

        let context = PartitionContext::new(
            self.fully_qualified_namespace.clone(),
            self.event_hub_name.clone(),
            self.consumer_group.clone(),
            partition_id,
            Arc::clone(&self.store),
        );

        self.pumps
            .create_pump(
                position,
                Arc::clone(&self.transport),
                context,
                Arc::clone(&self.handlers),
            )
            .await
    }

    /// Forward a loop error to the user handler with a coordination-scoped
    /// context (empty partition id, no-op checkpointing). Handler failures
    /// are swallowed with a log entry.
    async fn report_error(&self, error: ProcessorError) {
        let context = PartitionContext::for_errors(
            self.fully_qualified_namespace.clone(),
            self.event_hub_name.clone(),
            self.consumer_group.clone(),
        );

        if let Err(e) = self.handlers.process_error(&error, &context).await {
            warn!(
                processor_id = %self.processor_id,
                error = %e,
                "User error handler failed"
            );
        }
    }
}

/// Builder for [`EventProcessor`].
pub struct EventProcessorBuilder {
    id: Option<String>,
    consumer_group: Option<String>,
    transport: Option<Arc<dyn EventHubTransport>>,
    store: Option<Arc<dyn CheckpointStore>>,
    handlers: Option<Arc<dyn EventHandler>>,
    target: Option<ProcessingTarget>,
    config: ProcessorConfig,
}

impl EventProcessorBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            consumer_group: None,
            transport: None,
            store: None,
            handlers: None,
            target: None,
            config: ProcessorConfig::default(),
        }
    }

    /// Owner id for this instance; a fresh UUID v4 when not provided.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Consumer group to process on behalf of (required).
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Transport connected to the event hub (required).
    pub fn transport(mut self, transport: Arc<dyn EventHubTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Checkpoint store used for coordination and progress (required).
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// User handlers (required).
    pub fn handlers(mut self, handlers: Arc<dyn EventHandler>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Consume exactly one partition, bypassing ownership coordination.
    pub fn partition_id(mut self, partition_id: impl Into<String>) -> Self {
        self.target = Some(ProcessingTarget::Partition(partition_id.into()));
        self
    }

    /// Use a custom balancing strategy. The default is
    /// [`FairLoadBalancer`] configured with the ownership expiration.
    pub fn load_balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.target = Some(ProcessingTarget::Balanced(balancer));
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Pause between balance-loop iterations (default: 10s).
    pub fn loop_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.loop_interval = interval;
        self
    }

    /// Age after which an unrefreshed ownership is reclaimable (default: 60s).
    pub fn ownership_expiration(mut self, expiration: std::time::Duration) -> Self {
        self.config.ownership_expiration = expiration;
        self
    }

    /// Maximum events per delivered batch (default: 100).
    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.config.max_batch_size = max_batch_size;
        self
    }

    /// Default starting positions applied when a partition has no checkpoint.
    pub fn start_positions(mut self, start_positions: streampump_core::StartPositions) -> Self {
        self.config.start_positions = Some(start_positions);
        self
    }

    /// Build the processor.
    pub fn build(self) -> Result<EventProcessor> {
        let consumer_group = self
            .consumer_group
            .ok_or_else(|| ProcessorError::Config("consumer_group is required".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| ProcessorError::Config("transport is required".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| ProcessorError::Config("checkpoint_store is required".to_string()))?;
        let handlers = self
            .handlers
            .ok_or_else(|| ProcessorError::Config("handlers are required".to_string()))?;

        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let target = self.target.unwrap_or_else(|| {
            ProcessingTarget::Balanced(Arc::new(FairLoadBalancer::new(
                self.config.ownership_expiration,
            )))
        });
        let pumps = Arc::new(PumpManager::new(self.config.max_batch_size));

        Ok(EventProcessor {
            id,
            consumer_group,
            transport,
            store,
            handlers,
            target,
            config: self.config,
            pumps,
            running: Arc::new(RwLock::new(false)),
            cancel: Arc::new(RwLock::new(CancellationToken::new())),
            loop_handle: Arc::new(RwLock::new(None)),
        })
    }
}

impl Default for EventProcessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PartitionReceiver;
    use async_trait::async_trait;
    use streampump_checkpoint::InMemoryCheckpointStore;
    use streampump_core::{EventData, EventPosition};

    struct IdleTransport;

    struct IdleReceiver;

    #[async_trait]
    impl PartitionReceiver for IdleReceiver {
        async fn receive(
            &mut self,
            _max_count: usize,
            cancel: &CancellationToken,
        ) -> Result<Vec<EventData>> {
            cancel.cancelled().await;
            Err(ProcessorError::Cancelled)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl EventHubTransport for IdleTransport {
        fn fully_qualified_namespace(&self) -> &str {
            "ns.example"
        }

        fn event_hub_name(&self) -> &str {
            "hub"
        }

        async fn partition_ids(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
            Ok(vec!["0".to_string(), "1".to_string()])
        }

        async fn create_receiver(
            &self,
            _consumer_group: &str,
            _partition_id: &str,
            _position: EventPosition,
        ) -> Result<Box<dyn PartitionReceiver>> {
            Ok(Box::new(IdleReceiver))
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn process_events(
            &self,
            _events: &[EventData],
            _context: &PartitionContext,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn builder() -> EventProcessorBuilder {
        EventProcessor::builder()
            .consumer_group("$default")
            .transport(Arc::new(IdleTransport))
            .checkpoint_store(Arc::new(InMemoryCheckpointStore::new()))
            .handlers(Arc::new(NoopHandler))
            .loop_interval(std::time::Duration::from_millis(10))
    }

    #[test]
    fn test_builder_requires_consumer_group() {
        let result = EventProcessor::builder()
            .transport(Arc::new(IdleTransport))
            .checkpoint_store(Arc::new(InMemoryCheckpointStore::new()))
            .handlers(Arc::new(NoopHandler))
            .build();
        assert!(matches!(result, Err(ProcessorError::Config(_))));
    }

    #[test]
    fn test_builder_requires_transport() {
        let result = EventProcessor::builder()
            .consumer_group("$default")
            .checkpoint_store(Arc::new(InMemoryCheckpointStore::new()))
            .handlers(Arc::new(NoopHandler))
            .build();
        assert!(matches!(result, Err(ProcessorError::Config(_))));
    }

    #[test]
    fn test_builder_generates_owner_id() {
        let processor = builder().build().unwrap();
        assert!(!processor.id().is_empty());
        assert!(Uuid::parse_str(processor.id()).is_ok());
    }

    #[test]
    fn test_builder_keeps_explicit_id() {
        let processor = builder().id("proc-a").build().unwrap();
        assert_eq!(processor.id(), "proc-a");
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let processor = builder().id("proc-a").build().unwrap();

        processor.start().await.unwrap();
        assert!(processor.is_running().await);

        // Second start must not spawn a second loop or error.
        processor.start().await.unwrap();
        assert!(processor.is_running().await);

        processor.stop().await.unwrap();
        assert!(!processor.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let processor = builder().id("proc-a").build().unwrap();

        processor.start().await.unwrap();
        processor.stop().await.unwrap();
        processor.stop().await.unwrap();
        assert!(!processor.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_ok() {
        let processor = builder().build().unwrap();
        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_partition_mode_starts_one_pump() {
        let processor = builder().id("proc-a").partition_id("1").build().unwrap();

        processor.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(processor.owned_partition_ids().await, vec!["1"]);

        processor.stop().await.unwrap();
        assert!(processor.owned_partition_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let processor = builder().id("proc-a").partition_id("0").build().unwrap();

        processor.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        processor.stop().await.unwrap();

        processor.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(processor.is_running().await);
        assert_eq!(processor.owned_partition_ids().await, vec!["0"]);

        processor.stop().await.unwrap();
    }
}
