//! Two processors splitting an in-memory hub between them.
//!
//! Run with: cargo run --example balanced_fleet

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streampump_checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use streampump_core::{EventData, EventPosition};
use streampump_processor::{
    EventHandler, EventHubTransport, EventProcessor, PartitionContext, PartitionReceiver,
    ProcessorError, Result,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct PartitionQueue {
    events: Mutex<VecDeque<EventData>>,
    notify: Notify,
}

struct DemoHub {
    partitions: BTreeMap<String, Arc<PartitionQueue>>,
}

impl DemoHub {
    fn new(partition_count: usize) -> Self {
        let partitions = (0..partition_count)
            .map(|i| {
                (
                    i.to_string(),
                    Arc::new(PartitionQueue {
                        events: Mutex::new(VecDeque::new()),
                        notify: Notify::new(),
                    }),
                )
            })
            .collect();
        Self { partitions }
    }

    fn push(&self, partition_id: &str, event: EventData) {
        let queue = &self.partitions[partition_id];
        queue.events.lock().unwrap().push_back(event);
        queue.notify.notify_waiters();
    }
}

struct DemoReceiver {
    queue: Arc<PartitionQueue>,
}

#[async_trait]
impl PartitionReceiver for DemoReceiver {
    async fn receive(
        &mut self,
        max_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventData>> {
        loop {
            let notified = self.queue.notify.notified();
            {
                let mut events = self.queue.events.lock().unwrap();
                if !events.is_empty() {
                    let n = max_count.min(events.len());
                    return Ok(events.drain(..n).collect());
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProcessorError::Cancelled),
                _ = notified => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl EventHubTransport for DemoHub {
    fn fully_qualified_namespace(&self) -> &str {
        "demo.example"
    }

    fn event_hub_name(&self) -> &str {
        "orders"
    }

    async fn partition_ids(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
        Ok(self.partitions.keys().cloned().collect())
    }

    async fn create_receiver(
        &self,
        _consumer_group: &str,
        partition_id: &str,
        _position: EventPosition,
    ) -> Result<Box<dyn PartitionReceiver>> {
        let queue = self
            .partitions
            .get(partition_id)
            .ok_or_else(|| ProcessorError::Transport(format!("no partition {partition_id}")))?;
        Ok(Box::new(DemoReceiver {
            queue: Arc::clone(queue),
        }))
    }
}

struct PrintingHandler {
    name: &'static str,
}

#[async_trait]
impl EventHandler for PrintingHandler {
    async fn process_events(&self, events: &[EventData], context: &PartitionContext) -> Result<()> {
        for event in events {
            println!(
                "[{}] partition {} offset {}: {:?}",
                self.name,
                context.partition_id(),
                event.offset,
                event.body
            );
            context.update_checkpoint(event).await?;
        }
        Ok(())
    }
}

fn fleet_member(
    name: &'static str,
    hub: &Arc<DemoHub>,
    store: &Arc<InMemoryCheckpointStore>,
) -> EventProcessor {
    EventProcessor::builder()
        .id(name)
        .consumer_group("$default")
        .transport(Arc::clone(hub) as Arc<dyn EventHubTransport>)
        .checkpoint_store(Arc::clone(store) as Arc<dyn CheckpointStore>)
        .handlers(Arc::new(PrintingHandler { name }))
        .loop_interval(Duration::from_millis(200))
        .build()
        .expect("processor configuration is complete")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let hub = Arc::new(DemoHub::new(4));
    let store = Arc::new(InMemoryCheckpointStore::new());

    let a = fleet_member("proc-a", &hub, &store);
    let b = fleet_member("proc-b", &hub, &store);

    a.start().await?;
    b.start().await?;

    // Give the fleet a few balancing rounds to split the partitions.
    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("proc-a owns {:?}", a.owned_partition_ids().await);
    println!("proc-b owns {:?}", b.owned_partition_ids().await);

    for i in 0..20 {
        let partition = (i % 4).to_string();
        hub.push(
            &partition,
            EventData::new(format!("order-{i}"))
                .with_offset(i.to_string())
                .with_sequence_number(i),
        );
    }

    tokio::time::sleep(Duration::from_secs(1)).await;

    a.stop().await?;
    b.stop().await?;
    Ok(())
}
