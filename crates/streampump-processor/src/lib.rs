//! streampump processor - cooperative partition consumption without a
//! central coordinator.
//!
//! A fleet of [`EventProcessor`] instances, each with a unique owner id and
//! bound to one consumer group on one event hub, collectively consumes every
//! partition exactly once per group. Instances never talk to each other:
//! coordination happens entirely through a shared
//! [`CheckpointStore`](streampump_checkpoint::CheckpointStore) using etag
//! compare-and-swap writes. Each instance claims at most one partition per
//! balancing round, so the fleet converges to an even split and then goes
//! quiet.
//!
//! ## Components
//!
//! - [`EventProcessor`]: supervisor running the balance loop
//! - [`FairLoadBalancer`]: pure claim-decision strategy (swappable via
//!   [`LoadBalancer`])
//! - [`PumpManager`] / pumps: one receive task per owned partition
//! - [`EventHandler`]: user callbacks, with checkpointing through
//!   [`PartitionContext::update_checkpoint`]
//! - [`EventHubTransport`]: injected connection to the streaming service
//!
//! ## Delivery Contract
//!
//! At-least-once: a partition's events are delivered in order, one batch at
//! a time, and progress is persisted only when user code calls
//! `update_checkpoint`. After a crash the next owner resumes from the last
//! checkpoint. Ownership left behind by a crashed instance is reclaimed once
//! it goes unrefreshed past the configured expiration; a graceful
//! [`EventProcessor::stop`] instead abandons rows so peers take over
//! immediately.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use streampump_checkpoint::InMemoryCheckpointStore;
//! use streampump_processor::EventProcessor;
//!
//! let processor = EventProcessor::builder()
//!     .consumer_group("$default")
//!     .transport(transport)
//!     .checkpoint_store(Arc::new(InMemoryCheckpointStore::new()))
//!     .handlers(Arc::new(MyHandler))
//!     .build()?;
//!
//! processor.start().await?;
//! // ... events flow into MyHandler::process_events ...
//! processor.stop().await?;
//! ```

pub mod balancer;
pub mod config;
pub mod error;
pub mod handlers;
pub mod position;
pub mod processor;
mod pump;
pub mod pump_manager;
pub mod transport;

pub use balancer::{FairLoadBalancer, LoadBalancer};
pub use config::ProcessorConfig;
pub use error::{ProcessorError, Result};
pub use handlers::{CloseReason, EventHandler, PartitionContext};
pub use position::resolve_start_position;
pub use processor::{EventProcessor, EventProcessorBuilder, ProcessingTarget};
pub use pump_manager::PumpManager;
pub use transport::{EventHubTransport, PartitionReceiver};
