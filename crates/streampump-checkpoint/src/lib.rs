//! Checkpoint store - the coordination substrate for streampump.
//!
//! A fleet of processor instances has no central coordinator. All
//! coordination happens through a shared store holding two kinds of records:
//!
//! - **Ownership**: which instance currently consumes which partition, with
//!   optimistic concurrency via etags
//! - **Checkpoints**: the last processed position per partition per group
//!
//! ## Concurrency Model
//!
//! `claim_ownership` is the only contended write. Each requested row carries
//! the etag the caller last observed; the store writes a row only when that
//! etag still matches (or, for a missing etag, when no row exists yet).
//! Losing rows are silently dropped from the returned list - partial success
//! is the normal outcome when several instances race for the same partition.
//!
//! ## Implementations
//!
//! - [`InMemoryCheckpointStore`]: process-local, used by tests and embedded
//!   deployments
//! - [`SqliteCheckpointStore`]: durable single-node store
//!
//! Any other backend can participate by implementing [`CheckpointStore`];
//! the processor only ever sees `Arc<dyn CheckpointStore>`.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use types::{Checkpoint, PartitionOwnership};

use async_trait::async_trait;

/// Durable ownership and checkpoint records with optimistic concurrency.
///
/// All implementations must be `Send + Sync` so they can be shared across
/// async tasks via `Arc<dyn CheckpointStore>`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// List every ownership record for the given namespace/hub/group.
    ///
    /// Returns an empty vector when no instance has claimed anything yet;
    /// never fails just because records are absent.
    async fn list_ownership(
        &self,
        fully_qualified_namespace: &str,
        event_hub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<PartitionOwnership>>;

    /// Attempt to claim each requested ownership row.
    ///
    /// For every row, the request's `etag` is the precondition:
    ///
    /// - `Some(etag)` - the write succeeds only if the stored row still
    ///   carries that etag
    /// - `None` - create-if-absent; the write succeeds only if no row exists
    ///   for the composite key
    ///
    /// Successful rows come back with a fresh etag and an updated
    /// `last_modified_time_ms`. Rows that lost the race are omitted from the
    /// result; the call itself does not fail on partial success.
    async fn claim_ownership(
        &self,
        requested: Vec<PartitionOwnership>,
    ) -> Result<Vec<PartitionOwnership>>;

    /// Upsert a checkpoint. Callers serialize checkpoint writes per
    /// partition, so a later call always supersedes earlier ones.
    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> Result<()>;

    /// List every checkpoint for the given namespace/hub/group.
    async fn list_checkpoints(
        &self,
        fully_qualified_namespace: &str,
        event_hub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Checkpoint>>;
}
