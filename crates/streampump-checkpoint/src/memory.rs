//! In-memory checkpoint store.
//!
//! Process-local implementation of [`CheckpointStore`] used by tests and by
//! embedded single-process deployments where several processors share one
//! store handle. Etag compare-and-swap semantics match the durable stores:
//! a claim with a stale etag is dropped from the result, never errored.

use crate::error::Result;
use crate::types::{Checkpoint, PartitionOwnership};
use crate::CheckpointStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Composite key: (namespace, hub, group, partition).
type RecordKey = (String, String, String, String);

/// In-memory [`CheckpointStore`] backed by `tokio::sync::RwLock` maps.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    ownerships: RwLock<HashMap<RecordKey, PartitionOwnership>>,
    checkpoints: RwLock<HashMap<RecordKey, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ownership_key(o: &PartitionOwnership) -> RecordKey {
    (
        o.fully_qualified_namespace.clone(),
        o.event_hub_name.clone(),
        o.consumer_group.clone(),
        o.partition_id.clone(),
    )
}

fn checkpoint_key(c: &Checkpoint) -> RecordKey {
    (
        c.fully_qualified_namespace.clone(),
        c.event_hub_name.clone(),
        c.consumer_group.clone(),
        c.partition_id.clone(),
    )
}

fn current_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("System time before UNIX epoch")
        .as_millis() as i64
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn list_ownership(
        &self,
        fully_qualified_namespace: &str,
        event_hub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<PartitionOwnership>> {
        let ownerships = self.ownerships.read().await;
        let mut matching: Vec<PartitionOwnership> = ownerships
            .values()
            .filter(|o| {
                o.fully_qualified_namespace == fully_qualified_namespace
                    && o.event_hub_name == event_hub_name
                    && o.consumer_group == consumer_group
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));
        Ok(matching)
    }

    async fn claim_ownership(
        &self,
        requested: Vec<PartitionOwnership>,
    ) -> Result<Vec<PartitionOwnership>> {
        let mut ownerships = self.ownerships.write().await;
        let mut claimed = Vec::new();

        for mut request in requested {
            let key = ownership_key(&request);
            let matches = match (ownerships.get(&key), &request.etag) {
                // Create-if-absent: succeeds only when no row exists.
                (None, None) => true,
                // Row exists and the caller's etag is still current.
                (Some(current), Some(etag)) => current.etag.as_deref() == Some(etag.as_str()),
                // Row vanished under the caller, or the caller expected no
                // row where one exists; either way the claim loses.
                _ => false,
            };

            if !matches {
                continue;
            }

            request.etag = Some(Uuid::new_v4().to_string());
            request.last_modified_time_ms = current_timestamp_ms();
            ownerships.insert(key, request.clone());
            claimed.push(request);
        }

        Ok(claimed)
    }

    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(checkpoint_key(&checkpoint), checkpoint);
        Ok(())
    }

    async fn list_checkpoints(
        &self,
        fully_qualified_namespace: &str,
        event_hub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        let mut matching: Vec<Checkpoint> = checkpoints
            .values()
            .filter(|c| {
                c.fully_qualified_namespace == fully_qualified_namespace
                    && c.event_hub_name == event_hub_name
                    && c.consumer_group == consumer_group
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ownership_request(partition_id: &str, owner_id: &str) -> PartitionOwnership {
        PartitionOwnership {
            fully_qualified_namespace: "ns.example".to_string(),
            event_hub_name: "hub".to_string(),
            consumer_group: "$default".to_string(),
            partition_id: partition_id.to_string(),
            owner_id: owner_id.to_string(),
            last_modified_time_ms: 0,
            etag: None,
        }
    }

    fn checkpoint(partition_id: &str, offset: &str, sequence_number: i64) -> Checkpoint {
        Checkpoint {
            fully_qualified_namespace: "ns.example".to_string(),
            event_hub_name: "hub".to_string(),
            consumer_group: "$default".to_string(),
            partition_id: partition_id.to_string(),
            offset: offset.to_string(),
            sequence_number,
        }
    }

    #[tokio::test]
    async fn test_list_ownership_empty() {
        let store = InMemoryCheckpointStore::new();
        let rows = store
            .list_ownership("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_claim_creates_when_no_row_exists() {
        let store = InMemoryCheckpointStore::new();

        let claimed = store
            .claim_ownership(vec![ownership_request("0", "proc-a")])
            .await
            .unwrap();

        assert_eq!(claimed.len(), 1);
        assert!(claimed[0].etag.is_some());
        assert!(claimed[0].last_modified_time_ms > 0);

        let rows = store
            .list_ownership("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].owner_id, "proc-a");
    }

    #[tokio::test]
    async fn test_claim_without_etag_loses_when_row_exists() {
        let store = InMemoryCheckpointStore::new();

        store
            .claim_ownership(vec![ownership_request("0", "proc-a")])
            .await
            .unwrap();

        // A second create-if-absent for the same partition must lose.
        let claimed = store
            .claim_ownership(vec![ownership_request("0", "proc-b")])
            .await
            .unwrap();
        assert!(claimed.is_empty());

        let rows = store
            .list_ownership("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert_eq!(rows[0].owner_id, "proc-a");
    }

    #[tokio::test]
    async fn test_claim_with_current_etag_steals() {
        let store = InMemoryCheckpointStore::new();

        let claimed = store
            .claim_ownership(vec![ownership_request("0", "proc-a")])
            .await
            .unwrap();
        let etag = claimed[0].etag.clone();

        let mut steal = ownership_request("0", "proc-b");
        steal.etag = etag.clone();
        let stolen = store.claim_ownership(vec![steal]).await.unwrap();

        assert_eq!(stolen.len(), 1);
        assert_eq!(stolen[0].owner_id, "proc-b");
        assert_ne!(stolen[0].etag, etag, "successful claim must rotate the etag");
    }

    #[tokio::test]
    async fn test_claim_with_stale_etag_is_silently_dropped() {
        let store = InMemoryCheckpointStore::new();

        let claimed = store
            .claim_ownership(vec![ownership_request("0", "proc-a")])
            .await
            .unwrap();
        let stale = claimed[0].etag.clone();

        // proc-b steals, rotating the etag.
        let mut steal = ownership_request("0", "proc-b");
        steal.etag = stale.clone();
        store.claim_ownership(vec![steal]).await.unwrap();

        // proc-a retries with the stale etag and must silently lose.
        let mut retry = ownership_request("0", "proc-a");
        retry.etag = stale;
        let result = store.claim_ownership(vec![retry]).await.unwrap();
        assert!(result.is_empty());

        let rows = store
            .list_ownership("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert_eq!(rows[0].owner_id, "proc-b");
    }

    #[tokio::test]
    async fn test_claim_batch_partial_success() {
        let store = InMemoryCheckpointStore::new();

        let claimed = store
            .claim_ownership(vec![ownership_request("0", "proc-a")])
            .await
            .unwrap();
        let good_etag = claimed[0].etag.clone();

        let mut good = ownership_request("0", "proc-b");
        good.etag = good_etag;
        let mut bad = ownership_request("0", "proc-c");
        bad.etag = Some("bogus".to_string());
        let fresh = ownership_request("1", "proc-b");

        // One valid steal, one stale claim, one fresh create: two succeed.
        let result = store
            .claim_ownership(vec![bad, good, fresh])
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
        let owners: Vec<&str> = result.iter().map(|o| o.owner_id.as_str()).collect();
        assert!(owners.iter().all(|o| *o == "proc-b"));
    }

    #[tokio::test]
    async fn test_abandon_preserves_etag_chain() {
        let store = InMemoryCheckpointStore::new();

        let claimed = store
            .claim_ownership(vec![ownership_request("3", "proc-a")])
            .await
            .unwrap();

        // Graceful stop: write an empty owner, reusing the current etag.
        let mut abandon = claimed[0].clone();
        abandon.owner_id = String::new();
        let abandoned = store.claim_ownership(vec![abandon]).await.unwrap();
        assert_eq!(abandoned.len(), 1);
        assert!(abandoned[0].is_abandoned());

        // A peer reuses the abandoned row's etag and takes over immediately.
        let mut takeover = ownership_request("3", "proc-b");
        takeover.etag = abandoned[0].etag.clone();
        let taken = store.claim_ownership(vec![takeover]).await.unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].owner_id, "proc-b");
    }

    #[tokio::test]
    async fn test_list_ownership_filters_by_group() {
        let store = InMemoryCheckpointStore::new();

        store
            .claim_ownership(vec![ownership_request("0", "proc-a")])
            .await
            .unwrap();
        let mut other_group = ownership_request("0", "proc-b");
        other_group.consumer_group = "analytics".to_string();
        store.claim_ownership(vec![other_group]).await.unwrap();

        let default_rows = store
            .list_ownership("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert_eq!(default_rows.len(), 1);
        assert_eq!(default_rows[0].owner_id, "proc-a");

        let analytics_rows = store
            .list_ownership("ns.example", "hub", "analytics")
            .await
            .unwrap();
        assert_eq!(analytics_rows.len(), 1);
        assert_eq!(analytics_rows[0].owner_id, "proc-b");
    }

    #[tokio::test]
    async fn test_checkpoint_upsert_last_write_wins() {
        let store = InMemoryCheckpointStore::new();

        store
            .update_checkpoint(checkpoint("0", "10", 10))
            .await
            .unwrap();
        store
            .update_checkpoint(checkpoint("0", "42", 42))
            .await
            .unwrap();

        let checkpoints = store
            .list_checkpoints("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].offset, "42");
        assert_eq!(checkpoints[0].sequence_number, 42);
    }

    #[tokio::test]
    async fn test_checkpoints_independent_per_partition() {
        let store = InMemoryCheckpointStore::new();

        store
            .update_checkpoint(checkpoint("0", "5", 5))
            .await
            .unwrap();
        store
            .update_checkpoint(checkpoint("1", "9", 9))
            .await
            .unwrap();

        let checkpoints = store
            .list_checkpoints("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0].partition_id, "0");
        assert_eq!(checkpoints[1].partition_id, "1");
    }
}
