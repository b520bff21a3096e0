//! SQLite checkpoint store.
//!
//! Durable single-node implementation of [`CheckpointStore`]. The etag
//! compare-and-swap is expressed directly in SQL: a claim with an etag is a
//! conditional `UPDATE ... WHERE etag = ?`, a claim without one is an
//! `INSERT ... ON CONFLICT DO NOTHING`. Either way a single statement decides
//! the race, so concurrent claimers across processes resolve to exactly one
//! winner per row.
//!
//! The schema is created on open; there is no separate migration step.

use crate::error::Result;
use crate::types::{Checkpoint, PartitionOwnership};
use crate::CheckpointStore;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partition_ownership (
    fully_qualified_namespace TEXT NOT NULL,
    event_hub_name            TEXT NOT NULL,
    consumer_group            TEXT NOT NULL,
    partition_id              TEXT NOT NULL,
    owner_id                  TEXT NOT NULL,
    last_modified_time_ms     INTEGER NOT NULL,
    etag                      TEXT NOT NULL,
    PRIMARY KEY (fully_qualified_namespace, event_hub_name, consumer_group, partition_id)
);

CREATE TABLE IF NOT EXISTS checkpoints (
    fully_qualified_namespace TEXT NOT NULL,
    event_hub_name            TEXT NOT NULL,
    consumer_group            TEXT NOT NULL,
    partition_id              TEXT NOT NULL,
    record_offset             TEXT NOT NULL,
    sequence_number           INTEGER NOT NULL,
    PRIMARY KEY (fully_qualified_namespace, event_hub_name, consumer_group, partition_id)
);
"#;

/// SQLite-backed [`CheckpointStore`].
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) a store at the given path.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    /// Create an in-memory store (for testing).
    ///
    /// The pool is capped at one connection: each connection to
    /// `sqlite::memory:` would otherwise see its own private database.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn list_ownership(
        &self,
        fully_qualified_namespace: &str,
        event_hub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<PartitionOwnership>> {
        let rows: Vec<(String, String, String, String, String, i64, String)> = sqlx::query_as(
            r#"
            SELECT fully_qualified_namespace, event_hub_name, consumer_group,
                   partition_id, owner_id, last_modified_time_ms, etag
            FROM partition_ownership
            WHERE fully_qualified_namespace = ? AND event_hub_name = ? AND consumer_group = ?
            ORDER BY partition_id
            "#,
        )
        .bind(fully_qualified_namespace)
        .bind(event_hub_name)
        .bind(consumer_group)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(ns, hub, group, partition_id, owner_id, last_modified_time_ms, etag)| {
                    PartitionOwnership {
                        fully_qualified_namespace: ns,
                        event_hub_name: hub,
                        consumer_group: group,
                        partition_id,
                        owner_id,
                        last_modified_time_ms,
                        etag: Some(etag),
                    }
                },
            )
            .collect())
    }

    async fn claim_ownership(
        &self,
        requested: Vec<PartitionOwnership>,
    ) -> Result<Vec<PartitionOwnership>> {
        let mut claimed = Vec::new();

        for mut request in requested {
            let new_etag = Uuid::new_v4().to_string();
            let now = Self::now_ms();

            let rows_affected = match &request.etag {
                Some(etag) => {
                    sqlx::query(
                        r#"
                        UPDATE partition_ownership
                        SET owner_id = ?, last_modified_time_ms = ?, etag = ?
                        WHERE fully_qualified_namespace = ? AND event_hub_name = ?
                          AND consumer_group = ? AND partition_id = ? AND etag = ?
                        "#,
                    )
                    .bind(&request.owner_id)
                    .bind(now)
                    .bind(&new_etag)
                    .bind(&request.fully_qualified_namespace)
                    .bind(&request.event_hub_name)
                    .bind(&request.consumer_group)
                    .bind(&request.partition_id)
                    .bind(etag)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
                }
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO partition_ownership
                            (fully_qualified_namespace, event_hub_name, consumer_group,
                             partition_id, owner_id, last_modified_time_ms, etag)
                        VALUES (?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT DO NOTHING
                        "#,
                    )
                    .bind(&request.fully_qualified_namespace)
                    .bind(&request.event_hub_name)
                    .bind(&request.consumer_group)
                    .bind(&request.partition_id)
                    .bind(&request.owner_id)
                    .bind(now)
                    .bind(&new_etag)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
                }
            };

            if rows_affected == 1 {
                request.etag = Some(new_etag);
                request.last_modified_time_ms = now;
                claimed.push(request);
            }
        }

        Ok(claimed)
    }

    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints
                (fully_qualified_namespace, event_hub_name, consumer_group,
                 partition_id, record_offset, sequence_number)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (fully_qualified_namespace, event_hub_name, consumer_group, partition_id)
            DO UPDATE SET
                record_offset = excluded.record_offset,
                sequence_number = excluded.sequence_number
            "#,
        )
        .bind(&checkpoint.fully_qualified_namespace)
        .bind(&checkpoint.event_hub_name)
        .bind(&checkpoint.consumer_group)
        .bind(&checkpoint.partition_id)
        .bind(&checkpoint.offset)
        .bind(checkpoint.sequence_number)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_checkpoints(
        &self,
        fully_qualified_namespace: &str,
        event_hub_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Checkpoint>> {
        let rows: Vec<(String, String, String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT fully_qualified_namespace, event_hub_name, consumer_group,
                   partition_id, record_offset, sequence_number
            FROM checkpoints
            WHERE fully_qualified_namespace = ? AND event_hub_name = ? AND consumer_group = ?
            ORDER BY partition_id
            "#,
        )
        .bind(fully_qualified_namespace)
        .bind(event_hub_name)
        .bind(consumer_group)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(ns, hub, group, partition_id, offset, sequence_number)| Checkpoint {
                    fully_qualified_namespace: ns,
                    event_hub_name: hub,
                    consumer_group: group,
                    partition_id,
                    offset,
                    sequence_number,
                },
            )
            .collect())
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

    #[tokio::test]
    async fn test_claim_create_and_list() {
        let store = SqliteCheckpointStore::new_in_memory().await.unwrap();

        let claimed = store
            .claim_ownership(vec![ownership_request("0", "proc-a")])
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(claimed[0].etag.is_some());

        let rows = store
            .list_ownership("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].owner_id, "proc-a");
        assert_eq!(rows[0].etag, claimed[0].etag);
    }

    #[tokio::test]
    async fn test_create_if_absent_loses_against_existing_row() {
        let store = SqliteCheckpointStore::new_in_memory().await.unwrap();

        store
            .claim_ownership(vec![ownership_request("0", "proc-a")])
            .await
            .unwrap();

        let claimed = store
            .claim_ownership(vec![ownership_request("0", "proc-b")])
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_stale_etag_silently_dropped() {
        let store = SqliteCheckpointStore::new_in_memory().await.unwrap();

        let first = store
            .claim_ownership(vec![ownership_request("0", "proc-a")])
            .await
            .unwrap();
        let stale = first[0].etag.clone();

        let mut steal = ownership_request("0", "proc-b");
        steal.etag = stale.clone();
        let stolen = store.claim_ownership(vec![steal]).await.unwrap();
        assert_eq!(stolen.len(), 1);

        let mut retry = ownership_request("0", "proc-a");
        retry.etag = stale;
        let lost = store.claim_ownership(vec![retry]).await.unwrap();
        assert!(lost.is_empty());

        let rows = store
            .list_ownership("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert_eq!(rows[0].owner_id, "proc-b");
    }

    #[tokio::test]
    async fn test_abandon_and_reclaim_with_preserved_etag() {
        let store = SqliteCheckpointStore::new_in_memory().await.unwrap();

        let claimed = store
            .claim_ownership(vec![ownership_request("3", "proc-a")])
            .await
            .unwrap();

        let mut abandon = claimed[0].clone();
        abandon.owner_id = String::new();
        let abandoned = store.claim_ownership(vec![abandon]).await.unwrap();
        assert!(abandoned[0].is_abandoned());

        let mut takeover = ownership_request("3", "proc-b");
        takeover.etag = abandoned[0].etag.clone();
        let taken = store.claim_ownership(vec![takeover]).await.unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].owner_id, "proc-b");
    }

    #[tokio::test]
    async fn test_checkpoint_upsert() {
        let store = SqliteCheckpointStore::new_in_memory().await.unwrap();

        let mut checkpoint = Checkpoint {
            fully_qualified_namespace: "ns.example".to_string(),
            event_hub_name: "hub".to_string(),
            consumer_group: "$default".to_string(),
            partition_id: "0".to_string(),
            offset: "10".to_string(),
            sequence_number: 10,
        };
        store.update_checkpoint(checkpoint.clone()).await.unwrap();

        checkpoint.offset = "42".to_string();
        checkpoint.sequence_number = 42;
        store.update_checkpoint(checkpoint).await.unwrap();

        let checkpoints = store
            .list_checkpoints("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].offset, "42");
        assert_eq!(checkpoints[0].sequence_number, 42);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");

        {
            let store = SqliteCheckpointStore::new(&path).await.unwrap();
            store
                .claim_ownership(vec![ownership_request("0", "proc-a")])
                .await
                .unwrap();
        }

        let reopened = SqliteCheckpointStore::new(&path).await.unwrap();
        let rows = reopened
            .list_ownership("ns.example", "hub", "$default")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].owner_id, "proc-a");
    }
}
