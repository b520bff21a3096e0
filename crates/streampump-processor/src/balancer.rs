//! Load-balancing strategies for partition ownership.
//!
//! A [`LoadBalancer`] is a pure decision function: given this instance's id,
//! the ownership records read from the store, and the partition universe, it
//! picks which partitions to claim next. It performs no I/O - the processor
//! executes the claims - so alternative policies can be swapped in without
//! touching the supervisor.
//!
//! ## Fair Strategy
//!
//! [`FairLoadBalancer`] converges a fleet toward an even distribution while
//! claiming **at most one partition per iteration**. Claiming one at a time
//! prevents two instances from over-claiming in the same tick and gives the
//! rest of the fleet a chance to observe the new state before the next round;
//! over successive iterations the distribution settles at
//! `|count_i - count_j| <= 1` and no further claims occur.

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use streampump_checkpoint::PartitionOwnership;
use tracing::debug;

/// Strategy deciding which partitions this instance should claim.
pub trait LoadBalancer: Send + Sync {
    /// Pick zero or more partitions to claim.
    ///
    /// `ownerships` is keyed by partition id and contains every
    /// non-abandoned record for the consumer group; `partition_ids` is the
    /// hub's full partition universe.
    fn load_balance(
        &self,
        owner_id: &str,
        ownerships: &HashMap<String, PartitionOwnership>,
        partition_ids: &[String],
    ) -> Vec<String>;
}

/// Fair strategy: claim unowned or expired partitions first, steal from the
/// most loaded instance when this one is below its quota.
pub struct FairLoadBalancer {
    inactive_time_limit: Duration,
}

impl FairLoadBalancer {
    /// `inactive_time_limit` is how old an ownership's
    /// `last_modified_time_ms` may be before its owner is presumed dead.
    pub fn new(inactive_time_limit: Duration) -> Self {
        Self {
            inactive_time_limit,
        }
    }

    /// An ownership is stale when its owner has not refreshed it within the
    /// inactivity limit. Stale partitions are reclaimable without any
    /// heartbeat protocol: crash recovery is just this timer.
    fn is_stale(&self, ownership: &PartitionOwnership, now_ms: i64) -> bool {
        now_ms - ownership.last_modified_time_ms > self.inactive_time_limit.as_millis() as i64
    }
}

impl LoadBalancer for FairLoadBalancer {
    fn load_balance(
        &self,
        owner_id: &str,
        ownerships: &HashMap<String, PartitionOwnership>,
        partition_ids: &[String],
    ) -> Vec<String> {
        if partition_ids.is_empty() {
            return Vec::new();
        }

        let now = current_timestamp_ms();

        // Ownerships that still count: fresh and not abandoned. Everything
        // else leaves its partition up for grabs.
        let active: Vec<&PartitionOwnership> = ownerships
            .values()
            .filter(|o| !o.is_abandoned() && !self.is_stale(o, now))
            .collect();

        let owned: HashSet<&str> = active.iter().map(|o| o.partition_id.as_str()).collect();
        let mut claimable: Vec<&str> = partition_ids
            .iter()
            .map(String::as_str)
            .filter(|p| !owned.contains(p))
            .collect();
        claimable.sort_unstable();

        // Partition counts per live owner, counting ourselves even when we
        // own nothing yet.
        let mut counts: HashMap<&str, usize> = HashMap::new();
        counts.insert(owner_id, 0);
        for ownership in &active {
            *counts.entry(ownership.owner_id.as_str()).or_insert(0) += 1;
        }

        let min_quota = partition_ids.len() / counts.len();
        let my_count = counts[owner_id];

        if my_count < min_quota {
            // Steal a single partition from the most loaded owner. Ties on
            // load break toward the lexicographically smallest owner so every
            // instance picks the same victim.
            let mut victim: Option<(&str, usize)> = None;
            for (id, &count) in &counts {
                if *id == owner_id || count <= min_quota {
                    continue;
                }
                let better = match victim {
                    None => true,
                    Some((victim_id, victim_count)) => {
                        count > victim_count || (count == victim_count && *id < victim_id)
                    }
                };
                if better {
                    victim = Some((*id, count));
                }
            }

            if let Some((victim, _)) = victim {
                let mut victim_partitions: Vec<&str> = active
                    .iter()
                    .filter(|o| o.owner_id == victim)
                    .map(|o| o.partition_id.as_str())
                    .collect();
                victim_partitions.sort_unstable();

                if let Some(partition_id) = victim_partitions.first() {
                    debug!(
                        owner_id = owner_id,
                        victim = victim,
                        partition_id = %partition_id,
                        "Stealing partition from most loaded owner"
                    );
                    return vec![partition_id.to_string()];
                }
            }
        }

        if let Some(partition_id) = claimable.first() {
            debug!(
                owner_id = owner_id,
                partition_id = %partition_id,
                "Claiming unowned partition"
            );
            return vec![partition_id.to_string()];
        }

        // The fleet is balanced; steady state makes no claims.
        Vec::new()
    }
}

/// Get current timestamp in milliseconds since epoch
fn current_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("System time before UNIX epoch")
        .as_millis() as i64
}
