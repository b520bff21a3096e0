//! Starting-position resolution.

use crate::error::Result;
use streampump_checkpoint::CheckpointStore;
use streampump_core::{EventPosition, StartPositions};
use tracing::debug;

/// Resolve where a pump should begin reading a partition.
///
/// Precedence: an existing checkpoint beats any user-supplied default, which
/// beats [`EventPosition::Latest`]. A per-partition default map only applies
/// when it actually contains this partition's id.
pub async fn resolve_start_position(
    store: &dyn CheckpointStore,
    fully_qualified_namespace: &str,
    event_hub_name: &str,
    consumer_group: &str,
    partition_id: &str,
    user_start: Option<&StartPositions>,
) -> Result<EventPosition> {
    let checkpoints = store
        .list_checkpoints(fully_qualified_namespace, event_hub_name, consumer_group)
        .await?;

    if let Some(checkpoint) = checkpoints.into_iter().find(|c| c.partition_id == partition_id) {
        debug!(
            partition_id = %partition_id,
            offset = %checkpoint.offset,
            "Resuming partition from checkpoint"
        );
        return Ok(EventPosition::Offset(checkpoint.offset));
    }

    Ok(user_start
        .and_then(|start| start.for_partition(partition_id))
        .cloned()
        .unwrap_or(EventPosition::Latest))
}
