//! Processor configuration.

use std::time::Duration;
use streampump_core::StartPositions;

/// Tunables for an [`EventProcessor`](crate::EventProcessor).
///
/// # Fields
///
/// * `loop_interval` - pause between balance-loop iterations (default: 10s)
/// * `ownership_expiration` - an ownership whose `last_modified_time_ms` is
///   older than this is treated as belonging to a dead instance and becomes
///   claimable (default: 60s)
/// * `max_batch_size` - upper bound on events per `process_events` call
///   (default: 100)
/// * `start_positions` - user default applied when a partition has no
///   checkpoint; `None` falls back to reading only new events
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Pause between balance-loop iterations (default: 10s).
    pub loop_interval: Duration,

    /// Age after which an unrefreshed ownership is reclaimable (default: 60s).
    pub ownership_expiration: Duration,

    /// Maximum events delivered per batch (default: 100).
    pub max_batch_size: usize,

    /// Default starting positions when no checkpoint exists.
    pub start_positions: Option<StartPositions>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_secs(10),
            ownership_expiration: Duration::from_secs(60),
            max_batch_size: 100,
            start_positions: None,
        }
    }
}
