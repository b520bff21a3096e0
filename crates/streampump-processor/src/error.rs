//! Error types for the event processor.
//!
//! ## Error Categories
//!
//! ### Cancellation
//! - `Cancelled`: the run-scoped token fired. This is a sentinel, not a
//!   failure: the balance loop and pumps treat it as "exit cleanly" and it is
//!   never forwarded to the user's error handler.
//!
//! ### Coordination Errors
//! - `Store`: checkpoint store list/claim/update failed
//! - `Transport`: partition-id query or receiver construction failed
//!
//! Both are reported through the user's error handler and the balance loop
//! sleeps and retries; they are never fatal to the processor.
//!
//! ### Partition-Scoped Errors
//! - `Receiver`: a pump's receive failed; the pump self-closes with reason
//!   `PumpError` and the partition is re-claimed on a later iteration
//!
//! ### Usage Errors
//! - `Config`: builder validation failure
//! - `PumpExists`: a pump was requested for a partition that already has one

use streampump_checkpoint::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessorError>;

#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The run-scoped cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// Builder validation failed.
    #[error("Invalid processor configuration: {0}")]
    Config(String),

    /// Checkpoint store operation failed.
    #[error("Checkpoint store error: {0}")]
    Store(#[from] StoreError),

    /// Transport operation failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A pump's receive call failed.
    #[error("Receive failed on partition {partition_id}: {message}")]
    Receiver {
        partition_id: String,
        message: String,
    },

    /// A pump already exists for this partition on this instance.
    #[error("A pump is already receiving from partition {0}")]
    PumpExists(String),

    /// Failure raised by a user-supplied handler.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Background task join failed.
    #[error("Join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ProcessorError {
    /// True when this error is the cancellation sentinel. Cancellation must
    /// never reach the user's error handler.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ProcessorError::Cancelled)
    }
}
