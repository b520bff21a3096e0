//! Error types for checkpoint store operations.
//!
//! Note that a claim rejected because of a stale etag is *not* an error: the
//! store simply omits the losing row from `claim_ownership`'s return value.
//! `StoreError` covers real failures only (backend unreachable, malformed
//! rows, and so on).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failure reported by a foreign store implementation.
    #[error("Store error: {0}")]
    Store(String),
}
