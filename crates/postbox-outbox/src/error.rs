//! Outbox error types.

use postbox_database::DatabaseError;
use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Invalid engine configuration (e.g. too many shards).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested page is not the next page of the query in flight.
    #[error("Page {requested} is out of range, next valid page is {next_valid}")]
    PageOutOfRange { requested: u32, next_valid: u32 },

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No stored message with this id
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Backend failure reported by a store adapter
    #[error("Store error: {0}")]
    Store(String),

    /// A store call did not finish in time
    #[error("Store call {operation} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    /// Pagination token could not be decoded
    #[error("Invalid pagination token: {0}")]
    InvalidToken(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OutboxError {
    /// True for backend faults that are propagated unchanged to the caller.
    pub fn is_store_fault(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Store(_)
                | Self::Timeout { .. }
                | Self::InvalidToken(_)
                | Self::Json(_)
        )
    }

    /// The page to retry with when this is a [`OutboxError::PageOutOfRange`].
    pub fn next_valid_page(&self) -> Option<u32> {
        match self {
            Self::PageOutOfRange { next_valid, .. } => Some(*next_valid),
            _ => None,
        }
    }
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
