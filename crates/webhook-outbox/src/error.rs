//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] webhook_database::DatabaseError),

    /// Transport failure: connect, DNS, timeout
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Destination answered with a non-2xx status
    #[error("Send failed: {0}")]
    Send(String),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
