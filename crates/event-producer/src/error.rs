//! Producer error types.

use thiserror::Error;
use webhook_database::DatabaseError;

/// Errors from a domain write. Any of them means nothing was committed.
#[derive(Error, Debug)]
pub enum ProducerError {
    /// Rejected before touching the database
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Query failure inside the write, including the outbox insert
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Failure opening or committing the SQLite transaction
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias using ProducerError.
pub type ProducerResult<T> = Result<T, ProducerError>;
