//! Core Error Types
//!
//! Failures reported across the `QueryDatabase` seam. The controller turns
//! any of them into an `ExecutionError` stage failure carrying the message,
//! so the text is what the correction prompt shows the model.

use thiserror::Error;

/// Error returned by a `QueryDatabase` implementation.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The engine failed to prepare or run the statement
    #[error("Query failed: {0}")]
    Query(String),

    /// The statement was refused before running, e.g. it would write
    #[error("Statement rejected: {0}")]
    Rejected(String),

    /// The catalog could not be read
    #[error("Schema introspection failed: {0}")]
    Schema(String),

    /// The blocking worker running the call panicked or was cancelled
    #[error("Database task aborted: {0}")]
    Task(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }
}
