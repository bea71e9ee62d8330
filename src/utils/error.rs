//! Error Handling
//!
//! Errors raised while loading configuration, opening the SQLite database
//! and preparing the pipeline. Per-query failures never surface here; they
//! end up in the result's trace.

use query_cascade_core::CoreError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Raised across the database seam (query, rejection, schema read)
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The database file or its pool could not be set up
    #[error("Failed to open database: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("No database connection available: {0}")]
    Pool(#[from] r2d2::Error),

    /// The app directory could not be located
    #[error("Configuration error: {0}")]
    Config(String),

    /// config.json parsed but failed `AppConfig::validate`
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed config.json: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Convert to the error reported by `QueryDatabase`, wrapping anything
    /// that is not already a core error with `wrap`.
    pub fn into_core(self, wrap: fn(String) -> CoreError) -> CoreError {
        match self {
            AppError::Core(core) => core,
            AppError::Sqlite(e) => wrap(e.to_string()),
            other => wrap(other.to_string()),
        }
    }
}
