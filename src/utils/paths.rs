//! Application Paths
//!
//! Resolves the per-user data directory (`~/.query-cascade/`).

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Query Cascade directory (~/.query-cascade/)
pub fn app_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".query-cascade"))
}

/// Get the config file path (~/.query-cascade/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(app_dir()?.join("config.json"))
}

/// Get the default database path (~/.query-cascade/query.db)
pub fn database_path() -> AppResult<PathBuf> {
    Ok(app_dir()?.join("query.db"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Get the Query Cascade directory, creating if it doesn't exist
pub fn ensure_app_dir() -> AppResult<PathBuf> {
    let path = app_dir()?;
    ensure_dir(&path)?;
    Ok(path)
}
