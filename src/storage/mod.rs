//! Storage Layer
//!
//! JSON configuration and the SQLite database the pipeline queries.

pub mod config;
pub mod database;

pub use config::*;
pub use database::*;
