//! Data Models
//!
//! Contains all data structures used throughout the application.

pub mod pipeline;
pub mod settings;

pub use pipeline::*;
pub use settings::*;
