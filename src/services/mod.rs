//! Services
//!
//! Business logic services for the application.

pub mod pipeline;

pub use pipeline::{QueryPipeline, SchemaContext};
