//! Query Pipeline
//!
//! The NL-to-SQL controller and the stage helpers it drives:
//! - `controller` - state machine, correction loop, trace
//! - `prompts` - per-stage generation requests
//! - `payloads` - typed parsing of model JSON
//! - `introspection` - schema answers without SQL
//! - `answers` - deterministic answer text

pub mod answers;
pub mod controller;
pub mod introspection;
pub mod payloads;
pub mod prompts;

pub use controller::{transition, QueryPipeline, SchemaContext, Step, TransitionContext};
