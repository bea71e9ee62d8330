//! Query Cascade Guards
//!
//! Deterministic checks run on every generated SQL statement before it
//! reaches the database:
//!
//! - `models` - Guard result and report types (GuardStatus, GuardKind, Violation, GuardReport)
//! - `safety` - Static safety rules (read-only, single statement, LIMIT, no `SELECT *`)
//! - `joins` - Table alias resolution and JOIN ... ON condition extraction
//! - `pipeline` - Two-phase guard pipeline: safety, then foreign-key join validation
//!
//! Nothing here calls a model or touches the database.

pub mod joins;
pub mod models;
pub mod pipeline;
pub mod safety;

// Re-export model types
pub use models::{GuardKind, GuardReport, GuardResult, GuardStatus, Violation};

// Re-export guards
pub use joins::{extract_join_conditions, extract_table_refs, JoinCondition, TableRef};
pub use pipeline::GuardPipeline;
pub use safety::{strip_literals_and_comments, SafetyRules};
