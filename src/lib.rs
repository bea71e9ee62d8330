//! Query Cascade
//!
//! Natural-language questions in, SQL-backed answers out. The library
//! contains:
//! - The pipeline controller (intent, planning, SQL generation, guards,
//!   execution, bounded correction, synthesis)
//! - Storage layer (JSON config, SQLite database)
//! - Data models and utilities
//!
//! The LLM gateway, the guards and the schema graph live in the
//! `query-cascade-llm`, `query-cascade-guards` and `query-cascade-core`
//! workspace crates.

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

// ── Pipeline ─────────────────────────────────────────────────────────────
pub use models::pipeline::{
    ErrorKind, Intent, PipelineResult, Stage, StageFailure, StageOutput, StagePayload,
    StageStatus, TerminalStatus,
};
pub use services::pipeline::{transition, QueryPipeline, SchemaContext, Step, TransitionContext};

// ── Config & Storage ─────────────────────────────────────────────────────
pub use models::settings::AppConfig;
pub use storage::{ConfigService, SqliteDatabase};
pub use utils::error::{AppError, AppResult};
