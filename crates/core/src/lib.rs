//! Query Cascade Core
//!
//! Foundational types for the Query Cascade workspace. This crate has zero
//! dependencies on application-level code (database drivers, LLM providers,
//! runtime).
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `extract` - Structured-output extraction of one JSON object from model text
//! - `schema` - Schema snapshot types returned by the database collaborator
//! - `graph` - Foreign-key graph, join validation and join-path search
//! - `database` - The database collaborator trait (`QueryDatabase`)
//!
//! ## Design Principles
//!
//! 1. **Zero external dependencies beyond serde/async-trait/thiserror** - keeps build times minimal
//! 2. **Pure functions where possible** - extraction and graph queries hold no hidden state
//! 3. **Unidirectional dependency** - this crate depends on nothing else in the workspace

pub mod database;
pub mod error;
pub mod extract;
pub mod graph;
pub mod schema;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Extraction ─────────────────────────────────────────────────────────
pub use extract::{
    extract_json, extract_json_with_keys, ExtractError, ExtractErrorKind, ExtractedJson,
};

// ── Schema & Graph ─────────────────────────────────────────────────────
pub use graph::{FkEdge, JoinPath, JoinVerdict, SchemaGraph, DEFAULT_MAX_HOPS};
pub use schema::{ColumnInfo, ForeignKeyInfo, SchemaSnapshot, TableSchema};

// ── Database Collaborator ──────────────────────────────────────────────
pub use database::{QueryDatabase, QueryRows};
