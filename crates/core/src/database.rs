//! Database Collaborator
//!
//! The narrow contract the pipeline needs from a relational database:
//! execute one read-only statement, and describe the schema.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;
use crate::schema::SchemaSnapshot;

/// Rows returned by a query, values rendered as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Set when the database stopped fetching at its row cap
    #[serde(default)]
    pub truncated: bool,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// A database the pipeline can query.
#[async_trait]
pub trait QueryDatabase: Send + Sync {
    /// Execute a single statement and return its rows.
    async fn execute(&self, sql: &str) -> CoreResult<QueryRows>;

    /// Describe every table, its columns and foreign keys.
    async fn get_schema(&self) -> CoreResult<SchemaSnapshot>;
}
