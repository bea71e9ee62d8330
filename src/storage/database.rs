//! SQLite Database
//!
//! The database collaborator queried by the pipeline, using rusqlite with
//! r2d2 connection pooling. Blocking SQLite work runs on tokio's blocking
//! pool.

use std::path::Path;

use async_trait::async_trait;
use query_cascade_core::{
    ColumnInfo, CoreError, CoreResult, QueryDatabase, QueryRows, SchemaSnapshot, TableSchema,
};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use crate::models::settings::DatabaseSettings;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::database_path;

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// SQLite implementation of `QueryDatabase`
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: DbPool,
    max_rows: usize,
}

impl SqliteDatabase {
    /// Create a database from an existing connection pool.
    pub fn from_pool(pool: DbPool, max_rows: usize) -> Self {
        Self { pool, max_rows }
    }

    /// Create an in-memory database for testing.
    ///
    /// The pool holds a single connection so every caller sees the same
    /// in-memory database.
    pub fn new_in_memory(max_rows: usize) -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;
        Ok(Self { pool, max_rows })
    }

    /// Open (or create) a database file with connection pooling
    pub fn open(path: &Path, pool_size: u32, max_rows: usize) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        info!("Opened SQLite database at {}", path.display());
        Ok(Self { pool, max_rows })
    }

    /// Open the database described by the settings
    pub fn from_settings(settings: &DatabaseSettings) -> AppResult<Self> {
        let path = match &settings.path {
            Some(path) => path.clone(),
            None => database_path()?,
        };
        Self::open(&path, settings.pool_size, settings.max_rows)
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Run a batch of statements (schema setup, seeding).
    pub fn execute_batch(&self, sql: &str) -> AppResult<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run a read-only statement and collect up to `max_rows` rows
    fn query_rows(conn: &Connection, sql: &str, max_rows: usize) -> AppResult<QueryRows> {
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(CoreError::rejected("Only read-only statements can be executed").into());
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        let mut truncated = false;

        while let Some(row) = rows.next()? {
            if out.len() >= max_rows {
                truncated = true;
                break;
            }
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(to_json(row.get_ref(i)?));
            }
            out.push(values);
        }

        Ok(QueryRows {
            columns,
            rows: out,
            truncated,
        })
    }

    /// Read tables, columns and foreign keys from the SQLite catalog
    fn read_schema(conn: &Connection) -> AppResult<SchemaSnapshot> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = Vec::with_capacity(names.len());
        for name in &names {
            let quoted = name.replace('"', "\"\"");
            let mut table = TableSchema::new(name.clone());

            let mut info = conn.prepare(&format!("PRAGMA table_info(\"{}\")", quoted))?;
            let columns = info
                .query_map([], |row| {
                    let notnull: i64 = row.get(3)?;
                    let pk: i64 = row.get(5)?;
                    Ok(ColumnInfo {
                        name: row.get(1)?,
                        data_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        nullable: notnull == 0 && pk == 0,
                        primary_key: pk > 0,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            table.columns = columns;

            let mut fks = conn.prepare(&format!("PRAGMA foreign_key_list(\"{}\")", quoted))?;
            let foreign_keys = fks
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (ref_table, column, ref_column) in foreign_keys {
                // A NULL target column means the referenced table's primary key
                let ref_column = ref_column
                    .or_else(|| primary_key_of(conn, &ref_table))
                    .unwrap_or_else(|| column.clone());
                table = table.with_foreign_key(column, ref_table, ref_column);
            }

            tables.push(table);
        }

        Ok(SchemaSnapshot::new(tables))
    }
}

fn primary_key_of(conn: &Connection, table: &str) -> Option<String> {
    let sql = format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\""));
    let mut stmt = conn.prepare(&sql).ok()?;
    let mut rows = stmt.query([]).ok()?;
    while let Ok(Some(row)) = rows.next() {
        let pk: i64 = row.get(5).ok()?;
        if pk == 1 {
            return row.get(1).ok();
        }
    }
    None
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

#[async_trait]
impl QueryDatabase for SqliteDatabase {
    async fn execute(&self, sql: &str) -> CoreResult<QueryRows> {
        let pool = self.pool.clone();
        let sql = sql.to_string();
        let max_rows = self.max_rows;

        let rows = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            Self::query_rows(&conn, &sql, max_rows)
        })
        .await
        .map_err(|e| CoreError::task(e.to_string()))?
        .map_err(|e| e.into_core(CoreError::Query))?;

        debug!("Query returned {} rows (truncated: {})", rows.len(), rows.truncated);
        Ok(rows)
    }

    async fn get_schema(&self) -> CoreResult<SchemaSnapshot> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            Self::read_schema(&conn)
        })
        .await
        .map_err(|e| CoreError::task(e.to_string()))?
        .map_err(|e| e.into_core(CoreError::Schema))
    }
}
