//! Schema Snapshot Types
//!
//! The shape returned by the database collaborator's `get_schema()`. The
//! schema graph, the prompts and the introspection answers are all built
//! from a snapshot.

use serde::{Deserialize, Serialize};

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            primary_key: false,
        }
    }

    /// Mark the column as the primary key (implies NOT NULL)
    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

/// A foreign-key declaration on the owning table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// Column on the owning table
    pub column: String,
    /// Referenced table
    pub ref_table: String,
    /// Referenced column
    pub ref_column: String,
}

/// One table's structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_foreign_key(
        mut self,
        column: impl Into<String>,
        ref_table: impl Into<String>,
        ref_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKeyInfo {
            column: column.into(),
            ref_table: ref_table.into(),
            ref_column: ref_column.into(),
        });
        self
    }

    /// Case-insensitive column lookup
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.primary_key)
    }
}

/// Full schema as reported by the database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// Case-insensitive table lookup
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Compact text rendering used inside prompts:
    /// `Album(AlbumId INTEGER PK, Title NVARCHAR, ArtistId INTEGER -> Artist.ArtistId)`
    pub fn render_compact(&self) -> String {
        self.tables
            .iter()
            .map(|table| {
                let columns: Vec<String> = table
                    .columns
                    .iter()
                    .map(|c| {
                        let mut col = format!("{} {}", c.name, c.data_type);
                        if c.primary_key {
                            col.push_str(" PK");
                        }
                        if let Some(fk) = table
                            .foreign_keys
                            .iter()
                            .find(|fk| fk.column.eq_ignore_ascii_case(&c.name))
                        {
                            col.push_str(&format!(" -> {}.{}", fk.ref_table, fk.ref_column));
                        }
                        col
                    })
                    .collect();
                format!("{}({})", table.name, columns.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
