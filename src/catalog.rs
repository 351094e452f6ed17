//! Table Catalog
//!
//! Per-table metadata consulted by the transaction manager. Schema DDL lives
//! outside this crate; it pushes metadata in through `define` / `set_immutable`.

use crate::error::{TxnError, TxnResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Metadata the transaction manager reads for a table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Rows are written once and never updated by another transaction,
    /// so commits skip conflict detection for this table
    #[serde(default)]
    pub immutable_rows: bool,
}

impl TableMetadata {
    pub fn mutable() -> Self {
        Self { immutable_rows: false }
    }

    pub fn immutable() -> Self {
        Self { immutable_rows: true }
    }
}

/// Schema lookups consumed by the transaction manager
pub trait SchemaSource: Send + Sync {
    /// Metadata for a table, or `None` if it is not defined
    fn metadata(&self, table: &str) -> Option<TableMetadata>;

    /// Whether the table is append-only
    fn is_immutable(&self, table: &str) -> bool {
        self.metadata(table).map(|m| m.immutable_rows).unwrap_or(false)
    }
}

/// In-memory catalog keyed by table name
#[derive(Default)]
pub struct Catalog {
    tables: DashMap<String, TableMetadata>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a table
    pub fn create_table(&self, name: &str, meta: TableMetadata) {
        self.tables.insert(name.to_string(), meta);
    }

    /// Register a table from JSON, e.g. `{"immutable_rows": true}`
    pub fn define(&self, name: &str, json: &str) -> TxnResult<()> {
        let meta: TableMetadata = serde_json::from_str(json)?;
        self.create_table(name, meta);
        Ok(())
    }

    /// `ALTER TABLE .. SET IMMUTABLE_ROWS=..`
    pub fn set_immutable(&self, name: &str, immutable: bool) -> TxnResult<()> {
        let mut entry = self
            .tables
            .get_mut(name)
            .ok_or_else(|| TxnError::TableNotFound(name.to_string()))?;
        entry.immutable_rows = immutable;
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn drop_table(&self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

impl SchemaSource for Catalog {
    fn metadata(&self, table: &str) -> Option<TableMetadata> {
        self.tables.get(table).map(|m| *m)
    }
}
