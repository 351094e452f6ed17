//! Storage Module
//!
//! The versioned cell store the transaction manager reads from and commits
//! into. The store is assumed crash-safe on its own; durability is its
//! concern, not the manager's.
//!
//! # Example
//! ```ignore
//! use tessera::storage::{CellStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.put("T", &row, &col, 5, CellValue::Value(b"x".to_vec()))?;
//! let cell = store.get_latest_as_of("T", &row, &col, 10)?;
//! ```

mod memory;

pub use memory::MemoryStore;

use crate::error::StorageError;
use crate::types::{Cell, CellValue, ColumnId, KeyRange, RowKey, Timestamp};

/// Versioned cell store
///
/// Implementations:
/// - `MemoryStore` - in-memory version chains (tests, embedded use)
pub trait CellStore: Send + Sync {
    /// Write one cell version. Atomic per cell; writing the same value again
    /// at the same timestamp is a no-op.
    fn put(
        &self,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
        ts: Timestamp,
        value: CellValue,
    ) -> Result<(), StorageError>;

    /// Newest version with timestamp <= `ts`, tombstones included
    fn get_latest_as_of(
        &self,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
        ts: Timestamp,
    ) -> Result<Option<Cell>, StorageError>;

    /// Newest version <= `ts` of every cell in `range`, tombstones included,
    /// ordered by (row, column)
    fn scan_as_of(
        &self,
        table: &str,
        range: &KeyRange,
        ts: Timestamp,
    ) -> Result<Vec<Cell>, StorageError>;

    /// Whether some version exists with `low < timestamp < high`
    fn exists_committed_between(
        &self,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
        low: Timestamp,
        high: Timestamp,
    ) -> Result<bool, StorageError>;

    /// Remove the version written at exactly `ts`, if any.
    /// Used to take back a partially applied commit.
    fn remove_version(
        &self,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
        ts: Timestamp,
    ) -> Result<(), StorageError>;

    /// Highest timestamp ever written (0 for an empty store)
    fn last_timestamp(&self) -> Timestamp;

    /// Drop versions no reader at or after `watermark` can observe.
    /// Returns the number of versions removed.
    fn prune_before(&self, _watermark: Timestamp) -> Result<usize, StorageError> {
        Ok(0)
    }
}
