//! Snapshot reads
//!
//! Answers reads as of a transaction's start timestamp, with the
//! transaction's own buffered writes laid over the committed state.

use super::WriteBuffer;
use crate::error::StorageError;
use crate::storage::CellStore;
use crate::types::{CellValue, ColumnId, KeyRange, Row, RowKey, Timestamp};
use std::collections::BTreeMap;

/// Read view of one transaction
///
/// Resolution order for every cell:
/// 1. the transaction's own buffered write (even a tombstone)
/// 2. the newest committed version with timestamp <= `start_ts`
pub struct SnapshotReader<'a> {
    store: &'a dyn CellStore,
    start_ts: Timestamp,
    buffer: &'a WriteBuffer,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(store: &'a dyn CellStore, start_ts: Timestamp, buffer: &'a WriteBuffer) -> Self {
        Self {
            store,
            start_ts,
            buffer,
        }
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// Whether a commit at `commit_ts` belongs to this snapshot
    #[inline]
    pub fn is_visible(&self, commit_ts: Timestamp) -> bool {
        commit_ts <= self.start_ts
    }

    /// Resolve one cell; tombstones and missing cells read as `None`
    pub fn read(
        &self,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(local) = self.buffer.get(table, row, column) {
            return Ok(local.as_value().map(|v| v.to_vec()));
        }
        let cell = self.store.get_latest_as_of(table, row, column, self.start_ts)?;
        Ok(cell.and_then(|c| c.value.into_value()))
    }

    /// Visible rows in `range`, ordered by row key.
    /// A row is visible when at least one of its columns holds a value.
    pub fn scan(&self, table: &str, range: &KeyRange) -> Result<Vec<Row>, StorageError> {
        let mut merged: BTreeMap<RowKey, BTreeMap<ColumnId, CellValue>> = BTreeMap::new();

        for cell in self.store.scan_as_of(table, range, self.start_ts)? {
            debug_assert!(self.is_visible(cell.timestamp));
            merged.entry(cell.row).or_default().insert(cell.column, cell.value);
        }
        // Local writes take precedence
        for (row, column, value) in self.buffer.scan(table, range) {
            merged
                .entry(row.clone())
                .or_default()
                .insert(column.clone(), value.clone());
        }

        let rows = merged
            .into_iter()
            .filter_map(|(key, cols)| {
                let mut row = Row::new(key);
                for (column, value) in cols {
                    if let CellValue::Value(v) = value {
                        row.cells.insert(column, v);
                    }
                }
                (!row.is_empty()).then_some(row)
            })
            .collect();
        Ok(rows)
    }

    /// Number of visible rows in `range`
    pub fn count(&self, table: &str, range: &KeyRange) -> Result<usize, StorageError> {
        Ok(self.scan(table, range)?.len())
    }
}
