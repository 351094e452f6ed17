//! In-Memory Cell Store
//!
//! Per-table version chains: row -> column -> timestamp -> value.
//! Point and range lookups are bounded `BTreeMap` ranges, so conflict checks
//! never scan more than the versions of a single cell.

use super::CellStore;
use crate::error::StorageError;
use crate::types::{Cell, CellValue, ColumnId, KeyRange, RowKey, Timestamp};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Versions of one cell, oldest first
type Versions = BTreeMap<Timestamp, CellValue>;

/// All cells of one table
type TableCells = BTreeMap<RowKey, BTreeMap<ColumnId, Versions>>;

/// Multi-version in-memory store
#[derive(Default)]
pub struct MemoryStore {
    tables: DashMap<String, Arc<RwLock<TableCells>>>,
    last_ts: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, name: &str) -> Option<Arc<RwLock<TableCells>>> {
        self.tables.get(name).map(|t| Arc::clone(t.value()))
    }

    fn table_or_create(&self, name: &str) -> Arc<RwLock<TableCells>> {
        if let Some(t) = self.table(name) {
            return t;
        }
        Arc::clone(self.tables.entry(name.to_string()).or_default().value())
    }

    /// Total number of stored versions across all tables
    pub fn version_count(&self) -> usize {
        self.tables
            .iter()
            .map(|t| {
                t.value()
                    .read()
                    .values()
                    .flat_map(|cols| cols.values())
                    .map(|versions| versions.len())
                    .sum::<usize>()
            })
            .sum()
    }

    /// Prune one cell's chain. Returns removed count.
    fn prune_versions(versions: &mut Versions, watermark: Timestamp) -> usize {
        let Some((&newest_visible, value)) = versions.range(..=watermark).next_back() else {
            return 0;
        };
        // Everything older than the newest version at the watermark is unreachable
        let keep_from = if value.is_tombstone() {
            newest_visible.saturating_add(1)
        } else {
            newest_visible
        };
        let before = versions.len();
        *versions = versions.split_off(&keep_from);
        before - versions.len()
    }
}

impl CellStore for MemoryStore {
    fn put(
        &self,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
        ts: Timestamp,
        value: CellValue,
    ) -> Result<(), StorageError> {
        let cells = self.table_or_create(table);
        let mut cells = cells.write();
        let versions = cells
            .entry(row.clone())
            .or_default()
            .entry(column.clone())
            .or_default();

        if let Some(existing) = versions.get(&ts) {
            if *existing == value {
                return Ok(());
            }
            return Err(StorageError::TimestampExists {
                table: table.to_string(),
                row: row.clone(),
                column: column.clone(),
                timestamp: ts,
            });
        }
        versions.insert(ts, value);
        self.last_ts.fetch_max(ts, Ordering::AcqRel);
        Ok(())
    }

    fn get_latest_as_of(
        &self,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
        ts: Timestamp,
    ) -> Result<Option<Cell>, StorageError> {
        let Some(cells) = self.table(table) else {
            return Ok(None);
        };
        let cells = cells.read();
        let latest = cells
            .get(row)
            .and_then(|cols| cols.get(column))
            .and_then(|versions| versions.range(..=ts).next_back())
            .map(|(&timestamp, value)| Cell {
                row: row.clone(),
                column: column.clone(),
                timestamp,
                value: value.clone(),
            });
        Ok(latest)
    }

    fn scan_as_of(
        &self,
        table: &str,
        range: &KeyRange,
        ts: Timestamp,
    ) -> Result<Vec<Cell>, StorageError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let Some(cells) = self.table(table) else {
            return Ok(Vec::new());
        };
        let cells = cells.read();
        let mut out = Vec::new();
        for (row, cols) in cells.range::<RowKey, _>(range.bounds()) {
            for (column, versions) in cols {
                if let Some((&timestamp, value)) = versions.range(..=ts).next_back() {
                    out.push(Cell {
                        row: row.clone(),
                        column: column.clone(),
                        timestamp,
                        value: value.clone(),
                    });
                }
            }
        }
        Ok(out)
    }

    fn exists_committed_between(
        &self,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
        low: Timestamp,
        high: Timestamp,
    ) -> Result<bool, StorageError> {
        if high <= low {
            return Ok(false);
        }
        let Some(cells) = self.table(table) else {
            return Ok(false);
        };
        let cells = cells.read();
        let found = cells
            .get(row)
            .and_then(|cols| cols.get(column))
            .map(|versions| {
                versions
                    .range((Bound::Excluded(low), Bound::Excluded(high)))
                    .next()
                    .is_some()
            })
            .unwrap_or(false);
        Ok(found)
    }

    fn remove_version(
        &self,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
        ts: Timestamp,
    ) -> Result<(), StorageError> {
        let Some(cells) = self.table(table) else {
            return Ok(());
        };
        let mut cells = cells.write();
        if let Some(cols) = cells.get_mut(row) {
            if let Some(versions) = cols.get_mut(column) {
                versions.remove(&ts);
                if versions.is_empty() {
                    cols.remove(column);
                }
            }
            if cols.is_empty() {
                cells.remove(row);
            }
        }
        Ok(())
    }

    fn last_timestamp(&self) -> Timestamp {
        self.last_ts.load(Ordering::Acquire)
    }

    fn prune_before(&self, watermark: Timestamp) -> Result<usize, StorageError> {
        let tables: Vec<_> = self.tables.iter().map(|t| Arc::clone(t.value())).collect();
        let mut removed = 0;
        for cells in tables {
            let mut cells = cells.write();
            for cols in cells.values_mut() {
                for versions in cols.values_mut() {
                    removed += Self::prune_versions(versions, watermark);
                }
                cols.retain(|_, versions| !versions.is_empty());
            }
            cells.retain(|_, cols| !cols.is_empty());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> (RowKey, ColumnId) {
        (RowKey::from("r1"), ColumnId::parse("a.int_col1"))
    }

    fn val(s: &str) -> CellValue {
        CellValue::Value(s.as_bytes().to_vec())
    }

    #[test]
    fn test_latest_as_of() {
        let store = MemoryStore::new();
        let (row, col) = key();
        store.put("T", &row, &col, 5, val("v5")).unwrap();
        store.put("T", &row, &col, 9, val("v9")).unwrap();

        assert!(store.get_latest_as_of("T", &row, &col, 4).unwrap().is_none());
        assert_eq!(store.get_latest_as_of("T", &row, &col, 5).unwrap().unwrap().value, val("v5"));
        assert_eq!(store.get_latest_as_of("T", &row, &col, 8).unwrap().unwrap().timestamp, 5);
        assert_eq!(store.get_latest_as_of("T", &row, &col, 100).unwrap().unwrap().value, val("v9"));
        assert!(store.get_latest_as_of("OTHER", &row, &col, 100).unwrap().is_none());
        assert_eq!(store.last_timestamp(), 9);
    }

    #[test]
    fn test_put_idempotent_by_timestamp() {
        let store = MemoryStore::new();
        let (row, col) = key();
        store.put("T", &row, &col, 3, val("x")).unwrap();
        store.put("T", &row, &col, 3, val("x")).unwrap();
        let err = store.put("T", &row, &col, 3, val("y")).unwrap_err();
        assert!(matches!(err, StorageError::TimestampExists { timestamp: 3, .. }));
        assert_eq!(store.version_count(), 1);
    }

    #[test]
    fn test_exists_between_is_exclusive() {
        let store = MemoryStore::new();
        let (row, col) = key();
        store.put("T", &row, &col, 10, val("x")).unwrap();

        assert!(store.exists_committed_between("T", &row, &col, 9, 11).unwrap());
        assert!(!store.exists_committed_between("T", &row, &col, 10, 20).unwrap());
        assert!(!store.exists_committed_between("T", &row, &col, 1, 10).unwrap());
        assert!(!store.exists_committed_between("T", &row, &col, 20, 5).unwrap());

        let other = ColumnId::parse("b.int_col2");
        assert!(!store.exists_committed_between("T", &row, &other, 0, 100).unwrap());
    }

    #[test]
    fn test_scan_as_of_ordered_with_tombstones() {
        let store = MemoryStore::new();
        let a = ColumnId::parse("a.x");
        let b = ColumnId::parse("b.y");
        store.put("T", &RowKey::from("r2"), &a, 1, val("r2a")).unwrap();
        store.put("T", &RowKey::from("r1"), &b, 2, val("r1b")).unwrap();
        store.put("T", &RowKey::from("r1"), &a, 3, val("r1a")).unwrap();
        store.put("T", &RowKey::from("r1"), &a, 6, CellValue::Tombstone).unwrap();

        let cells = store.scan_as_of("T", &KeyRange::all(), 4).unwrap();
        let got: Vec<_> = cells.iter().map(|c| (c.row.to_string(), c.column.to_string())).collect();
        assert_eq!(
            got,
            vec![
                ("r1".to_string(), "a.x".to_string()),
                ("r1".to_string(), "b.y".to_string()),
                ("r2".to_string(), "a.x".to_string()),
            ]
        );

        let later = store.scan_as_of("T", &KeyRange::single("r1"), 10).unwrap();
        assert_eq!(later.len(), 2);
        assert!(later[0].value.is_tombstone());

        assert!(store.scan_as_of("T", &KeyRange::between("z", "a"), 10).unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_visible_versions() {
        let store = MemoryStore::new();
        let (row, col) = key();
        for ts in [2, 4, 6, 8] {
            store.put("T", &row, &col, ts, val(&format!("v{}", ts))).unwrap();
        }

        let removed = store.prune_before(5).unwrap();
        assert_eq!(removed, 1); // v2; v4 still answers reads at 5
        assert_eq!(store.get_latest_as_of("T", &row, &col, 5).unwrap().unwrap().timestamp, 4);
        assert_eq!(store.version_count(), 3);
    }

    #[test]
    fn test_prune_drops_dead_tombstones() {
        let store = MemoryStore::new();
        let (row, col) = key();
        store.put("T", &row, &col, 1, val("v1")).unwrap();
        store.put("T", &row, &col, 3, CellValue::Tombstone).unwrap();

        assert_eq!(store.prune_before(10).unwrap(), 2);
        assert_eq!(store.version_count(), 0);
        assert!(store.get_latest_as_of("T", &row, &col, 10).unwrap().is_none());
    }

    #[test]
    fn test_remove_version() {
        let store = MemoryStore::new();
        let (row, col) = key();
        store.put("T", &row, &col, 2, val("a")).unwrap();
        store.put("T", &row, &col, 5, val("b")).unwrap();

        store.remove_version("T", &row, &col, 5).unwrap();
        assert_eq!(store.get_latest_as_of("T", &row, &col, 9).unwrap().unwrap().timestamp, 2);
        store.remove_version("T", &row, &col, 2).unwrap();
        assert_eq!(store.version_count(), 0);

        // Missing versions and tables are ignored
        store.remove_version("T", &row, &col, 7).unwrap();
        store.remove_version("NOPE", &row, &col, 7).unwrap();
    }
}
