//! Per-transaction write buffer
//!
//! Staging area for uncommitted upserts and deletes. Owned by exactly one
//! transaction, so nothing here locks.

use crate::types::{CellValue, ColumnId, KeyRange, RowKey};
use std::collections::BTreeMap;

type RowCells = BTreeMap<ColumnId, CellValue>;

/// Pending mutations keyed by table, row and column. Last write wins.
#[derive(Debug, Default, Clone)]
pub struct WriteBuffer {
    tables: BTreeMap<String, BTreeMap<RowKey, RowCells>>,
    len: usize,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(&mut self, table: &str, row: RowKey, column: ColumnId, value: CellValue) {
        let rows = self.tables.entry(table.to_string()).or_default();
        if rows.entry(row).or_default().insert(column, value).is_none() {
            self.len += 1;
        }
    }

    /// Stage a value, replacing anything staged for the same cell
    pub fn put(&mut self, table: &str, row: RowKey, column: ColumnId, value: Vec<u8>) {
        self.stage(table, row, column, CellValue::Value(value));
    }

    /// Stage a tombstone, replacing anything staged for the same cell
    pub fn delete(&mut self, table: &str, row: RowKey, column: ColumnId) {
        self.stage(table, row, column, CellValue::Tombstone);
    }

    /// Staged value or tombstone for a cell; `None` if untouched
    pub fn get(&self, table: &str, row: &RowKey, column: &ColumnId) -> Option<&CellValue> {
        self.tables.get(table)?.get(row)?.get(column)
    }

    /// Staged cells of one row
    pub fn row(&self, table: &str, row: &RowKey) -> Option<&BTreeMap<ColumnId, CellValue>> {
        self.tables.get(table)?.get(row)
    }

    /// Lazily walk staged cells of `table` within `range`, ordered by (row, column)
    pub fn scan<'a>(
        &'a self,
        table: &str,
        range: &'a KeyRange,
    ) -> impl Iterator<Item = (&'a RowKey, &'a ColumnId, &'a CellValue)> + 'a {
        self.tables
            .get(table)
            .filter(|_| !range.is_empty())
            .into_iter()
            .flat_map(move |rows| rows.range::<RowKey, _>(range.bounds()))
            .flat_map(|(row, cols)| cols.iter().map(move |(column, value)| (row, column, value)))
    }

    /// Staged cells whose row key starts with `prefix`
    pub fn scan_prefix<'a>(
        &'a self,
        table: &str,
        prefix: &[u8],
    ) -> impl Iterator<Item = (&'a RowKey, &'a ColumnId, &'a CellValue)> + 'a {
        let rows = self.tables.get(table);
        let prefix = prefix.to_vec();
        rows.into_iter()
            .flat_map(move |rows| {
                let prefix = prefix.clone();
                rows.range::<RowKey, _>(RowKey(prefix.clone())..)
                    .take_while(move |(row, _)| row.starts_with(&prefix))
            })
            .flat_map(|(row, cols)| cols.iter().map(move |(column, value)| (row, column, value)))
    }

    /// Every staged mutation: (table, row, column, value)
    pub fn entries(&self) -> impl Iterator<Item = (&str, &RowKey, &ColumnId, &CellValue)> {
        self.tables.iter().flat_map(|(table, rows)| {
            rows.iter().flat_map(move |(row, cols)| {
                cols.iter()
                    .map(move |(column, value)| (table.as_str(), row, column, value))
            })
        })
    }

    /// Cells touched in one table: the commit-time conflict key set
    pub fn write_set<'a>(
        &'a self,
        table: &str,
    ) -> impl Iterator<Item = (&'a RowKey, &'a ColumnId)> + 'a {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|rows| rows.iter())
            .flat_map(|(row, cols)| cols.keys().map(move |column| (row, column)))
    }

    /// Distinct tables touched
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|t| t.as_str())
    }

    /// Number of staged cells
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(s: &str) -> ColumnId {
        ColumnId::parse(s)
    }

    #[test]
    fn test_last_write_wins() {
        let mut buf = WriteBuffer::new();
        buf.put("T", "r1".into(), col("a.x"), b"1".to_vec());
        buf.put("T", "r1".into(), col("a.x"), b"2".to_vec());
        assert_eq!(buf.len(), 1);
        assert_eq!(
            buf.get("T", &"r1".into(), &col("a.x")),
            Some(&CellValue::Value(b"2".to_vec()))
        );

        buf.delete("T", "r1".into(), col("a.x"));
        assert_eq!(buf.len(), 1);
        assert!(buf.get("T", &"r1".into(), &col("a.x")).unwrap().is_tombstone());
        assert!(buf.get("T", &"r1".into(), &col("b.y")).is_none());
        assert!(buf.get("OTHER", &"r1".into(), &col("a.x")).is_none());
    }

    #[test]
    fn test_scan_range_and_prefix() {
        let mut buf = WriteBuffer::new();
        buf.put("T", "user/2".into(), col("a.x"), b"u2".to_vec());
        buf.put("T", "user/1".into(), col("b.y"), b"u1b".to_vec());
        buf.put("T", "user/1".into(), col("a.x"), b"u1a".to_vec());
        buf.put("T", "zeta".into(), col("a.x"), b"z".to_vec());
        buf.put("U", "user/9".into(), col("a.x"), b"other table".to_vec());

        let prefixed: Vec<_> = buf
            .scan_prefix("T", b"user/")
            .map(|(r, c, _)| format!("{}:{}", r, c))
            .collect();
        assert_eq!(prefixed, vec!["user/1:a.x", "user/1:b.y", "user/2:a.x"]);

        let range = KeyRange::between("user/2", "zz");
        let ranged: Vec<_> = buf.scan("T", &range).map(|(r, _, _)| r.to_string()).collect();
        assert_eq!(ranged, vec!["user/2", "zeta"]);

        let empty = KeyRange::between("z", "a");
        assert_eq!(buf.scan("T", &empty).count(), 0);
        assert_eq!(buf.scan("MISSING", &KeyRange::all()).count(), 0);
    }

    #[test]
    fn test_write_set_per_table() {
        let mut buf = WriteBuffer::new();
        buf.put("T", "r1".into(), col("a.x"), vec![1]);
        buf.delete("T", "r2".into(), col("b.y"));
        buf.put("U", "r1".into(), col("a.x"), vec![2]);

        let tables: Vec<_> = buf.tables().collect();
        assert_eq!(tables, vec!["T", "U"]);
        assert_eq!(buf.write_set("T").count(), 2);
        assert_eq!(buf.write_set("U").count(), 1);
        assert_eq!(buf.entries().count(), 3);

        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.tables().count(), 0);
    }
}
