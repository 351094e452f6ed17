use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// Logical timestamp issued by the version clock
pub type Timestamp = u64;

/// Unique transaction identifier
pub type TxnId = u64;

// ============ KEYS ============

/// Ordered byte key identifying a row within a table
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RowKey(pub Vec<u8>);

impl RowKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for RowKey {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&[u8]> for RowKey {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl From<Vec<u8>> for RowKey {
    fn from(b: Vec<u8>) -> Self {
        Self(b)
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "RowKey({:?})", s),
            Err(_) => write!(f, "RowKey({:02x?})", self.0),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Column address: (family, qualifier)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnId {
    pub family: String,
    pub qualifier: String,
}

impl ColumnId {
    pub fn new(family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }

    /// Parse `family.qualifier`. A bare name lands in the default family `0`.
    pub fn parse(s: &str) -> Self {
        match s.split_once('.') {
            Some((family, qualifier)) => Self::new(family, qualifier),
            None => Self::new("0", s),
        }
    }
}

impl From<&str> for ColumnId {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.family, self.qualifier)
    }
}

/// Fully qualified cell address: table, row and column
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub table: String,
    pub row: RowKey,
    pub column: ColumnId,
}

impl CellKey {
    pub fn new(table: impl Into<String>, row: RowKey, column: ColumnId) -> Self {
        Self {
            table: table.into(),
            row,
            column,
        }
    }
}

// ============ VALUES ============

/// Cell payload: a value or a deletion marker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellValue {
    Value(Vec<u8>),
    Tombstone,
}

impl CellValue {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, CellValue::Tombstone)
    }

    /// Resolve to a readable value; tombstones read as absent
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            CellValue::Value(v) => Some(v),
            CellValue::Tombstone => None,
        }
    }

    pub fn as_value(&self) -> Option<&[u8]> {
        match self {
            CellValue::Value(v) => Some(v),
            CellValue::Tombstone => None,
        }
    }
}

/// A committed cell version. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub row: RowKey,
    pub column: ColumnId,
    pub timestamp: Timestamp,
    pub value: CellValue,
}

// ============ RANGES ============

/// Row key range used by scans
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bound<RowKey>,
    pub end: Bound<RowKey>,
}

impl KeyRange {
    /// Every row of the table
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// `[start, end)`
    pub fn between(start: impl Into<RowKey>, end: impl Into<RowKey>) -> Self {
        Self {
            start: Bound::Included(start.into()),
            end: Bound::Excluded(end.into()),
        }
    }

    /// Exactly one row
    pub fn single(row: impl Into<RowKey>) -> Self {
        let row = row.into();
        Self {
            start: Bound::Included(row.clone()),
            end: Bound::Included(row),
        }
    }

    /// All rows whose key starts with `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        let end = match prefix_successor(prefix) {
            Some(next) => Bound::Excluded(RowKey(next)),
            None => Bound::Unbounded,
        };
        Self {
            start: Bound::Included(RowKey(prefix.to_vec())),
            end,
        }
    }

    /// True when no key can fall inside the range. `BTreeMap::range`
    /// panics on such bounds, so callers check this first.
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Bound::Included(s), Bound::Included(e)) => s > e,
            (Bound::Included(s), Bound::Excluded(e))
            | (Bound::Excluded(s), Bound::Included(e))
            | (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
            _ => false,
        }
    }

    pub fn bounds(&self) -> (Bound<&RowKey>, Bound<&RowKey>) {
        (self.start.as_ref(), self.end.as_ref())
    }

    pub fn contains(&self, row: &RowKey) -> bool {
        let after_start = match &self.start {
            Bound::Included(s) => row >= s,
            Bound::Excluded(s) => row > s,
            Bound::Unbounded => true,
        };
        let before_end = match &self.end {
            Bound::Included(e) => row <= e,
            Bound::Excluded(e) => row < e,
            Bound::Unbounded => true,
        };
        after_start && before_end
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Smallest byte string greater than every string with this prefix.
/// `None` when the prefix is empty or all `0xff`.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last < u8::MAX {
            next.push(last + 1);
            return Some(next);
        }
    }
    None
}

// ============ RESULTS ============

/// A visible row: every column that resolves to a value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub key: RowKey,
    pub cells: BTreeMap<ColumnId, Vec<u8>>,
}

impl Row {
    pub fn new(key: RowKey) -> Self {
        Self {
            key,
            cells: BTreeMap::new(),
        }
    }

    pub fn get(&self, column: &ColumnId) -> Option<&[u8]> {
        self.cells.get(column).map(|v| v.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
