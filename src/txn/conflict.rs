//! Commit-time conflict detection
//!
//! First committer wins, per (row, column): a commit is rejected if any cell
//! in its write set received a committed version after the committer's
//! snapshot. Tables with immutable rows are never checked.

use crate::catalog::TableMetadata;
use crate::error::StorageError;
use crate::storage::CellStore;
use crate::types::{ColumnId, RowKey, Timestamp};
use parking_lot::{Mutex, MutexGuard};
use seahash::SeaHasher;
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};

/// Result of validating one table's write set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOutcome {
    NoConflict,
    /// First cell found that a concurrent transaction committed
    Conflict { row: RowKey, column: ColumnId },
}

impl ConflictOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConflictOutcome::Conflict { .. })
    }
}

/// Validates write sets against committed versions
pub struct ConflictDetector<'a> {
    store: &'a dyn CellStore,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(store: &'a dyn CellStore) -> Self {
        Self { store }
    }

    /// Whether writes to a table with `meta` are validated at all.
    /// Immutable rows are never updated concurrently, so they skip checks.
    #[inline]
    pub fn needs_validation(meta: &TableMetadata) -> bool {
        !meta.immutable_rows
    }

    /// Check `write_set` of `table` for versions committed strictly between
    /// `start_ts` and `candidate_ts`.
    ///
    /// One bounded index lookup per cell; stops at the first hit.
    pub fn check<'k>(
        &self,
        table: &str,
        meta: TableMetadata,
        write_set: impl IntoIterator<Item = (&'k RowKey, &'k ColumnId)>,
        start_ts: Timestamp,
        candidate_ts: Timestamp,
    ) -> Result<ConflictOutcome, StorageError> {
        if !Self::needs_validation(&meta) {
            return Ok(ConflictOutcome::NoConflict);
        }
        for (row, column) in write_set {
            if self
                .store
                .exists_committed_between(table, row, column, start_ts, candidate_ts)?
            {
                return Ok(ConflictOutcome::Conflict {
                    row: row.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(ConflictOutcome::NoConflict)
    }
}

/// Striped locks held from validation through apply.
///
/// Two commits touching the same cell hash to the same stripe, so the second
/// one validates only after the first one's versions are in the store.
/// Stripes are always taken in ascending order.
pub struct CommitLocks {
    stripes: Vec<Mutex<()>>,
}

/// Held stripes; released on drop
pub struct StripeGuard<'a> {
    _guards: SmallVec<[MutexGuard<'a, ()>; 8]>,
}

impl CommitLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Stripe index of one cell
    pub fn stripe_of(&self, table: &str, row: &RowKey, column: &ColumnId) -> usize {
        let mut hasher = SeaHasher::new();
        table.hash(&mut hasher);
        row.hash(&mut hasher);
        column.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Acquire every listed stripe, deduplicated, in ascending order
    pub fn lock(&self, stripes: impl IntoIterator<Item = usize>) -> StripeGuard<'_> {
        let mut wanted: SmallVec<[usize; 8]> = stripes.into_iter().collect();
        wanted.sort_unstable();
        wanted.dedup();
        StripeGuard {
            _guards: wanted.into_iter().map(|i| self.stripes[i].lock()).collect(),
        }
    }
}
