//! Transaction Manager
//!
//! Lifecycle: `begin` → reads/writes → `commit` | `rollback`.
//!
//! Commit path:
//! 1. lock the commit stripes of every checked cell
//! 2. take a commit timestamp (marked in flight)
//! 3. validate each touched table over (start_ts, commit_ts)
//! 4. apply the buffer at commit_ts
//! 5. release stripes, publish
//!
//! Readers never take stripes and never wait.

use super::{
    CommitLocks, CommitTracker, ConflictDetector, ConflictOutcome, SnapshotReader, Transaction,
    TxnConfig, VersionClock, WriteBuffer,
};
use crate::catalog::{SchemaSource, TableMetadata};
use crate::error::{StorageError, TxnError, TxnResult};
use crate::storage::CellStore;
use crate::types::{ColumnId, KeyRange, Row, RowKey, Timestamp, TxnId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Optimistic, snapshot-isolated transaction manager
pub struct TransactionManager {
    config: TxnConfig,
    store: Arc<dyn CellStore>,
    schema: Arc<dyn SchemaSource>,
    tracker: Arc<CommitTracker>,
    locks: CommitLocks,
}

impl TransactionManager {
    /// The clock resumes after the newest timestamp already in `store`
    pub fn new(
        store: Arc<dyn CellStore>,
        schema: Arc<dyn SchemaSource>,
        config: TxnConfig,
    ) -> Self {
        let clock = VersionClock::starting_at(store.last_timestamp());
        let locks = CommitLocks::new(config.lock_stripes);
        Self {
            config,
            store,
            schema,
            tracker: Arc::new(CommitTracker::new(clock)),
            locks,
        }
    }

    pub fn config(&self) -> &TxnConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CellStore> {
        &self.store
    }

    // ============ LIFECYCLE ============

    /// Begin a read-write transaction. Always succeeds.
    pub fn begin(&self) -> Transaction {
        let (id, start_ts) = self.tracker.begin();
        debug!(txn_id = id, start_ts, "begin");
        Transaction::new(id, start_ts, Arc::clone(&self.tracker))
    }

    /// Commit a transaction.
    ///
    /// On any error the transaction ends Aborted with its buffer discarded.
    /// Conflicts are never retried here.
    pub fn commit(&self, txn: &mut Transaction) -> TxnResult<()> {
        txn.ensure_active()?;
        txn.begin_commit();

        if txn.buffer().is_empty() {
            txn.mark_committed(None);
            debug!(txn_id = txn.id(), "commit (read-only)");
            return Ok(());
        }

        match self.validate_and_apply(txn) {
            Ok(commit_ts) => {
                txn.mark_committed(Some(commit_ts));
                debug!(txn_id = txn.id(), commit_ts, "commit");
                Ok(())
            }
            Err(err) => {
                txn.mark_aborted();
                Err(err)
            }
        }
    }

    /// Roll back. Never fails; a no-op on a finished transaction.
    pub fn rollback(&self, txn: &mut Transaction) {
        if txn.state().is_terminal() {
            return;
        }
        let pending = txn.buffer().len();
        txn.mark_aborted();
        debug!(txn_id = txn.id(), pending, "rollback");
    }

    /// Run `op` as its own implicit transaction: begin, operate, commit.
    /// A failing `op` rolls back.
    pub fn autocommit<R>(
        &self,
        op: impl FnOnce(&Self, &mut Transaction) -> TxnResult<R>,
    ) -> TxnResult<R> {
        let mut txn = self.begin();
        match op(self, &mut txn) {
            Ok(out) => {
                self.commit(&mut txn)?;
                Ok(out)
            }
            Err(err) => {
                self.rollback(&mut txn);
                Err(err)
            }
        }
    }

    // ============ WRITES ============

    /// Buffer a value for one cell
    pub fn upsert(
        &self,
        txn: &mut Transaction,
        table: &str,
        row: RowKey,
        column: ColumnId,
        value: Vec<u8>,
    ) -> TxnResult<()> {
        txn.ensure_active()?;
        self.table_meta(table)?;
        txn.buffer_mut().put(table, row, column, value);
        Ok(())
    }

    /// Buffer several columns of one row
    pub fn upsert_row(
        &self,
        txn: &mut Transaction,
        table: &str,
        row: RowKey,
        columns: &[(ColumnId, Vec<u8>)],
    ) -> TxnResult<()> {
        txn.ensure_active()?;
        self.table_meta(table)?;
        for (column, value) in columns {
            txn.buffer_mut()
                .put(table, row.clone(), column.clone(), value.clone());
        }
        Ok(())
    }

    /// Buffer a tombstone for one cell
    pub fn delete(
        &self,
        txn: &mut Transaction,
        table: &str,
        row: RowKey,
        column: ColumnId,
    ) -> TxnResult<()> {
        txn.ensure_active()?;
        self.table_meta(table)?;
        txn.buffer_mut().delete(table, row, column);
        Ok(())
    }

    /// Tombstone every visible column of one row. Returns whether the row was visible.
    pub fn delete_row(&self, txn: &mut Transaction, table: &str, row: RowKey) -> TxnResult<bool> {
        let range = KeyRange::single(row);
        Ok(self.delete_rows(txn, table, &range)? == 1)
    }

    /// Tombstone every visible cell of every visible row in `range`,
    /// including rows only this transaction has written.
    /// Returns the number of rows deleted.
    pub fn delete_rows(
        &self,
        txn: &mut Transaction,
        table: &str,
        range: &KeyRange,
    ) -> TxnResult<usize> {
        let rows = self.query(txn, table, range)?;
        let buffer = txn.buffer_mut();
        for row in &rows {
            for column in row.cells.keys() {
                buffer.delete(table, row.key.clone(), column.clone());
            }
        }
        Ok(rows.len())
    }

    // ============ READS ============

    /// Point read through the transaction's snapshot
    pub fn get(
        &self,
        txn: &Transaction,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
    ) -> TxnResult<Option<Vec<u8>>> {
        txn.ensure_active()?;
        self.table_meta(table)?;
        Ok(self.reader(txn).read(table, row, column)?)
    }

    /// Visible rows in `range`, ordered by row key
    pub fn query(&self, txn: &Transaction, table: &str, range: &KeyRange) -> TxnResult<Vec<Row>> {
        txn.ensure_active()?;
        self.table_meta(table)?;
        Ok(self.reader(txn).scan(table, range)?)
    }

    /// Number of visible rows in `range`
    pub fn count(&self, txn: &Transaction, table: &str, range: &KeyRange) -> TxnResult<usize> {
        txn.ensure_active()?;
        self.table_meta(table)?;
        Ok(self.reader(txn).count(table, range)?)
    }

    // ============ MAINTENANCE ============

    /// Drop versions no active or future transaction can read.
    /// Returns the number of versions removed.
    pub fn vacuum(&self) -> TxnResult<usize> {
        let watermark = self.tracker.low_watermark();
        let removed = self.store.prune_before(watermark)?;
        debug!(watermark, removed, "vacuum");
        Ok(removed)
    }

    /// Get active transaction count
    pub fn active_count(&self) -> usize {
        self.tracker.active_count()
    }

    /// Last timestamp issued by the clock
    pub fn current_timestamp(&self) -> Timestamp {
        self.tracker.current()
    }

    /// Newest timestamp at which every commit is fully applied
    pub fn read_point(&self) -> Timestamp {
        self.tracker.read_point()
    }

    /// Check if conflict detection is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    // ============ INTERNALS ============

    fn reader<'a>(&'a self, txn: &'a Transaction) -> SnapshotReader<'a> {
        SnapshotReader::new(&*self.store, txn.start_ts(), txn.buffer())
    }

    fn table_meta(&self, table: &str) -> TxnResult<TableMetadata> {
        self.schema
            .metadata(table)
            .ok_or_else(|| TxnError::TableNotFound(table.to_string()))
    }

    /// Steps 1-5 of the commit path. Returns the commit timestamp.
    fn validate_and_apply(&self, txn: &Transaction) -> TxnResult<Timestamp> {
        let buffer = txn.buffer();

        let mut touched = Vec::new();
        for table in buffer.tables() {
            touched.push((table, self.table_meta(table)?));
        }
        let validate = self.config.is_enabled();

        let stripes = touched
            .iter()
            .filter(|(_, meta)| validate && ConflictDetector::needs_validation(meta))
            .flat_map(|(table, _)| {
                buffer
                    .write_set(table)
                    .map(move |(row, column)| self.locks.stripe_of(table, row, column))
            });
        let held = self.locks.lock(stripes);
        // Withdrawn on every exit short of `publish`, unwinding included
        let pending = self.tracker.start_commit();
        let commit_ts = pending.ts();

        if validate {
            let detector = ConflictDetector::new(&*self.store);
            for (table, meta) in &touched {
                let outcome = detector.check(
                    table,
                    *meta,
                    buffer.write_set(table),
                    txn.start_ts(),
                    commit_ts,
                );
                match outcome {
                    Ok(ConflictOutcome::NoConflict) => {}
                    Ok(ConflictOutcome::Conflict { row, column }) => {
                        debug!(
                            txn_id = txn.id(),
                            table = *table,
                            row = %row,
                            column = %column,
                            start_ts = txn.start_ts(),
                            commit_ts,
                            "commit conflict"
                        );
                        return Err(TxnError::Conflict {
                            txn_id: txn.id(),
                            table: table.to_string(),
                            row,
                            column,
                        });
                    }
                    Err(err) => {
                        warn!(txn_id = txn.id(), error = %err, "conflict check failed");
                        return Err(err.into());
                    }
                }
            }
        }

        // Dropped before `pending`, so partial writes are gone before the
        // timestamp is withdrawn
        let mut applied = AppliedVersions::new(&*self.store, txn.id(), commit_ts);
        if let Err(err) = self.apply(buffer, commit_ts, &mut applied) {
            warn!(
                txn_id = txn.id(),
                commit_ts,
                error = %err,
                "apply failed, commit aborted"
            );
            return Err(err.into());
        }
        applied.keep();

        drop(held);
        pending.publish();
        Ok(commit_ts)
    }

    /// Write every buffered cell at `commit_ts`, recording each one in `applied`
    fn apply<'a>(
        &'a self,
        buffer: &'a WriteBuffer,
        commit_ts: Timestamp,
        applied: &mut AppliedVersions<'a>,
    ) -> Result<(), StorageError> {
        for (table, row, column, value) in buffer.entries() {
            self.store
                .put(table, row, column, commit_ts, value.clone())?;
            applied.record(table, row, column);
        }
        Ok(())
    }
}

/// Versions written so far by one commit.
/// Removed from the store on drop unless the commit keeps them.
struct AppliedVersions<'a> {
    store: &'a dyn CellStore,
    txn_id: TxnId,
    commit_ts: Timestamp,
    cells: Vec<(&'a str, &'a RowKey, &'a ColumnId)>,
    kept: bool,
}

impl<'a> AppliedVersions<'a> {
    fn new(store: &'a dyn CellStore, txn_id: TxnId, commit_ts: Timestamp) -> Self {
        Self {
            store,
            txn_id,
            commit_ts,
            cells: Vec::new(),
            kept: false,
        }
    }

    fn record(&mut self, table: &'a str, row: &'a RowKey, column: &'a ColumnId) {
        self.cells.push((table, row, column));
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for AppliedVersions<'_> {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        for (table, row, column) in self.cells.drain(..) {
            if let Err(err) = self.store.remove_version(table, row, column, self.commit_ts) {
                warn!(
                    txn_id = self.txn_id,
                    commit_ts = self.commit_ts,
                    error = %err,
                    "failed to undo partial apply"
                );
            }
        }
    }
}
