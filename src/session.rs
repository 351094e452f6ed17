//! Client session
//!
//! One per connection. Holds the autocommit flag and, with autocommit off,
//! the implicit transaction that the first statement opens.
//!
//! # Example
//! ```ignore
//! let mut session = Session::new(manager.clone());
//! session.upsert("T", "r1".into(), "a.x".into(), b"1".to_vec())?;
//! session.commit()?;
//! ```

use crate::error::TxnResult;
use crate::txn::{Transaction, TransactionManager};
use crate::types::{ColumnId, KeyRange, Row, RowKey};
use std::sync::Arc;

pub struct Session {
    manager: Arc<TransactionManager>,
    autocommit: bool,
    txn: Option<Transaction>,
}

impl Session {
    /// New session; autocommit starts at the configured default
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        let autocommit = manager.config().autocommit;
        Self {
            manager,
            autocommit,
            txn: None,
        }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Switch autocommit. Turning it on commits the open transaction.
    pub fn set_autocommit(&mut self, on: bool) -> TxnResult<()> {
        if on && !self.autocommit {
            self.commit()?;
        }
        self.autocommit = on;
        Ok(())
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    /// Whether an explicit transaction is open
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// The open transaction, if any
    pub fn transaction(&self) -> Option<&Transaction> {
        self.txn.as_ref()
    }

    /// Run one statement: as its own transaction under autocommit,
    /// otherwise inside the open transaction (begun on first use).
    fn run<R>(
        &mut self,
        op: impl FnOnce(&TransactionManager, &mut Transaction) -> TxnResult<R>,
    ) -> TxnResult<R> {
        if self.autocommit {
            return self.manager.autocommit(op);
        }
        let manager: &TransactionManager = &self.manager;
        let txn = self.txn.get_or_insert_with(|| manager.begin());
        op(manager, txn)
    }

    pub fn upsert(
        &mut self,
        table: &str,
        row: RowKey,
        column: ColumnId,
        value: Vec<u8>,
    ) -> TxnResult<()> {
        self.run(|m, t| m.upsert(t, table, row, column, value))
    }

    pub fn upsert_row(
        &mut self,
        table: &str,
        row: RowKey,
        columns: &[(ColumnId, Vec<u8>)],
    ) -> TxnResult<()> {
        self.run(|m, t| m.upsert_row(t, table, row, columns))
    }

    pub fn delete(&mut self, table: &str, row: RowKey, column: ColumnId) -> TxnResult<()> {
        self.run(|m, t| m.delete(t, table, row, column))
    }

    pub fn delete_row(&mut self, table: &str, row: RowKey) -> TxnResult<bool> {
        self.run(|m, t| m.delete_row(t, table, row))
    }

    /// Delete every visible row in `range`; returns rows deleted
    pub fn delete_rows(&mut self, table: &str, range: &KeyRange) -> TxnResult<usize> {
        self.run(|m, t| m.delete_rows(t, table, range))
    }

    pub fn get(
        &mut self,
        table: &str,
        row: &RowKey,
        column: &ColumnId,
    ) -> TxnResult<Option<Vec<u8>>> {
        self.run(|m, t| m.get(t, table, row, column))
    }

    pub fn query(&mut self, table: &str, range: &KeyRange) -> TxnResult<Vec<Row>> {
        self.run(|m, t| m.query(t, table, range))
    }

    pub fn count(&mut self, table: &str, range: &KeyRange) -> TxnResult<usize> {
        self.run(|m, t| m.count(t, table, range))
    }

    /// Commit the open transaction. No-op when none is open.
    ///
    /// The transaction is closed whatever the outcome; after a conflict the
    /// next statement starts a fresh one.
    pub fn commit(&mut self) -> TxnResult<()> {
        match self.txn.take() {
            Some(mut txn) => self.manager.commit(&mut txn),
            None => Ok(()),
        }
    }

    /// Discard the open transaction, if any
    pub fn rollback(&mut self) {
        if let Some(mut txn) = self.txn.take() {
            self.manager.rollback(&mut txn);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.rollback();
    }
}
