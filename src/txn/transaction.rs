//! Transaction Implementation

use super::{CommitTracker, WriteBuffer};
use crate::error::{TxnError, TxnResult};
use crate::types::{Timestamp, TxnId};
use std::sync::Arc;

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting reads and writes
    Active,
    /// Validation and apply in progress
    Committing,
    /// Commit applied and published
    Committed,
    /// Rolled back or rejected; buffer discarded
    Aborted,
}

impl TxnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

/// A transaction, exclusively owned by the session that began it
pub struct Transaction {
    id: TxnId,
    state: TxnState,
    /// Snapshot timestamp
    start_ts: Timestamp,
    /// Set once committed with a non-empty buffer
    commit_ts: Option<Timestamp>,
    buffer: WriteBuffer,
    tracker: Arc<CommitTracker>,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, start_ts: Timestamp, tracker: Arc<CommitTracker>) -> Self {
        Self {
            id,
            state: TxnState::Active,
            start_ts,
            commit_ts: None,
            buffer: WriteBuffer::new(),
            tracker,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn commit_ts(&self) -> Option<Timestamp> {
        self.commit_ts
    }

    pub fn buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    /// Check if transaction is still active
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Fail with `InvalidState` unless Active
    pub fn ensure_active(&self) -> TxnResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TxnError::InvalidState {
                txn_id: self.id,
                state: self.state,
            })
        }
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut WriteBuffer {
        &mut self.buffer
    }

    pub(crate) fn begin_commit(&mut self) {
        self.state = TxnState::Committing;
    }

    pub(crate) fn mark_committed(&mut self, commit_ts: Option<Timestamp>) {
        self.state = TxnState::Committed;
        self.commit_ts = commit_ts;
        self.tracker.end_txn(self.id);
    }

    /// Terminal abort: discard buffered writes
    pub(crate) fn mark_aborted(&mut self) {
        self.state = TxnState::Aborted;
        self.buffer.clear();
        self.tracker.end_txn(self.id);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // An abandoned transaction must not pin the vacuum watermark
        self.tracker.end_txn(self.id);
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("start_ts", &self.start_ts)
            .field("commit_ts", &self.commit_ts)
            .field("pending", &self.buffer.len())
            .finish()
    }
}
