//! Version Clock and Commit Tracking
//!
//! `VersionClock` is the only source of timestamps. `CommitTracker` wraps it
//! with the bookkeeping snapshots need:
//! - commit timestamps that are issued but not yet fully applied (in flight)
//! - start timestamps of active transactions (for the vacuum watermark)
//!
//! A snapshot never sits at or above an in-flight commit, so a reader can
//! never see half of a commit.

use crate::types::{Timestamp, TxnId};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly monotonic logical clock
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Resume after `last`; the first issued value is `last + 1`
    pub fn starting_at(last: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Issue the next timestamp. Linearizable across threads.
    ///
    /// # Panics
    /// When the 64-bit range is exhausted.
    #[inline]
    pub fn next(&self) -> Timestamp {
        let prev = self.last.fetch_add(1, Ordering::SeqCst);
        assert!(prev < Timestamp::MAX, "version clock exhausted");
        prev + 1
    }

    /// Last issued timestamp
    #[inline]
    pub fn current(&self) -> Timestamp {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}

struct TrackerState {
    /// Commit timestamps issued but not yet published
    in_flight: BTreeSet<Timestamp>,
}

impl TrackerState {
    /// Newest timestamp at which every commit is fully applied
    fn read_point(&self, clock: &VersionClock) -> Timestamp {
        match self.in_flight.first() {
            Some(&lowest) => lowest - 1,
            None => clock.current(),
        }
    }
}

/// Clock plus in-flight commit and active transaction tracking
pub struct CommitTracker {
    clock: VersionClock,
    state: Mutex<TrackerState>,
    /// Signalled whenever an in-flight commit is published or withdrawn
    published: Condvar,
    /// Active transaction -> start timestamp
    active: DashMap<TxnId, Timestamp>,
    next_txn_id: AtomicU64,
}

impl CommitTracker {
    pub fn new(clock: VersionClock) -> Self {
        Self {
            clock,
            state: Mutex::new(TrackerState {
                in_flight: BTreeSet::new(),
            }),
            published: Condvar::new(),
            active: DashMap::new(),
            next_txn_id: AtomicU64::new(1),
        }
    }

    /// Register a new transaction and pick its start timestamp.
    ///
    /// The clock is advanced, but the snapshot is placed below the lowest
    /// in-flight commit so that commit stays invisible to this transaction.
    pub fn begin(&self) -> (TxnId, Timestamp) {
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        let state = self.state.lock();
        let issued = self.clock.next();
        let start = match state.in_flight.first() {
            Some(&lowest) => (lowest - 1).min(issued),
            None => issued,
        };
        // Registered under the state lock so the vacuum watermark cannot miss it
        self.active.insert(id, start);
        (id, start)
    }

    /// Forget a transaction (commit, rollback or drop). Idempotent.
    #[inline]
    pub fn end_txn(&self, id: TxnId) {
        self.active.remove(&id);
    }

    /// Issue a commit timestamp and mark it in flight.
    ///
    /// The timestamp is withdrawn when the returned guard drops without
    /// being published, unwinding included.
    pub fn start_commit(&self) -> PendingCommit<'_> {
        PendingCommit {
            tracker: self,
            ts: self.register_commit(),
            published: false,
        }
    }

    fn register_commit(&self) -> Timestamp {
        let mut state = self.state.lock();
        let ts = self.clock.next();
        state.in_flight.insert(ts);
        ts
    }

    /// Returns once every lower commit timestamp is published as well, so
    /// anything that begins afterwards observes this commit.
    fn finish_commit(&self, ts: Timestamp) {
        let mut state = self.state.lock();
        state.in_flight.remove(&ts);
        self.published.notify_all();
        while state.in_flight.first().is_some_and(|&lowest| lowest < ts) {
            self.published.wait(&mut state);
        }
    }

    fn abandon_commit(&self, ts: Timestamp) {
        let mut state = self.state.lock();
        state.in_flight.remove(&ts);
        self.published.notify_all();
    }

    /// Newest timestamp at which every commit is fully applied
    pub fn read_point(&self) -> Timestamp {
        self.state.lock().read_point(&self.clock)
    }

    /// Oldest timestamp any active or future transaction can read at
    pub fn low_watermark(&self) -> Timestamp {
        let state = self.state.lock();
        let read_point = state.read_point(&self.clock);
        self.active
            .iter()
            .map(|entry| *entry.value())
            .fold(read_point, Timestamp::min)
    }

    /// Last timestamp issued by the clock
    #[inline]
    pub fn current(&self) -> Timestamp {
        self.clock.current()
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[inline]
    pub fn is_active(&self, id: TxnId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

impl Default for CommitTracker {
    fn default() -> Self {
        Self::new(VersionClock::new())
    }
}

/// An in-flight commit timestamp.
///
/// `publish` makes the commit visible; dropping the guard instead withdraws
/// the timestamp so it never holds back snapshots or later commits.
#[must_use = "dropping a pending commit withdraws it"]
pub struct PendingCommit<'a> {
    tracker: &'a CommitTracker,
    ts: Timestamp,
    published: bool,
}

impl PendingCommit<'_> {
    #[inline]
    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    /// Publish a fully applied commit; waits for lower in-flight commits
    pub fn publish(mut self) {
        self.published = true;
        self.tracker.finish_commit(self.ts);
    }
}

impl Drop for PendingCommit<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.tracker.abandon_commit(self.ts);
        }
    }
}
