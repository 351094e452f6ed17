//! Transaction Manager Module (OCC + snapshot isolation)
//!
//! Optimistic concurrency control over a versioned cell store.
//! Reads see the store as of the transaction's start timestamp plus the
//! transaction's own buffered writes; conflicts are detected at commit,
//! per (row, column), first committer wins.
//!
//! # Example
//! ```ignore
//! use tessera::txn::{TxnConfig, TxnMode};
//!
//! // Conflict detection enabled (default)
//! let config = TxnConfig::default();
//!
//! // Last writer wins, no validation
//! let config = TxnConfig::new(TxnMode::Disabled);
//! ```

mod buffer;
mod clock;
mod conflict;
mod manager;
mod snapshot;
mod transaction;

pub use buffer::WriteBuffer;
pub use clock::{CommitTracker, PendingCommit, VersionClock};
pub use conflict::{CommitLocks, ConflictDetector, ConflictOutcome};
pub use manager::TransactionManager;
pub use snapshot::SnapshotReader;
pub use transaction::{Transaction, TxnState};

/// Conflict detection mode - runtime selectable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxnMode {
    /// No commit validation - last writer wins
    /// Use for: single writer, bulk loads
    Disabled,

    /// First-committer-wins validation per (row, column)
    /// Use for: concurrent sessions (default)
    #[default]
    Enabled,
}

impl TxnMode {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "off" | "disabled" | "none" | "lww" => TxnMode::Disabled,
            "on" | "enabled" | "occ" | "snapshot" => TxnMode::Enabled,
            _ => TxnMode::default(),
        }
    }
}

/// Transaction configuration
#[derive(Debug, Clone)]
pub struct TxnConfig {
    /// Conflict detection mode
    pub mode: TxnMode,
    /// Autocommit default for new sessions
    pub autocommit: bool,
    /// Number of commit lock stripes
    pub lock_stripes: usize,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            mode: TxnMode::default(),
            autocommit: false,
            lock_stripes: 64,
        }
    }
}

impl TxnConfig {
    /// Create config with specific mode
    pub fn new(mode: TxnMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Set conflict detection mode
    pub fn mode(mut self, mode: TxnMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the session autocommit default
    pub fn autocommit(mut self, on: bool) -> Self {
        self.autocommit = on;
        self
    }

    /// Set the number of commit lock stripes (at least 1)
    pub fn lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes.max(1);
        self
    }

    /// Check if conflict detection is enabled
    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, TxnMode::Enabled)
    }
}
