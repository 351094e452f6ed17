// Tessera v0.4.0 - Snapshot-Isolated Transactions over a Versioned Cell Store
// Optimistic concurrency control, first committer wins per cell

pub mod types;
pub mod error;
pub mod catalog;
pub mod storage;
pub mod txn;
pub mod session;

// Re-export main types
pub use types::{Cell, CellValue, ColumnId, KeyRange, Row, RowKey, Timestamp, TxnId};
pub use error::{ErrorCode, StorageError, TxnError, TxnResult};
pub use catalog::{Catalog, SchemaSource, TableMetadata};
pub use storage::{CellStore, MemoryStore};
pub use txn::{Transaction, TransactionManager, TxnConfig, TxnMode, TxnState};
pub use session::Session;
