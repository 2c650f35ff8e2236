pub mod errors;
pub mod config;
pub mod record;
pub mod storage;
pub mod transaction;
pub mod wal;
pub mod conflict;

// Re-export key types and structs for easier access
pub use errors::{WalError, Result};
pub use config::{SyncMode, WalConfig};
pub use record::{LogRecord, RecordKind};
pub use storage::{FileStorage, LogStorage};
pub use transaction::Transaction;
pub use wal::{prelude, Wal};
pub use conflict::detection::ConflictType;

// Define the TransactionState enum here as it's a core part of the public API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
///
/// Lifecycle states of a transaction.
pub enum TransactionState {
    ///
    /// [TransactionState::Active] is the state right after [Wal::begin]. Reads and writes are
    /// accepted and the transaction is inflight, so commits of other transactions are checked
    /// against its read-set and write-set.
    Active,
    ///
    /// [TransactionState::Committed] is terminal. A COMMIT record was appended and the
    /// write-set was broadcast to every other inflight transaction.
    Committed,
    ///
    /// [TransactionState::RolledBack] is terminal. A ROLLBACK record was appended, either on
    /// request or because a conflict was detected at commit time.
    RolledBack,
    ///
    /// [TransactionState::Failed] is terminal. Appending one of the transaction's records
    /// failed, so it was retired without a guaranteed terminal record.
    Failed,
}

impl TransactionState {
    /// Returns `true` for every state except [TransactionState::Active].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Active)
    }
}
