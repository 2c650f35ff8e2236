use ahash::AHashMap as HashMap;
use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::WalConfig;
use crate::conflict::detector::{CommitNotice, ConflictDetector, Inbox};
use crate::errors::Result;
use crate::record::LogRecord;
use crate::storage::{FileStorage, LogStorage};
use crate::transaction::{Transaction, TxnInner, TxnShared};
use crate::TransactionState;

/// occwal Prelude
pub mod prelude {
    pub use crate::config::*;
    pub use crate::conflict::detection::*;
    pub use crate::errors::*;
    pub use crate::record::*;
    pub use crate::storage::*;
    pub use crate::transaction::*;
    pub use crate::*;
}

/// Shared core of a [`Wal`]: the record stream and the inflight registry.
///
/// Lock order is transaction state, then `inflight`, then `storage`.
pub(crate) struct Registry {
    /// The append-only record stream. One writer at a time.
    storage: Mutex<Box<dyn LogStorage>>,
    /// Inboxes of every inflight transaction, keyed by id. Commits hold this
    /// lock for their whole broadcast, which serializes them.
    inflight: Mutex<HashMap<u64, Inbox>>,
    /// Last issued transaction id. Ids start at 1.
    latest: AtomicU64,
}

impl Registry {
    pub(crate) fn append(&self, record: &LogRecord) -> Result<()> {
        self.storage.lock().append(record)
    }

    fn begin(self: &Arc<Self>) -> Result<Transaction> {
        let mut inflight = self.inflight.lock();
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;

        let shared = Arc::new(TxnShared::new(id));
        let (inbox, listener) = ConflictDetector::spawn(Arc::clone(&shared))?;

        // On failure the inbox is dropped here, which ends the listener.
        self.append(&LogRecord::begin(id))?;
        inflight.insert(id, inbox);
        drop(inflight);

        debug!("Transaction {} started", id);
        Ok(Transaction::new(shared, Arc::clone(self), listener))
    }

    /// Commits or, if a conflict was detected, rolls back `shared`.
    ///
    /// Returns `Ok(true)` on commit and `Ok(false)` on conflict. The
    /// transaction leaves the inflight set on every path. The caller must
    /// have set `closing` on `inner`, which is released while waiting.
    pub(crate) fn commit(
        &self,
        shared: &TxnShared,
        inner: &mut MutexGuard<'_, TxnInner>,
    ) -> Result<bool> {
        let id = shared.id;
        let mut inflight = self.inflight.lock();

        // Commits that finished before this one took the lock must be seen.
        shared.wait_for_pending(inner);

        if inner.conflicted {
            self.retire(&mut inflight, id, inner, LogRecord::rollback(id), TransactionState::RolledBack)?;
            return Ok(false);
        }

        self.retire(&mut inflight, id, inner, LogRecord::commit(id), TransactionState::Committed)?;

        let notice = CommitNotice {
            txn_id: id,
            write_set: Arc::new(inner.write_set.clone()),
        };
        for inbox in inflight.values() {
            inbox.deliver(notice.clone());
        }
        debug!(
            "Tx {} broadcast {} written key(s) to {} inflight transaction(s)",
            id,
            notice.write_set.len(),
            inflight.len()
        );

        Ok(true)
    }

    pub(crate) fn rollback(&self, id: u64, inner: &mut TxnInner) -> Result<()> {
        let mut inflight = self.inflight.lock();
        self.retire(&mut inflight, id, inner, LogRecord::rollback(id), TransactionState::RolledBack)
    }

    /// Retires `id` after an append failure of one of its records.
    pub(crate) fn fail(&self, id: u64, inner: &mut TxnInner) {
        self.inflight.lock().remove(&id);
        inner.state = TransactionState::Failed;
        warn!("Transaction {} retired after a log append failure", id);
    }

    /// Appends the terminal `record` and removes `id` from the inflight set.
    ///
    /// Removing the inbox disconnects the transaction's detector.
    fn retire(
        &self,
        inflight: &mut HashMap<u64, Inbox>,
        id: u64,
        inner: &mut TxnInner,
        record: LogRecord,
        terminal: TransactionState,
    ) -> Result<()> {
        let appended = self.append(&record);
        inflight.remove(&id);
        match appended {
            Ok(()) => {
                inner.state = terminal;
                Ok(())
            }
            Err(e) => {
                inner.state = TransactionState::Failed;
                warn!("Transaction {} retired, failed to append {}: {}", id, record, e);
                Err(e)
            }
        }
    }
}

/// The main entry point: a transaction manager over an append-only log.
///
/// Every transaction started with [`Wal::begin`] is inflight until it
/// commits or rolls back. When a transaction commits, its write-set is
/// checked against every other inflight transaction; those with an
/// overlapping read or write can no longer commit.
///
/// # Examples
///
/// ```no_run
/// use occwal::prelude::*;
///
/// # fn main() -> occwal::Result<()> {
/// let wal = Wal::open("/var/lib/occwal")?;
///
/// let txn = wal.begin()?;
/// txn.read("foo")?;
/// txn.write("bar")?;
/// assert!(txn.commit()?);
///
/// print!("{}", wal.dump()?);
/// # Ok(())
/// # }
/// ```
pub struct Wal {
    registry: Arc<Registry>,
}

impl Wal {
    /// Creates a fresh `log.wal` inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns `WalError::Io` if the file cannot be created, for instance
    /// because `dir` does not exist or is not writable.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(WalConfig::new(dir.as_ref()))
    }

    /// Creates a fresh log file as described by `config`.
    pub fn open_with_config(config: WalConfig) -> Result<Self> {
        let storage = FileStorage::create(&config)?;
        debug!("Opened write-ahead log at {}", storage.path().display());
        Ok(Self::with_storage(Box::new(storage)))
    }

    /// Creates a `Wal` on top of a custom record stream.
    pub fn with_storage(storage: Box<dyn LogStorage>) -> Self {
        Self {
            registry: Arc::new(Registry {
                storage: Mutex::new(storage),
                inflight: Mutex::new(HashMap::new()),
                latest: AtomicU64::new(0),
            }),
        }
    }

    /// Starts a new transaction.
    ///
    /// Allocates the next id, appends its BEGIN record, registers it as
    /// inflight and starts its conflict detector.
    ///
    /// # Errors
    ///
    /// Returns `WalError::Io` if the BEGIN record could not be appended and
    /// `WalError::DetectorSpawn` if the listener thread could not start.
    pub fn begin(&self) -> Result<Transaction> {
        self.registry.begin()
    }

    /// Returns the full content of the log, byte for byte. Diagnostics only.
    pub fn dump(&self) -> Result<String> {
        self.registry.storage.lock().snapshot()
    }

    /// Parses the current log content into records.
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        LogRecord::parse_all(&self.dump()?)
    }

    /// Number of transactions currently inflight.
    pub fn inflight_count(&self) -> usize {
        self.registry.inflight.lock().len()
    }

    pub fn is_inflight(&self, id: u64) -> bool {
        self.registry.inflight.lock().contains_key(&id)
    }

    /// The most recently issued transaction id, 0 before the first `begin`.
    pub fn last_id(&self) -> u64 {
        self.registry.latest.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("last_id", &self.last_id())
            .field("inflight", &self.inflight_count())
            .finish()
    }
}
