use ahash::AHashSet as HashSet;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::errors::{Result, WalError};
use crate::record::{validate_key, LogRecord};
use crate::wal::Registry;
use crate::TransactionState;

/// Mutable state of a transaction, guarded by [`TxnShared::inner`].
#[derive(Debug)]
pub(crate) struct TxnInner {
    /// Keys read so far. Never shrinks while active.
    pub(crate) read_set: HashSet<String>,
    /// Keys written so far. Never shrinks while active.
    pub(crate) write_set: HashSet<String>,
    /// Set by the conflict detector, never reset.
    pub(crate) conflicted: bool,
    /// Set once a commit started. The state stays `Active` until the commit
    /// is decided, but every other operation is rejected from then on.
    pub(crate) closing: bool,
    pub(crate) state: TransactionState,
}

/// The part of a transaction shared between the caller's handle, the
/// registry and the conflict detector.
#[derive(Debug)]
pub(crate) struct TxnShared {
    pub(crate) id: u64,
    pub(crate) inner: Mutex<TxnInner>,
    /// Commit notices delivered to the inbox but not yet applied.
    pub(crate) pending: AtomicUsize,
    /// Signalled by the detector every time it applied a notice.
    pub(crate) drained: Condvar,
}

impl TxnShared {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            inner: Mutex::new(TxnInner {
                read_set: HashSet::new(),
                write_set: HashSet::new(),
                conflicted: false,
                closing: false,
                state: TransactionState::Active,
            }),
            pending: AtomicUsize::new(0),
            drained: Condvar::new(),
        }
    }

    /// Blocks until every notice delivered so far has been applied.
    ///
    /// The lock behind `inner` is released while waiting so the detector can
    /// make progress.
    pub(crate) fn wait_for_pending(&self, inner: &mut MutexGuard<'_, TxnInner>) {
        while self.pending.load(Ordering::Acquire) > 0 {
            self.drained.wait(inner);
        }
    }
}

/// Represents a single transaction.
///
/// A transaction records the keys it reads and writes in the write-ahead log
/// and in its read-set and write-set. It is validated optimistically: a
/// commit succeeds unless another transaction committed an overlapping write
/// while this one was inflight.
///
/// Transactions are created by [`crate::Wal::begin`]. All operations take
/// `&self`, so a handle can be shared between threads. Dropping a handle that
/// is still active rolls the transaction back.
pub struct Transaction {
    /// Unique identifier for the transaction.
    id: u64,
    /// State shared with the registry and the conflict detector.
    shared: Arc<TxnShared>,
    /// Reference to the registry that issued this transaction.
    registry: Arc<Registry>,
    /// Listener thread, joined once the transaction terminated.
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Transaction {
    pub(crate) fn new(
        shared: Arc<TxnShared>,
        registry: Arc<Registry>,
        listener: JoinHandle<()>,
    ) -> Self {
        Self {
            id: shared.id,
            shared,
            registry,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Returns the unique identifier of the transaction.
    ///
    /// Identifiers start at 1 and strictly increase with every call to
    /// [`crate::Wal::begin`] on the same log.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.shared.inner.lock().state
    }

    /// Returns `true` once a committed peer's write-set overlapped this
    /// transaction's sets. A conflicted transaction can no longer commit.
    pub fn is_conflicted(&self) -> bool {
        self.shared.inner.lock().conflicted
    }

    /// Returns a copy of the keys read so far.
    pub fn read_set(&self) -> HashSet<String> {
        self.shared.inner.lock().read_set.clone()
    }

    /// Returns a copy of the keys written so far.
    pub fn write_set(&self) -> HashSet<String> {
        self.shared.inner.lock().write_set.clone()
    }

    /// Records a read of `key`.
    ///
    /// Appends a READ record and adds `key` to the read-set.
    ///
    /// # Errors
    ///
    /// - `WalError::TransactionNotActive` if the transaction already terminated
    ///   or another thread is committing it.
    /// - `WalError::InvalidKey` if `key` contains a line break.
    /// - `WalError::Io` if the record could not be appended. The transaction
    ///   is then retired with state `Failed`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use occwal::prelude::*;
    ///
    /// # fn main() -> occwal::Result<()> {
    /// let wal = Wal::open("/var/lib/occwal")?;
    /// let txn = wal.begin()?;
    /// txn.read("accounts/alice")?;
    /// assert!(txn.read_set().contains("accounts/alice"));
    /// # Ok(())
    /// # }
    /// ```
    pub fn read(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut inner = self.shared.inner.lock();
        self.ensure_active(&inner)?;

        if let Err(e) = self.registry.append(&LogRecord::read(self.id, key)) {
            self.registry.fail(self.id, &mut inner);
            drop(inner);
            self.retire_listener();
            return Err(e);
        }
        inner.read_set.insert(key.to_string());
        Ok(())
    }

    /// Records a write of `key`.
    ///
    /// Appends a WRITE record and adds `key` to the write-set. Fails under the
    /// same conditions as [`Transaction::read`].
    pub fn write(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut inner = self.shared.inner.lock();
        self.ensure_active(&inner)?;

        if let Err(e) = self.registry.append(&LogRecord::write(self.id, key)) {
            self.registry.fail(self.id, &mut inner);
            drop(inner);
            self.retire_listener();
            return Err(e);
        }
        inner.write_set.insert(key.to_string());
        Ok(())
    }

    /// Attempts to commit the transaction.
    ///
    /// If no committed peer's write-set overlapped this transaction's sets
    /// while it was inflight, a COMMIT record is appended, the write-set is
    /// broadcast to every other inflight transaction and `Ok(true)` is
    /// returned. Otherwise the transaction is rolled back and `Ok(false)` is
    /// returned. A conflict is an expected outcome, not an error; retrying is
    /// left to the caller.
    ///
    /// # Errors
    ///
    /// - `WalError::TransactionNotActive` if the transaction already terminated
    ///   or another thread is committing it.
    /// - `WalError::Io` if the terminal record could not be appended.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use occwal::prelude::*;
    ///
    /// # fn main() -> occwal::Result<()> {
    /// let wal = Wal::open("/var/lib/occwal")?;
    ///
    /// let reader = wal.begin()?;
    /// reader.read("foo")?;
    ///
    /// let writer = wal.begin()?;
    /// writer.write("foo")?;
    /// assert!(writer.commit()?);
    ///
    /// // `foo` changed underneath the reader.
    /// assert!(!reader.commit()?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn commit(&self) -> Result<bool> {
        let mut inner = self.shared.inner.lock();
        self.ensure_active(&inner)?;
        // The commit releases `inner` while it waits for pending notices.
        inner.closing = true;

        let outcome = self.registry.commit(&self.shared, &mut inner);
        drop(inner);
        self.retire_listener();

        match &outcome {
            Ok(true) => debug!("Transaction {} committed", self.id),
            Ok(false) => debug!("Transaction {} rolled back on conflict", self.id),
            Err(e) => warn!("Transaction {} failed to commit: {}", self.id, e),
        }
        outcome
    }

    /// Rolls the transaction back.
    ///
    /// Appends a ROLLBACK record and retires the transaction.
    ///
    /// # Errors
    ///
    /// - `WalError::TransactionNotActive` if the transaction already terminated
    ///   or another thread is committing it.
    /// - `WalError::Io` if the record could not be appended.
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        self.ensure_active(&inner)?;

        let outcome = self.registry.rollback(self.id, &mut inner);
        drop(inner);
        self.retire_listener();

        debug!("Transaction {} rolled back", self.id);
        outcome
    }

    fn ensure_active(&self, inner: &TxnInner) -> Result<()> {
        if inner.state.is_terminal() || inner.closing {
            return Err(WalError::TransactionNotActive(self.id));
        }
        Ok(())
    }

    /// Joins the listener thread. Must be called without holding `inner`.
    fn retire_listener(&self) {
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Conflict detector of Tx {} panicked", self.id);
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state() == TransactionState::Active {
            debug!("Transaction {} dropped while active, rolling back", self.id);
            if let Err(e) = self.rollback() {
                warn!("Rollback of dropped transaction {} failed: {}", self.id, e);
            }
        }
        self.retire_listener();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("conflicted", &inner.conflicted)
            .field("read_set", &inner.read_set)
            .field("write_set", &inner.write_set)
            .finish()
    }
}
