use ahash::AHashSet as HashSet;
use crossbeam_channel as channel;
use log::{debug, trace};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use crate::conflict::detection::detect_conflicts;
use crate::errors::{Result, WalError};
use crate::transaction::TxnShared;
use crate::TransactionState;

/// "Transaction `txn_id` committed with write-set `write_set`".
///
/// One notice is shared by every recipient of a broadcast.
#[derive(Debug, Clone)]
pub(crate) struct CommitNotice {
    pub(crate) txn_id: u64,
    pub(crate) write_set: Arc<HashSet<String>>,
}

/// Sending half of a transaction's notification inbox, held by the registry.
///
/// The inbox is unbounded, so delivering never blocks the committer. Dropping
/// the last `Inbox` disconnects the channel and ends the listener.
pub(crate) struct Inbox {
    sender: channel::Sender<CommitNotice>,
    shared: Arc<TxnShared>,
}

impl Inbox {
    /// Enqueues `notice` for the owning transaction's listener.
    pub(crate) fn deliver(&self, notice: CommitNotice) {
        // Counted before the send so the receiver can never observe a queued
        // notice it does not wait for.
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(notice).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            debug!(
                "Conflict detector of Tx {} is gone, dropping notice",
                self.shared.id
            );
        }
    }
}

/// Background listener consuming commit notices for one transaction.
///
/// Every notice is evaluated under the transaction's own lock, so it is
/// mutually exclusive with the transaction's reads, writes and commit.
/// The detector only ever sets the conflict flag; it never touches the sets.
pub(crate) struct ConflictDetector {
    shared: Arc<TxnShared>,
    receiver: channel::Receiver<CommitNotice>,
}

impl ConflictDetector {
    /// Creates the inbox for `shared` and starts its listener thread.
    ///
    /// Returns the registry's sending half and the handle to join once the
    /// transaction terminated.
    pub(crate) fn spawn(shared: Arc<TxnShared>) -> Result<(Inbox, JoinHandle<()>)> {
        let (sender, receiver) = channel::unbounded();
        let detector = ConflictDetector {
            shared: Arc::clone(&shared),
            receiver,
        };

        let handle = thread::Builder::new()
            .name(format!("occwal-detector-{}", shared.id))
            .spawn(move || detector.run())
            .map_err(|e| WalError::DetectorSpawn(e.to_string()))?;

        Ok((Inbox { sender, shared }, handle))
    }

    fn run(self) {
        trace!("Conflict detector of Tx {} started", self.shared.id);
        for notice in self.receiver.iter() {
            self.apply(&notice);
        }
        debug!("Conflict detector of Tx {} retired", self.shared.id);
    }

    fn apply(&self, notice: &CommitNotice) {
        let mut inner = self.shared.inner.lock();

        // Terminated transactions cannot conflict retroactively.
        if inner.state == TransactionState::Active && !inner.conflicted {
            let conflicts = detect_conflicts(&notice.write_set, &inner.read_set, &inner.write_set);
            if !conflicts.is_empty() {
                inner.conflicted = true;
                debug!(
                    "Tx {} conflicts with committed Tx {} on {} key(s): {:?}",
                    self.shared.id,
                    notice.txn_id,
                    conflicts.len(),
                    conflicts
                );
            }
        }

        self.shared.pending.fetch_sub(1, Ordering::AcqRel);
        self.shared.drained.notify_all();
    }
}
