//! Common utilities for occwal integration tests.
#![allow(dead_code)]

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use occwal::{
    errors::{Result, WalError},
    record::{LogRecord, RecordKind},
    storage::LogStorage,
    Wal,
};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

// --- MemoryStorage ---

/// An in-memory implementation of the `LogStorage` trait for testing purposes.
/// The buffer is shared so tests can inspect it after handing the storage to a `Wal`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    buf: Arc<Mutex<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buf.lock().clone()
    }
}

impl LogStorage for MemoryStorage {
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        let mut buf = self.buf.lock();
        buf.push_str(&record.to_string());
        buf.push('\n');
        Ok(())
    }

    fn snapshot(&self) -> Result<String> {
        Ok(self.contents())
    }
}

// --- FailingStorage ---

/// A `LogStorage` that accepts `budget` appends and fails every append after that.
#[derive(Debug)]
pub struct FailingStorage {
    inner: MemoryStorage,
    budget: usize,
}

impl FailingStorage {
    pub fn new(budget: usize) -> Self {
        Self {
            inner: MemoryStorage::new(),
            budget,
        }
    }
}

impl LogStorage for FailingStorage {
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        if self.budget == 0 {
            return Err(WalError::Io(io::Error::other("disk full")));
        }
        self.budget -= 1;
        self.inner.append(record)
    }

    fn snapshot(&self) -> Result<String> {
        self.inner.snapshot()
    }
}

// --- Helper Functions ---

/// Helper function to create a Wal backed by MemoryStorage.
pub fn setup_wal() -> Arc<Wal> {
    Arc::new(Wal::with_storage(Box::new(MemoryStorage::new())))
}

/// Helper function to create a Wal whose storage fails after `budget` appends.
pub fn setup_failing_wal(budget: usize) -> Wal {
    Wal::with_storage(Box::new(FailingStorage::new(budget)))
}

/// Returns the terminal record kind logged for `id`, if any.
pub fn terminal_of(records: &[LogRecord], id: u64) -> Option<RecordKind> {
    records
        .iter()
        .filter(|r| r.txn_id == id && r.kind.is_terminal())
        .map(|r| r.kind.clone())
        .last()
}

/// Asserts that every transaction in `records` has exactly one BEGIN first,
/// only READ/WRITE records in between, and exactly one terminal record last.
pub fn assert_well_formed(records: &[LogRecord]) {
    let mut per_txn: HashMap<u64, Vec<&RecordKind>> = HashMap::new();
    for record in records {
        per_txn.entry(record.txn_id).or_default().push(&record.kind);
    }

    for (id, kinds) in per_txn {
        assert_eq!(kinds.first(), Some(&&RecordKind::Begin), "Tx {id} must start with BEGIN");
        let terminals = kinds.iter().filter(|k| k.is_terminal()).count();
        assert_eq!(terminals, 1, "Tx {id} must have exactly one terminal record");
        assert!(kinds.last().is_some_and(|k| k.is_terminal()), "Tx {id} must end with its terminal record");
        let begins = kinds.iter().filter(|k| ***k == RecordKind::Begin).count();
        assert_eq!(begins, 1, "Tx {id} must have exactly one BEGIN");
    }
}

/// Replays `records` and checks the first-committer-wins rule for every pair of transactions.
///
/// - A transaction touching a key that a peer committed while it was inflight, where the touch
///   is logged before the peer's COMMIT, must not commit.
/// - Every ROLLBACK of a transaction that only ever tried to commit must be explained by
///   such a peer commit.
pub fn assert_first_committer_wins(records: &[LogRecord]) {
    let mut begin_pos: HashMap<u64, usize> = HashMap::new();
    let mut end_pos: HashMap<u64, (usize, RecordKind)> = HashMap::new();
    let mut touches: HashMap<u64, Vec<(usize, String)>> = HashMap::new();
    let mut writes: HashMap<u64, HashSet<String>> = HashMap::new();

    for (pos, record) in records.iter().enumerate() {
        match &record.kind {
            RecordKind::Begin => {
                begin_pos.insert(record.txn_id, pos);
            }
            RecordKind::Read(key) => {
                touches.entry(record.txn_id).or_default().push((pos, key.clone()));
            }
            RecordKind::Write(key) => {
                touches.entry(record.txn_id).or_default().push((pos, key.clone()));
                writes.entry(record.txn_id).or_default().insert(key.clone());
            }
            kind => {
                end_pos.insert(record.txn_id, (pos, kind.clone()));
            }
        }
    }

    let committed: Vec<(u64, usize)> = end_pos
        .iter()
        .filter(|(_, (_, kind))| *kind == RecordKind::Commit)
        .map(|(id, (pos, _))| (*id, *pos))
        .collect();

    for (a, (a_end, a_kind)) in &end_pos {
        let (a, a_end) = (*a, *a_end);
        let a_begin = *begin_pos.get(&a).expect("every transaction has a BEGIN");
        let a_touches = touches.get(&a).cloned().unwrap_or_default();

        let mut must_conflict = false;
        let mut may_conflict = false;
        for &(b, b_commit) in &committed {
            if b == a || b_commit < a_begin || b_commit > a_end {
                continue;
            }
            let b_writes = writes.get(&b).cloned().unwrap_or_default();
            for (touch_pos, key) in &a_touches {
                if b_writes.contains(key) {
                    may_conflict = true;
                    if *touch_pos < b_commit {
                        must_conflict = true;
                    }
                }
            }
        }

        if must_conflict {
            assert_eq!(*a_kind, RecordKind::Rollback, "Tx {a} should have been rolled back");
        }
        if *a_kind == RecordKind::Rollback {
            assert!(may_conflict, "Tx {a} was rolled back without a conflicting commit");
        }
    }
}
