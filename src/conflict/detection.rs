use ahash::{AHashMap as HashMap, AHashSet as HashSet};

/// Represents the type of conflict detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    /// The transaction read data that was written by a committed transaction.
    ReadWrite,
    /// The transaction wrote data that was also written by a committed transaction.
    WriteWrite,
}

/// Checks a committed write-set against the read-set and write-set of an inflight transaction.
///
/// A key of `committed_writes` found in `write_set` is a write-write conflict, otherwise a key
/// found in `read_set` is a read-write conflict. Only set membership matters: it makes no
/// difference whether the inflight transaction touched the key before or after the committer.
///
/// Returns a map of conflicting keys and the type of conflict, empty when the sets are disjoint.
pub fn detect_conflicts(
    committed_writes: &HashSet<String>,
    read_set: &HashSet<String>,
    write_set: &HashSet<String>,
) -> HashMap<String, ConflictType> {
    let mut conflicts: HashMap<String, ConflictType> = HashMap::new();

    for key in committed_writes {
        if write_set.contains(key) {
            conflicts.insert(key.clone(), ConflictType::WriteWrite);
        } else if read_set.contains(key) {
            conflicts.insert(key.clone(), ConflictType::ReadWrite);
        }
    }

    conflicts
}
