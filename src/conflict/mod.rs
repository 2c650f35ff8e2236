/// This module contains the rule deciding whether a commit conflicts with an inflight transaction.
pub mod detection;
/// This module contains the per-transaction listener that applies commit notifications.
pub mod detector;
