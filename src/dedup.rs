//! Run-scoped deduplication of listing identifiers.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;

/// Tracks listing identifiers seen during one run. Nothing is persisted:
/// every run starts empty. Identifiers are never removed within a run.
#[derive(Debug, Default)]
pub struct DedupStore {
    seen: Mutex<HashSet<String>>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this identifier was already marked in this run.
    pub fn seen(&self, id: &str) -> bool {
        self.seen.lock().expect("dedup lock poisoned").contains(id)
    }

    /// Mark an identifier as seen. Idempotent. Returns true when the
    /// identifier was new.
    pub fn mark(&self, id: &str) -> bool {
        let inserted = self
            .seen
            .lock()
            .expect("dedup lock poisoned")
            .insert(id.to_string());
        if !inserted {
            debug!(id, "duplicate listing suppressed");
        }
        inserted
    }

    /// Number of distinct identifiers marked so far.
    pub fn len(&self) -> usize {
        self.seen.lock().expect("dedup lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_seen() {
        let store = DedupStore::new();
        assert!(!store.seen("bmw-1"));
        assert!(store.mark("bmw-1"));
        assert!(store.seen("bmw-1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_mark_is_idempotent() {
        let store = DedupStore::new();
        assert!(store.mark("vw-2"));
        assert!(!store.mark("vw-2"));
        assert!(!store.mark("vw-2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_distinct_ids_within_run() {
        let store = DedupStore::new();
        for id in ["a", "b", "c", "a", "b"] {
            store.mark(id);
        }
        assert_eq!(store.len(), 3);
    }
}
