//! Ids the server has acknowledged.
//!
//! Written before the matching queue entry is removed, so a crash between
//! the two writes leaves enough behind to skip the re-send on the next pass.
//! Oldest ids beyond the retention cap are forgotten, but never while their
//! record is still queued.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::storage::{self, uploaded_ids_key, KeyValueStore};

pub struct UploadedIdSet {
    store: Arc<dyn KeyValueStore>,
    key: String,
    retention: usize,
    /// Insertion order, oldest first.
    ids: Vec<String>,
    index: HashSet<String>,
}

impl UploadedIdSet {
    pub fn load(store: Arc<dyn KeyValueStore>, user_id: &str, retention: usize) -> Self {
        let key = uploaded_ids_key(user_id);
        let stored: Vec<String> = storage::load_json(store.as_ref(), &key).unwrap_or_default();

        let mut ids = Vec::with_capacity(stored.len());
        let mut index = HashSet::with_capacity(stored.len());
        for id in stored {
            if index.insert(id.clone()) {
                ids.push(id);
            }
        }

        Self {
            store,
            key,
            retention,
            ids,
            index,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Records an acknowledged id and persists the set immediately.
    ///
    /// The id is marked in memory even when the write fails, so this process
    /// never re-sends it; the next successful write carries it to disk.
    pub fn insert(&mut self, id: &str) -> Result<()> {
        if self.contains(id) {
            return Ok(());
        }
        self.ids.push(id.to_string());
        self.index.insert(id.to_string());
        storage::save_json(self.store.as_ref(), &self.key, &self.ids)
    }

    /// Forgets the oldest ids beyond the retention cap, skipping any in
    /// `still_queued`. Returns how many were dropped.
    pub fn compact(&mut self, still_queued: &HashSet<String>) -> Result<usize> {
        let mut excess = self.ids.len().saturating_sub(self.retention);
        if excess == 0 {
            return Ok(0);
        }

        let next: Vec<String> = self
            .ids
            .iter()
            .filter(|id| {
                if excess > 0 && !still_queued.contains(*id) {
                    excess -= 1;
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect();
        let dropped = self.ids.len() - next.len();
        if dropped == 0 {
            return Ok(0);
        }

        storage::save_json(self.store.as_ref(), &self.key, &next)?;
        self.index = next.iter().cloned().collect();
        self.ids = next;
        debug!(dropped, kept = self.ids.len(), "Compacted uploaded ids");
        Ok(dropped)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrideError;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ids(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn insert_persists_immediately() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut set = UploadedIdSet::load(store.clone(), "u1", 10);
        set.insert("a").unwrap();
        set.insert("a").unwrap();

        let reloaded = UploadedIdSet::load(store, "u1", 10);
        assert!(reloaded.contains("a"));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn compaction_drops_oldest_but_keeps_queued_ids() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut set = UploadedIdSet::load(store.clone(), "u1", 2);
        for id in ["a", "b", "c", "d"] {
            set.insert(id).unwrap();
        }

        assert_eq!(set.compact(&ids(&["a"])).unwrap(), 2);
        assert!(set.contains("a"));
        assert!(!set.contains("b"));
        assert!(!set.contains("c"));
        assert!(set.contains("d"));

        let reloaded = UploadedIdSet::load(store, "u1", 2);
        assert!(reloaded.contains("a") && reloaded.contains("d"));
    }

    /// Accepts writes until `fail_puts` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_puts: AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(StrideError::Io {
                    context: format!("write key {}", key),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            self.inner.put(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn failed_write_still_marks_in_memory_and_persists_later() {
        let store = Arc::new(FlakyStore::default());
        let mut set = UploadedIdSet::load(store.clone(), "u1", 10);

        store.fail_puts.store(true, Ordering::SeqCst);
        assert!(set.insert("a").is_err());
        assert!(set.contains("a"));
        assert!(!UploadedIdSet::load(store.clone(), "u1", 10).contains("a"));

        store.fail_puts.store(false, Ordering::SeqCst);
        set.insert("b").unwrap();
        let reloaded = UploadedIdSet::load(store, "u1", 10);
        assert!(reloaded.contains("a") && reloaded.contains("b"));
    }

    #[test]
    fn duplicate_stored_ids_collapse_on_load() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.put(&uploaded_ids_key("u1"), r#"["a","a","b"]"#).unwrap();
        let set = UploadedIdSet::load(store, "u1", 10);
        assert_eq!(set.len(), 2);
    }
}
