//! Durable queue of finished activities awaiting server confirmation.
//!
//! Persisted as one JSON array under `pending_queue_<uid>`. Every mutation
//! writes the whole array before returning; the in-memory copy only changes
//! once that write succeeded.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::storage::{self, pending_queue_key, KeyValueStore};
use crate::types::PendingActivity;

pub struct PendingQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    records: Vec<PendingActivity>,
}

impl PendingQueue {
    /// Loads the user's queue. A missing or corrupt value is an empty queue.
    pub fn load(store: Arc<dyn KeyValueStore>, user_id: &str) -> Self {
        let key = pending_queue_key(user_id);
        let records: Vec<PendingActivity> = storage::load_json(store.as_ref(), &key).unwrap_or_default();
        debug!(key = %key, count = records.len(), "Loaded pending queue");
        Self {
            store,
            key,
            records,
        }
    }

    /// Adds a record. Returns false, without writing, if its id is already
    /// queued.
    pub fn append(&mut self, record: PendingActivity) -> Result<bool> {
        if self.contains(&record.id) {
            debug!(id = %record.id, "Record already queued");
            return Ok(false);
        }

        let mut next = self.records.clone();
        let id = record.id.clone();
        next.push(record);
        storage::save_json(self.store.as_ref(), &self.key, &next)?;
        self.records = next;

        info!(id = %id, queued = self.records.len(), "Record queued");
        Ok(true)
    }

    /// Drops every record whose id is in `ids` and returns how many went.
    pub fn remove(&mut self, ids: &HashSet<String>) -> Result<usize> {
        let next: Vec<PendingActivity> = self
            .records
            .iter()
            .filter(|record| !ids.contains(&record.id))
            .cloned()
            .collect();
        let removed = self.records.len() - next.len();
        if removed == 0 {
            return Ok(0);
        }

        storage::save_json(self.store.as_ref(), &self.key, &next)?;
        self.records = next;
        debug!(removed, remaining = self.records.len(), "Pruned pending queue");
        Ok(removed)
    }

    /// Snapshot in insertion order, oldest first.
    pub fn all(&self) -> Vec<PendingActivity> {
        self.records.clone()
    }

    pub fn records(&self) -> &[PendingActivity] {
        &self.records
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|record| record.id == id)
    }

    pub fn ids(&self) -> HashSet<String> {
        self.records.iter().map(|record| record.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};
    use chrono::Utc;
    use stride_protocol::{ActivityStatus, ConnectionKind, SaveMethod};

    fn record(id: &str) -> PendingActivity {
        PendingActivity {
            id: id.to_string(),
            distance_km: 1.0,
            duration_sec: 600,
            route: vec![],
            occurred_at: Utc::now(),
            connection_at_save: ConnectionKind::Offline,
            save_method: SaveMethod::OfflineThenSynced,
            status: ActivityStatus::Valida,
            invalid_reason: None,
            avg_speed_kmh: 6.0,
        }
    }

    #[test]
    fn append_is_idempotent_by_id() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut queue = PendingQueue::load(store.clone(), "u1");

        assert!(queue.append(record("a")).unwrap());
        assert!(!queue.append(record("a")).unwrap());
        assert_eq!(queue.len(), 1);

        let reloaded = PendingQueue::load(store, "u1");
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn keeps_insertion_order() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut queue = PendingQueue::load(store, "u1");
        for id in ["c", "a", "b"] {
            queue.append(record(id)).unwrap();
        }
        let ids: Vec<_> = queue.all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn remove_persists_before_returning() {
        let temp = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(temp.path().to_path_buf()));
        let mut queue = PendingQueue::load(store.clone(), "u1");
        for id in ["a", "b", "c"] {
            queue.append(record(id)).unwrap();
        }

        let gone: HashSet<String> = ["a", "c", "zzz"].iter().map(|s| s.to_string()).collect();
        assert_eq!(queue.remove(&gone).unwrap(), 2);

        let reloaded = PendingQueue::load(store, "u1");
        let ids: Vec<_> = reloaded.all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn queues_are_per_user() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        PendingQueue::load(store.clone(), "u1").append(record("a")).unwrap();
        assert!(PendingQueue::load(store, "u2").is_empty());
    }

    #[test]
    fn corrupt_queue_loads_empty() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.put(&pending_queue_key("u1"), "[{\"id\":").unwrap();
        let mut queue = PendingQueue::load(store, "u1");
        assert!(queue.is_empty());
        assert!(queue.append(record("a")).unwrap());
    }
}
