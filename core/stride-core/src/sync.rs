//! Drains the pending queue into the remote sink.
//!
//! A pass delivers every queued record that isn't already known to be
//! uploaded. Each acknowledged id is written to the uploaded set first; the
//! queue is compacted once at the end of the pass. A crash between the two
//! writes is harmless: the next pass sees the id in the uploaded set, skips
//! the network call and prunes the record.
//!
//! Only one pass runs at a time. A call that finds a pass in flight returns
//! [`SyncOutcome::AlreadyRunning`] immediately.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{DeliveryError, Result, StrideError};
use crate::network::NetworkMonitor;
use crate::queue::PendingQueue;
use crate::remote::ActivitySink;
use crate::storage::KeyValueStore;
use crate::types::PendingActivity;
use crate::uploaded::UploadedIdSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub delivered: usize,
    /// Found in the uploaded set from an earlier pass and pruned without
    /// a network call.
    pub already_delivered: usize,
    pub failed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    AlreadyRunning,
    Offline,
    NoUser,
    Completed(SyncReport),
}

/// Clears the in-flight flag when the pass ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    user_id: String,
    queue: Mutex<PendingQueue>,
    uploaded: Mutex<UploadedIdSet>,
    sink: Arc<dyn ActivitySink>,
    network: Arc<dyn NetworkMonitor>,
    request_timeout: Duration,
    in_flight: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn ActivitySink>,
        network: Arc<dyn NetworkMonitor>,
        config: &SyncConfig,
    ) -> Self {
        let user_id = user_id.into().trim().to_string();
        Self {
            queue: Mutex::new(PendingQueue::load(store.clone(), &user_id)),
            uploaded: Mutex::new(UploadedIdSet::load(
                store,
                &user_id,
                config.uploaded_ids_retention,
            )),
            user_id,
            sink,
            network,
            request_timeout: config.request_timeout(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn queue(&self) -> MutexGuard<'_, PendingQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn uploaded(&self) -> MutexGuard<'_, UploadedIdSet> {
        self.uploaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands a finished record to the queue. Returns false if it was
    /// already queued.
    pub fn enqueue(&self, record: PendingActivity) -> Result<bool> {
        if self.user_id.is_empty() {
            return Err(StrideError::MissingUser);
        }
        self.queue().append(record)
    }

    /// Drops a record the user chose not to deliver.
    pub fn discard(&self, id: &str) -> Result<bool> {
        let ids = HashSet::from([id.to_string()]);
        Ok(self.queue().remove(&ids)? > 0)
    }

    pub fn pending(&self) -> Vec<PendingActivity> {
        self.queue().all()
    }

    pub fn pending_len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_uploaded(&self, id: &str) -> bool {
        self.uploaded().contains(id)
    }

    pub async fn sync(&self) -> SyncOutcome {
        let Some(_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("Sync already in flight; skipping");
            return SyncOutcome::AlreadyRunning;
        };

        if self.user_id.is_empty() {
            debug!("No current user; skipping sync");
            return SyncOutcome::NoUser;
        }

        let connectivity = self.network.current();
        if !connectivity.is_usable() {
            debug!(kind = ?connectivity.kind, "Offline; skipping sync");
            return SyncOutcome::Offline;
        }

        let pending = self.queue().all();
        let mut report = SyncReport::default();
        let mut done: HashSet<String> = HashSet::new();

        for record in pending {
            if self.uploaded().contains(&record.id) {
                report.already_delivered += 1;
                done.insert(record.id);
                continue;
            }

            match self.deliver(&record).await {
                Ok(()) => {
                    if let Err(err) = self.uploaded().insert(&record.id) {
                        warn!(id = %record.id, error = %err, "Failed to persist uploaded id");
                    }
                    report.delivered += 1;
                    done.insert(record.id);
                }
                Err(err) => {
                    warn!(id = %record.id, error = %err, "Delivery failed; record stays queued");
                    report.failed += 1;
                }
            }
        }

        let still_queued = {
            let mut queue = self.queue();
            if !done.is_empty() {
                if let Err(err) = queue.remove(&done) {
                    warn!(error = %err, "Failed to prune delivered records; retrying next pass");
                }
            }
            report.remaining = queue.len();
            queue.ids()
        };

        if let Err(err) = self.uploaded().compact(&still_queued) {
            warn!(error = %err, "Failed to compact uploaded ids");
        }

        info!(
            delivered = report.delivered,
            already_delivered = report.already_delivered,
            failed = report.failed,
            remaining = report.remaining,
            "Sync pass complete"
        );
        SyncOutcome::Completed(report)
    }

    async fn deliver(&self, record: &PendingActivity) -> std::result::Result<(), DeliveryError> {
        let request = record.to_request(&self.user_id);
        match tokio::time::timeout(self.request_timeout, self.sink.deliver(&request)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.request_timeout)),
        }
    }
}
