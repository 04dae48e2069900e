//! Capabilities the host platform lends to a recording session.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, StrideError};
use crate::types::Sample;

/// Callback a location provider invokes for every fix.
pub type FixSink = Box<dyn Fn(Sample) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Owns a platform resource (fix subscription, timer) and releases it
/// exactly once: on [`SubscriptionGuard::release`] or when dropped.
pub struct SubscriptionGuard {
    label: &'static str,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new(label: &'static str, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label,
            release: Some(Box::new(release)),
        }
    }

    /// A guard with nothing to release.
    pub fn noop(label: &'static str) -> Self {
        Self {
            label,
            release: None,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!(subscription = self.label, "Releasing subscription");
            release();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("label", &self.label)
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Source of location fixes.
pub trait LocationProvider: Send + Sync {
    fn permission(&self) -> PermissionStatus;

    /// Starts delivering fixes to `sink` until the returned guard is released.
    fn watch(&self, sink: FixSink) -> Result<SubscriptionGuard>;
}

/// Provider whose fixes are pushed in by the host, e.g. a replayed track.
pub struct ManualLocationProvider {
    permission: PermissionStatus,
    sink: Arc<Mutex<Option<FixSink>>>,
}

impl ManualLocationProvider {
    pub fn new(permission: PermissionStatus) -> Self {
        Self {
            permission,
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Delivers a fix to the current watcher. Returns false if nobody is
    /// watching.
    pub fn push(&self, sample: Sample) -> bool {
        match self.sink.lock() {
            Ok(sink) => match sink.as_ref() {
                Some(sink) => {
                    sink(sample);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.sink.lock().map(|s| s.is_some()).unwrap_or_default()
    }
}

impl LocationProvider for ManualLocationProvider {
    fn permission(&self) -> PermissionStatus {
        self.permission
    }

    fn watch(&self, sink: FixSink) -> Result<SubscriptionGuard> {
        let mut slot = self
            .sink
            .lock()
            .map_err(|_| StrideError::Subscription("location provider lock poisoned".to_string()))?;
        if slot.is_some() {
            return Err(StrideError::Subscription("already watching".to_string()));
        }
        *slot = Some(sink);

        let shared = Arc::clone(&self.sink);
        Ok(SubscriptionGuard::new("location", move || {
            if let Ok(mut slot) = shared.lock() {
                *slot = None;
            }
        }))
    }
}

/// What a session needs from its surroundings while recording.
///
/// The runtime implements this by wiring the location provider and a tokio
/// interval into the session's event channel.
pub trait SessionPlatform {
    fn location_permission(&self) -> PermissionStatus;
    fn subscribe_fixes(&self) -> Result<SubscriptionGuard>;
    fn start_ticker(&self, period: Duration) -> Result<SubscriptionGuard>;
}
