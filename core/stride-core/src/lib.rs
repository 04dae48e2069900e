//! # stride-core
//!
//! Records walking/running activities from noisy location fixes, classifies
//! them, and delivers them to a remote store across long offline stretches.
//!
//! ## Design Principles
//!
//! - **Single writer per resource**: the session is mutated only by its actor;
//!   the pending queue and uploaded-id set only by the sync engine.
//! - **Crash-safe**: every durable write is a whole-value atomic replace, and
//!   a recording is snapshotted while it runs.
//! - **Graceful degradation**: corrupt stored values read as absent; failed
//!   uploads stay queued and are retried on the next trigger.
//! - **Idempotent delivery**: ids are marked uploaded before they leave the
//!   queue, so a retry after a crash never re-sends.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stride_core::{EngineConfig, EngineDeps, StrideEngine};
//!
//! let engine = StrideEngine::init(EngineConfig::default(), deps);
//! engine.start_session().await?;
//! // fixes arrive through the LocationProvider...
//! let record = engine.stop_session().await?;
//! engine.shutdown().await;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod geo;
pub mod network;
pub mod platform;
pub mod queue;
pub mod remote;
pub mod runtime;
pub mod session;
pub mod signals;
pub mod stats;
pub mod storage;
pub mod sync;
pub mod types;
pub mod uploaded;
pub mod validator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use error::{DeliveryError, Result, StrideError};
pub use filter::{Rejection, SampleFilter};
pub use network::{ConnectivityState, NetworkKind, NetworkMonitor, WatchNetworkMonitor};
pub use platform::{
    FixSink, LocationProvider, ManualLocationProvider, PermissionStatus, SessionPlatform,
    SubscriptionGuard,
};
pub use queue::PendingQueue;
pub use remote::{ActivitySink, HttpActivitySink};
pub use runtime::{EngineDeps, StrideEngine, SyncTrigger};
pub use session::{
    AbortReason, ActivitySession, FixOutcome, SessionEnd, SessionPhase, SessionView,
};
pub use signals::SessionFlags;
pub use stats::{summarize_by_month, MonthSummary};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageConfig};
pub use sync::{SyncEngine, SyncOutcome, SyncReport};
pub use types::*;
pub use uploaded::UploadedIdSet;
