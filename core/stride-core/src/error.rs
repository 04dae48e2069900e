//! Error types for stride-core operations.

use std::path::PathBuf;

use stride_protocol::ErrorInfo;

use crate::session::SessionPhase;
use crate::types::PendingActivity;

/// All errors that can occur in stride-core operations.
///
/// Recoverable conditions (noisy fixes, failed uploads, corrupt storage) are
/// not errors here: they are filtered, retried, or read as absent.
#[derive(Debug, thiserror::Error)]
pub enum StrideError {
    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Cannot {action} a session that is {phase:?}")]
    InvalidTransition {
        action: &'static str,
        phase: SessionPhase,
    },

    #[error("Snapshot is inconsistent with its route: {0}")]
    InconsistentSnapshot(String),

    #[error("Location subscription failed: {0}")]
    Subscription(String),

    #[error("An interrupted recording is waiting; resume or discard it first")]
    UnrecoveredSnapshot,

    #[error("Finished activity {} was not queued: {source}", .record.id)]
    NotQueued {
        record: Box<PendingActivity>,
        #[source]
        source: Box<StrideError>,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Identity / Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No current user id available")]
    MissingUser,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Data directory could not be resolved")]
    DataDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Engine Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Engine is shut down")]
    EngineStopped,
}

/// Convenience type alias for Results using StrideError.
pub type Result<T> = std::result::Result<T, StrideError>;

impl From<StrideError> for String {
    fn from(err: StrideError) -> String {
        err.to_string()
    }
}

/// Why a single record could not be delivered. Always recoverable: the
/// record stays queued for the next pass.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Rejected before sending: {0}")]
    Invalid(ErrorInfo),
}
