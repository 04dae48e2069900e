//! Connectivity capability consumed by the sync engine.

use serde::{Deserialize, Serialize};
use stride_protocol::ConnectionKind;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Wifi,
    Cellular,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub connected: bool,
    #[serde(rename = "type")]
    pub kind: NetworkKind,
}

impl ConnectivityState {
    pub const OFFLINE: Self = Self {
        connected: false,
        kind: NetworkKind::None,
    };

    pub fn online(kind: NetworkKind) -> Self {
        Self {
            connected: kind != NetworkKind::None,
            kind,
        }
    }

    /// Connected over a real interface.
    pub fn is_usable(&self) -> bool {
        self.connected && self.kind != NetworkKind::None
    }

    /// How this connection is recorded on a saved activity.
    pub fn connection_kind(&self) -> ConnectionKind {
        if !self.is_usable() {
            return ConnectionKind::Offline;
        }
        match self.kind {
            NetworkKind::Wifi => ConnectionKind::Wifi,
            NetworkKind::Cellular => ConnectionKind::Cellular,
            NetworkKind::None => ConnectionKind::Offline,
        }
    }
}

pub trait NetworkMonitor: Send + Sync {
    /// Synchronous fetch of the current state.
    fn current(&self) -> ConnectivityState;

    /// Receiver that observes every transition.
    fn subscribe(&self) -> watch::Receiver<ConnectivityState>;
}

/// Monitor whose state the host pushes in.
pub struct WatchNetworkMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl WatchNetworkMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, state: ConnectivityState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(connected = state.connected, kind = ?state.kind, "Connectivity changed");
        }
    }
}

impl NetworkMonitor for WatchNetworkMonitor {
    fn current(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }
}

/// True when `prev → next` is the offline→online edge that triggers a drain.
pub fn is_restored(prev: ConnectivityState, next: ConnectivityState) -> bool {
    !prev.is_usable() && next.is_usable()
}
