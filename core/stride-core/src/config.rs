//! Engine thresholds and intervals, loaded from `config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! The thresholds varied a lot over the app's history (accuracy 25 vs 30 m,
//! displacement 15/30/40 m, vehicle speed 15 km/h vs 20 km/h vs 6 m/s), so
//! they live here instead of in the algorithms.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, StrideError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Fixes reporting a worse horizontal accuracy are discarded.
    #[serde(default = "default_max_accuracy_m")]
    pub max_accuracy_m: f64,
    /// Fixes closer than this to the last accepted one are jitter.
    #[serde(default = "default_min_displacement_m")]
    pub min_displacement_m: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: default_max_accuracy_m(),
            min_displacement_m: default_min_displacement_m(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    #[serde(default = "default_signal_timeout_secs")]
    pub signal_timeout_secs: u64,
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    /// Hard ceiling on instantaneous speed; above it the session is aborted.
    #[serde(default = "default_abort_speed_mps")]
    pub abort_speed_mps: f64,
    /// Consecutive fixes above the ceiling before aborting.
    #[serde(default = "default_abort_consecutive_fixes")]
    pub abort_consecutive_fixes: u32,
    #[serde(default = "default_speed_watch_kmh")]
    pub speed_watch_kmh: f64,
    #[serde(default = "default_speed_watch_window")]
    pub speed_watch_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            signal_timeout_secs: default_signal_timeout_secs(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            abort_speed_mps: default_abort_speed_mps(),
            abort_consecutive_fixes: default_abort_consecutive_fixes(),
            speed_watch_kmh: default_speed_watch_kmh(),
            speed_watch_window: default_speed_watch_window(),
        }
    }
}

impl SessionConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn signal_timeout(&self) -> Duration {
        Duration::from_secs(self.signal_timeout_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_vehicle_speed_kmh")]
    pub vehicle_speed_kmh: f64,
    #[serde(default = "default_min_duration_secs")]
    pub min_duration_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            vehicle_speed_kmh: default_vehicle_speed_kmh(),
            min_duration_secs: default_min_duration_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Zero disables the periodic trigger.
    #[serde(default = "default_periodic_interval_secs")]
    pub periodic_interval_secs: u64,
    #[serde(default = "default_uploaded_ids_retention")]
    pub uploaded_ids_retention: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
            periodic_interval_secs: default_periodic_interval_secs(),
            uploaded_ids_retention: default_uploaded_ids_retention(),
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn periodic_interval(&self) -> Option<Duration> {
        (self.periodic_interval_secs > 0).then(|| Duration::from_secs(self.periodic_interval_secs))
    }
}

fn default_max_accuracy_m() -> f64 {
    30.0
}

fn default_min_displacement_m() -> f64 {
    15.0
}

fn default_tick_secs() -> u64 {
    1
}

fn default_snapshot_interval_secs() -> u64 {
    10
}

fn default_signal_timeout_secs() -> u64 {
    10
}

fn default_inactivity_timeout_secs() -> u64 {
    5 * 60
}

fn default_abort_speed_mps() -> f64 {
    6.0
}

fn default_abort_consecutive_fixes() -> u32 {
    3
}

fn default_speed_watch_kmh() -> f64 {
    15.0
}

fn default_speed_watch_window() -> usize {
    5
}

fn default_vehicle_speed_kmh() -> f64 {
    20.0
}

fn default_min_duration_secs() -> u64 {
    300
}

fn default_endpoint() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_periodic_interval_secs() -> u64 {
    300
}

fn default_uploaded_ids_retention() -> usize {
    1000
}

/// Loads the engine config, returning defaults if the file doesn't exist.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| StrideError::Io {
        context: format!("read config {}", path.display()),
        source,
    })?;
    toml::from_str::<EngineConfig>(&content).map_err(|err| StrideError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}
