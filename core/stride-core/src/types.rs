//! Shared data model: fixes, the in-flight session snapshot, and the
//! queued activity record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stride_protocol::{
    ActivityStatus, ConnectionKind, InvalidReason, SaveActivityRequest, SaveMethod,
};

use crate::geo::{self, Position};

/// Tolerance when re-deriving the total distance from a stored route.
const ROUTE_DISTANCE_EPSILON_KM: f64 = 1e-6;

/// One location fix from the platform. Ephemeral; never persisted alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    /// Platforms report no speed (or a negative one) when they can't tell.
    #[serde(default, alias = "speedMps")]
    pub instant_speed_mps: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Position for Sample {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// An accepted position on the recorded route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&Sample> for RoutePoint {
    fn from(sample: &Sample) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
            timestamp: sample.timestamp,
        }
    }
}

impl Position for RoutePoint {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Everything needed to reload a recording verbatim after a crash.
///
/// Stored as one blob under `session_current`. `total_distance_km` and
/// `elapsed_seconds` never decrease and `route` only grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySessionState {
    pub route: Vec<RoutePoint>,
    pub total_distance_km: f64,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub last_accepted_position: Option<RoutePoint>,
}

impl ActivitySessionState {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            route: Vec::new(),
            total_distance_km: 0.0,
            started_at,
            elapsed_seconds: 0,
            last_accepted_position: None,
        }
    }

    /// Re-derived from the route; what `total_distance_km` must equal.
    pub fn route_distance_km(&self) -> f64 {
        self.route
            .windows(2)
            .map(|pair| geo::accumulate(&pair[0], &pair[1]))
            .sum()
    }

    /// Checks that the counters agree with the route they summarize.
    pub fn check_consistency(&self) -> Result<(), String> {
        if !self.total_distance_km.is_finite() || self.total_distance_km < 0.0 {
            return Err(format!(
                "total distance {} is not a non-negative number",
                self.total_distance_km
            ));
        }

        let derived = self.route_distance_km();
        if (derived - self.total_distance_km).abs() > ROUTE_DISTANCE_EPSILON_KM {
            return Err(format!(
                "total distance {} km but route sums to {} km",
                self.total_distance_km, derived
            ));
        }

        if self.last_accepted_position.as_ref() != self.route.last() {
            return Err("last accepted position is not the end of the route".to_string());
        }

        Ok(())
    }
}

/// Outcome of classifying a finished session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub status: ActivityStatus,
    pub invalid_reason: Option<InvalidReason>,
    pub avg_speed_kmh: f64,
}

/// A finished activity waiting to be confirmed by the server.
///
/// Created exactly once per finished session; the id is generated at
/// creation and never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingActivity {
    pub id: String,
    pub distance_km: f64,
    pub duration_sec: u64,
    #[serde(default)]
    pub route: Vec<RoutePoint>,
    pub occurred_at: DateTime<Utc>,
    pub connection_at_save: ConnectionKind,
    pub save_method: SaveMethod,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<InvalidReason>,
    pub avg_speed_kmh: f64,
}

impl PendingActivity {
    pub fn new_id() -> String {
        ulid::Ulid::new().to_string()
    }

    pub fn to_request(&self, user_id: &str) -> SaveActivityRequest {
        SaveActivityRequest {
            id: self.id.clone(),
            user_id: user_id.to_string(),
            date: self.occurred_at,
            distance: self.distance_km,
            duration: self.duration_sec,
            status: self.status,
            invalid_reason: self.invalid_reason,
            velocidad_promedio: self.avg_speed_kmh,
            conexion: self.connection_at_save,
            metodo_guardado: self.save_method,
        }
    }
}
