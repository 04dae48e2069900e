//! Wire contract for delivering finished activities to the remote store.
//!
//! This crate is shared by the engine and anything that talks to the
//! `saveActivity` endpoint, so the JSON body cannot drift between the two.
//! The server stays the authority on acceptance; clients reuse
//! [`SaveActivityRequest::validate`] to avoid sending bodies it would reject
//! with a 400.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SAVE_ACTIVITY_PATH: &str = "/saveActivity";
pub const MAX_ID_LEN: usize = 128;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Connectivity observed when the activity was saved on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Wifi,
    Cellular,
    Offline,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Wifi => "wifi",
            ConnectionKind::Cellular => "cellular",
            ConnectionKind::Offline => "offline",
        }
    }
}

/// How the record reached the server: straight away, or queued while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMethod {
    Online,
    OfflineThenSynced,
}

impl SaveMethod {
    pub fn for_connection(connection: ConnectionKind) -> Self {
        match connection {
            ConnectionKind::Offline => SaveMethod::OfflineThenSynced,
            ConnectionKind::Wifi | ConnectionKind::Cellular => SaveMethod::Online,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SaveMethod::Online => "online",
            SaveMethod::OfflineThenSynced => "offline_then_synced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Pendiente,
    Valida,
    Invalida,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Pendiente => "pendiente",
            ActivityStatus::Valida => "valida",
            ActivityStatus::Invalida => "invalida",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Vehicle,
    TooShort,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::Vehicle => "vehicle",
            InvalidReason::TooShort => "too_short",
        }
    }
}

/// Body of `POST /saveActivity`.
///
/// Field names are the server's; `id` is the client-generated idempotency
/// key so the store can drop a write it has already accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveActivityRequest {
    pub id: String,
    pub user_id: String,
    pub date: DateTime<Utc>,
    /// Kilometres.
    pub distance: f64,
    /// Whole seconds.
    pub duration: u64,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<InvalidReason>,
    /// Average speed in km/h.
    pub velocidad_promedio: f64,
    pub conexion: ConnectionKind,
    pub metodo_guardado: SaveMethod,
}

impl SaveActivityRequest {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_string(&self.id, "id")?;
        if self.id.len() > MAX_ID_LEN {
            return Err(ErrorInfo::new(
                "invalid_id",
                format!("id must be {} characters or fewer", MAX_ID_LEN),
            ));
        }
        require_string(&self.user_id, "userId")?;
        require_non_negative(self.distance, "distance")?;
        require_non_negative(self.velocidad_promedio, "velocidadPromedio")?;

        match (self.status, self.invalid_reason) {
            (ActivityStatus::Invalida, None) => Err(ErrorInfo::new(
                "missing_field",
                "invalidReason is required when status is invalida",
            )),
            (ActivityStatus::Valida | ActivityStatus::Pendiente, Some(_)) => Err(ErrorInfo::new(
                "unexpected_field",
                "invalidReason is only allowed when status is invalida",
            )),
            _ => Ok(()),
        }
    }
}

pub fn parse_request(body: &str) -> Result<SaveActivityRequest, ErrorInfo> {
    let request: SaveActivityRequest = serde_json::from_str(body).map_err(|err| {
        ErrorInfo::new(
            "invalid_body",
            format!("saveActivity body is invalid JSON: {}", err),
        )
    })?;
    request.validate()?;
    Ok(request)
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn require_non_negative(value: f64, field: &str) -> Result<(), ErrorInfo> {
    if !value.is_finite() || value < 0.0 {
        return Err(ErrorInfo::new(
            "invalid_number",
            format!("{} must be a finite, non-negative number", field),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_request() -> SaveActivityRequest {
        SaveActivityRequest {
            id: "01J9Z3Q7W5K8M2N4P6R8T0V2X4".to_string(),
            user_id: "user-1".to_string(),
            date: Utc.with_ymd_and_hms(2026, 3, 14, 7, 30, 0).unwrap(),
            distance: 2.0,
            duration: 1800,
            status: ActivityStatus::Valida,
            invalid_reason: None,
            velocidad_promedio: 4.0,
            conexion: ConnectionKind::Wifi,
            metodo_guardado: SaveMethod::Online,
        }
    }

    #[test]
    fn validates_complete_request() {
        assert!(base_request().validate().is_ok());
    }

    #[test]
    fn rejects_missing_user_id() {
        let mut request = base_request();
        request.user_id = "  ".to_string();
        let err = request.validate().unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn rejects_missing_id() {
        let mut request = base_request();
        request.id = String::new();
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_distance() {
        let mut request = base_request();
        request.distance = f64::NAN;
        assert!(request.validate().is_err());
    }

    #[test]
    fn invalida_requires_reason() {
        let mut request = base_request();
        request.status = ActivityStatus::Invalida;
        assert!(request.validate().is_err());
        request.invalid_reason = Some(InvalidReason::Vehicle);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn serializes_server_field_names() {
        let mut request = base_request();
        request.status = ActivityStatus::Invalida;
        request.invalid_reason = Some(InvalidReason::TooShort);
        request.conexion = ConnectionKind::Offline;
        request.metodo_guardado = SaveMethod::OfflineThenSynced;

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["velocidadPromedio"], 4.0);
        assert_eq!(value["invalidReason"], "too_short");
        assert_eq!(value["conexion"], "offline");
        assert_eq!(value["metodoGuardado"], "offline_then_synced");
        assert_eq!(value["status"], "invalida");
        assert_eq!(value["duration"], 1800);
        assert_eq!(value["date"], "2026-03-14T07:30:00Z");
    }

    #[test]
    fn omits_reason_when_valid() {
        let value = serde_json::to_value(base_request()).unwrap();
        assert!(value.get("invalidReason").is_none());
    }

    #[test]
    fn parse_request_rejects_garbage() {
        let err = parse_request("{not json").unwrap_err();
        assert_eq!(err.code, "invalid_body");
    }

    #[test]
    fn save_method_follows_connection() {
        assert_eq!(
            SaveMethod::for_connection(ConnectionKind::Offline),
            SaveMethod::OfflineThenSynced
        );
        assert_eq!(
            SaveMethod::for_connection(ConnectionKind::Cellular),
            SaveMethod::Online
        );
    }
}
