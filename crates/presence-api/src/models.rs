//! Request and response bodies for the attendance REST API.

use chrono::NaiveDate;
use presence_core::types::deserialize_id;
use presence_core::{Identity, Role};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error body returned by the server on any non-2xx response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(alias = "token")]
    pub access_token: String,
    pub user: Identity,
    #[serde(default)]
    pub message: Option<String>,
}

/// Signup may or may not log the new user in straight away.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "token")]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user: Option<Identity>,
}

/// `/auth/me` answers either `{ "user": {...} }` or the bare user object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum MeBody {
    Wrapped { user: Identity },
    Bare(Identity),
}

impl From<MeBody> for Identity {
    fn from(body: MeBody) -> Self {
        match body {
            MeBody::Wrapped { user } => user,
            MeBody::Bare(user) => user,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceRegisterRequest {
    pub user_id: String,
    /// `data:image/jpeg;base64,...`
    pub image_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceRegisterResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub face_encodings_count: u32,
    #[serde(default)]
    pub saved_encodings_count: u32,
    #[serde(default)]
    pub temp_encodings_count: u32,
    #[serde(default)]
    pub registration_complete: bool,
    #[serde(default)]
    pub remaining_images: u32,
    #[serde(default)]
    pub progress: f32,
    #[serde(default, deserialize_with = "optional_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRegisterRequest {
    pub user_id: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRegisterResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub registered_images: u32,
    #[serde(default)]
    pub total_encodings: u32,
    #[serde(default, deserialize_with = "optional_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecognizeRequest {
    pub image_data: String,
}

/// The part of a user the recognition endpoint echoes back.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognizedUser {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
}

impl From<RecognizedUser> for Identity {
    fn from(user: RecognizedUser) -> Self {
        Identity {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            is_active: true,
            is_face_registered: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizeResponse {
    pub recognized: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user: Option<RecognizedUser>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub already_logged: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub attendance_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationStatus {
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub face_encodings_count: u32,
    #[serde(default)]
    pub saved_encodings_count: u32,
    #[serde(default)]
    pub temp_encodings_count: u32,
    #[serde(default)]
    pub registration_complete: bool,
    #[serde(default)]
    pub has_face_encoding: bool,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub remaining_images: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            other => Err(format!("unknown status '{other}' (expected present, absent or late)")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    pub date: NaiveDate,
    /// Time of day as sent by the server (`HH:MM:SS[.ffffff]`).
    pub time: String,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogAttendanceRequest {
    pub user_id: String,
    pub status: AttendanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogAttendanceResponse {
    #[serde(default)]
    pub message: String,
    pub attendance: AttendanceRecord,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AttendanceList {
    pub attendance: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TodayAttendance {
    pub attendance: Vec<AttendanceRecord>,
    pub date: NaiveDate,
    #[serde(default)]
    pub total_present: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsQuery {
    pub days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Default for StatsQuery {
    fn default() -> Self {
        Self {
            days: 30,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsCounts {
    pub present_days: u32,
    #[serde(default)]
    pub absent_days: u32,
    /// Percentage in `[0, 100]`.
    #[serde(default)]
    pub attendance_rate: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceStats {
    pub period: StatsPeriod,
    pub stats: StatsCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub active_only: bool,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            role: None,
            active_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserList {
    pub users: Vec<Identity>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserBody {
    pub user: Identity,
}

/// Fields left as `None` are not sent and stay unchanged on the server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.role.is_none() && self.is_active.is_none()
    }
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_id")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(id)| id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_accepts_token_alias() {
        let json = r#"{"token":"t","user":{"id":1,"name":"An","role":"student"}}"#;
        let body: AuthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.access_token, "t");
        assert_eq!(body.user.id, "1");
    }

    #[test]
    fn test_me_body_shapes() {
        let wrapped = r#"{"user":{"id":"a","name":"An","role":"teacher"}}"#;
        let bare = r#"{"id":"a","name":"An","role":"teacher"}"#;
        let a: Identity = serde_json::from_str::<MeBody>(wrapped).unwrap().into();
        let b: Identity = serde_json::from_str::<MeBody>(bare).unwrap().into();
        assert_eq!(a, b);
    }

    #[test]
    fn test_attendance_record() {
        let json = r#"{
            "id": 7, "user_id": 3, "user_name": "Binh",
            "date": "2025-03-14", "time": "08:01:22.512000",
            "status": "late", "confidence": 0.82,
            "created_at": "2025-03-14T08:01:22.512000"
        }"#;
        let record: AttendanceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "7");
        assert_eq!(record.status, AttendanceStatus::Late);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
    }

    #[test]
    fn test_recognize_unrecognized() {
        let json = r#"{"recognized":false,"message":"Face not recognized","code":"NO_MATCH"}"#;
        let body: RecognizeResponse = serde_json::from_str(json).unwrap();
        assert!(!body.recognized);
        assert!(body.user.is_none());
        assert_eq!(body.attendance_id, None);
    }

    #[test]
    fn test_queries_skip_unset_fields() {
        let q = serde_json::to_value(HistoryQuery::default()).unwrap();
        assert_eq!(q, serde_json::json!({}));

        let update = UserUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({ "is_active": false })
        );
        assert!(UserUpdate::default().is_empty());
    }

    #[test]
    fn test_log_request_defaults_to_present() {
        let req = LogAttendanceRequest {
            user_id: "9".into(),
            status: AttendanceStatus::default(),
            confidence: None,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({ "user_id": "9", "status": "present" })
        );
    }
}
