use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-student persisted scoreboard row.
///
/// `puzzle_results` holds boolean leaves keyed `puzzle{P}_status` and
/// `puzzle{P}-{G}-{T}`. The key set is fixed when the student is initialized
/// from the puzzle config; judge results only flip values of existing keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreboardRecord {
    pub student_id: String,
    pub student_name: String,
    pub puzzle_amount: usize,
    pub passed_puzzle_amount: usize,
    pub last_submit_time: Option<DateTime<Utc>>,
    pub puzzle_results: BTreeMap<String, bool>,
}

/// Sticky network-identity binding plus the one-shot PSK handout state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentNetworkRecord {
    pub student_id: String,
    pub name: String,
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub psk_key: String,
    pub is_key_issued: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    ForcedQuit,
    AlertDerived,
}

/// Confirmed suspicious event, dedup-tracked while open (`is_ok = false`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationLogRecord {
    pub id: String,
    pub student_id: String,
    pub time: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub violation_type: ViolationType,
    pub message: String,
    pub is_ok: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    MultipleUsersSameIp,
    DuplicateIpDevices,
    ForcedQuitAttempt,
}

/// Alert derived from the historical action-log scan. Deduped by
/// (student, type, originating log row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLogRecord {
    pub id: String,
    pub student_id: String,
    pub alert_type: AlertType,
    pub source_log_id: String,
    pub time: DateTime<Utc>,
    pub ip: String,
    pub message: String,
    pub is_ok: bool,
}

/// Append-only raw action log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogRecord {
    pub id: String,
    pub student_id: String,
    pub ip_address: String,
    pub mac_address: String,
    pub action_type: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Incoming client action event, before it is stamped and persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEvent {
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    pub ip_address: String,
    pub mac_address: String,
    pub action_type: String,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct GenericResponse {
    pub status: String,
    pub message: String,
}
