//! Narrow repository traits, one per persisted record kind.
//!
//! The grading core only talks to these traits; `mongo` holds the production
//! implementations, `memory` the in-process ones used by tests.

pub mod memory;
pub mod mongo;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{StudentInfo, TestConfig};
use crate::error::AppResult;
use crate::models::{
    ActionLogRecord, AlertLogRecord, AlertType, ScoreboardRecord, StudentNetworkRecord,
    ViolationLogRecord, ViolationType,
};

#[async_trait]
pub trait ScoreboardRepo: Send + Sync {
    async fn bulk_upsert(&self, records: Vec<ScoreboardRecord>) -> AppResult<()>;
    async fn find(&self, student_id: &str) -> AppResult<Option<ScoreboardRecord>>;
    /// All rows, student id ascending.
    async fn all_sorted(&self) -> AppResult<Vec<ScoreboardRecord>>;
    /// Single atomic update of results map, passed count and submit time.
    /// Returns false when no row matched.
    async fn apply_results(
        &self,
        student_id: &str,
        results: BTreeMap<String, bool>,
        passed: usize,
        submitted_at: DateTime<Utc>,
    ) -> AppResult<bool>;
    async fn truncate(&self) -> AppResult<()>;
}

#[async_trait]
pub trait StudentNetworkRepo: Send + Sync {
    async fn upsert(&self, record: StudentNetworkRecord) -> AppResult<()>;
    async fn find(&self, student_id: &str) -> AppResult<Option<StudentNetworkRecord>>;
    /// A record of a different student currently holding this IP.
    async fn find_by_ip_excluding(
        &self,
        ip: &str,
        student_id: &str,
    ) -> AppResult<Option<StudentNetworkRecord>>;
    /// A record of a different student currently holding this MAC.
    async fn find_by_mac_excluding(
        &self,
        mac: &str,
        student_id: &str,
    ) -> AppResult<Option<StudentNetworkRecord>>;
    async fn update(&self, record: &StudentNetworkRecord) -> AppResult<()>;
    async fn truncate(&self) -> AppResult<()>;
}

#[async_trait]
pub trait ViolationLogRepo: Send + Sync {
    /// Inserts and assigns the row id; the incoming id field is ignored.
    async fn insert(&self, record: ViolationLogRecord) -> AppResult<ViolationLogRecord>;
    /// The open (`is_ok = false`) row for this exact tuple, if any.
    async fn find_open(
        &self,
        student_id: &str,
        violation_type: ViolationType,
        message: &str,
    ) -> AppResult<Option<ViolationLogRecord>>;
    async fn refresh(
        &self,
        id: &str,
        time: DateTime<Utc>,
        ip_address: Option<String>,
    ) -> AppResult<()>;
    async fn set_ok(&self, id: &str) -> AppResult<bool>;
    async fn find_by_id(&self, id: &str) -> AppResult<Option<ViolationLogRecord>>;
    async fn by_student(&self, student_id: &str) -> AppResult<Vec<ViolationLogRecord>>;
    /// All rows, newest first.
    async fn all_desc(&self) -> AppResult<Vec<ViolationLogRecord>>;
    async fn delete(&self, id: &str) -> AppResult<bool>;
    async fn truncate(&self) -> AppResult<()>;
}

#[async_trait]
pub trait AlertLogRepo: Send + Sync {
    /// Inserts and assigns the row id; the incoming id field is ignored.
    async fn insert(&self, record: AlertLogRecord) -> AppResult<AlertLogRecord>;
    async fn exists(
        &self,
        student_id: &str,
        alert_type: AlertType,
        source_log_id: &str,
    ) -> AppResult<bool>;
    async fn set_ok(&self, id: &str, is_ok: bool) -> AppResult<bool>;
    async fn find_by_id(&self, id: &str) -> AppResult<Option<AlertLogRecord>>;
    /// All rows, newest first.
    async fn all_desc(&self) -> AppResult<Vec<AlertLogRecord>>;
    async fn delete(&self, id: &str) -> AppResult<bool>;
    async fn truncate(&self) -> AppResult<()>;
}

#[async_trait]
pub trait ActionLogRepo: Send + Sync {
    /// Appends and assigns the row id; the incoming id field is ignored.
    async fn append(&self, record: ActionLogRecord) -> AppResult<ActionLogRecord>;
    /// All rows, newest first.
    async fn all_desc(&self) -> AppResult<Vec<ActionLogRecord>>;
    async fn by_student(&self, student_id: &str) -> AppResult<Vec<ActionLogRecord>>;
    async fn by_ip(&self, ip: &str) -> AppResult<Vec<ActionLogRecord>>;
    async fn by_mac(&self, mac: &str) -> AppResult<Vec<ActionLogRecord>>;
    async fn last_n(&self, n: usize) -> AppResult<Vec<ActionLogRecord>>;
    async fn truncate(&self) -> AppResult<()>;
}

/// Read accessors over the exam configuration plus the save half used by
/// initialization. Blob persistence mechanics stay outside the core, so the
/// shipped implementation is the in-memory one.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn config(&self) -> AppResult<Option<TestConfig>>;
    async fn roster(&self) -> AppResult<Option<Vec<StudentInfo>>>;
    async fn save_config(&self, config: &TestConfig) -> AppResult<()>;
    async fn save_roster(&self, roster: &[StudentInfo]) -> AppResult<()>;
    async fn clear(&self) -> AppResult<()>;
}
