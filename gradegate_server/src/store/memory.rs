//! In-process repository implementations backed by `tokio::sync::RwLock`.
//! Used by the test suite and as a storage-free fallback.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::config::{StudentInfo, TestConfig};
use crate::error::AppResult;
use crate::models::{
    ActionLogRecord, AlertLogRecord, AlertType, ScoreboardRecord, StudentNetworkRecord,
    ViolationLogRecord, ViolationType,
};

use super::{
    ActionLogRepo, AlertLogRepo, ConfigStore, ScoreboardRepo, StudentNetworkRepo, ViolationLogRepo,
};

fn next_id(seq: &AtomicU64) -> String {
    seq.fetch_add(1, Ordering::Relaxed).to_string()
}

#[derive(Default)]
pub struct MemoryScoreboardRepo {
    rows: RwLock<BTreeMap<String, ScoreboardRecord>>,
}

#[async_trait]
impl ScoreboardRepo for MemoryScoreboardRepo {
    async fn bulk_upsert(&self, records: Vec<ScoreboardRecord>) -> AppResult<()> {
        let mut rows = self.rows.write().await;
        for record in records {
            rows.insert(record.student_id.clone(), record);
        }
        Ok(())
    }

    async fn find(&self, student_id: &str) -> AppResult<Option<ScoreboardRecord>> {
        Ok(self.rows.read().await.get(student_id).cloned())
    }

    async fn all_sorted(&self) -> AppResult<Vec<ScoreboardRecord>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn apply_results(
        &self,
        student_id: &str,
        results: BTreeMap<String, bool>,
        passed: usize,
        submitted_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(student_id) {
            Some(row) => {
                row.puzzle_results = results;
                row.passed_puzzle_amount = passed;
                row.last_submit_time = Some(submitted_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn truncate(&self) -> AppResult<()> {
        self.rows.write().await.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStudentNetworkRepo {
    rows: RwLock<BTreeMap<String, StudentNetworkRecord>>,
}

#[async_trait]
impl StudentNetworkRepo for MemoryStudentNetworkRepo {
    async fn upsert(&self, record: StudentNetworkRecord) -> AppResult<()> {
        self.rows
            .write()
            .await
            .insert(record.student_id.clone(), record);
        Ok(())
    }

    async fn find(&self, student_id: &str) -> AppResult<Option<StudentNetworkRecord>> {
        Ok(self.rows.read().await.get(student_id).cloned())
    }

    async fn find_by_ip_excluding(
        &self,
        ip: &str,
        student_id: &str,
    ) -> AppResult<Option<StudentNetworkRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.student_id != student_id && r.ip_address.as_deref() == Some(ip))
            .cloned())
    }

    async fn find_by_mac_excluding(
        &self,
        mac: &str,
        student_id: &str,
    ) -> AppResult<Option<StudentNetworkRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.student_id != student_id && r.mac_address.as_deref() == Some(mac))
            .cloned())
    }

    async fn update(&self, record: &StudentNetworkRecord) -> AppResult<()> {
        self.rows
            .write()
            .await
            .insert(record.student_id.clone(), record.clone());
        Ok(())
    }

    async fn truncate(&self) -> AppResult<()> {
        self.rows.write().await.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryViolationLogRepo {
    rows: RwLock<Vec<ViolationLogRecord>>,
    seq: AtomicU64,
}

#[async_trait]
impl ViolationLogRepo for MemoryViolationLogRepo {
    async fn insert(&self, mut record: ViolationLogRecord) -> AppResult<ViolationLogRecord> {
        record.id = next_id(&self.seq);
        self.rows.write().await.push(record.clone());
        Ok(record)
    }

    async fn find_open(
        &self,
        student_id: &str,
        violation_type: ViolationType,
        message: &str,
    ) -> AppResult<Option<ViolationLogRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .find(|r| {
                !r.is_ok
                    && r.student_id == student_id
                    && r.violation_type == violation_type
                    && r.message == message
            })
            .cloned())
    }

    async fn refresh(
        &self,
        id: &str,
        time: DateTime<Utc>,
        ip_address: Option<String>,
    ) -> AppResult<()> {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
            row.time = time;
            row.ip_address = ip_address;
        }
        Ok(())
    }

    async fn set_ok(&self, id: &str) -> AppResult<bool> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|r| r.id == id) {
            Some(row) => {
                row.is_ok = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<ViolationLogRecord>> {
        Ok(self.rows.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn by_student(&self, student_id: &str) -> AppResult<Vec<ViolationLogRecord>> {
        let mut rows: Vec<_> = self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(rows)
    }

    async fn all_desc(&self) -> AppResult<Vec<ViolationLogRecord>> {
        let mut rows = self.rows.read().await.clone();
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(rows)
    }

    async fn delete(&self, id: &str) -> AppResult<bool> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(rows.len() < before)
    }

    async fn truncate(&self) -> AppResult<()> {
        self.rows.write().await.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAlertLogRepo {
    rows: RwLock<Vec<AlertLogRecord>>,
    seq: AtomicU64,
}

#[async_trait]
impl AlertLogRepo for MemoryAlertLogRepo {
    async fn insert(&self, mut record: AlertLogRecord) -> AppResult<AlertLogRecord> {
        record.id = next_id(&self.seq);
        self.rows.write().await.push(record.clone());
        Ok(record)
    }

    async fn exists(
        &self,
        student_id: &str,
        alert_type: AlertType,
        source_log_id: &str,
    ) -> AppResult<bool> {
        Ok(self.rows.read().await.iter().any(|r| {
            r.student_id == student_id
                && r.alert_type == alert_type
                && r.source_log_id == source_log_id
        }))
    }

    async fn set_ok(&self, id: &str, is_ok: bool) -> AppResult<bool> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|r| r.id == id) {
            Some(row) => {
                row.is_ok = is_ok;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<AlertLogRecord>> {
        Ok(self.rows.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn all_desc(&self) -> AppResult<Vec<AlertLogRecord>> {
        let mut rows = self.rows.read().await.clone();
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(rows)
    }

    async fn delete(&self, id: &str) -> AppResult<bool> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(rows.len() < before)
    }

    async fn truncate(&self) -> AppResult<()> {
        self.rows.write().await.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryActionLogRepo {
    rows: RwLock<Vec<ActionLogRecord>>,
    seq: AtomicU64,
}

impl MemoryActionLogRepo {
    fn newest_first(mut rows: Vec<ActionLogRecord>) -> Vec<ActionLogRecord> {
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows
    }
}

#[async_trait]
impl ActionLogRepo for MemoryActionLogRepo {
    async fn append(&self, mut record: ActionLogRecord) -> AppResult<ActionLogRecord> {
        record.id = next_id(&self.seq);
        self.rows.write().await.push(record.clone());
        Ok(record)
    }

    async fn all_desc(&self) -> AppResult<Vec<ActionLogRecord>> {
        Ok(Self::newest_first(self.rows.read().await.clone()))
    }

    async fn by_student(&self, student_id: &str) -> AppResult<Vec<ActionLogRecord>> {
        let rows = self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(rows))
    }

    async fn by_ip(&self, ip: &str) -> AppResult<Vec<ActionLogRecord>> {
        let rows = self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.ip_address == ip)
            .cloned()
            .collect();
        Ok(Self::newest_first(rows))
    }

    async fn by_mac(&self, mac: &str) -> AppResult<Vec<ActionLogRecord>> {
        let rows = self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.mac_address == mac)
            .cloned()
            .collect();
        Ok(Self::newest_first(rows))
    }

    async fn last_n(&self, n: usize) -> AppResult<Vec<ActionLogRecord>> {
        let mut rows = Self::newest_first(self.rows.read().await.clone());
        rows.truncate(n);
        Ok(rows)
    }

    async fn truncate(&self) -> AppResult<()> {
        self.rows.write().await.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    config: RwLock<Option<TestConfig>>,
    roster: RwLock<Option<Vec<StudentInfo>>>,
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn config(&self) -> AppResult<Option<TestConfig>> {
        Ok(self.config.read().await.clone())
    }

    async fn roster(&self) -> AppResult<Option<Vec<StudentInfo>>> {
        Ok(self.roster.read().await.clone())
    }

    async fn save_config(&self, config: &TestConfig) -> AppResult<()> {
        *self.config.write().await = Some(config.clone());
        Ok(())
    }

    async fn save_roster(&self, roster: &[StudentInfo]) -> AppResult<()> {
        *self.roster.write().await = Some(roster.to_vec());
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        *self.config.write().await = None;
        *self.roster.write().await = None;
        Ok(())
    }
}
