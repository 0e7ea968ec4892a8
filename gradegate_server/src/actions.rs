use std::sync::Arc;

use crate::error::AppResult;
use crate::models::ActionLogRecord;
use crate::store::ActionLogRepo;

/// Query surface over the append-only action log. Appending happens through
/// the anti-cheat coordinator; this service only reads (and truncates on
/// reset).
pub struct ActionLogService {
    repo: Arc<dyn ActionLogRepo>,
}

impl ActionLogService {
    pub fn new(repo: Arc<dyn ActionLogRepo>) -> Self {
        Self { repo }
    }

    pub async fn all(&self) -> AppResult<Vec<ActionLogRecord>> {
        self.repo.all_desc().await
    }

    pub async fn by_student(&self, student_id: &str) -> AppResult<Vec<ActionLogRecord>> {
        self.repo.by_student(student_id).await
    }

    pub async fn by_ip(&self, ip: &str) -> AppResult<Vec<ActionLogRecord>> {
        self.repo.by_ip(ip).await
    }

    pub async fn by_mac(&self, mac: &str) -> AppResult<Vec<ActionLogRecord>> {
        self.repo.by_mac(mac).await
    }

    pub async fn last_n(&self, n: usize) -> AppResult<Vec<ActionLogRecord>> {
        self.repo.last_n(n).await
    }
}
