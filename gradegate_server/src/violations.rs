use std::sync::Arc;

use chrono::Utc;

use crate::error::AppResult;
use crate::models::{ViolationLogRecord, ViolationType};
use crate::store::ViolationLogRepo;

pub struct ViolationLogService {
    repo: Arc<dyn ViolationLogRepo>,
}

impl ViolationLogService {
    pub fn new(repo: Arc<dyn ViolationLogRepo>) -> Self {
        Self { repo }
    }

    /// Records a violation, deduplicating against the open row for the same
    /// (student, type, message) tuple. Matching is verbatim. A hit refreshes
    /// the row's timestamp and IP in place and reports `was_new = false`.
    pub async fn record_or_refresh(
        &self,
        student_id: &str,
        violation_type: ViolationType,
        message: &str,
        ip_address: Option<String>,
    ) -> AppResult<(ViolationLogRecord, bool)> {
        let now = Utc::now();

        if let Some(mut existing) = self
            .repo
            .find_open(student_id, violation_type, message)
            .await?
        {
            self.repo
                .refresh(&existing.id, now, ip_address.clone())
                .await?;
            existing.time = now;
            existing.ip_address = ip_address;
            return Ok((existing, false));
        }

        let created = self
            .repo
            .insert(ViolationLogRecord {
                id: String::new(),
                student_id: student_id.to_string(),
                time: now,
                ip_address,
                violation_type,
                message: message.to_string(),
                is_ok: false,
            })
            .await?;
        tracing::warn!(
            "[violations] new violation for {}: {}",
            student_id,
            message
        );
        Ok((created, true))
    }

    /// Closes the row's dedup window; an identical later event opens a
    /// fresh row.
    pub async fn acknowledge(&self, id: &str) -> AppResult<bool> {
        self.repo.set_ok(id).await
    }

    pub async fn all(&self) -> AppResult<Vec<ViolationLogRecord>> {
        self.repo.all_desc().await
    }

    pub async fn by_id(&self, id: &str) -> AppResult<Option<ViolationLogRecord>> {
        self.repo.find_by_id(id).await
    }

    pub async fn by_student(&self, student_id: &str) -> AppResult<Vec<ViolationLogRecord>> {
        self.repo.by_student(student_id).await
    }

    pub async fn delete(&self, id: &str) -> AppResult<bool> {
        self.repo.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryViolationLogRepo;

    fn service() -> ViolationLogService {
        ViolationLogService::new(Arc::new(MemoryViolationLogRepo::default()))
    }

    #[tokio::test]
    async fn identical_open_violations_share_one_row() {
        let service = service();

        let (first, was_new) = service
            .record_or_refresh("s1", ViolationType::ForcedQuit, "quit attempt", None)
            .await
            .unwrap();
        assert!(was_new);

        let (second, was_new) = service
            .record_or_refresh(
                "s1",
                ViolationType::ForcedQuit,
                "quit attempt",
                Some("1.2.3.4".to_string()),
            )
            .await
            .unwrap();
        assert!(!was_new);
        assert_eq!(first.id, second.id);

        let rows = service.all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ip_address.as_deref(), Some("1.2.3.4"));
        assert!(rows[0].time >= first.time);
    }

    #[tokio::test]
    async fn different_message_opens_a_second_row() {
        let service = service();
        service
            .record_or_refresh("s1", ViolationType::AlertDerived, "ip conflict", None)
            .await
            .unwrap();
        service
            .record_or_refresh("s1", ViolationType::AlertDerived, "mac conflict", None)
            .await
            .unwrap();
        assert_eq!(service.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn acknowledgement_closes_the_dedup_window() {
        let service = service();
        let (record, _) = service
            .record_or_refresh("s1", ViolationType::ForcedQuit, "quit attempt", None)
            .await
            .unwrap();

        assert!(service.acknowledge(&record.id).await.unwrap());

        let (reopened, was_new) = service
            .record_or_refresh("s1", ViolationType::ForcedQuit, "quit attempt", None)
            .await
            .unwrap();
        assert!(was_new);
        assert_ne!(record.id, reopened.id);
        assert_eq!(service.all().await.unwrap().len(), 2);
    }
}
