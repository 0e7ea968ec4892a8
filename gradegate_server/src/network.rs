use std::collections::HashMap;
use std::sync::Arc;

use rand::RngCore;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::StudentInfo;
use crate::error::{AppError, AppResult};
use crate::models::StudentNetworkRecord;
use crate::store::StudentNetworkRepo;

/// Classification of a bind attempt, in strict priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindClass {
    ConflictIpMac,
    ConflictIp,
    ConflictMac,
    DeviceChanged,
    FirstBind,
    Unchanged,
}

impl BindClass {
    pub fn is_conflict(self) -> bool {
        matches!(
            self,
            Self::ConflictIpMac | Self::ConflictIp | Self::ConflictMac | Self::DeviceChanged
        )
    }
}

/// Verdict handed back to the caller. A conflict is expected data, not an
/// error; nothing here writes a violation record.
#[derive(Debug, Clone, Serialize)]
pub struct BindVerdict {
    pub alert: bool,
    pub class: BindClass,
    pub message: String,
}

impl BindVerdict {
    fn new(class: BindClass, message: impl Into<String>) -> Self {
        Self {
            alert: class.is_conflict(),
            class,
            message: message.into(),
        }
    }
}

/// Outcome of a PSK handout attempt for a known student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PskIssue {
    Issued(String),
    AlreadyIssued,
}

pub struct StudentNetworkService {
    repo: Arc<dyn StudentNetworkRepo>,
    // per-student serialization point for read-then-write binding
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StudentNetworkService {
    pub fn new(repo: Arc<dyn StudentNetworkRepo>) -> Self {
        Self {
            repo,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn student_lock(&self, student_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(student_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fresh rows for a roster: new PSK, cleared binding, disarmed handout.
    pub async fn initialize_students(
        &self,
        roster: &[StudentInfo],
    ) -> AppResult<Vec<StudentNetworkRecord>> {
        let mut records = Vec::with_capacity(roster.len());
        for student in roster {
            let record = StudentNetworkRecord {
                student_id: student.student_id.clone(),
                name: student.name.clone(),
                mac_address: None,
                ip_address: None,
                psk_key: generate_psk(),
                is_key_issued: false,
            };
            self.repo.upsert(record.clone()).await?;
            records.push(record);
        }
        tracing::info!("[network] initialized {} student rows", records.len());
        Ok(records)
    }

    /// Binds a student to a MAC/IP pair, classifying the attempt against
    /// every other binding. Fields transition null to value at most once;
    /// a differing value on a bound field is detected as a conflict, never
    /// applied.
    pub async fn bind(
        &self,
        student_id: &str,
        mac: &str,
        ip: &str,
    ) -> AppResult<(StudentNetworkRecord, BindVerdict)> {
        if student_id.trim().is_empty() {
            return Err(AppError::validation("missing student id"));
        }
        if !is_plausible_mac(mac) {
            return Err(AppError::validation(format!("malformed mac '{mac}'")));
        }
        if ip.trim().is_empty() {
            return Err(AppError::validation("missing ip address"));
        }

        let lock = self.student_lock(student_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .repo
            .find(student_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("network row for {student_id}")))?;

        let ip_owner = self.repo.find_by_ip_excluding(ip, student_id).await?;
        let mac_owner = self.repo.find_by_mac_excluding(mac, student_id).await?;
        let verdict = classify(&record, mac, ip, ip_owner.as_ref(), mac_owner.as_ref());

        let mut changed = false;
        if record.mac_address.is_none() {
            record.mac_address = Some(mac.to_string());
            changed = true;
        }
        if record.ip_address.is_none() {
            record.ip_address = Some(ip.to_string());
            changed = true;
        }
        if changed {
            self.repo.update(&record).await?;
        }
        if verdict.alert {
            tracing::warn!("[network] {}: {}", student_id, verdict.message);
        }

        Ok((record, verdict))
    }

    /// One-shot PSK handout. First successful call returns the secret and
    /// arms the flag; later calls report `AlreadyIssued`.
    pub async fn issue_psk(&self, student_id: &str) -> AppResult<PskIssue> {
        let lock = self.student_lock(student_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .repo
            .find(student_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("network row for {student_id}")))?;

        if record.is_key_issued {
            return Ok(PskIssue::AlreadyIssued);
        }
        record.is_key_issued = true;
        self.repo.update(&record).await?;
        Ok(PskIssue::Issued(record.psk_key))
    }

    /// Admin override for the one-shot flag, re-arming or disarming handout.
    pub async fn set_key_issued(
        &self,
        student_id: &str,
        issued: bool,
    ) -> AppResult<StudentNetworkRecord> {
        let lock = self.student_lock(student_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .repo
            .find(student_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("network row for {student_id}")))?;
        record.is_key_issued = issued;
        self.repo.update(&record).await?;
        Ok(record)
    }

    /// Opens a new binding epoch: clears MAC/IP and disarms the handout
    /// flag, keeping the PSK.
    pub async fn clear_devices(&self, student_id: &str) -> AppResult<StudentNetworkRecord> {
        let lock = self.student_lock(student_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .repo
            .find(student_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("network row for {student_id}")))?;
        record.mac_address = None;
        record.ip_address = None;
        record.is_key_issued = false;
        self.repo.update(&record).await?;
        Ok(record)
    }

    pub async fn by_student(&self, student_id: &str) -> AppResult<Option<StudentNetworkRecord>> {
        self.repo.find(student_id).await
    }

    pub async fn truncate(&self) -> AppResult<()> {
        self.repo.truncate().await
    }
}

fn classify(
    record: &StudentNetworkRecord,
    mac: &str,
    ip: &str,
    ip_owner: Option<&StudentNetworkRecord>,
    mac_owner: Option<&StudentNetworkRecord>,
) -> BindVerdict {
    match (ip_owner, mac_owner) {
        (Some(other), Some(_)) => {
            return BindVerdict::new(
                BindClass::ConflictIpMac,
                format!("mac and ip already used by student {}", other.student_id),
            );
        }
        (Some(other), None) => {
            return BindVerdict::new(
                BindClass::ConflictIp,
                format!("ip already used by student {}", other.student_id),
            );
        }
        (None, Some(other)) => {
            return BindVerdict::new(
                BindClass::ConflictMac,
                format!("mac already used by student {}", other.student_id),
            );
        }
        (None, None) => {}
    }

    let mac_changed = matches!(&record.mac_address, Some(bound) if bound != mac);
    let ip_changed = matches!(&record.ip_address, Some(bound) if bound != ip);
    if mac_changed || ip_changed {
        return BindVerdict::new(
            BindClass::DeviceChanged,
            format!("{} is using another device", record.student_id),
        );
    }

    if record.mac_address.is_none() && record.ip_address.is_none() {
        return BindVerdict::new(BindClass::FirstBind, "device binding recorded");
    }

    // fully or partially bound with matching values
    BindVerdict::new(BindClass::Unchanged, "no alert")
}

/// Six colon- or dash-separated hex octets.
fn is_plausible_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(|c| c == ':' || c == '-').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn generate_psk() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStudentNetworkRepo;

    const MAC_A: &str = "aa:bb:cc:dd:ee:01";
    const MAC_B: &str = "aa:bb:cc:dd:ee:02";
    const IP_A: &str = "1.2.3.4";
    const IP_B: &str = "1.2.3.5";

    fn student(id: &str) -> StudentInfo {
        StudentInfo {
            student_id: id.to_string(),
            name: format!("student {id}"),
        }
    }

    async fn service_with(students: &[&str]) -> StudentNetworkService {
        let service = StudentNetworkService::new(Arc::new(MemoryStudentNetworkRepo::default()));
        let roster: Vec<StudentInfo> = students.iter().map(|id| student(id)).collect();
        service.initialize_students(&roster).await.unwrap();
        service
    }

    #[tokio::test]
    async fn first_bind_then_unchanged() {
        let service = service_with(&["s1"]).await;

        let (record, verdict) = service.bind("s1", MAC_A, IP_A).await.unwrap();
        assert_eq!(verdict.class, BindClass::FirstBind);
        assert!(!verdict.alert);
        assert_eq!(record.mac_address.as_deref(), Some(MAC_A));
        assert_eq!(record.ip_address.as_deref(), Some(IP_A));

        let (_, verdict) = service.bind("s1", MAC_A, IP_A).await.unwrap();
        assert_eq!(verdict.class, BindClass::Unchanged);
    }

    #[tokio::test]
    async fn ip_collision_beats_first_bind() {
        let service = service_with(&["s1", "s2"]).await;
        service.bind("s1", MAC_A, IP_A).await.unwrap();

        let (_, verdict) = service.bind("s2", MAC_B, IP_A).await.unwrap();
        assert_eq!(verdict.class, BindClass::ConflictIp);
        assert!(verdict.alert);
    }

    #[tokio::test]
    async fn ip_and_mac_collision_has_top_priority() {
        let service = service_with(&["s1", "s2", "s3"]).await;
        service.bind("s1", MAC_A, IP_A).await.unwrap();
        service.bind("s2", MAC_B, IP_B).await.unwrap();

        // ip collides with s1, mac with s2
        let (_, verdict) = service.bind("s3", MAC_B, IP_A).await.unwrap();
        assert_eq!(verdict.class, BindClass::ConflictIpMac);
    }

    #[tokio::test]
    async fn device_change_is_detected_not_applied() {
        let service = service_with(&["s1"]).await;
        service.bind("s1", MAC_A, IP_A).await.unwrap();

        let (record, verdict) = service.bind("s1", MAC_B, IP_B).await.unwrap();
        assert_eq!(verdict.class, BindClass::DeviceChanged);
        assert!(verdict.alert);
        // stored binding is sticky
        assert_eq!(record.mac_address.as_deref(), Some(MAC_A));
        assert_eq!(record.ip_address.as_deref(), Some(IP_A));
    }

    #[tokio::test]
    async fn bind_requires_existing_row() {
        let service = service_with(&["s1"]).await;
        let err = service.bind("ghost", MAC_A, IP_A).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn malformed_mac_is_rejected() {
        let service = service_with(&["s1"]).await;
        let err = service.bind("s1", "not-a-mac", IP_A).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn psk_issues_exactly_once() {
        let service = service_with(&["s1"]).await;

        let first = service.issue_psk("s1").await.unwrap();
        let secret = match first {
            PskIssue::Issued(secret) => secret,
            other => panic!("expected Issued, got {other:?}"),
        };
        assert_eq!(secret.len(), 32);

        assert_eq!(service.issue_psk("s1").await.unwrap(), PskIssue::AlreadyIssued);
        assert_eq!(service.issue_psk("s1").await.unwrap(), PskIssue::AlreadyIssued);

        let err = service.issue_psk("ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn rearmed_psk_issues_once_more() {
        let service = service_with(&["s1"]).await;
        service.issue_psk("s1").await.unwrap();
        service.set_key_issued("s1", false).await.unwrap();

        assert!(matches!(
            service.issue_psk("s1").await.unwrap(),
            PskIssue::Issued(_)
        ));
        assert_eq!(service.issue_psk("s1").await.unwrap(), PskIssue::AlreadyIssued);
    }

    #[tokio::test]
    async fn clear_devices_opens_a_new_epoch() {
        let service = service_with(&["s1"]).await;
        service.bind("s1", MAC_A, IP_A).await.unwrap();
        service.clear_devices("s1").await.unwrap();

        let (_, verdict) = service.bind("s1", MAC_B, IP_B).await.unwrap();
        assert_eq!(verdict.class, BindClass::FirstBind);
    }
}
