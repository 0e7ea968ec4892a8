use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::AppResult;
use crate::models::{ActionLogRecord, AlertLogRecord, AlertType};
use crate::notify::{Notification, Notifier};
use crate::scheduler::{CooldownScheduler, Recompute};
use crate::store::{ActionLogRepo, AlertLogRepo};

/// Marker the exam client writes into action details when it is being
/// closed during the test.
pub const FORCED_QUIT_MARKER: &str = "Application On Quit";

pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_millis(120_000);

/// Historical-scan alerting: walks the action log for anomaly patterns and
/// records each finding once per originating log row.
pub struct AlertEngine {
    actions: Arc<dyn ActionLogRepo>,
    alerts: Arc<dyn AlertLogRepo>,
    notifier: Arc<dyn Notifier>,
}

impl AlertEngine {
    pub fn new(
        actions: Arc<dyn ActionLogRepo>,
        alerts: Arc<dyn AlertLogRepo>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            actions,
            alerts,
            notifier,
        }
    }

    /// One full recomputation: scan, dedup-insert, and push the alert list
    /// when anything new surfaced.
    pub async fn run_once(&self) -> AppResult<Vec<AlertLogRecord>> {
        let drafts = self.scan().await?;
        let mut created = Vec::new();
        for draft in drafts {
            if self
                .alerts
                .exists(&draft.student_id, draft.alert_type, &draft.source_log_id)
                .await?
            {
                continue;
            }
            created.push(self.alerts.insert(draft).await?);
        }

        if !created.is_empty() {
            tracing::warn!("[alerts] scan raised {} new alerts", created.len());
            let all = self.alerts.all_desc().await?;
            self.notifier.push(Notification::Alerts(all));
        }
        Ok(created)
    }

    /// Anomaly patterns over the whole action log:
    /// - one IP seen with more than one student id
    /// - one IP presenting more than one MAC
    /// - forced-quit marker in the action details
    async fn scan(&self) -> AppResult<Vec<AlertLogRecord>> {
        let logs = self.actions.all_desc().await?;

        let mut students_by_ip: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        let mut macs_by_ip: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for log in logs.iter().filter(|l| identified(l)) {
            students_by_ip
                .entry(log.ip_address.as_str())
                .or_default()
                .insert(log.student_id.as_str());
            if !log.mac_address.is_empty() {
                macs_by_ip
                    .entry(log.ip_address.as_str())
                    .or_default()
                    .insert(log.mac_address.as_str());
            }
        }

        let mut drafts = Vec::new();
        for log in logs.iter().filter(|l| identified(l)) {
            if let Some(students) = students_by_ip.get(log.ip_address.as_str()) {
                if students.len() > 1 {
                    drafts.push(draft(
                        log,
                        AlertType::MultipleUsersSameIp,
                        format!(
                            "ip {} shared by students: {}",
                            log.ip_address,
                            join(students)
                        ),
                    ));
                }
            }
            if let Some(macs) = macs_by_ip.get(log.ip_address.as_str()) {
                if macs.len() > 1 {
                    drafts.push(draft(
                        log,
                        AlertType::DuplicateIpDevices,
                        format!(
                            "ip {} presented {} different mac addresses",
                            log.ip_address,
                            macs.len()
                        ),
                    ));
                }
            }
            if log.details.contains(FORCED_QUIT_MARKER) {
                drafts.push(draft(
                    log,
                    AlertType::ForcedQuitAttempt,
                    format!("{} tried to close the exam client", log.student_id),
                ));
            }
        }
        Ok(drafts)
    }
}

fn identified(log: &ActionLogRecord) -> bool {
    !log.student_id.is_empty() && log.student_id != "unknown" && !log.ip_address.is_empty()
}

fn draft(log: &ActionLogRecord, alert_type: AlertType, message: String) -> AlertLogRecord {
    AlertLogRecord {
        id: String::new(),
        student_id: log.student_id.clone(),
        alert_type,
        source_log_id: log.id.clone(),
        time: Utc::now(),
        ip: log.ip_address.clone(),
        message,
        is_ok: false,
    }
}

fn join(values: &BTreeSet<&str>) -> String {
    values.iter().copied().collect::<Vec<_>>().join(", ")
}

#[async_trait]
impl Recompute for AlertEngine {
    async fn run(&self) {
        if let Err(err) = self.run_once().await {
            tracing::error!("[alerts] recomputation failed: {}", err);
        }
    }
}

/// Alert surface: cooldown-gated recomputation plus the query and
/// acknowledgement operations.
pub struct AlertLogService {
    repo: Arc<dyn AlertLogRepo>,
    scheduler: CooldownScheduler,
}

impl AlertLogService {
    pub fn new(repo: Arc<dyn AlertLogRepo>, engine: Arc<AlertEngine>, window: Duration) -> Self {
        Self {
            repo,
            scheduler: CooldownScheduler::new(window, engine as Arc<dyn Recompute>),
        }
    }

    /// Requests a recomputation, coalescing with any run already pending in
    /// the current cooldown window, and waits for it.
    pub async fn update_and_check(&self) {
        self.scheduler.trigger().await;
    }

    /// Restarts the cooldown after an out-of-band update, dropping any
    /// scheduled-but-unstarted run.
    pub fn reset_cooldown(&self, start_from_now: bool) {
        self.scheduler.reset(start_from_now);
    }

    pub async fn all(&self) -> AppResult<Vec<AlertLogRecord>> {
        self.repo.all_desc().await
    }

    pub async fn by_id(&self, id: &str) -> AppResult<Option<AlertLogRecord>> {
        self.repo.find_by_id(id).await
    }

    pub async fn set_ok(&self, id: &str, is_ok: bool) -> AppResult<bool> {
        self.repo.set_ok(id, is_ok).await
    }

    pub async fn delete(&self, id: &str) -> AppResult<bool> {
        self.repo.delete(id).await
    }
}
