use std::sync::Arc;

use chrono::Utc;

use crate::alerts::FORCED_QUIT_MARKER;
use crate::error::AppResult;
use crate::models::{ActionEvent, ActionLogRecord, ViolationLogRecord, ViolationType};
use crate::network::{BindVerdict, StudentNetworkService};
use crate::notify::{Notification, Notifier};
use crate::store::ActionLogRepo;
use crate::violations::ViolationLogService;

/// What one handled action produced. `verdict` is absent when detection was
/// skipped for an unidentified actor.
#[derive(Debug)]
pub struct AntiCheatOutcome {
    pub verdict: Option<BindVerdict>,
    pub violation: Option<ViolationLogRecord>,
}

/// Orchestrates the per-event anti-cheat pipeline: persist the raw action,
/// run the network conflict detector, check behavioral markers, and record
/// deduplicated violations.
pub struct AntiCheatService {
    actions: Arc<dyn ActionLogRepo>,
    network: Arc<StudentNetworkService>,
    violations: Arc<ViolationLogService>,
    notifier: Arc<dyn Notifier>,
}

impl AntiCheatService {
    pub fn new(
        actions: Arc<dyn ActionLogRepo>,
        network: Arc<StudentNetworkService>,
        violations: Arc<ViolationLogService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            actions,
            network,
            violations,
            notifier,
        }
    }

    pub async fn handle(&self, event: ActionEvent) -> AppResult<AntiCheatOutcome> {
        self.actions
            .append(ActionLogRecord {
                id: String::new(),
                student_id: event.student_id.clone(),
                ip_address: event.ip_address.clone(),
                mac_address: event.mac_address.clone(),
                action_type: event.action_type.clone(),
                details: event.details.clone(),
                timestamp: Utc::now(),
            })
            .await?;

        // unidentified actors are logged but not investigated
        if event.student_id.is_empty() || event.student_id == "unknown" {
            return Ok(AntiCheatOutcome {
                verdict: None,
                violation: None,
            });
        }

        let (_, verdict) = self
            .network
            .bind(&event.student_id, &event.mac_address, &event.ip_address)
            .await?;

        let forced_quit = event.details.contains(FORCED_QUIT_MARKER);
        let cheating = verdict.alert || forced_quit;

        let mut violation = None;
        if cheating {
            // the behavioral marker outranks the network verdict
            let (violation_type, message) = if forced_quit {
                (ViolationType::ForcedQuit, event.details.as_str())
            } else {
                (ViolationType::AlertDerived, verdict.message.as_str())
            };
            let (record, _was_new) = self
                .violations
                .record_or_refresh(
                    &event.student_id,
                    violation_type,
                    message,
                    Some(event.ip_address.clone()),
                )
                .await?;
            violation = Some(record);

            let all = self.violations.all().await?;
            self.notifier.push(Notification::Violations(all));
        }

        Ok(AntiCheatOutcome {
            verdict: Some(verdict),
            violation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StudentInfo;
    use crate::notify::RecordingNotifier;
    use crate::store::memory::{
        MemoryActionLogRepo, MemoryStudentNetworkRepo, MemoryViolationLogRepo,
    };
    use crate::store::{StudentNetworkRepo, ViolationLogRepo};

    const MAC_A: &str = "aa:bb:cc:dd:ee:01";
    const MAC_B: &str = "aa:bb:cc:dd:ee:02";

    struct Fixture {
        actions: Arc<MemoryActionLogRepo>,
        notifier: Arc<RecordingNotifier>,
        service: AntiCheatService,
    }

    async fn fixture(students: &[&str]) -> Fixture {
        let actions = Arc::new(MemoryActionLogRepo::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let network = Arc::new(StudentNetworkService::new(
            Arc::new(MemoryStudentNetworkRepo::default()) as Arc<dyn StudentNetworkRepo>,
        ));
        let roster: Vec<StudentInfo> = students
            .iter()
            .map(|id| StudentInfo {
                student_id: id.to_string(),
                name: id.to_string(),
            })
            .collect();
        network.initialize_students(&roster).await.unwrap();
        let violations = Arc::new(ViolationLogService::new(
            Arc::new(MemoryViolationLogRepo::default()) as Arc<dyn ViolationLogRepo>,
        ));
        let service = AntiCheatService::new(
            Arc::clone(&actions) as Arc<dyn ActionLogRepo>,
            network,
            violations,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        );
        Fixture {
            actions,
            notifier,
            service,
        }
    }

    fn event(student: &str, mac: &str, ip: &str, details: &str) -> ActionEvent {
        ActionEvent {
            student_id: student.to_string(),
            student_name: None,
            ip_address: ip.to_string(),
            mac_address: mac.to_string(),
            action_type: "heartbeat".to_string(),
            details: details.to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_actor_is_logged_but_not_investigated() {
        let fx = fixture(&["s1"]).await;

        let outcome = fx
            .service
            .handle(event("unknown", "zz", "9.9.9.9", "Application On Quit"))
            .await
            .unwrap();

        assert!(outcome.verdict.is_none());
        assert!(outcome.violation.is_none());
        assert_eq!(fx.actions.all_desc().await.unwrap().len(), 1);
        assert!(fx.notifier.is_empty());
    }

    #[tokio::test]
    async fn clean_event_raises_no_violation() {
        let fx = fixture(&["s1"]).await;

        let outcome = fx
            .service
            .handle(event("s1", MAC_A, "1.2.3.4", "window focus"))
            .await
            .unwrap();

        assert!(!outcome.verdict.unwrap().alert);
        assert!(outcome.violation.is_none());
        assert!(fx.notifier.is_empty());
    }

    #[tokio::test]
    async fn network_conflict_becomes_an_alert_derived_violation() {
        let fx = fixture(&["s1", "s2"]).await;
        fx.service
            .handle(event("s1", MAC_A, "1.2.3.4", "login"))
            .await
            .unwrap();

        let outcome = fx
            .service
            .handle(event("s2", MAC_B, "1.2.3.4", "login"))
            .await
            .unwrap();

        let violation = outcome.violation.unwrap();
        assert_eq!(violation.violation_type, ViolationType::AlertDerived);
        assert_eq!(violation.student_id, "s2");
        assert_eq!(fx.notifier.len(), 1);
    }

    #[tokio::test]
    async fn forced_quit_marker_outranks_the_network_verdict() {
        let fx = fixture(&["s1", "s2"]).await;
        fx.service
            .handle(event("s1", MAC_A, "1.2.3.4", "login"))
            .await
            .unwrap();

        // conflicting ip AND quit marker: the marker decides the type
        let outcome = fx
            .service
            .handle(event("s2", MAC_B, "1.2.3.4", "Application On Quit: alt-f4"))
            .await
            .unwrap();

        let violation = outcome.violation.unwrap();
        assert_eq!(violation.violation_type, ViolationType::ForcedQuit);
        assert!(violation.message.contains("Application On Quit"));
    }

    #[tokio::test]
    async fn repeated_event_refreshes_instead_of_duplicating() {
        let fx = fixture(&["s1"]).await;
        let quit = event("s1", MAC_A, "1.2.3.4", "Application On Quit");

        let first = fx.service.handle(quit.clone()).await.unwrap();
        let second = fx.service.handle(quit).await.unwrap();

        assert_eq!(
            first.violation.unwrap().id,
            second.violation.unwrap().id
        );
        // both pushes carried the full (single-row) violation list
        assert_eq!(fx.notifier.len(), 2);
    }
}
