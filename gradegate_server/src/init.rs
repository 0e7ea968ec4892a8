use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{PuzzleConfig, StudentInfo, TestConfig};
use crate::error::AppResult;
use crate::models::ScoreboardRecord;
use crate::network::StudentNetworkService;
use crate::store::{
    ActionLogRepo, AlertLogRepo, ConfigStore, ScoreboardRepo, ViolationLogRepo,
};

/// Builds the all-false results template whose key set every later judge
/// update is pinned to: one `puzzle{P}_status` per puzzle plus one
/// `puzzle{P}-{G}-{T}` leaf per open and hidden case.
pub fn default_results(puzzles: &[PuzzleConfig]) -> BTreeMap<String, bool> {
    let mut results = BTreeMap::new();
    for puzzle in puzzles {
        results.insert(format!("puzzle{}_status", puzzle.id), false);
        for group in &puzzle.test_cases {
            for case in group
                .open_test_cases
                .iter()
                .chain(&group.hidden_test_cases)
            {
                results.insert(format!("puzzle{}-{}", puzzle.id, case.id), false);
            }
        }
    }
    results
}

/// Bulk exam setup and the admin-triggered reset.
pub struct InitService {
    scoreboard: Arc<dyn ScoreboardRepo>,
    actions: Arc<dyn ActionLogRepo>,
    violations: Arc<dyn ViolationLogRepo>,
    alerts: Arc<dyn AlertLogRepo>,
    network: Arc<StudentNetworkService>,
    config: Arc<dyn ConfigStore>,
}

impl InitService {
    pub fn new(
        scoreboard: Arc<dyn ScoreboardRepo>,
        actions: Arc<dyn ActionLogRepo>,
        violations: Arc<dyn ViolationLogRepo>,
        alerts: Arc<dyn AlertLogRepo>,
        network: Arc<StudentNetworkService>,
        config: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            scoreboard,
            actions,
            violations,
            alerts,
            network,
            config,
        }
    }

    /// Creates scoreboard and network rows for every rostered student and
    /// persists the config. Running it again resets values to the template.
    pub async fn initialize(&self, config: TestConfig, roster: Vec<StudentInfo>) -> AppResult<()> {
        tracing::info!(
            "[init] initializing {} students over {} puzzles",
            roster.len(),
            config.puzzles.len()
        );

        let template = default_results(&config.puzzles);
        let records = roster
            .iter()
            .map(|student| ScoreboardRecord {
                student_id: student.student_id.clone(),
                student_name: student.name.clone(),
                puzzle_amount: config.puzzles.len(),
                passed_puzzle_amount: 0,
                last_submit_time: None,
                puzzle_results: template.clone(),
            })
            .collect();
        self.scoreboard.bulk_upsert(records).await?;

        self.config.save_config(&config).await?;
        self.config.save_roster(&roster).await?;
        self.network.initialize_students(&roster).await?;
        Ok(())
    }

    /// Truncates every record store; the only supported reset. Settings
    /// blobs survive unless explicitly cleared.
    pub async fn reset(&self, clear_settings: bool) -> AppResult<()> {
        tracing::warn!("[init] resetting all exam data");
        self.scoreboard.truncate().await?;
        self.actions.truncate().await?;
        self.violations.truncate().await?;
        self.alerts.truncate().await?;
        self.network.truncate().await?;
        if clear_settings {
            self.config.clear().await?;
        }
        Ok(())
    }
}
