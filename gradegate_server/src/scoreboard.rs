use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{AppError, AppResult};
use crate::judge::ProblemJudgeResult;
use crate::models::ScoreboardRecord;
use crate::notify::{Notification, Notifier};
use crate::store::ScoreboardRepo;

/// Merges judge results into a baseline results map.
///
/// Only keys already present in the baseline are overwritten; anything else
/// in the incoming results is dropped. This pins the key schema fixed at
/// student initialization and keeps malformed or stale judge output from
/// injecting rows into persisted state.
pub fn reconcile(
    baseline: &BTreeMap<String, bool>,
    results: &[ProblemJudgeResult],
) -> BTreeMap<String, bool> {
    let mut merged = baseline.clone();
    for problem in results {
        let status_key = format!("puzzle{}_status", problem.problem_id);
        if let Some(slot) = merged.get_mut(&status_key) {
            *slot = problem.passed();
        }
        for case in &problem.cases {
            let case_key = format!("puzzle{}-{}", problem.problem_id, case.case_id);
            if let Some(slot) = merged.get_mut(&case_key) {
                *slot = case.success;
            }
        }
    }
    merged
}

/// Number of puzzles whose aggregate status leaf is true.
pub fn passed_count(results: &BTreeMap<String, bool>) -> usize {
    results
        .iter()
        .filter(|(key, passed)| key.ends_with("_status") && **passed)
        .count()
}

pub struct ScoreboardService {
    repo: Arc<dyn ScoreboardRepo>,
    notifier: Arc<dyn Notifier>,
}

impl ScoreboardService {
    pub fn new(repo: Arc<dyn ScoreboardRepo>, notifier: Arc<dyn Notifier>) -> Self {
        Self { repo, notifier }
    }

    pub async fn by_student(&self, student_id: &str) -> AppResult<Option<ScoreboardRecord>> {
        self.repo.find(student_id).await
    }

    pub async fn all(&self) -> AppResult<Vec<ScoreboardRecord>> {
        self.repo.all_sorted().await
    }

    /// Reconciles a finished judging batch into the student's row as one
    /// atomic update, then pushes the full scoreboard snapshot.
    pub async fn apply_judge_results(
        &self,
        student_id: &str,
        results: &[ProblemJudgeResult],
    ) -> AppResult<ScoreboardRecord> {
        let baseline = self
            .repo
            .find(student_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("scoreboard row for {student_id}")))?;

        let merged = reconcile(&baseline.puzzle_results, results);
        let passed = passed_count(&merged);
        let submitted_at = Utc::now();

        if !self
            .repo
            .apply_results(student_id, merged, passed, submitted_at)
            .await?
        {
            return Err(AppError::not_found(format!(
                "scoreboard row for {student_id}"
            )));
        }
        tracing::info!(
            "[scoreboard] updated {} ({} puzzles passed)",
            student_id,
            passed
        );

        let snapshot = self.repo.all_sorted().await?;
        self.notifier.push(Notification::ScoreboardUpdated(snapshot));

        self.repo
            .find(student_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("scoreboard row for {student_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CaseJudgeResult;

    fn baseline() -> BTreeMap<String, bool> {
        BTreeMap::from([
            ("puzzle1_status".to_string(), false),
            ("puzzle1-1-1".to_string(), false),
            ("puzzle1-1-2".to_string(), false),
            ("puzzle2_status".to_string(), true),
            ("puzzle2-1-1".to_string(), true),
        ])
    }

    fn case(id: &str, success: bool) -> CaseJudgeResult {
        CaseJudgeResult {
            case_id: id.to_string(),
            success,
            message: String::new(),
        }
    }

    #[test]
    fn key_set_is_preserved_exactly() {
        let base = baseline();
        let results = vec![ProblemJudgeResult {
            problem_id: "1".to_string(),
            cases: vec![case("1-1", true), case("1-2", true), case("9-9", true)],
        }];
        let merged = reconcile(&base, &results);
        let base_keys: Vec<&String> = base.keys().collect();
        let merged_keys: Vec<&String> = merged.keys().collect();
        assert_eq!(base_keys, merged_keys);
        assert_eq!(merged["puzzle1-1-1"], true);
        assert_eq!(merged["puzzle1-1-2"], true);
        assert_eq!(merged["puzzle1_status"], true);
    }

    #[test]
    fn unknown_problem_results_are_ignored() {
        let base = baseline();
        let results = vec![ProblemJudgeResult {
            problem_id: "7".to_string(),
            cases: vec![case("1-1", true)],
        }];
        assert_eq!(reconcile(&base, &results), base);
    }

    #[test]
    fn status_is_and_of_case_successes() {
        let results = vec![ProblemJudgeResult {
            problem_id: "1".to_string(),
            cases: vec![case("1-1", true), case("1-2", false)],
        }];
        let merged = reconcile(&baseline(), &results);
        assert_eq!(merged["puzzle1_status"], false);
        assert_eq!(merged["puzzle1-1-1"], true);
        assert_eq!(merged["puzzle1-1-2"], false);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let results = vec![ProblemJudgeResult {
            problem_id: "1".to_string(),
            cases: vec![case("1-1", true), case("1-2", false)],
        }];
        let once = reconcile(&baseline(), &results);
        let twice = reconcile(&once, &results);
        assert_eq!(once, twice);
    }

    #[test]
    fn passed_count_only_counts_status_leaves() {
        let mut map = baseline();
        map.insert("puzzle1_status".to_string(), true);
        // puzzle2_status already true, leaves should not contribute
        assert_eq!(passed_count(&map), 2);
    }
}
