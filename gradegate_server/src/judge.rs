use std::env;
use std::sync::Arc;

use serde::Serialize;

use crate::archive::ArchiveStore;
use crate::config::{resolve_test_cases, ResolvedCase};
use crate::engine::{ExecFile, ExecRequest, ExecutionEngine};
use crate::error::{AppError, AppResult};
use crate::scoreboard::ScoreboardService;
use crate::store::ConfigStore;

const DEFAULT_RUN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RUN_MEMORY_KB: i64 = 102_400;

/// Engine parameters for one exam. Env-overridable at startup.
#[derive(Debug, Clone)]
pub struct JudgeSettings {
    pub language: String,
    pub version: String,
    pub main_file_name: String,
    pub run_timeout_ms: u64,
    pub run_memory_kb: i64,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            language: "python".to_string(),
            version: "3.12.0".to_string(),
            main_file_name: "main.py".to_string(),
            run_timeout_ms: DEFAULT_RUN_TIMEOUT_MS,
            run_memory_kb: DEFAULT_RUN_MEMORY_KB,
        }
    }
}

impl JudgeSettings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(ms) = read_env_number("JUDGE_RUN_TIMEOUT_MS") {
            settings.run_timeout_ms = ms;
        }
        if let Some(kb) = read_env_number("JUDGE_RUN_MEMORY_KB") {
            settings.run_memory_kb = kb as i64;
        }
        if let Ok(language) = env::var("JUDGE_LANGUAGE") {
            settings.language = language;
        }
        if let Ok(version) = env::var("JUDGE_LANGUAGE_VERSION") {
            settings.version = version;
        }
        settings
    }
}

fn read_env_number(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|raw| raw.parse().ok())
}

/// Outcome of one test case: isolated, always recorded, never fatal to the
/// batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseJudgeResult {
    pub case_id: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemJudgeResult {
    pub problem_id: String,
    pub cases: Vec<CaseJudgeResult>,
}

impl ProblemJudgeResult {
    /// Aggregate status: AND over all case successes.
    pub fn passed(&self) -> bool {
        self.cases.iter().all(|c| c.success)
    }
}

/// Unifies line endings and strips trailing whitespace before comparison.
pub fn normalize_output(raw: &str) -> String {
    raw.replace("\r\n", "\n").trim_end().to_string()
}

pub struct JudgeService {
    engine: Arc<dyn ExecutionEngine>,
    archive: Arc<dyn ArchiveStore>,
    config: Arc<dyn ConfigStore>,
    scoreboard: Arc<ScoreboardService>,
    settings: JudgeSettings,
}

impl JudgeService {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        archive: Arc<dyn ArchiveStore>,
        config: Arc<dyn ConfigStore>,
        scoreboard: Arc<ScoreboardService>,
        settings: JudgeSettings,
    ) -> Self {
        Self {
            engine,
            archive,
            config,
            scoreboard,
            settings,
        }
    }

    /// Judges every problem in the student's submission archive, then
    /// reconciles the whole batch into the scoreboard in one update.
    ///
    /// `Ok(None)` means the archive held no entries (no submission). A
    /// student without a scoreboard row was never initialized: `NotFound`.
    pub async fn judge_submission(
        &self,
        student_id: &str,
    ) -> AppResult<Option<Vec<ProblemJudgeResult>>> {
        let entries = self.archive.entries(student_id).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        if self.scoreboard.by_student(student_id).await?.is_none() {
            return Err(AppError::not_found(format!(
                "scoreboard row for {student_id}"
            )));
        }

        let config = self
            .config
            .config()
            .await?
            .ok_or_else(|| AppError::not_found("puzzle config"))?;

        let mut problems = Vec::with_capacity(entries.len());
        for entry in &entries {
            let problem_id = strip_extension(entry);
            let source = self.archive.read_entry(student_id, entry).await?;
            let cases = resolve_test_cases(&config, problem_id);
            tracing::info!(
                "[judge] {}: problem {} over {} cases",
                student_id,
                problem_id,
                cases.len()
            );

            let mut results = Vec::with_capacity(cases.len());
            for case in &cases {
                results.push(self.judge_case(case, &source).await);
            }
            problems.push(ProblemJudgeResult {
                problem_id: problem_id.to_string(),
                cases: results,
            });
        }

        self.scoreboard
            .apply_judge_results(student_id, &problems)
            .await?;
        Ok(Some(problems))
    }

    /// Runs one case. Engine errors, timeouts and non-zero exits degrade to
    /// a failed-but-recorded result so sibling cases keep running.
    async fn judge_case(&self, case: &ResolvedCase, source: &str) -> CaseJudgeResult {
        let request = ExecRequest {
            language: self.settings.language.clone(),
            version: self.settings.version.clone(),
            files: vec![ExecFile {
                name: self.settings.main_file_name.clone(),
                content: source.to_string(),
            }],
            stdin: case.input.clone(),
            args: Vec::new(),
            run_timeout: self.settings.run_timeout_ms,
            run_memory_limit: self.settings.run_memory_kb,
        };

        match self.engine.execute(request).await {
            Ok(response) => {
                let run = response.run;
                let exit_failed = run.code.map_or(false, |code| code != 0);
                let success = match &case.expected_output {
                    Some(expected) => normalize_output(&run.stdout) == normalize_output(expected),
                    None => !exit_failed,
                };
                let message = if exit_failed {
                    let stderr = run.stderr.trim();
                    if stderr.is_empty() {
                        "runtime error".to_string()
                    } else {
                        stderr.to_string()
                    }
                } else {
                    run.stdout
                };
                CaseJudgeResult {
                    case_id: case.case_id.clone(),
                    success,
                    message,
                }
            }
            Err(err) => {
                tracing::warn!("[judge] case {} failed: {}", case.case_id, err);
                CaseJudgeResult {
                    case_id: case.case_id.clone(),
                    success: false,
                    message: err.to_string(),
                }
            }
        }
    }
}

/// Archive entry name minus its extension is the problem id.
fn strip_extension(entry: &str) -> &str {
    match entry.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => entry,
    }
}
