//! End-to-end judging pipeline over in-memory collaborators: archive in,
//! scripted engine runs, reconciled scoreboard out.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use gradegate_server::archive::{ArchiveStore, MemoryArchiveStore};
use gradegate_server::config::{PuzzleConfig, StudentInfo, TestCaseSpec, TestConfig, TestGroup};
use gradegate_server::engine::{ExecRequest, ExecResponse, ExecutionEngine, RunOutput};
use gradegate_server::error::{AppError, AppResult};
use gradegate_server::init::InitService;
use gradegate_server::judge::{JudgeService, JudgeSettings};
use gradegate_server::network::StudentNetworkService;
use gradegate_server::notify::{Notification, Notifier, RecordingNotifier};
use gradegate_server::scoreboard::ScoreboardService;
use gradegate_server::store::memory::{
    MemoryActionLogRepo, MemoryAlertLogRepo, MemoryConfigStore, MemoryScoreboardRepo,
    MemoryStudentNetworkRepo, MemoryViolationLogRepo,
};
use gradegate_server::store::{ConfigStore, ScoreboardRepo, StudentNetworkRepo};

/// Engine double scripted per stdin value.
enum Script {
    Respond {
        stdout: &'static str,
        stderr: &'static str,
        code: Option<i32>,
    },
    Fail(&'static str),
}

#[derive(Default)]
struct ScriptedEngine {
    by_stdin: HashMap<String, Script>,
}

impl ScriptedEngine {
    fn respond(mut self, stdin: &str, stdout: &'static str, code: i32) -> Self {
        self.by_stdin.insert(
            stdin.to_string(),
            Script::Respond {
                stdout,
                stderr: "",
                code: Some(code),
            },
        );
        self
    }

    fn crash(mut self, stdin: &str, stderr: &'static str, code: i32) -> Self {
        self.by_stdin.insert(
            stdin.to_string(),
            Script::Respond {
                stdout: "",
                stderr,
                code: Some(code),
            },
        );
        self
    }

    fn fail(mut self, stdin: &str, reason: &'static str) -> Self {
        self.by_stdin.insert(stdin.to_string(), Script::Fail(reason));
        self
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn execute(&self, request: ExecRequest) -> AppResult<ExecResponse> {
        match self.by_stdin.get(&request.stdin) {
            Some(Script::Respond {
                stdout,
                stderr,
                code,
            }) => Ok(ExecResponse {
                run: RunOutput {
                    stdout: (*stdout).to_string(),
                    stderr: (*stderr).to_string(),
                    code: *code,
                },
            }),
            Some(Script::Fail(reason)) => Err(AppError::Execution((*reason).to_string())),
            None => panic!("unscripted stdin: {:?}", request.stdin),
        }
    }
}

struct Fixture {
    scoreboard_repo: Arc<MemoryScoreboardRepo>,
    archive: Arc<MemoryArchiveStore>,
    notifier: Arc<RecordingNotifier>,
    judge: JudgeService,
}

async fn fixture(config: TestConfig, students: &[&str], engine: ScriptedEngine) -> Fixture {
    let scoreboard_repo = Arc::new(MemoryScoreboardRepo::default());
    let config_store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let archive = Arc::new(MemoryArchiveStore::default());

    let scoreboard = Arc::new(ScoreboardService::new(
        Arc::clone(&scoreboard_repo) as Arc<dyn ScoreboardRepo>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    ));

    let network = Arc::new(StudentNetworkService::new(
        Arc::new(MemoryStudentNetworkRepo::default()) as Arc<dyn StudentNetworkRepo>,
    ));
    let init = InitService::new(
        Arc::clone(&scoreboard_repo) as Arc<dyn ScoreboardRepo>,
        Arc::new(MemoryActionLogRepo::default()),
        Arc::new(MemoryViolationLogRepo::default()),
        Arc::new(MemoryAlertLogRepo::default()),
        network,
        Arc::clone(&config_store),
    );
    let roster: Vec<StudentInfo> = students
        .iter()
        .map(|id| StudentInfo {
            student_id: id.to_string(),
            name: id.to_string(),
        })
        .collect();
    init.initialize(config, roster).await.unwrap();

    let judge = JudgeService::new(
        Arc::new(engine),
        Arc::clone(&archive) as Arc<dyn ArchiveStore>,
        config_store,
        scoreboard,
        JudgeSettings::default(),
    );

    Fixture {
        scoreboard_repo,
        archive,
        notifier,
        judge,
    }
}

fn case(id: &str, input: &str, output: Option<&str>) -> TestCaseSpec {
    TestCaseSpec {
        id: id.to_string(),
        input: input.to_string(),
        output: output.map(str::to_string),
    }
}

fn single_case_config(expected: Option<&str>) -> TestConfig {
    TestConfig {
        test_title: "final".to_string(),
        description: String::new(),
        max_execution_time: None,
        test_time: None,
        puzzles: vec![PuzzleConfig {
            id: "1".to_string(),
            name: "answer".to_string(),
            language: "python".to_string(),
            test_cases: vec![TestGroup {
                title: String::new(),
                id: 1,
                open_test_cases: vec![case("1-1", "", expected)],
                hidden_test_cases: vec![],
            }],
        }],
    }
}

#[tokio::test]
async fn judged_submission_flows_into_the_scoreboard() {
    let engine = ScriptedEngine::default().respond("", "42\n", 0);
    let fx = fixture(single_case_config(Some("42")), &["s1"], engine).await;
    fx.archive.put("s1", "1.py", "print(42)").await;

    let results = fx.judge.judge_submission("s1").await.unwrap().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].passed());

    let row = fx.scoreboard_repo.find("s1").await.unwrap().unwrap();
    assert_eq!(row.puzzle_results["puzzle1-1-1"], true);
    assert_eq!(row.puzzle_results["puzzle1_status"], true);
    assert_eq!(row.passed_puzzle_amount, 1);
    assert!(row.last_submit_time.is_some());

    let pushed = fx.notifier.take();
    assert!(pushed
        .iter()
        .any(|n| matches!(n, Notification::ScoreboardUpdated(_))));
}

#[tokio::test]
async fn without_expected_output_only_the_exit_code_counts() {
    let config = TestConfig {
        puzzles: vec![PuzzleConfig {
            id: "1".to_string(),
            name: "runner".to_string(),
            language: "python".to_string(),
            test_cases: vec![TestGroup {
                title: String::new(),
                id: 1,
                open_test_cases: vec![case("1-1", "a", None), case("1-2", "b", None)],
                hidden_test_cases: vec![],
            }],
        }],
        ..single_case_config(None)
    };
    let engine = ScriptedEngine::default()
        .respond("a", "anything at all", 0)
        .crash("b", "Traceback: boom", 1);
    let fx = fixture(config, &["s1"], engine).await;
    fx.archive.put("s1", "1.py", "print(input())").await;

    let results = fx.judge.judge_submission("s1").await.unwrap().unwrap();
    let cases = &results[0].cases;
    assert!(cases[0].success);
    assert!(!cases[1].success);
    assert_eq!(cases[1].message, "Traceback: boom");

    let row = fx.scoreboard_repo.find("s1").await.unwrap().unwrap();
    assert_eq!(row.puzzle_results["puzzle1-1-1"], true);
    assert_eq!(row.puzzle_results["puzzle1-1-2"], false);
    assert_eq!(row.puzzle_results["puzzle1_status"], false);
    assert_eq!(row.passed_puzzle_amount, 0);
}

#[tokio::test]
async fn engine_failures_stay_isolated_per_case() {
    let config = TestConfig {
        puzzles: vec![PuzzleConfig {
            id: "1".to_string(),
            name: "flaky".to_string(),
            language: "python".to_string(),
            test_cases: vec![TestGroup {
                title: String::new(),
                id: 1,
                open_test_cases: vec![case("1-1", "a", Some("ok")), case("1-2", "b", Some("ok"))],
                hidden_test_cases: vec![],
            }],
        }],
        ..single_case_config(None)
    };
    let engine = ScriptedEngine::default()
        .fail("a", "engine unreachable")
        .respond("b", "ok\n", 0);
    let fx = fixture(config, &["s1"], engine).await;
    fx.archive.put("s1", "1.py", "print('ok')").await;

    let results = fx.judge.judge_submission("s1").await.unwrap().unwrap();
    let cases = &results[0].cases;
    assert!(!cases[0].success);
    assert!(cases[0].message.contains("engine unreachable"));
    assert!(cases[1].success);
}

#[tokio::test]
async fn judging_twice_is_idempotent() {
    let engine = ScriptedEngine::default().respond("", "42\n", 0);
    let fx = fixture(single_case_config(Some("42")), &["s1"], engine).await;
    fx.archive.put("s1", "1.py", "print(42)").await;

    let first = fx.judge.judge_submission("s1").await.unwrap().unwrap();
    let row_after_first = fx.scoreboard_repo.find("s1").await.unwrap().unwrap();
    let second = fx.judge.judge_submission("s1").await.unwrap().unwrap();
    let row_after_second = fx.scoreboard_repo.find("s1").await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(
        row_after_first.puzzle_results,
        row_after_second.puzzle_results
    );
    assert_eq!(
        row_after_first.passed_puzzle_amount,
        row_after_second.passed_puzzle_amount
    );
}

#[tokio::test]
async fn uninitialized_student_cannot_be_judged() {
    let engine = ScriptedEngine::default();
    let fx = fixture(single_case_config(Some("42")), &["s1"], engine).await;
    fx.archive.put("ghost", "1.py", "print(42)").await;

    let err = fx.judge.judge_submission("ghost").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn empty_archive_reports_no_submission() {
    let engine = ScriptedEngine::default();
    let fx = fixture(single_case_config(Some("42")), &["s1"], engine).await;
    fx.archive.create_empty("s1").await;

    assert!(fx.judge.judge_submission("s1").await.unwrap().is_none());
}

#[tokio::test]
async fn missing_archive_is_not_found() {
    let engine = ScriptedEngine::default();
    let fx = fixture(single_case_config(Some("42")), &["s1"], engine).await;

    let err = fx.judge.judge_submission("s1").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
