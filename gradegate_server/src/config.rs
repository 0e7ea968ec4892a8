use serde::{Deserialize, Serialize};

/// Exam configuration as uploaded by the admin frontend (camelCase JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfig {
    pub test_title: String,
    #[serde(default)]
    pub description: String,
    /// Per-run wall limit hint in milliseconds.
    #[serde(default)]
    pub max_execution_time: Option<u64>,
    #[serde(default)]
    pub test_time: Option<TestTime>,
    pub puzzles: Vec<PuzzleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestTime {
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub force_quit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub language: String,
    pub test_cases: Vec<TestGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestGroup {
    #[serde(default)]
    pub title: String,
    pub id: u32,
    pub open_test_cases: Vec<TestCaseSpec>,
    pub hidden_test_cases: Vec<TestCaseSpec>,
}

/// A single test case. `id` carries the `{group}-{test}` form used in
/// scoreboard keys. `output` is optional: cases without an expected output
/// are judged on exit code alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseSpec {
    pub id: String,
    pub input: String,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub student_id: String,
    pub name: String,
}

/// Flat test case handed to the judge dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCase {
    pub case_id: String,
    pub input: String,
    pub expected_output: Option<String>,
}

/// Flattens the configured groups of a problem into an ordered case list,
/// open cases before hidden ones within each group. Unknown problem ids
/// resolve to an empty list.
pub fn resolve_test_cases(config: &TestConfig, problem_id: &str) -> Vec<ResolvedCase> {
    let mut cases = Vec::new();
    for puzzle in &config.puzzles {
        if puzzle.id != problem_id {
            continue;
        }
        for group in &puzzle.test_cases {
            for spec in group.open_test_cases.iter().chain(&group.hidden_test_cases) {
                cases.push(ResolvedCase {
                    case_id: spec.id.clone(),
                    input: spec.input.clone(),
                    expected_output: spec.output.clone(),
                });
            }
        }
    }
    cases
}
