use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// One execution request against the sandbox engine. Mirrors the Piston v2
/// execute payload.
#[derive(Debug, Clone, Serialize)]
pub struct ExecRequest {
    pub language: String,
    pub version: String,
    pub files: Vec<ExecFile>,
    pub stdin: String,
    pub args: Vec<String>,
    /// Wall limit per run, milliseconds.
    pub run_timeout: u64,
    /// Memory limit per run, kilobytes. -1 disables the limit.
    pub run_memory_limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecResponse {
    pub run: RunOutput,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Exit code; absent when the process died on a signal.
    #[serde(default)]
    pub code: Option<i32>,
}

/// Remote sandbox that runs untrusted submissions. A transport failure
/// surfaces as `AppError::Execution` and degrades to a single failed
/// test-case result at the call site; there is no retry here.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, request: ExecRequest) -> AppResult<ExecResponse>;
}

/// Piston-protocol HTTP client.
pub struct PistonEngine {
    client: reqwest::Client,
    execute_url: String,
}

impl PistonEngine {
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            client: reqwest::Client::new(),
            execute_url: format!("{}/api/v2/execute", base),
        }
    }
}

#[async_trait]
impl ExecutionEngine for PistonEngine {
    async fn execute(&self, request: ExecRequest) -> AppResult<ExecResponse> {
        let response = self
            .client
            .post(&self.execute_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Execution(format!("engine unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Execution(format!(
                "engine rejected request ({status}): {body}"
            )));
        }

        response
            .json::<ExecResponse>()
            .await
            .map_err(|e| AppError::Execution(format!("malformed engine response: {e}")))
    }
}
