use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;

/// Identifies the app and user a run executes on behalf of.
///
/// Every capability call is scoped by this pair; it is injected explicitly
/// rather than captured in per-run closures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScope {
    pub app_id: String,
    pub user_id: String,
}

impl RunScope {
    pub fn new(app_id: &str, user_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            user_id: user_id.to_string(),
        }
    }
}

/// Classification of a failed run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Static, pre-execution rejection. Never retried automatically.
    Validation,
    /// The wall-clock limit fired.
    Timeout,
    /// Generated code or a helper failed during execution.
    Runtime,
}

/// Uniform result of one engine pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRun {
    pub success: bool,
    /// Resolved outputs: the executor's result object or the interpreter's
    /// output map. Always a JSON object on success.
    pub outputs: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<RunErrorKind>,
    pub duration_ms: u64,
}

/// An execution engine for micro apps.
///
/// Two engines exist: the sandboxed code executor and the declarative
/// interpreter. The orchestrator picks one per run based on the app's live
/// path.
#[async_trait]
pub trait AppEngine: Send + Sync {
    /// Engine name for logs and run records.
    fn name(&self) -> &'static str;

    /// Execute one run. Failures come back inside [`EngineRun`]; only a
    /// genuine programming defect may surface as a panic, and it is confined
    /// to the single run.
    async fn execute(&self, app: &AppConfig, raw_inputs: Value, scope: &RunScope) -> EngineRun;
}
