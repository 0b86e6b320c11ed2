//! Run orchestrator — the thin boundary the HTTP layer calls into.
//!
//! Picks the app's live execution path, runs it, persists an append-only
//! run record, and returns a response. The engines never persist run
//! history themselves; it is derived here from the returned result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use crate::capabilities::AiClient;
use crate::config::AppConfig;
use crate::engine::{AppEngine, EngineRun, RunErrorKind, RunScope};
use crate::executor::{ExecutorConfig, SandboxedExecutor};
use crate::interpreter::{Interpreter, InterpreterConfig};
use crate::store::DataStore;
use crate::validator::{self, Validation};

/// Final status of a persisted run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failed,
}

/// One append-only audit record per execution, owned by the app.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: Uuid,
    pub app_id: String,
    pub user_id: String,
    /// Snapshot of the raw inputs as submitted.
    pub inputs: Value,
    /// Snapshot of the resolved outputs (empty object on failure).
    pub outputs: Value,
    pub status: RunStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Which engine executed the run.
    pub engine: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence collaborator for run history.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn record(&self, record: RunRecord) -> anyhow::Result<()>;

    /// Most-recent-first run records for an app.
    async fn list(&self, app_id: &str, limit: usize) -> anyhow::Result<Vec<RunRecord>>;
}

/// In-memory [`RunStore`] for tests and the demo binary.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<Vec<RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn record(&self, record: RunRecord) -> anyhow::Result<()> {
        self.runs.write().await.push(record);
        Ok(())
    }

    async fn list(&self, app_id: &str, limit: usize) -> anyhow::Result<Vec<RunRecord>> {
        let runs = self.runs.read().await;
        Ok(runs
            .iter()
            .rev()
            .filter(|r| r.app_id == app_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// The sandboxed-code engine adapter.
pub struct CodeEngine {
    executor: SandboxedExecutor,
}

impl CodeEngine {
    pub fn new(executor: SandboxedExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &SandboxedExecutor {
        &self.executor
    }
}

#[async_trait]
impl AppEngine for CodeEngine {
    fn name(&self) -> &'static str {
        "sandboxed-code"
    }

    async fn execute(&self, app: &AppConfig, raw_inputs: Value, scope: &RunScope) -> EngineRun {
        let code = app.code.as_deref().unwrap_or_default();
        let outcome = self
            .executor
            .execute_code(code, raw_inputs, scope, &app.inputs)
            .await;
        EngineRun {
            success: outcome.success,
            outputs: outcome
                .result
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            error: outcome.error,
            error_kind: outcome.error_kind,
            duration_ms: outcome.execution_time_ms,
        }
    }
}

/// The declarative-interpreter engine adapter.
pub struct LogicEngine {
    interpreter: Interpreter,
}

impl LogicEngine {
    pub fn new(interpreter: Interpreter) -> Self {
        Self { interpreter }
    }
}

#[async_trait]
impl AppEngine for LogicEngine {
    fn name(&self) -> &'static str {
        "declarative-logic"
    }

    async fn execute(&self, app: &AppConfig, raw_inputs: Value, scope: &RunScope) -> EngineRun {
        let outcome = self.interpreter.execute_app(app, raw_inputs, scope).await;
        EngineRun {
            success: outcome.success,
            outputs: Value::Object(outcome.outputs),
            error: outcome.error,
            error_kind: outcome.error_kind,
            duration_ms: outcome.duration_ms,
        }
    }
}

/// Response returned to the calling layer after one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub run_id: Uuid,
    pub success: bool,
    pub outputs: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<RunErrorKind>,
    pub duration_ms: u64,
}

/// Loads nothing, owns the engines, persists run history.
pub struct RunOrchestrator {
    code_engine: CodeEngine,
    logic_engine: LogicEngine,
    runs: Arc<dyn RunStore>,
}

impl RunOrchestrator {
    pub fn new(
        ai: Arc<dyn AiClient>,
        store: Arc<dyn DataStore>,
        runs: Arc<dyn RunStore>,
        executor_config: ExecutorConfig,
        interpreter_config: InterpreterConfig,
    ) -> Self {
        Self {
            code_engine: CodeEngine::new(SandboxedExecutor::with_config(
                executor_config,
                ai.clone(),
                store.clone(),
            )),
            logic_engine: LogicEngine::new(Interpreter::with_config(
                interpreter_config,
                ai,
                store,
            )),
            runs,
        }
    }

    /// Validate an app's live path before saving it.
    ///
    /// `deep` adds the dry-run level for code apps. Logic apps only get the
    /// structural invariant checks; their blocks fail soft at run time.
    pub async fn validate_app(&self, app: &AppConfig, deep: bool) -> Validation {
        if let Some(duplicate) = app.duplicate_input_id() {
            return Validation {
                valid: false,
                error: Some(format!("duplicate input id: {duplicate}")),
                warnings: Vec::new(),
            };
        }
        if app.uses_code_path() {
            let code = app.code.as_deref().unwrap_or_default();
            if deep {
                return self.code_engine.executor().dry_run(code).await;
            }
            return validator::validate(code);
        }
        Validation {
            valid: true,
            error: None,
            warnings: Vec::new(),
        }
    }

    /// Execute one run and persist its record.
    pub async fn run(&self, app: &AppConfig, scope: &RunScope, raw_inputs: Value) -> RunResponse {
        let engine: &dyn AppEngine = if app.uses_code_path() {
            &self.code_engine
        } else {
            &self.logic_engine
        };
        info!(
            app_id = %scope.app_id,
            engine = engine.name(),
            "[RUNNER] dispatching run"
        );

        let result = engine.execute(app, raw_inputs.clone(), scope).await;

        let record = RunRecord {
            id: Uuid::new_v4(),
            app_id: scope.app_id.clone(),
            user_id: scope.user_id.clone(),
            inputs: raw_inputs,
            outputs: result.outputs.clone(),
            status: if result.success {
                RunStatus::Success
            } else {
                RunStatus::Failed
            },
            duration_ms: result.duration_ms,
            error: result.error.clone(),
            engine: engine.name().to_string(),
            created_at: Utc::now(),
        };
        let run_id = record.id;
        // A run that executed but could not be recorded still returns its
        // result; the record loss is logged for operators.
        if let Err(err) = self.runs.record(record).await {
            error!(app_id = %scope.app_id, "[RUNNER] failed to persist run record: {err:#}");
        }

        RunResponse {
            run_id,
            success: result.success,
            outputs: result.outputs,
            error: result.error,
            error_kind: result.error_kind,
            duration_ms: result.duration_ms,
        }
    }

    /// Most-recent-first run history for an app.
    pub async fn run_history(&self, app_id: &str, limit: usize) -> Vec<RunRecord> {
        match self.runs.list(app_id, limit).await {
            Ok(records) => records,
            Err(err) => {
                error!(app_id, "[RUNNER] failed to list run records: {err:#}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::EchoAiClient;
    use crate::matcher;
    use crate::store::MemoryDataStore;
    use serde_json::json;

    fn orchestrator() -> RunOrchestrator {
        RunOrchestrator::new(
            Arc::new(EchoAiClient),
            Arc::new(MemoryDataStore::new()),
            Arc::new(MemoryRunStore::new()),
            ExecutorConfig::default(),
            InterpreterConfig::default(),
        )
    }

    fn scope() -> RunScope {
        RunScope::new("app-1", "user-1")
    }

    #[tokio::test]
    async fn code_apps_run_end_to_end_and_are_recorded() {
        let orch = orchestrator();
        let template = matcher::find_matching_template("tip calculator").unwrap();
        let app = matcher::template_to_app_config(template);

        let response = orch
            .run(&app, &scope(), json!({"amount": "100", "percent": 20, "people": 2}))
            .await;
        assert!(response.success, "error: {:?}", response.error);
        assert_eq!(response.outputs["total"], json!("$120.00"));
        assert_eq!(response.outputs["perPerson"], json!("$60.00"));

        let history = orch.run_history("app-1", 10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RunStatus::Success);
        assert_eq!(history[0].engine, "sandboxed-code");
        assert_eq!(history[0].inputs["amount"], json!("100"));
    }

    #[tokio::test]
    async fn logic_apps_use_the_interpreter() {
        let orch = orchestrator();
        let template = matcher::find_matching_template("expense tracker").unwrap();
        let app = matcher::template_to_app_config(template);

        let response = orch
            .run(
                &app,
                &scope(),
                json!({"amount": "9.5", "category": "food", "note": "coffee"}),
            )
            .await;
        assert!(response.success, "error: {:?}", response.error);
        let history = response.outputs["history"].as_array().unwrap();
        assert_eq!(history[0]["data"]["note"], json!("coffee"));

        let records = orch.run_history("app-1", 10).await;
        assert_eq!(records[0].engine, "declarative-logic");
    }

    #[tokio::test]
    async fn failed_runs_are_recorded_as_failed() {
        let orch = orchestrator();
        let app = AppConfig {
            code: Some("async function run(inputs, helpers) { return eval(x); }".into()),
            ..Default::default()
        };

        let response = orch.run(&app, &scope(), json!({})).await;
        assert!(!response.success);
        assert_eq!(response.error_kind, Some(RunErrorKind::Validation));

        let history = orch.run_history("app-1", 10).await;
        assert_eq!(history[0].status, RunStatus::Failed);
        assert!(history[0].error.is_some());
        assert_eq!(history[0].outputs, json!({}));
    }

    #[tokio::test]
    async fn validate_app_flags_duplicate_input_ids() {
        let orch = orchestrator();
        let mut app = AppConfig {
            code: Some("async function run(inputs, helpers) { return {}; }".into()),
            ..Default::default()
        };
        app.inputs
            .push(crate::config::InputField::new("x", crate::config::InputType::Text));
        app.inputs
            .push(crate::config::InputField::new("x", crate::config::InputType::Text));

        let v = orch.validate_app(&app, false).await;
        assert!(!v.valid);
        assert!(v.error.unwrap().contains("duplicate"));
    }
}
