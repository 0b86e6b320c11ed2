//! Execution engine for AI-generated micro apps.
//!
//! End users describe a small app (form inputs, logic, outputs) in natural
//! language; a generator produces a declarative [`AppConfig`] plus a
//! sandboxed script. This crate is the part that runs them: it validates
//! untrusted generated code, coerces form inputs into their declared types,
//! executes the code in a fresh V8 isolate under wall-clock and heap
//! limits, interprets declarative logic blocks, and maps results into typed
//! outputs with uniform failure handling.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use microapp::{matcher, EchoAiClient, OrchestratorBuilder, RunScope};
//!
//! # async fn demo() {
//! let orchestrator = OrchestratorBuilder::new(Arc::new(EchoAiClient)).build();
//!
//! // Fast path: a catalog template instead of a generation call.
//! let template = matcher::find_matching_template("split the bill with a tip").unwrap();
//! let app = matcher::template_to_app_config(template);
//!
//! let response = orchestrator
//!     .run(
//!         &app,
//!         &RunScope::new("app-1", "user-1"),
//!         serde_json::json!({"amount": "80", "percent": 20, "people": 4}),
//!     )
//!     .await;
//! assert!(response.success);
//! # }
//! ```

pub mod builder;
pub mod capabilities;
pub mod coerce;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod interpreter;
pub mod matcher;
mod ops;
pub mod runner;
pub mod store;
pub mod template;
pub mod validator;

pub use builder::OrchestratorBuilder;
pub use capabilities::{AiClient, Capabilities, EchoAiClient, StaticAiClient};
pub use config::{AppConfig, InputField, InputType, LogicBlock, OutputConfig, OutputType};
pub use engine::{AppEngine, EngineRun, RunErrorKind, RunScope};
pub use errors::{EngineError, Result};
pub use executor::{ExecutionOutcome, ExecutorConfig, SandboxedExecutor};
pub use interpreter::{AppRunOutcome, ExecutionContext, Interpreter, InterpreterConfig};
pub use runner::{MemoryRunStore, RunOrchestrator, RunRecord, RunResponse, RunStatus, RunStore};
pub use store::{DataStore, MemoryDataStore, StoredRecord};
pub use validator::{validate, Validation};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn prompt_to_run_record_end_to_end() {
        let runs = Arc::new(MemoryRunStore::new());
        let orchestrator = OrchestratorBuilder::new(Arc::new(EchoAiClient))
            .run_store(runs.clone())
            .build();

        let template = matcher::find_matching_template("summarize this text for me").unwrap();
        let app = matcher::template_to_app_config(template);
        let scope = RunScope::new("app-7", "user-3");

        let response = orchestrator
            .run(&app, &scope, json!({"text": "a very long article"}))
            .await;
        assert!(response.success, "error: {:?}", response.error);
        // The echo AI client returns the prompt, which embeds the input.
        assert!(response.outputs["summary"]
            .as_str()
            .unwrap()
            .contains("a very long article"));

        let history = runs.list("app-7", 5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RunStatus::Success);
        assert_eq!(history[0].engine, "sandboxed-code");
    }
}
