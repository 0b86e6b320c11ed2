use std::sync::Arc;

use crate::capabilities::AiClient;
use crate::executor::ExecutorConfig;
use crate::interpreter::InterpreterConfig;
use crate::runner::{MemoryRunStore, RunOrchestrator, RunStore};
use crate::store::{DataStore, MemoryDataStore};

/// Builder for a fully wired [`RunOrchestrator`].
///
/// Only the AI client is mandatory; storage defaults to the in-memory
/// implementations, which suits tests and single-process deployments.
pub struct OrchestratorBuilder {
    ai: Arc<dyn AiClient>,
    store: Option<Arc<dyn DataStore>>,
    runs: Option<Arc<dyn RunStore>>,
    executor_config: ExecutorConfig,
    interpreter_config: InterpreterConfig,
}

impl OrchestratorBuilder {
    pub fn new(ai: Arc<dyn AiClient>) -> Self {
        Self {
            ai,
            store: None,
            runs: None,
            executor_config: ExecutorConfig::default(),
            interpreter_config: InterpreterConfig::default(),
        }
    }

    pub fn data_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn run_store(mut self, runs: Arc<dyn RunStore>) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    pub fn interpreter_config(mut self, config: InterpreterConfig) -> Self {
        self.interpreter_config = config;
        self
    }

    pub fn build(self) -> RunOrchestrator {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryDataStore::new()));
        let runs = self.runs.unwrap_or_else(|| Arc::new(MemoryRunStore::new()));
        RunOrchestrator::new(
            self.ai,
            store,
            runs,
            self.executor_config,
            self.interpreter_config,
        )
    }
}
