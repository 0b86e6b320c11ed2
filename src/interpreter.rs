//! Declarative interpreter — the legacy execution path for configs
//! expressed as an ordered list of typed logic blocks.
//!
//! Blocks run sequentially against a shared [`ExecutionContext`]; block N+1
//! always observes the side effects of block N. Conditionals and loops walk
//! their nested block lists recursively under a depth cap. Any block error
//! aborts the whole run with empty outputs, unlike the soft template
//! resolution on success.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

use crate::capabilities::{format_currency, format_date, AiClient, Capabilities};
use crate::coerce::coerce_inputs;
use crate::config::{AppConfig, LogicBlock, OutputConfig};
use crate::engine::{RunErrorKind, RunScope};
use crate::errors::{EngineError, Result};
use crate::executor::TIMEOUT_MESSAGE;
use crate::store::DataStore;
use crate::template;

/// Configuration for the declarative interpreter.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Wall-clock limit for one run, covering every block.
    pub timeout: Duration,
    /// Upper bound on loop iterations.
    pub max_loop_iterations: usize,
    /// Upper bound on conditional/loop nesting.
    pub max_nesting_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_loop_iterations: 1000,
            max_nesting_depth: 16,
        }
    }
}

/// Per-run mutable state threaded through block execution.
///
/// Created at run start, discarded at run end; never persisted directly.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub inputs: Map<String, Value>,
    pub variables: Map<String, Value>,
    pub outputs: Map<String, Value>,
}

impl ExecutionContext {
    /// Resolve a dotted path against the context.
    ///
    /// The first segment is a tagged dispatch: `inputs`/`variables`/
    /// `outputs` address those maps, any other name addresses a variable.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let (head, rest) = segments.split_first()?;
        let map = match *head {
            "inputs" => Some(&self.inputs),
            "variables" => Some(&self.variables),
            "outputs" => Some(&self.outputs),
            _ => None,
        };
        match map {
            Some(map) => match rest.split_first() {
                Some((first, deeper)) => {
                    template::walk_path(map.get(*first)?, deeper).cloned()
                }
                None => Some(Value::Object(map.clone())),
            },
            None => template::walk_path(self.variables.get(*head)?, rest).cloned(),
        }
    }

    pub fn interpolate(&self, template: &str) -> String {
        template::interpolate(template, |path| self.resolve(path))
    }
}

/// Outcome of one interpreted run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRunOutcome {
    pub success: bool,
    /// Empty on failure; no partial outputs are returned.
    pub outputs: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<RunErrorKind>,
    pub duration_ms: u64,
}

/// Interprets `logic[]` configs.
pub struct Interpreter {
    config: InterpreterConfig,
    ai: Arc<dyn AiClient>,
    store: Arc<dyn DataStore>,
    http: reqwest::Client,
}

impl Interpreter {
    pub fn new(ai: Arc<dyn AiClient>, store: Arc<dyn DataStore>) -> Self {
        Self::with_config(InterpreterConfig::default(), ai, store)
    }

    pub fn with_config(
        config: InterpreterConfig,
        ai: Arc<dyn AiClient>,
        store: Arc<dyn DataStore>,
    ) -> Self {
        Self {
            config,
            ai,
            store,
            http: reqwest::Client::new(),
        }
    }

    /// Execute an app's logic blocks and resolve its declared outputs.
    pub async fn execute_app(
        &self,
        app: &AppConfig,
        raw_inputs: Value,
        scope: &RunScope,
    ) -> AppRunOutcome {
        let started = Instant::now();
        let blocks = app.logic.as_deref().unwrap_or(&[]);
        info!(
            app_id = %scope.app_id,
            blocks = blocks.len(),
            "[INTERPRETER] starting run"
        );

        let raw_map = match raw_inputs {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut ctx = ExecutionContext {
            inputs: coerce_inputs(&raw_map, &app.inputs),
            variables: Map::new(),
            outputs: Map::new(),
        };
        let caps = Capabilities::new(
            scope.clone(),
            self.ai.clone(),
            self.store.clone(),
            self.http.clone(),
        );

        let walk = self.run_blocks(&caps, &mut ctx, blocks, 0);
        let failure = match tokio::time::timeout(self.config.timeout, walk).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some((err.to_string(), RunErrorKind::Runtime)),
            Err(_) => Some((TIMEOUT_MESSAGE.to_string(), RunErrorKind::Timeout)),
        };

        if let Some((error, kind)) = failure {
            warn!(app_id = %scope.app_id, error = %error, "[INTERPRETER] run failed");
            return AppRunOutcome {
                success: false,
                outputs: Map::new(),
                error: Some(error),
                error_kind: Some(kind),
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }

        ctx.outputs = resolve_outputs(&app.outputs, &ctx);
        info!(app_id = %scope.app_id, "[INTERPRETER] run complete");
        AppRunOutcome {
            success: true,
            outputs: ctx.outputs,
            error: None,
            error_kind: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn run_blocks<'a>(
        &'a self,
        caps: &'a Capabilities,
        ctx: &'a mut ExecutionContext,
        blocks: &'a [LogicBlock],
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if depth > self.config.max_nesting_depth {
                return Err(EngineError::Runtime(
                    "nested blocks exceed the depth limit".into(),
                ));
            }
            for block in blocks {
                self.run_block(caps, ctx, block, depth).await?;
            }
            Ok(())
        })
    }

    async fn run_block(
        &self,
        caps: &Capabilities,
        ctx: &mut ExecutionContext,
        block: &LogicBlock,
        depth: usize,
    ) -> Result<()> {
        match block {
            LogicBlock::AiProcess {
                system_prompt,
                user_prompt_template,
                output_variable,
                ..
            } => {
                let prompt = ctx.interpolate(user_prompt_template);
                let reply = caps
                    .dispatch(
                        "ai",
                        json!({ "prompt": prompt, "systemPrompt": system_prompt }),
                    )
                    .await?;
                ctx.variables.insert(output_variable.clone(), reply);
            }
            LogicBlock::Variable { name, value, .. } => {
                let resolved = match value {
                    Value::String(s) if s.contains("{{") => Value::String(ctx.interpolate(s)),
                    other => other.clone(),
                };
                ctx.variables.insert(name.clone(), resolved);
            }
            LogicBlock::Transform {
                operation,
                input_variable,
                output_variable,
                options,
                ..
            } => {
                let input = ctx.resolve(input_variable).unwrap_or(Value::Null);
                let transformed = apply_transform(operation, &input, options);
                let target = output_variable
                    .clone()
                    .unwrap_or_else(|| input_variable.clone());
                ctx.variables.insert(target, transformed);
            }
            LogicBlock::DataStore {
                id,
                data_type,
                fields,
            } => {
                let mut record = Map::new();
                for (key, value_template) in fields {
                    record.insert(key.clone(), Value::String(ctx.interpolate(value_template)));
                }
                caps.dispatch(
                    "db.store",
                    json!({ "dataType": data_type, "data": record }),
                )
                .await?;
                ctx.variables
                    .insert(format!("{}_stored", flag_id(id, "data_store")), Value::Bool(true));
            }
            LogicBlock::DataQuery {
                data_type,
                limit,
                output_variable,
                ..
            } => {
                let rows = caps
                    .dispatch(
                        "db.query",
                        json!({ "dataType": data_type, "limit": limit.unwrap_or(100) }),
                    )
                    .await?;
                ctx.variables.insert(output_variable.clone(), rows);
            }
            LogicBlock::Conditional {
                id,
                condition,
                then_blocks,
                else_blocks,
            } => {
                let rendered = ctx.interpolate(condition);
                let take_then = evaluate_condition(&rendered);
                ctx.variables.insert(
                    format!("{}_branch", flag_id(id, "conditional")),
                    Value::String(if take_then { "then" } else { "else" }.to_string()),
                );
                let branch = if take_then { then_blocks } else { else_blocks };
                self.run_blocks(caps, ctx, branch, depth + 1).await?;
            }
            LogicBlock::Loop {
                source_variable,
                item_variable,
                blocks,
                output_variable,
                ..
            } => {
                let source = ctx.resolve(source_variable).unwrap_or(Value::Null);
                let Some(items) = source.as_array() else {
                    return Err(EngineError::Runtime(format!(
                        "loop source '{source_variable}' is not an array"
                    )));
                };
                if items.len() > self.config.max_loop_iterations {
                    return Err(EngineError::Runtime(format!(
                        "loop over '{source_variable}' exceeds {} iterations",
                        self.config.max_loop_iterations
                    )));
                }
                let items = items.clone();
                let mut collected = Vec::with_capacity(items.len());
                for item in items {
                    ctx.variables.insert(item_variable.clone(), item);
                    self.run_blocks(caps, ctx, blocks, depth + 1).await?;
                    collected.push(
                        ctx.variables
                            .get(item_variable)
                            .cloned()
                            .unwrap_or(Value::Null),
                    );
                }
                if let Some(target) = output_variable {
                    ctx.variables.insert(target.clone(), Value::Array(collected));
                }
            }
            LogicBlock::ApiCall {
                url,
                method,
                query_params,
                headers,
                body_template,
                output_variable,
                ..
            } => {
                let mut target = ctx.interpolate(url);
                if !query_params.is_empty() {
                    if let Ok(mut parsed) = Url::parse(&target) {
                        {
                            let mut pairs = parsed.query_pairs_mut();
                            for (key, value_template) in query_params {
                                pairs.append_pair(key, &ctx.interpolate(value_template));
                            }
                        }
                        target = parsed.to_string();
                    }
                }
                let rendered_headers: Map<String, Value> = headers
                    .iter()
                    .map(|(k, t)| (k.clone(), Value::String(ctx.interpolate(t))))
                    .collect();
                let method = if method.is_empty() {
                    "GET".to_string()
                } else {
                    method.to_uppercase()
                };
                let mut options = json!({ "method": method, "headers": rendered_headers });
                if method != "GET" {
                    if let Some(body) = body_template {
                        let rendered = ctx.interpolate(body);
                        // JSON bodies ship as JSON, anything else as text.
                        let body_value = serde_json::from_str::<Value>(&rendered)
                            .unwrap_or(Value::String(rendered));
                        options["body"] = body_value;
                    }
                }
                let response = caps
                    .dispatch("fetch", json!({ "url": target, "options": options }))
                    .await?;
                ctx.variables.insert(output_variable.clone(), response);
            }
        }
        Ok(())
    }
}

fn flag_id<'a>(id: &'a str, kind: &'a str) -> &'a str {
    if id.is_empty() {
        kind
    } else {
        id
    }
}

/// Resolve declared outputs against the final context.
///
/// A pure `{{path}}` source resolves to the referenced JSON value directly;
/// any other source is interpolated token-by-token. Unresolved pure
/// references keep the source string verbatim. Read-only, so resolving
/// twice yields identical outputs.
pub fn resolve_outputs(outputs: &[OutputConfig], ctx: &ExecutionContext) -> Map<String, Value> {
    let mut resolved = Map::new();
    for output in outputs {
        let value = match template::pure_reference(&output.source) {
            Some(path) => ctx
                .resolve(path)
                .unwrap_or_else(|| Value::String(output.source.clone())),
            None => Value::String(ctx.interpolate(&output.source)),
        };
        resolved.insert(output.id.clone(), value);
    }
    resolved
}

fn apply_transform(operation: &str, input: &Value, options: &BTreeMap<String, Value>) -> Value {
    let option_str = |key: &str| options.get(key).and_then(Value::as_str);
    match operation {
        "format" => match option_str("format").unwrap_or("") {
            "date" => Value::String(format_date(input, option_str("style"))),
            "currency" => Value::String(format_currency(input, option_str("currency"))),
            "uppercase" => Value::String(template::render_value(input).to_uppercase()),
            "lowercase" => Value::String(template::render_value(input).to_lowercase()),
            _ => input.clone(),
        },
        "parse" => match input.as_str() {
            Some(s) => serde_json::from_str::<Value>(s.trim())
                .ok()
                .or_else(|| s.trim().parse::<f64>().ok().map(Value::from))
                .unwrap_or_else(|| input.clone()),
            None => input.clone(),
        },
        "join" => match input.as_array() {
            Some(items) => {
                let separator = option_str("separator").unwrap_or(", ");
                Value::String(
                    items
                        .iter()
                        .map(template::render_value)
                        .collect::<Vec<_>>()
                        .join(separator),
                )
            }
            None => input.clone(),
        },
        "split" => match input.as_str() {
            Some(s) => {
                let separator = option_str("separator").unwrap_or(",");
                Value::Array(
                    s.split(separator)
                        .map(|part| Value::String(part.trim().to_string()))
                        .collect(),
                )
            }
            None => input.clone(),
        },
        // Unknown operations degrade to pass-through rather than erroring.
        _ => input.clone(),
    }
}

/// Evaluate an already-interpolated boolean expression.
///
/// Supports `lhs op rhs` with numeric and string comparison plus
/// `contains`; a single token is judged by truthiness. No expression
/// grammar beyond that.
pub(crate) fn evaluate_condition(expr: &str) -> bool {
    let tokens: Vec<&str> = expr.split_whitespace().collect();
    if tokens.len() < 3 {
        return truthy(expr.trim());
    }

    let strip = |s: &str| s.trim_matches(|c| c == '"' || c == '\'').to_string();
    let lhs = strip(tokens[0]);
    let op = tokens[1];
    let rhs = strip(&tokens[2..].join(" "));

    if let (Ok(a), Ok(b)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) {
        return match op {
            ">" => a > b,
            "<" => a < b,
            ">=" => a >= b,
            "<=" => a <= b,
            "==" => (a - b).abs() < f64::EPSILON,
            "!=" => (a - b).abs() >= f64::EPSILON,
            _ => false,
        };
    }

    match op {
        "==" => lhs == rhs,
        "!=" => lhs != rhs,
        "contains" => lhs.contains(&rhs),
        _ => false,
    }
}

fn truthy(token: &str) -> bool {
    !token.is_empty() && !matches!(token, "false" | "0" | "null" | "undefined")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::EchoAiClient;
    use crate::config::{InputField, InputType, OutputType};
    use crate::store::MemoryDataStore;
    use async_trait::async_trait;

    fn scope() -> RunScope {
        RunScope::new("app-1", "user-1")
    }

    fn interpreter() -> Interpreter {
        Interpreter::new(Arc::new(EchoAiClient), Arc::new(MemoryDataStore::new()))
    }

    fn app_with_logic(blocks: Vec<LogicBlock>) -> AppConfig {
        AppConfig {
            logic: Some(blocks),
            ..Default::default()
        }
    }

    fn output(id: &str, source: &str) -> OutputConfig {
        OutputConfig {
            id: id.to_string(),
            output_type: OutputType::Text,
            label: String::new(),
            source: source.to_string(),
        }
    }

    #[tokio::test]
    async fn ai_process_interpolates_and_stores_the_reply() {
        let mut app = app_with_logic(vec![serde_json::from_value(json!({
            "type": "ai_process",
            "id": "a1",
            "userPromptTemplate": "Summarize {{inputs.text}}",
            "outputVariable": "summary"
        }))
        .unwrap()]);
        app.inputs.push(InputField::new("text", InputType::Text));
        app.outputs.push(output("summary", "{{summary}}"));

        let outcome = interpreter()
            .execute_app(&app, json!({"text": "hello"}), &scope())
            .await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        // The echo client returns the fully interpolated prompt.
        assert_eq!(outcome.outputs["summary"], json!("Summarize hello"));
    }

    #[tokio::test]
    async fn unresolved_output_reference_stays_verbatim() {
        let mut app = app_with_logic(vec![]);
        app.outputs.push(output("value", "{{missing.path}}"));

        let outcome = interpreter().execute_app(&app, json!({}), &scope()).await;
        assert!(outcome.success);
        assert_eq!(outcome.outputs["value"], json!("{{missing.path}}"));
    }

    #[tokio::test]
    async fn store_then_query_sees_the_record_in_one_run() {
        let blocks = vec![
            serde_json::from_value(json!({
                "type": "data_store",
                "id": "save",
                "dataType": "expenses",
                "fields": {"amount": "{{inputs.amount}}", "note": "{{inputs.note}}"}
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "type": "data_query",
                "id": "load",
                "dataType": "expenses",
                "outputVariable": "history"
            }))
            .unwrap(),
        ];
        let mut app = app_with_logic(blocks);
        app.inputs.push(InputField::new("amount", InputType::Number));
        app.inputs.push(InputField::new("note", InputType::Text));
        app.outputs.push(output("history", "{{history}}"));

        let outcome = interpreter()
            .execute_app(&app, json!({"amount": "12.5", "note": "lunch"}), &scope())
            .await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        let history = outcome.outputs["history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["data"]["note"], json!("lunch"));
    }

    #[tokio::test]
    async fn conditional_executes_the_taken_branch() {
        let blocks = vec![serde_json::from_value(json!({
            "type": "conditional",
            "id": "gate",
            "condition": "{{inputs.count}} > 3",
            "thenBlocks": [{"type": "variable", "name": "verdict", "value": "many"}],
            "elseBlocks": [{"type": "variable", "name": "verdict", "value": "few"}]
        }))
        .unwrap()];
        let mut app = app_with_logic(blocks);
        app.inputs.push(InputField::new("count", InputType::Number));
        app.outputs.push(output("verdict", "{{verdict}}"));
        app.outputs.push(output("branch", "{{gate_branch}}"));

        let outcome = interpreter()
            .execute_app(&app, json!({"count": 5}), &scope())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.outputs["verdict"], json!("many"));
        assert_eq!(outcome.outputs["branch"], json!("then"));

        let outcome = interpreter()
            .execute_app(&app, json!({"count": 1}), &scope())
            .await;
        assert_eq!(outcome.outputs["verdict"], json!("few"));
        assert_eq!(outcome.outputs["branch"], json!("else"));
    }

    #[tokio::test]
    async fn loop_rebinds_the_item_and_collects_results() {
        let blocks = vec![
            serde_json::from_value(json!({
                "type": "variable",
                "name": "names",
                "value": ["ada", "grace"]
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "type": "loop",
                "id": "each",
                "sourceVariable": "names",
                "itemVariable": "name",
                "blocks": [{
                    "type": "transform",
                    "operation": "format",
                    "inputVariable": "name",
                    "outputVariable": "name",
                    "options": {"format": "uppercase"}
                }],
                "outputVariable": "shouts"
            }))
            .unwrap(),
        ];
        let mut app = app_with_logic(blocks);
        app.outputs.push(output("shouts", "{{shouts}}"));

        let outcome = interpreter().execute_app(&app, json!({}), &scope()).await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(outcome.outputs["shouts"], json!(["ADA", "GRACE"]));
    }

    #[tokio::test]
    async fn loop_over_non_array_aborts_the_run() {
        let blocks = vec![serde_json::from_value(json!({
            "type": "loop",
            "sourceVariable": "nothing",
            "itemVariable": "item"
        }))
        .unwrap()];
        let app = app_with_logic(blocks);

        let outcome = interpreter().execute_app(&app, json!({}), &scope()).await;
        assert!(!outcome.success);
        assert!(outcome.outputs.is_empty());
        assert!(outcome.error.unwrap().contains("not an array"));
    }

    #[tokio::test]
    async fn interpreter_enforces_its_own_timeout() {
        struct SlowAiClient;
        #[async_trait]
        impl AiClient for SlowAiClient {
            async fn generate_text(&self, _s: &str, _p: &str) -> anyhow::Result<String> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(String::new())
            }
        }

        let config = InterpreterConfig {
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let interpreter = Interpreter::with_config(
            config,
            Arc::new(SlowAiClient),
            Arc::new(MemoryDataStore::new()),
        );
        let app = app_with_logic(vec![serde_json::from_value(json!({
            "type": "ai_process",
            "userPromptTemplate": "hang",
            "outputVariable": "x"
        }))
        .unwrap()]);

        let outcome = interpreter.execute_app(&app, json!({}), &scope()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("too long"));
    }

    #[tokio::test]
    async fn output_resolution_is_idempotent() {
        let mut ctx = ExecutionContext::default();
        ctx.variables
            .insert("summary".to_string(), json!({"len": 5}));
        let outputs = vec![
            output("raw", "{{summary}}"),
            output("mixed", "length: {{summary.len}}"),
            output("missing", "{{nope}}"),
        ];

        let first = resolve_outputs(&outputs, &ctx);
        let second = resolve_outputs(&outputs, &ctx);
        assert_eq!(first, second);
        assert_eq!(first["raw"], json!({"len": 5}));
        assert_eq!(first["mixed"], json!("length: 5"));
        assert_eq!(first["missing"], json!("{{nope}}"));
    }

    #[test]
    fn transforms_cover_the_declared_operations() {
        let no_options = BTreeMap::new();
        assert_eq!(
            apply_transform("split", &json!("a, b,c"), &no_options),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            apply_transform("join", &json!(["x", "y"]), &no_options),
            json!("x, y")
        );
        assert_eq!(
            apply_transform("parse", &json!("{\"a\": 1}"), &no_options),
            json!({"a": 1})
        );
        assert_eq!(apply_transform("parse", &json!("2.5"), &no_options), json!(2.5));
        // Unknown operations pass through.
        assert_eq!(
            apply_transform("reticulate", &json!("kept"), &no_options),
            json!("kept")
        );
    }

    #[test]
    fn condition_evaluation_handles_numbers_strings_and_truthiness() {
        assert!(evaluate_condition("5 > 3"));
        assert!(!evaluate_condition("2 >= 10"));
        assert!(evaluate_condition("hello == hello"));
        assert!(evaluate_condition("hello != world"));
        assert!(evaluate_condition("handsome contains and"));
        assert!(evaluate_condition("true"));
        assert!(!evaluate_condition("false"));
        assert!(!evaluate_condition(""));
        assert!(!evaluate_condition("0"));
    }
}
