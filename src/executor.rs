//! Sandboxed executor — runs generated code in a fresh V8 isolate.
//!
//! Each execution gets a brand new runtime; no state leaks between runs.
//! V8 isolates are `!Send`, so all JsRuntime work happens on a dedicated
//! thread with its own single-threaded tokio runtime. The public API is
//! fully async and `Send`-safe.
//!
//! Wall-clock enforcement is layered: a watchdog thread terminates V8
//! execution (handles CPU-bound loops), `tokio::time::timeout` bounds the
//! event loop (handles pending async ops), and the capability cancellation
//! token stops further side effects once either fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::capabilities::{AiClient, Capabilities};
use crate::coerce::coerce_inputs;
use crate::config::InputField;
use crate::engine::{RunErrorKind, RunScope};
use crate::ops::{microapp_ext, ResultSlot};
use crate::store::DataStore;
use crate::validator::{self, Validation};

/// User-facing message for timed-out runs.
pub const TIMEOUT_MESSAGE: &str = "The app took too long to run and was stopped.";

/// Configuration for the sandboxed executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum wall-clock time for one run.
    pub timeout: Duration,
    /// Tighter limit applied to validation dry runs.
    pub dry_run_timeout: Duration,
    /// Maximum size of generated code in bytes.
    pub max_code_size: usize,
    /// Maximum size of the JSON result in bytes.
    pub max_output_size: usize,
    /// V8 heap limit in bytes.
    pub max_heap_size: usize,
    /// Maximum concurrent isolates per executor.
    pub max_concurrent: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            dry_run_timeout: Duration::from_secs(5),
            max_code_size: 64 * 1024,
            max_output_size: 1024 * 1024,
            max_heap_size: 64 * 1024 * 1024,
            max_concurrent: 8,
        }
    }
}

/// Uniform result shape for one sandboxed execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Always a JSON object on success; non-object return values are
    /// wrapped as `{"result": value}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<RunErrorKind>,
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    fn succeeded(result: Value, started: Instant) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            error_kind: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn failed(error: String, kind: RunErrorKind, started: Instant) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            error_kind: Some(kind),
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Internal failure classification, mapped to [`RunErrorKind`] and a
/// user-facing message at the boundary.
#[derive(Debug)]
enum ExecFailure {
    Timeout,
    HeapLimit,
    Js(String),
    Internal(String),
}

/// The sandbox executor. Creates a fresh V8 isolate per execution.
pub struct SandboxedExecutor {
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
    ai: Arc<dyn AiClient>,
    store: Arc<dyn DataStore>,
    http: reqwest::Client,
}

impl SandboxedExecutor {
    pub fn new(ai: Arc<dyn AiClient>, store: Arc<dyn DataStore>) -> Self {
        Self::with_config(ExecutorConfig::default(), ai, store)
    }

    pub fn with_config(
        config: ExecutorConfig,
        ai: Arc<dyn AiClient>,
        store: Arc<dyn DataStore>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            semaphore,
            ai,
            store,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute generated code against raw inputs.
    ///
    /// Re-validates statically, coerces inputs, builds the scoped helper
    /// bundle, then runs the code in a fresh isolate under the wall-clock
    /// limit. Every failure mode comes back inside the outcome; this never
    /// returns an error.
    pub async fn execute_code(
        &self,
        code: &str,
        raw_inputs: Value,
        scope: &RunScope,
        input_defs: &[InputField],
    ) -> ExecutionOutcome {
        let started = Instant::now();
        info!(
            code_len = code.len(),
            app_id = %scope.app_id,
            "[EXECUTOR] starting run"
        );

        let validation = validator::validate(code);
        if !validation.valid {
            let error = validation
                .error
                .unwrap_or_else(|| "code failed validation".to_string());
            return ExecutionOutcome::failed(error, RunErrorKind::Validation, started);
        }
        if code.len() > self.config.max_code_size {
            return ExecutionOutcome::failed(
                format!("code exceeds the {} byte limit", self.config.max_code_size),
                RunErrorKind::Validation,
                started,
            );
        }

        let raw_map = match raw_inputs {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let coerced = Value::Object(coerce_inputs(&raw_map, input_defs));

        let caps = Capabilities::new(
            scope.clone(),
            self.ai.clone(),
            self.store.clone(),
            self.http.clone(),
        );

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                return ExecutionOutcome::failed(
                    "too many apps are running right now, try again in a moment".to_string(),
                    RunErrorKind::Runtime,
                    started,
                )
            }
        };

        let outcome = self
            .run_on_isolate_thread(code, coerced, caps, self.config.timeout)
            .await;
        drop(permit);

        match outcome {
            Ok(value) => {
                // Callers always receive an object.
                let result = match value {
                    Value::Object(_) => value,
                    other => json!({ "result": other }),
                };
                info!(app_id = %scope.app_id, "[EXECUTOR] run complete");
                ExecutionOutcome::succeeded(result, started)
            }
            Err(ExecFailure::Timeout) => {
                warn!(app_id = %scope.app_id, "[EXECUTOR] run timed out");
                ExecutionOutcome::failed(TIMEOUT_MESSAGE.to_string(), RunErrorKind::Timeout, started)
            }
            Err(ExecFailure::HeapLimit) => {
                warn!(app_id = %scope.app_id, "[EXECUTOR] run exceeded the memory limit");
                ExecutionOutcome::failed(
                    "The app used too much memory and was stopped.".to_string(),
                    RunErrorKind::Runtime,
                    started,
                )
            }
            Err(ExecFailure::Js(raw)) => {
                warn!(app_id = %scope.app_id, error = %raw, "[EXECUTOR] run failed");
                ExecutionOutcome::failed(
                    translate_runtime_error(&raw),
                    RunErrorKind::Runtime,
                    started,
                )
            }
            Err(ExecFailure::Internal(raw)) => {
                warn!(app_id = %scope.app_id, error = %raw, "[EXECUTOR] internal failure");
                ExecutionOutcome::failed(
                    "Something went wrong while running the app.".to_string(),
                    RunErrorKind::Runtime,
                    started,
                )
            }
        }
    }

    /// Heavier validation level: execute once with inert mock capabilities
    /// (AI returns a fixed string, storage starts empty, fetch returns an
    /// empty object) purely to catch errors that only manifest at call
    /// time. A thrown error or a non-object return is fatal.
    pub async fn dry_run(&self, code: &str) -> Validation {
        let static_pass = validator::validate(code);
        if !static_pass.valid {
            return static_pass;
        }
        if let Err(message) = check_syntax(code) {
            return Validation {
                valid: false,
                error: Some(format!("syntax error: {}", clean_error_message(&message))),
                warnings: static_pass.warnings,
            };
        }

        let caps = Capabilities::inert(RunScope::new("dry-run", "dry-run"));
        let outcome = self
            .run_on_isolate_thread(code, json!({}), caps, self.config.dry_run_timeout)
            .await;
        let error = match outcome {
            Ok(value) if value.is_object() => None,
            Ok(_) => Some("dry run returned a non-object value".to_string()),
            Err(ExecFailure::Timeout) => Some("dry run timed out".to_string()),
            Err(ExecFailure::HeapLimit) => Some("dry run exceeded the memory limit".to_string()),
            Err(ExecFailure::Js(raw)) => {
                Some(format!("dry run failed: {}", clean_error_message(&raw)))
            }
            Err(ExecFailure::Internal(raw)) => {
                Some(format!("dry run failed: {}", clean_error_message(&raw)))
            }
        };
        match error {
            Some(error) => Validation {
                valid: false,
                error: Some(error),
                warnings: static_pass.warnings,
            },
            None => static_pass,
        }
    }

    /// Spawn a dedicated thread with its own isolate and run the code there.
    async fn run_on_isolate_thread(
        &self,
        code: &str,
        inputs: Value,
        caps: Capabilities,
        timeout: Duration,
    ) -> Result<Value, ExecFailure> {
        let code = code.to_string();
        let config = self.config.clone();

        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = tx.send(Err(ExecFailure::Internal(e.to_string())));
                    return;
                }
            };
            let result = rt.block_on(run_sandboxed(&config, &code, inputs, caps, timeout));
            if tx.send(result).is_err() {
                warn!("[EXECUTOR] result receiver dropped before result was sent");
            }
        });

        rx.await
            .map_err(|_| ExecFailure::Internal("sandbox thread panicked".into()))?
    }
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace
/// so the termination exception can propagate.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the Box<HeapLimitState> allocated in
    // `run_sandboxed`. V8 only invokes this callback while JS is executing,
    // which completes before the box is dropped (the event loop has ended and
    // the watchdog joined by then). `triggered` is atomic, so a shared
    // reference suffices even for re-entrant calls.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// Run one execution on the current (dedicated) thread.
async fn run_sandboxed(
    config: &ExecutorConfig,
    code: &str,
    inputs: Value,
    caps: Capabilities,
    timeout: Duration,
) -> Result<Value, ExecFailure> {
    let cancel = caps.cancel_token();
    let mut runtime = create_runtime(caps, config.max_heap_size);

    let inputs_json =
        serde_json::to_string(&inputs).map_err(|e| ExecFailure::Internal(e.to_string()))?;
    runtime
        .execute_script(
            "[microapp:inputs]",
            format!("globalThis.__appInputs = {inputs_json};"),
        )
        .map_err(|e| ExecFailure::Internal(e.to_string()))?;
    runtime
        .execute_script("[microapp:bootstrap]", BOOTSTRAP_JS)
        .map_err(|e| ExecFailure::Internal(e.to_string()))?;
    // User code is compiled here; syntax errors surface with V8's message.
    runtime
        .execute_script("[microapp:entry]", wrap_entry_point(code))
        .map_err(|e| ExecFailure::Js(e.to_string()))?;

    // --- Heap limit callback ---
    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    // --- Watchdog: terminates CPU-bound code and stops further helper
    // side effects via the cancellation token ---
    let watchdog_handle = runtime.v8_isolate().thread_safe_handle();
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog_timed_out = timed_out.clone();
    let watchdog_cancel = cancel.clone();
    let (watchdog_tx, watchdog_rx) = std::sync::mpsc::channel::<()>();
    let watchdog = std::thread::spawn(move || {
        if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = watchdog_rx.recv_timeout(timeout)
        {
            watchdog_timed_out.store(true, Ordering::SeqCst);
            watchdog_cancel.cancel();
            watchdog_handle.terminate_execution();
        }
    });

    let failure = match runtime.execute_script("[microapp:execute]", EXECUTE_JS) {
        Ok(_) => {
            match tokio::time::timeout(
                timeout,
                runtime.run_event_loop(PollEventLoopOptions::default()),
            )
            .await
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(ExecFailure::Js(e.to_string())),
                Err(_) => {
                    cancel.cancel();
                    Some(ExecFailure::Timeout)
                }
            }
        }
        Err(e) => Some(ExecFailure::Js(e.to_string())),
    };

    // Join the watchdog before dropping the runtime; the IsolateHandle must
    // not outlive the isolate.
    let _ = watchdog_tx.send(());
    let _ = watchdog.join();

    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(ExecFailure::HeapLimit);
    }
    if timed_out.load(Ordering::SeqCst) {
        return Err(ExecFailure::Timeout);
    }
    if let Some(failure) = failure {
        return Err(failure);
    }

    let result_str = {
        let state = runtime.op_state();
        let state = state.borrow();
        state.try_borrow::<ResultSlot>().map(|slot| slot.0.clone())
    }
    .ok_or_else(|| ExecFailure::Js("the app returned no result".into()))?;

    if result_str.len() > config.max_output_size {
        return Err(ExecFailure::Js("the app produced too much output".into()));
    }

    let envelope: Value =
        serde_json::from_str(&result_str).map_err(|e| ExecFailure::Internal(e.to_string()))?;
    if let Some(error) = envelope.get("error") {
        return Err(ExecFailure::Js(
            error.as_str().unwrap_or("unknown error").to_string(),
        ));
    }
    Ok(envelope.get("ok").cloned().unwrap_or(Value::Null))
}

/// Create a fresh JsRuntime with the microapp ops loaded and the heap limit
/// set, and park the capability bundle in op state.
fn create_runtime(caps: Capabilities, max_heap_size: usize) -> JsRuntime {
    let create_params = v8::CreateParams::default().heap_limits(0, max_heap_size);
    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![microapp_ext::init_ops()],
        create_params: Some(create_params),
        ..Default::default()
    });
    runtime.op_state().borrow_mut().put(caps);
    runtime
}

/// Compile the code in a throwaway isolate without invoking it, surfacing
/// V8's parser message. Used by the deep validation level.
pub fn check_syntax(code: &str) -> Result<(), String> {
    let code = code.to_string();
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let mut runtime = JsRuntime::new(RuntimeOptions::default());
        let wrapped = format!("(function (inputs, helpers) {{\n{code}\n}});");
        let result = runtime
            .execute_script("[microapp:syntax]", wrapped)
            .map(|_| ())
            .map_err(|e| e.to_string());
        let _ = tx.send(result);
    });
    rx.recv()
        .map_err(|_| "syntax check thread panicked".to_string())?
}

/// Two supported code shapes: a declared `run` entry point, or a bare
/// function body that becomes one.
fn wrap_entry_point(code: &str) -> String {
    if code.contains("function run") || code.contains("run =") {
        format!("{code}\n;globalThis.__entry = run;")
    } else {
        format!("globalThis.__entry = async (inputs, helpers) => {{\n{code}\n}};")
    }
}

/// Capability bridge and lockdown, run once per isolate before user code.
///
/// Besides wiring the helpers object, this removes `eval` and poisons the
/// function constructors so the validator's deny-list is not the only line
/// against code generation escapes.
const BOOTSTRAP_JS: &str = r#"
((ops) => {
    const helperCall = async (method, args) => {
        const raw = await ops.op_app_helper_call(method, JSON.stringify(args ?? {}));
        const envelope = JSON.parse(raw);
        if (envelope.error) {
            throw new Error(envelope.error);
        }
        return envelope.ok;
    };
    const utilCall = (method, args) => {
        const envelope = JSON.parse(ops.op_app_util(method, JSON.stringify(args ?? {})));
        return envelope.ok;
    };
    const log = (msg) => ops.op_app_log(String(msg));

    globalThis.__host = Object.freeze({
        setResult: (json) => ops.op_app_set_result(json),
        log,
    });
    globalThis.__buildHelpers = () => Object.freeze({
        ai: (prompt, systemPrompt) => helperCall("ai", { prompt, systemPrompt }),
        db: Object.freeze({
            store: (dataType, data) => helperCall("db.store", { dataType, data }),
            query: (dataType, limit) => helperCall("db.query", { dataType, limit }),
            getAll: (dataType) => helperCall("db.getAll", { dataType }),
            delete: (dataType, id) => helperCall("db.delete", { dataType, id }),
        }),
        fetch: (url, options) => helperCall("fetch", { url, options }),
        utils: Object.freeze({
            formatDate: (value, format) => utilCall("formatDate", { value, format }),
            formatCurrency: (value, currency) => utilCall("formatCurrency", { value, currency }),
            generateId: () => utilCall("generateId", {}),
        }),
        log,
    });

    delete globalThis.Deno;
    delete globalThis.eval;
    const AsyncFunction = (async function () {}).constructor;
    const GeneratorFunction = (function* () {}).constructor;
    Object.defineProperty(Function.prototype, "constructor", {
        value: undefined, configurable: false, writable: false
    });
    Object.defineProperty(AsyncFunction.prototype, "constructor", {
        value: undefined, configurable: false, writable: false
    });
    Object.defineProperty(GeneratorFunction.prototype, "constructor", {
        value: undefined, configurable: false, writable: false
    });
})(Deno.core.ops);
"#;

/// Invoke the entry point and ship the raw return value (or the thrown
/// error) back through the result op. Object-wrapping of non-object values
/// happens host-side so the dry run can still see the raw shape.
const EXECUTE_JS: &str = r#"
(async () => {
    try {
        const helpers = globalThis.__buildHelpers();
        const value = await globalThis.__entry(globalThis.__appInputs, helpers);
        globalThis.__host.setResult(JSON.stringify({ ok: value === undefined ? null : value }));
    } catch (e) {
        globalThis.__host.setResult(JSON.stringify({ error: (e && e.message) || String(e) }));
    }
})();
"#;

/// Pattern-match common failure modes of generated code into short,
/// actionable sentences. Falls back to a stack-stripped raw message.
pub(crate) fn translate_runtime_error(raw: &str) -> String {
    let cleaned = clean_error_message(raw);
    if let Some(idx) = cleaned.find(" is not defined") {
        let name = cleaned[..idx].rsplit([' ', ':']).next().unwrap_or("something");
        return format!(
            "The app refers to '{name}', which does not exist. The app may need to be regenerated."
        );
    }
    if raw.contains("Cannot read propert") || raw.contains("of undefined") || raw.contains("of null")
    {
        return "The app tried to use a value that was empty. Check that all required inputs are filled in.".to_string();
    }
    if raw.contains("unknown helper method") {
        return "The app called a helper that does not exist and may need to be regenerated."
            .to_string();
    }
    if raw.contains("is not a function") {
        return "The app called something that is not available inside the sandbox.".to_string();
    }
    if raw.contains("timed out") || raw.contains("timeout") {
        return TIMEOUT_MESSAGE.to_string();
    }
    cleaned
}

/// First line only, with the usual V8 prefixes stripped.
fn clean_error_message(raw: &str) -> String {
    raw.lines()
        .next()
        .unwrap_or(raw)
        .trim_start_matches("Uncaught ")
        .trim_start_matches("Error: ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::EchoAiClient;
    use crate::store::MemoryDataStore;

    fn executor() -> SandboxedExecutor {
        SandboxedExecutor::new(Arc::new(EchoAiClient), Arc::new(MemoryDataStore::new()))
    }

    fn scope() -> RunScope {
        RunScope::new("app-1", "user-1")
    }

    #[tokio::test]
    async fn declared_entry_point_returns_object() {
        let code = "async function run(inputs, helpers) { return { ok: true }; }";
        let outcome = executor()
            .execute_code(code, json!({}), &scope(), &[])
            .await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(outcome.result.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn non_object_results_are_wrapped() {
        let code = "async function run(inputs, helpers) { return inputs.n * 2; }";
        let outcome = executor()
            .execute_code(code, json!({"n": 21}), &scope(), &[])
            .await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(outcome.result.unwrap(), json!({"result": 42}));
    }

    #[tokio::test]
    async fn forbidden_code_fails_validation_without_executing() {
        let code = "async function run(inputs, helpers) { return eval(inputs.x); }";
        let outcome = executor()
            .execute_code(code, json!({}), &scope(), &[])
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(RunErrorKind::Validation));
        assert!(outcome.error.unwrap().contains("eval"));
    }

    #[tokio::test]
    async fn cpu_bound_loops_hit_the_timeout() {
        let config = ExecutorConfig {
            timeout: Duration::from_millis(300),
            ..Default::default()
        };
        let exec = SandboxedExecutor::with_config(
            config,
            Arc::new(EchoAiClient),
            Arc::new(MemoryDataStore::new()),
        );
        let code = "async function run(inputs, helpers) { while (true) {} return {}; }";
        let outcome = exec.execute_code(code, json!({}), &scope(), &[]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(RunErrorKind::Timeout));
        assert!(outcome.execution_time_ms >= 300);
        assert!(outcome.error.unwrap().contains("too long"));
    }

    #[tokio::test]
    async fn helpers_reach_the_data_store() {
        let store = Arc::new(MemoryDataStore::new());
        let exec = SandboxedExecutor::new(Arc::new(EchoAiClient), store);
        let code = r#"
            async function run(inputs, helpers) {
                await helpers.db.store("notes", { text: inputs.note });
                const rows = await helpers.db.query("notes", 10);
                return { count: rows.length, latest: rows[0].data.text };
            }
        "#;
        let outcome = exec
            .execute_code(code, json!({"note": "remember"}), &scope(), &[])
            .await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(
            outcome.result.unwrap(),
            json!({"count": 1, "latest": "remember"})
        );
    }

    #[tokio::test]
    async fn ai_helper_round_trips_through_the_client() {
        let code = r#"
            async function run(inputs, helpers) {
                const summary = await helpers.ai("Summarize " + inputs.text);
                return { summary };
            }
        "#;
        let outcome = executor()
            .execute_code(code, json!({"text": "hello"}), &scope(), &[])
            .await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(outcome.result.unwrap(), json!({"summary": "Summarize hello"}));
    }

    #[tokio::test]
    async fn thrown_errors_are_translated() {
        let code = "async function run(inputs, helpers) { return missingThing.total; }";
        let outcome = executor()
            .execute_code(code, json!({}), &scope(), &[])
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(RunErrorKind::Runtime));
        let error = outcome.error.unwrap();
        assert!(error.contains("missingThing"), "got: {error}");
    }

    #[tokio::test]
    async fn dry_run_catches_helper_misuse() {
        let code = r#"
            async function run(inputs, helpers) {
                const rows = await helpers.db.truncate("notes");
                return { rows };
            }
        "#;
        let validation = executor().dry_run(code).await;
        assert!(!validation.valid);
    }

    #[tokio::test]
    async fn dry_run_rejects_non_object_returns() {
        let code = "async function run(inputs, helpers) { return 42; }";
        let validation = executor().dry_run(code).await;
        assert!(!validation.valid);
        assert!(validation.error.unwrap().contains("non-object"));
    }

    #[tokio::test]
    async fn dry_run_accepts_a_well_formed_app() {
        let code = r#"
            async function run(inputs, helpers) {
                const text = await helpers.ai("hello");
                return { text };
            }
        "#;
        let validation = executor().dry_run(code).await;
        assert!(validation.valid, "error: {:?}", validation.error);
    }

    #[tokio::test]
    async fn syntax_errors_surface_the_parser_message() {
        // Balanced brackets, so the counting heuristic passes; only the
        // real parse catches this.
        let code = "async function run(inputs, helpers) { const = 5; return {}; }";
        assert!(check_syntax(code).is_err());
        assert!(validator::validate(code).valid);
    }

    #[test]
    fn error_translation_covers_common_shapes() {
        let t = translate_runtime_error("Uncaught ReferenceError: fooBar is not defined");
        assert!(t.contains("'fooBar'"));

        let t = translate_runtime_error("TypeError: Cannot read properties of undefined");
        assert!(t.contains("empty"));

        let t = translate_runtime_error("Error: unknown helper method: db.nuke");
        assert!(t.contains("helper"));

        // Unknown shapes fall back to a cleaned first line.
        let t = translate_runtime_error("Error: strange failure\n  at <anonymous>:2:3");
        assert_eq!(t, "strange failure");
    }

    #[test]
    fn bare_body_code_is_wrapped_into_an_entry_point() {
        let wrapped = wrap_entry_point("return { ok: true };");
        assert!(wrapped.contains("__entry = async (inputs, helpers)"));

        let declared = wrap_entry_point("function run(inputs, helpers) { return {}; }");
        assert!(declared.ends_with("globalThis.__entry = run;"));
    }
}
