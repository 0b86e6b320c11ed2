//! The op bridge between sandboxed code and the host.
//!
//! The only way out of the isolate is through these four ops. Helper calls
//! funnel through a single async op that returns an `{ok}/{error}` JSON
//! envelope; the JS side re-throws `error` envelopes so generated code sees
//! ordinary exceptions. Ops are infallible at the deno_core layer — every
//! failure is carried inside the envelope.

use std::cell::RefCell;
use std::rc::Rc;

use deno_core::{extension, op2, OpState};
use serde_json::{json, Value};

use crate::capabilities::{util_call, Capabilities};

/// Result envelope written by the sandbox wrapper via `op_app_set_result`.
pub struct ResultSlot(pub String);

/// Dispatch one helper call ("ai", "db.store", "fetch", ...) to the
/// capability bundle stored in op state.
#[op2(async)]
#[string]
pub async fn op_app_helper_call(
    state: Rc<RefCell<OpState>>,
    #[string] method: String,
    #[string] args: String,
) -> String {
    let caps = {
        let state = state.borrow();
        state.borrow::<Capabilities>().clone()
    };
    let args: Value = serde_json::from_str(&args).unwrap_or(Value::Null);
    match caps.dispatch(&method, args).await {
        Ok(value) => json!({ "ok": value }).to_string(),
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

/// Synchronous formatting utilities. Never fail.
#[op2]
#[string]
pub fn op_app_util(#[string] method: String, #[string] args: String) -> String {
    let args: Value = serde_json::from_str(&args).unwrap_or(Value::Null);
    json!({ "ok": util_call(&method, &args) }).to_string()
}

/// Store the final result envelope for the host to pick up.
#[op2(fast)]
pub fn op_app_set_result(state: &mut OpState, #[string] payload: String) {
    state.put(ResultSlot(payload));
}

/// Log line emitted by sandboxed code. Goes to the server log only, never
/// into outputs.
#[op2(fast)]
pub fn op_app_log(#[string] message: String) {
    tracing::info!("[APP] {message}");
}

extension!(
    microapp_ext,
    ops = [
        op_app_helper_call,
        op_app_util,
        op_app_set_result,
        op_app_log,
    ],
);
