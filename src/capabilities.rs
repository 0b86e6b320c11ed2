//! The fixed capability bundle generated code may call.
//!
//! Every capability is scoped to the owning (appId, userId) pair, injected
//! explicitly as a [`RunScope`] rather than captured in per-run closures.
//! Helpers that touch external state surface generic, user-safe error
//! messages; the real cause is logged server-side only, so sandboxed code
//! (and by extension its output) can never leak provider errors or
//! credentials.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use url::Url;
use uuid::Uuid;

use crate::engine::RunScope;
use crate::errors::{EngineError, Result};
use crate::store::{DataStore, MemoryDataStore};

/// Outbound HTTP timeout for the `fetch` helper.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Query limit applied when `db.query` is called without one.
const DEFAULT_QUERY_LIMIT: usize = 100;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helper inside a user-created micro app. Reply with plain text only.";

/// Fixed reply the inert (dry-run) AI client returns.
pub const MOCK_AI_REPLY: &str = "Sample AI response";

/// External AI text-generation collaborator.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn generate_text(&self, system_prompt: &str, user_prompt: &str)
        -> anyhow::Result<String>;
}

/// AI client that always returns the same text. Used for dry runs.
pub struct StaticAiClient {
    reply: String,
}

impl StaticAiClient {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
        }
    }
}

#[async_trait]
impl AiClient for StaticAiClient {
    async fn generate_text(&self, _system: &str, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.reply.clone())
    }
}

/// AI client that echoes the fully interpolated user prompt. Used by tests
/// and the demo binary.
pub struct EchoAiClient;

#[async_trait]
impl AiClient for EchoAiClient {
    async fn generate_text(&self, _system: &str, prompt: &str) -> anyhow::Result<String> {
        Ok(prompt.to_string())
    }
}

/// The per-run capability bundle.
///
/// Cheap to clone; all heavy members are shared. One instance is built per
/// run and handed to the sandbox ops and the interpreter.
#[derive(Clone)]
pub struct Capabilities {
    scope: RunScope,
    ai: Arc<dyn AiClient>,
    store: Arc<dyn DataStore>,
    http: reqwest::Client,
    cancel: CancellationToken,
    /// Inert bundles short-circuit outbound HTTP; dry runs must never touch
    /// the network.
    inert: bool,
}

impl Capabilities {
    pub fn new(
        scope: RunScope,
        ai: Arc<dyn AiClient>,
        store: Arc<dyn DataStore>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            scope,
            ai,
            store,
            http,
            cancel: CancellationToken::new(),
            inert: false,
        }
    }

    /// Inert bundle for dry-run validation: AI returns a fixed string,
    /// storage starts empty, fetch returns an empty object.
    pub fn inert(scope: RunScope) -> Self {
        Self {
            scope,
            ai: Arc::new(StaticAiClient::new(MOCK_AI_REPLY)),
            store: Arc::new(MemoryDataStore::new()),
            http: reqwest::Client::new(),
            cancel: CancellationToken::new(),
            inert: true,
        }
    }

    /// Token fired by the executor watchdog so a timed-out run performs no
    /// further side effects.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn scope(&self) -> &RunScope {
        &self.scope
    }

    /// Single entry point for every helper call from generated code.
    ///
    /// `method` is the dotted helper name ("ai", "db.store", "fetch",
    /// "utils.formatDate", ...); `args` is the JS-side argument object.
    pub async fn dispatch(&self, method: &str, args: Value) -> Result<Value> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        match method {
            "ai" => {
                let prompt = args.get("prompt").and_then(Value::as_str).unwrap_or_default();
                let system = args
                    .get("systemPrompt")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_SYSTEM_PROMPT);
                self.ai_text(system, prompt).await.map(Value::String)
            }
            "db.store" => {
                let data_type = data_type_arg(&args);
                let data = args.get("data").cloned().unwrap_or(Value::Null);
                match self.store.store(&self.scope, data_type, data).await {
                    Ok(_) => Ok(Value::Bool(true)),
                    Err(err) => {
                        error!("[HELPERS] db.store({data_type}) failed: {err:#}");
                        Err(EngineError::StoreFailed)
                    }
                }
            }
            "db.query" => {
                let limit = args
                    .get("limit")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_QUERY_LIMIT);
                self.query_records(data_type_arg(&args), Some(limit)).await
            }
            "db.getAll" => self.query_records(data_type_arg(&args), None).await,
            "db.delete" => {
                let data_type = data_type_arg(&args);
                let id = args.get("id").and_then(Value::as_str).unwrap_or_default();
                match self.store.delete(&self.scope, data_type, id).await {
                    Ok(removed) => Ok(Value::Bool(removed)),
                    Err(err) => {
                        error!("[HELPERS] db.delete({data_type}) failed: {err:#}");
                        Err(EngineError::StoreFailed)
                    }
                }
            }
            "fetch" => self.fetch_json(&args).await,
            m if m.starts_with("utils.") => Ok(util_call(&m["utils.".len()..], &args)),
            other => Err(EngineError::UnknownHelper(other.to_string())),
        }
    }

    async fn ai_text(&self, system: &str, prompt: &str) -> Result<String> {
        match self.ai.generate_text(system, prompt).await {
            Ok(text) => Ok(text),
            Err(err) => {
                error!("[HELPERS] AI call failed: {err:#}");
                Err(EngineError::AiFailed)
            }
        }
    }

    async fn query_records(&self, data_type: &str, limit: Option<usize>) -> Result<Value> {
        match self.store.query(&self.scope, data_type, limit).await {
            Ok(records) => Ok(serde_json::to_value(records)?),
            Err(err) => {
                error!("[HELPERS] db.query({data_type}) failed: {err:#}");
                Err(EngineError::QueryFailed)
            }
        }
    }

    /// Restricted outbound HTTP: https only, address-level SSRF guard, 10 s
    /// timeout, JSON responses only.
    async fn fetch_json(&self, args: &Value) -> Result<Value> {
        let url_str = args.get("url").and_then(Value::as_str).unwrap_or_default();
        let options = args.get("options").cloned().unwrap_or(Value::Null);

        if self.inert {
            return Ok(json!({}));
        }

        let url = Url::parse(url_str)
            .map_err(|_| EngineError::BlockedUrl("the URL could not be parsed".into()))?;
        ensure_url_allowed(&url).await?;

        let method = options
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let mut request = match method.as_str() {
            "POST" => self.http.post(url),
            "PUT" => self.http.put(url),
            "PATCH" => self.http.patch(url),
            "DELETE" => self.http.delete(url),
            _ => self.http.get(url),
        };

        if let Some(headers) = options.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(name, v);
                }
            }
        }
        if let Some(body) = options.get("body") {
            request = match body {
                Value::String(s) => request.body(s.clone()),
                other => request.json(other),
            };
        }

        let response = request
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|err| {
                warn!("[HELPERS] fetch failed: {err}");
                EngineError::HttpFailed
            })?;

        if !response.status().is_success() {
            warn!("[HELPERS] fetch returned status {}", response.status());
            return Err(EngineError::HttpFailed);
        }

        response.json::<Value>().await.map_err(|err| {
            warn!("[HELPERS] fetch response was not JSON: {err}");
            EngineError::HttpFailed
        })
    }
}

fn data_type_arg(args: &Value) -> &str {
    args.get("dataType")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("default")
}

/// Reject URLs that point at the host or internal networks.
///
/// The check happens at resolution time: the hostname is resolved and every
/// returned address must be publicly routable. This replaces string-prefix
/// heuristics, which miss 172.16/12 ranges, IPv6 loopback and
/// DNS-resolved private targets.
pub(crate) async fn ensure_url_allowed(url: &Url) -> Result<()> {
    if url.scheme() != "https" {
        return Err(EngineError::BlockedUrl(
            "only https:// URLs are allowed".into(),
        ));
    }
    let host = url
        .host_str()
        .ok_or_else(|| EngineError::BlockedUrl("the URL has no host".into()))?;
    let lowered = host.to_ascii_lowercase();
    if lowered == "localhost" || lowered.ends_with(".localhost") {
        return Err(EngineError::BlockedUrl("local hosts are not allowed".into()));
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|err| {
            warn!("[HELPERS] fetch DNS lookup failed for {host}: {err}");
            EngineError::HttpFailed
        })?
        .collect();
    if addrs.is_empty() {
        return Err(EngineError::HttpFailed);
    }
    if addrs.iter().any(|addr| ip_is_internal(addr.ip())) {
        return Err(EngineError::BlockedUrl(
            "the host resolves to a private address".into(),
        ));
    }
    Ok(())
}

fn ip_is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| ip_is_internal(IpAddr::V4(v4)))
        }
    }
}

/// Synchronous formatting helpers. These never fail; on any formatting
/// problem they fall back to naive string conversion.
pub(crate) fn util_call(method: &str, args: &Value) -> Value {
    let value = args.get("value").unwrap_or(&Value::Null);
    match method {
        "formatDate" => Value::String(format_date(
            value,
            args.get("format").and_then(Value::as_str),
        )),
        "formatCurrency" => Value::String(format_currency(
            value,
            args.get("currency").and_then(Value::as_str),
        )),
        "generateId" => Value::String(generate_id()),
        _ => Value::Null,
    }
}

/// Format a date-like value. `format` is a named style ("short", "long",
/// "iso"); unknown styles use the default medium style.
pub fn format_date(value: &Value, format: Option<&str>) -> String {
    let fallback = || match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let Some(raw) = value.as_str() else {
        return fallback();
    };
    let parsed: Option<NaiveDateTime> = DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map(|d| d.and_time(NaiveTime::MIN))
                .ok()
        });
    let Some(dt) = parsed else {
        return fallback();
    };
    let pattern = match format.unwrap_or("medium") {
        "short" => "%m/%d/%Y",
        "long" => "%A, %B %-d, %Y",
        "iso" => "%Y-%m-%d",
        _ => "%b %-d, %Y",
    };
    dt.format(pattern).to_string()
}

/// Format a numeric value as currency with thousands grouping.
pub fn format_currency(value: &Value, currency: Option<&str>) -> String {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(n) = number else {
        return match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    };
    match currency.unwrap_or("USD") {
        "USD" => format!("${}", with_thousands(n)),
        "EUR" => format!("\u{20ac}{}", with_thousands(n)),
        "GBP" => format!("\u{a3}{}", with_thousands(n)),
        other => format!("{} {}", other, with_thousands(n)),
    }
}

fn with_thousands(n: f64) -> String {
    let formatted = format!("{:.2}", n.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if n < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

/// Opaque id for generated records.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities::new(
            RunScope::new("app-1", "user-1"),
            Arc::new(EchoAiClient),
            Arc::new(MemoryDataStore::new()),
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn ai_dispatch_reaches_the_client() {
        let out = caps()
            .dispatch("ai", json!({"prompt": "Summarize hello"}))
            .await
            .unwrap();
        assert_eq!(out, json!("Summarize hello"));
    }

    #[tokio::test]
    async fn db_store_then_query_roundtrip() {
        let caps = caps();
        let stored = caps
            .dispatch("db.store", json!({"dataType": "notes", "data": {"text": "hi"}}))
            .await
            .unwrap();
        assert_eq!(stored, json!(true));

        let rows = caps
            .dispatch("db.query", json!({"dataType": "notes"}))
            .await
            .unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["data"], json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn unknown_helpers_are_rejected() {
        let err = caps().dispatch("db.truncate", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownHelper(_)));
    }

    #[tokio::test]
    async fn cancelled_bundle_refuses_dispatch() {
        let caps = caps();
        caps.cancel_token().cancel();
        let err = caps.dispatch("ai", json!({"prompt": "x"})).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn inert_fetch_returns_empty_object() {
        let caps = Capabilities::inert(RunScope::new("a", "u"));
        let out = caps
            .dispatch("fetch", json!({"url": "https://example.com/api"}))
            .await
            .unwrap();
        assert_eq!(out, json!({}));
    }

    #[tokio::test]
    async fn url_guard_requires_https() {
        let url = Url::parse("http://example.com/").unwrap();
        let err = ensure_url_allowed(&url).await.unwrap_err();
        assert!(matches!(err, EngineError::BlockedUrl(_)));
    }

    #[tokio::test]
    async fn url_guard_blocks_local_and_private_targets() {
        for bad in [
            "https://localhost/admin",
            "https://127.0.0.1/",
            "https://192.168.1.10/router",
            "https://10.0.0.1/",
            "https://172.16.0.1/",
            "https://169.254.169.254/latest/meta-data",
            "https://[::1]/",
        ] {
            let url = Url::parse(bad).unwrap();
            let err = ensure_url_allowed(&url).await.unwrap_err();
            assert!(
                matches!(err, EngineError::BlockedUrl(_)),
                "expected {bad} to be blocked, got {err:?}"
            );
        }
    }

    #[test]
    fn currency_formatting_groups_thousands() {
        assert_eq!(format_currency(&json!(1234567.891), None), "$1,234,567.89");
        assert_eq!(format_currency(&json!(-42.5), Some("EUR")), "\u{20ac}-42.50");
        assert_eq!(format_currency(&json!("19.99"), Some("CHF")), "CHF 19.99");
        // Non-numeric input falls back to naive conversion.
        assert_eq!(format_currency(&json!("n/a"), None), "n/a");
    }

    #[test]
    fn date_formatting_has_named_styles() {
        let date = json!("2026-08-07");
        assert_eq!(format_date(&date, Some("iso")), "2026-08-07");
        assert_eq!(format_date(&date, Some("short")), "08/07/2026");
        assert_eq!(format_date(&date, None), "Aug 7, 2026");
        // Unparseable input falls back verbatim.
        assert_eq!(format_date(&json!("soon"), None), "soon");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
        assert_eq!(generate_id().len(), 32);
    }
}
