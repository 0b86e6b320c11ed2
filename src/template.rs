//! `{{identifier(.identifier)*}}` template resolution.
//!
//! This is the only templating syntax the engine understands: no
//! expressions, no filters, no escaping beyond the literal-vs-stringify
//! branching in [`render_value`]. Unresolved references are left verbatim so
//! partial templates still render something.

use serde_json::Value;

/// Interpolate every `{{path}}` token in `template` using `resolve`.
///
/// Tokens whose path does not resolve are left verbatim. String values are
/// substituted as-is; everything else is JSON-stringified.
pub fn interpolate<F>(template: &str, resolve: F) -> String
where
    F: Fn(&str) -> Option<Value>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let path = after_open[..close].trim();
                match resolve(path) {
                    Some(value) => out.push_str(&render_value(&value)),
                    // Unresolved: keep the token verbatim, including braces.
                    None => {
                        out.push_str("{{");
                        out.push_str(&after_open[..close]);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    out
}

/// If `source` is exactly one `{{path}}` token, return the inner path.
///
/// Pure references resolve to the referenced JSON value directly instead of
/// being flattened to a string.
pub fn pure_reference(source: &str) -> Option<&str> {
    let trimmed = source.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?.trim();
    if inner.is_empty() || inner.contains('{') || inner.contains('}') {
        return None;
    }
    Some(inner)
}

/// Literal-vs-stringify branching: strings render without quotes, every
/// other value renders as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walk the remaining dotted segments of a path into a JSON value.
///
/// Object segments index by key; array segments accept numeric indices.
pub fn walk_path<'a>(mut current: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    for seg in segments {
        current = match current {
            Value::Object(map) => map.get(*seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_resolve(path: &str) -> Option<Value> {
        let ctx = json!({
            "inputs": {"text": "hello", "count": 3},
            "user": {"profile": {"name": "Ada"}}
        });
        let segs: Vec<&str> = path.split('.').collect();
        walk_path(&ctx, &segs).cloned()
    }

    #[test]
    fn interpolates_resolved_paths() {
        let out = interpolate("Summarize {{inputs.text}} ({{inputs.count}})", ctx_resolve);
        assert_eq!(out, "Summarize hello (3)");
    }

    #[test]
    fn unresolved_references_stay_verbatim() {
        let out = interpolate("value: {{missing.path}}", ctx_resolve);
        assert_eq!(out, "value: {{missing.path}}");
    }

    #[test]
    fn unterminated_token_is_literal() {
        let out = interpolate("broken {{inputs.text", ctx_resolve);
        assert_eq!(out, "broken {{inputs.text");
    }

    #[test]
    fn nested_paths_walk_objects() {
        let out = interpolate("hi {{user.profile.name}}", ctx_resolve);
        assert_eq!(out, "hi Ada");
    }

    #[test]
    fn pure_reference_detection() {
        assert_eq!(pure_reference("{{inputs.text}}"), Some("inputs.text"));
        assert_eq!(pure_reference("  {{ result }}  "), Some("result"));
        assert_eq!(pure_reference("total: {{result}}"), None);
        assert_eq!(pure_reference("{{a}} {{b}}"), None);
        assert_eq!(pure_reference("{{}}"), None);
    }

    #[test]
    fn non_string_values_render_as_json() {
        assert_eq!(render_value(&json!({"a": 1})), "{\"a\":1}");
        assert_eq!(render_value(&json!("plain")), "plain");
        assert_eq!(render_value(&json!(true)), "true");
    }
}
