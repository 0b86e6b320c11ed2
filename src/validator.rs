//! Static validation of generated code.
//!
//! This is the cheap, pre-execution gate: deny-list scan, required-shape
//! checks and a bracket-balance heuristic. It is necessary but not
//! sufficient — the isolate bootstrap removes `eval` and poisons the
//! function constructors as the second line, and the dry run
//! ([`crate::executor::SandboxedExecutor::dry_run`]) catches errors that
//! only manifest at call time.

/// Outcome of static validation.
#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub valid: bool,
    pub error: Option<String>,
    /// Non-fatal findings, surfaced to the generation step for potential
    /// retry.
    pub warnings: Vec<String>,
}

impl Validation {
    fn fatal(error: String) -> Self {
        Self {
            valid: false,
            error: Some(error),
            warnings: Vec::new(),
        }
    }

    fn ok(warnings: Vec<String>) -> Self {
        Self {
            valid: true,
            error: None,
            warnings,
        }
    }
}

const MIN_CODE_LEN: usize = 20;

/// Identifiers and constructs that would escape the sandbox or reach host
/// state. Any match is fatal and names the specific violation.
const FORBIDDEN: &[(&str, &str)] = &[
    ("eval(", "dynamic evaluation via eval()"),
    ("Function(", "the Function constructor"),
    ("import(", "dynamic import()"),
    ("require(", "module loading via require()"),
    ("process.", "host process access"),
    ("globalThis", "global object access"),
    ("window.", "browser window access"),
    ("document.", "browser document access"),
    ("XMLHttpRequest", "raw XMLHttpRequest networking"),
    ("WebSocket", "raw WebSocket networking"),
];

/// Statically validate generated code.
///
/// Fatal: empty/too-short input, any deny-listed construct, a missing
/// `run(inputs, helpers)` entry point, a missing `return`, unbalanced
/// brackets. Non-fatal warnings flag code that never references `inputs`
/// or `helpers`.
pub fn validate(code: &str) -> Validation {
    let trimmed = code.trim();
    if trimmed.len() < MIN_CODE_LEN {
        return Validation::fatal("code is empty or too short to be a valid app".into());
    }

    for (token, description) in FORBIDDEN {
        if trimmed.contains(token) {
            return Validation::fatal(format!("code uses a forbidden construct: {description}"));
        }
    }

    if !declares_entry_point(trimmed) {
        return Validation::fatal(
            "code must declare a run(inputs, helpers) entry point".into(),
        );
    }
    if !trimmed.contains("return") {
        return Validation::fatal("code must contain at least one return statement".into());
    }

    if let Some(error) = balance_error(trimmed) {
        return Validation::fatal(error);
    }

    let mut warnings = Vec::new();
    if !trimmed.contains("inputs") {
        warnings.push("code never references its inputs".to_string());
    }
    if !trimmed.contains("helpers") {
        warnings.push("code never references the helpers bundle".to_string());
    }
    Validation::ok(warnings)
}

fn declares_entry_point(code: &str) -> bool {
    // A declared function must carry the fixed (inputs, helpers) signature.
    if let Some(pos) = code.find("function run") {
        let after = &code[pos..];
        if let (Some(open), Some(close)) = (after.find('('), after.find(')')) {
            if open < close {
                let params = &after[open + 1..close];
                return params.contains("inputs") && params.contains("helpers");
            }
        }
        return false;
    }
    // Arrow-assignment shape; parameter names are checked via warnings only.
    code.contains("run =")
}

/// Cheap syntax heuristic that runs before any real parse. Counts raw
/// characters; string contents are deliberately not excluded.
fn balance_error(code: &str) -> Option<String> {
    for (open, close, name) in [
        ('{', '}', "braces"),
        ('(', ')', "parentheses"),
        ('[', ']', "brackets"),
    ] {
        let opens = code.chars().filter(|c| *c == open).count();
        let closes = code.chars().filter(|c| *c == close).count();
        if opens != closes {
            return Some(format!(
                "unbalanced {name}: {opens} opening vs {closes} closing"
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "async function run(inputs, helpers) { return { ok: true }; }";

    #[test]
    fn accepts_a_minimal_valid_app() {
        let v = validate(GOOD);
        assert!(v.valid, "unexpected error: {:?}", v.error);
        assert!(v.error.is_none());
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn rejects_empty_and_tiny_code() {
        assert!(!validate("").valid);
        assert!(!validate("return 1;").valid);
    }

    #[test]
    fn every_forbidden_token_is_fatal_and_named() {
        for (token, description) in FORBIDDEN {
            let code = format!(
                "async function run(inputs, helpers) {{ {token}x); return {{}}; }}"
            );
            let v = validate(&code);
            assert!(!v.valid, "expected {token} to be rejected");
            let error = v.error.unwrap();
            assert!(
                error.contains(description),
                "error {error:?} does not name {description:?}"
            );
        }
    }

    #[test]
    fn eval_error_message_mentions_eval() {
        let v = validate("async function run(inputs, helpers) { return eval(userInput); }");
        assert!(!v.valid);
        assert!(v.error.unwrap().contains("eval"));
    }

    #[test]
    fn missing_entry_point_is_fatal() {
        let v = validate("async function main(inputs, helpers) { return { ok: 1 }; }");
        assert!(!v.valid);
        assert!(v.error.unwrap().contains("entry point"));
    }

    #[test]
    fn arrow_assignment_counts_as_entry_point() {
        let v = validate("const run = async (inputs, helpers) => { return { ok: 1 }; };");
        assert!(v.valid, "unexpected error: {:?}", v.error);
    }

    #[test]
    fn missing_return_is_fatal() {
        let v = validate("async function run(inputs, helpers) { helpers.log(inputs); }");
        assert!(!v.valid);
        assert!(v.error.unwrap().contains("return"));
    }

    #[test]
    fn unbalanced_braces_are_fatal() {
        let v = validate("async function run(inputs, helpers) { return { ok: true }; ");
        assert!(!v.valid);
        assert!(v.error.unwrap().contains("unbalanced braces"));
    }

    #[test]
    fn unused_inputs_and_helpers_only_warn() {
        let v = validate("async function run(a, b) { return { fixed: 42 }; }");
        assert!(!v.valid, "run(a, b) is not the required signature");

        let v = validate("async function run(inputs, helpers) { return { fixed: 42 }; }");
        assert!(v.valid);
        assert!(v.warnings.is_empty());

        let v = validate("const run = async () => { return { fixed: 42 }; };");
        assert!(v.valid);
        assert_eq!(v.warnings.len(), 2);
    }
}
