//! Sigil interpolation: `%[path.to.value]` tokens resolved against data scopes.
//!
//! Templates stored on hosts, applications and commands embed tokens such as
//! `%[service_name]` or `%[server.address]`. Resolution walks each dotted
//! segment through objects (by key) and arrays (by index). A token that does
//! not resolve stays in the output verbatim, so half-configured templates
//! remain visibly unresolved instead of silently collapsing to empty strings.
//!
//! Resolved values may themselves contain tokens. The output is re-resolved
//! until it stops changing or `max_depth` passes have run; the ceiling is a
//! policy knob, not an error.

use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};

pub const DEFAULT_MAX_DEPTH: usize = 10;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\[([^\[\]]+)\]").unwrap());

/// Stack of data scopes a template is resolved against.
///
/// Lookups try the innermost (most recently pushed) scope first and fall
/// back outward, so keyword substitutions can shadow fields of the target
/// record without hiding the rest of it.
#[derive(Debug, Clone, Default)]
pub struct Context<'a> {
    scopes: Vec<Cow<'a, Value>>,
}

impl<'a> Context<'a> {
    pub fn new() -> Self {
        Self { scopes: Vec::new() }
    }

    pub fn from_value(value: &'a Value) -> Self {
        Self::new().with_scope(value)
    }

    pub fn from_owned(value: Value) -> Self {
        Self::new().with_owned_scope(value)
    }

    /// Build a single-scope context from any serializable record.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Context<'static>> {
        let value = serde_json::to_value(record).map_err(|e| {
            Error::internal_json(e.to_string(), Some("build sigil context".to_string()))
        })?;
        Ok(Context::from_owned(value))
    }

    pub fn with_scope(mut self, scope: &'a Value) -> Self {
        self.scopes.push(Cow::Borrowed(scope));
        self
    }

    pub fn with_owned_scope(mut self, scope: Value) -> Self {
        self.scopes.push(Cow::Owned(scope));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Resolve a dotted path, innermost scope first.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| walk(scope.as_ref(), path))
    }
}

fn walk<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// String form of a resolved value. `None` for null, which keeps the token.
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interpolator {
    max_depth: usize,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Interpolator {
    /// A ceiling of zero is bumped to one so a single pass always runs.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn resolve(&self, text: &str, context: &Context<'_>) -> String {
        let mut current = text.to_string();

        for _ in 0..self.max_depth {
            if !current.contains("%[") {
                break;
            }
            let next = resolve_pass(&current, context);
            if next == current {
                break;
            }
            current = next;
        }

        current
    }
}

fn resolve_pass(text: &str, context: &Context<'_>) -> String {
    let mut cache: HashMap<String, Option<String>> = HashMap::new();

    TOKEN_PATTERN
        .replace_all(text, |caps: &Captures| {
            let raw = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let resolved = cache
                .entry(raw.to_string())
                .or_insert_with(|| context.lookup(caps[1].trim()).and_then(render_value));
            resolved.clone().unwrap_or_else(|| raw.to_string())
        })
        .into_owned()
}

/// Resolve `text` against a single value with the default depth ceiling.
pub fn resolve(text: &str, value: &Value) -> String {
    Interpolator::default().resolve(text, &Context::from_value(value))
}

/// Token paths referenced by `text`, in order of first appearance.
pub fn tokens(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in TOKEN_PATTERN.captures_iter(text) {
        let path = caps[1].trim().to_string();
        if !seen.contains(&path) {
            seen.push(path);
        }
    }
    seen
}

pub fn has_tokens(text: &str) -> bool {
    TOKEN_PATTERN.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_path() {
        assert_eq!(resolve("%[a.b]", &json!({"a": {"b": "x"}})), "x");
    }

    #[test]
    fn missing_key_passes_through() {
        assert_eq!(resolve("%[missing]", &json!({})), "%[missing]");
    }

    #[test]
    fn null_value_keeps_token() {
        assert_eq!(
            resolve("user=%[user]", &json!({"user": null})),
            "user=%[user]"
        );
    }

    #[test]
    fn array_segments_use_index() {
        let ctx = json!({"ports": [80, 443]});
        assert_eq!(resolve("%[ports.1]", &ctx), "443");
        assert_eq!(resolve("%[ports.7]", &ctx), "%[ports.7]");
        assert_eq!(resolve("%[ports.x]", &ctx), "%[ports.x]");
    }

    #[test]
    fn scalar_in_the_middle_of_a_path_is_a_miss() {
        let ctx = json!({"port": 22});
        assert_eq!(resolve("%[port.number]", &ctx), "%[port.number]");
    }

    #[test]
    fn renders_numbers_bools_and_structures() {
        let ctx = json!({"port": 8080, "enabled": true, "tags": ["a"]});
        assert_eq!(
            resolve("%[port] %[enabled] %[tags]", &ctx),
            r#"8080 true ["a"]"#
        );
    }

    #[test]
    fn values_containing_tokens_are_resolved_again() {
        let ctx = json!({
            "start": "systemctl start %[service]",
            "service": "%[name].service",
            "name": "odoo"
        });
        assert_eq!(resolve("sudo %[start]", &ctx), "sudo systemctl start odoo.service");
    }

    #[test]
    fn self_referencing_token_terminates() {
        let ctx = json!({"a": "%[a]"});
        assert_eq!(resolve("%[a]", &ctx), "%[a]");
    }

    #[test]
    fn growing_self_reference_stops_at_ceiling() {
        let ctx = json!({"a": "x%[a]"});
        let out = Interpolator::new(3).resolve("%[a]", &Context::from_value(&ctx));
        assert_eq!(out, "xxx%[a]");
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let record = json!({"name": "web", "port": 22});
        let kwargs = json!({"name": "override"});
        let ctx = Context::from_value(&record).with_scope(&kwargs);
        let out = Interpolator::default().resolve("%[name]:%[port]", &ctx);
        assert_eq!(out, "override:22");
    }

    #[test]
    fn empty_context_leaves_text_untouched() {
        let out = Interpolator::default().resolve("echo %[x] done", &Context::new());
        assert_eq!(out, "echo %[x] done");
    }

    #[test]
    fn tokens_are_listed_once() {
        assert_eq!(
            tokens("cd %[base_path] && %[cmd] %[base_path]"),
            vec!["base_path".to_string(), "cmd".to_string()]
        );
        assert!(!has_tokens("plain text [x] %"));
    }
}
