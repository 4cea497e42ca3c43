//! `{{path}}` template resolution over a [`ContextSnapshot`].
//!
//! Tokens are replaced wherever they appear in a step's config, recursively
//! through nested objects and arrays. A string consisting of exactly one token
//! resolves to the raw JSON value so numbers and objects keep their type;
//! tokens embedded in longer text are stringified. Unresolvable paths become
//! `null` (or the empty string inside text) and never fail.

use serde_json::Value;

use super::context::ContextSnapshot;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Resolves templates against one immutable snapshot.
#[derive(Debug, Clone, Copy)]
pub struct TemplateResolver<'a> {
    snapshot: &'a ContextSnapshot,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(snapshot: &'a ContextSnapshot) -> Self {
        Self { snapshot }
    }

    /// Resolve every template inside `value`. Object keys are left untouched.
    pub fn resolve(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_str(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve a single string, preserving the value type for whole-token strings.
    pub fn resolve_str(&self, text: &str) -> Value {
        if let Some(path) = single_token(text) {
            return self.snapshot.get(path);
        }
        if !text.contains(OPEN) {
            return Value::String(text.to_string());
        }
        Value::String(self.render(text))
    }

    /// Substitute every token in `text` with its stringified value.
    ///
    /// An unterminated `{{` is copied through unchanged.
    pub fn render(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find(OPEN) {
            let after_open = &rest[start + OPEN.len()..];
            let Some(end) = after_open.find(CLOSE) else {
                break;
            };
            out.push_str(&rest[..start]);
            let path = &after_open[..end];
            out.push_str(&stringify(&self.snapshot.get(path)));
            rest = &after_open[end + CLOSE.len()..];
        }

        out.push_str(rest);
        out
    }
}

/// `Some(path)` when `text` is exactly one `{{path}}` token.
fn single_token(text: &str) -> Option<&str> {
    let inner = text.strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    Some(inner)
}

/// Text form of a resolved value: strings raw, `null` empty, everything else as JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
