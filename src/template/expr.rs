//! Restricted payload expression language.
//!
//! Computed template fields are written as `{{dotted.path}}` placeholders
//! over the event payload. Expressions are compiled once at configuration
//! load time and evaluated as pure functions of the payload, with no ambient
//! I/O. An expression that is exactly one placeholder yields the raw JSON
//! value at that path; mixed text and placeholders yield a string.

use thiserror::Error;

/// Expression-specific error type
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("unterminated placeholder in \"{0}\"")]
    Unterminated(String),

    #[error("empty placeholder in \"{0}\"")]
    EmptyPlaceholder(String),

    #[error("payload field not found: {0}")]
    MissingField(String),

    #[error("expression \"{expr}\" produced an incompatible value: {message}")]
    IncompatibleValue { expr: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Path(Vec<String>),
}

/// A compiled `{{dotted.path}}` expression.
///
/// Compilation happens once at registry load; evaluation is pure and
/// deterministic for a given payload.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    raw: String,
    segments: Vec<Segment>,
}

impl CompiledExpr {
    /// Whether a raw config string contains placeholder syntax
    pub fn is_template(text: &str) -> bool {
        text.contains("{{")
    }

    /// Parse the expression text into segments
    pub fn compile(text: &str) -> Result<Self, ExprError> {
        let mut segments = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| ExprError::Unterminated(text.to_string()))?;
            let inner = after[..end].trim();
            if inner.is_empty() {
                return Err(ExprError::EmptyPlaceholder(text.to_string()));
            }
            let path: Vec<String> = inner.split('.').map(|s| s.trim().to_string()).collect();
            if path.iter().any(|p| p.is_empty()) {
                return Err(ExprError::EmptyPlaceholder(text.to_string()));
            }
            segments.push(Segment::Path(path));
            rest = &after[end + 2..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            raw: text.to_string(),
            segments,
        })
    }

    /// The original expression text
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Evaluate against an event payload.
    ///
    /// A single-placeholder expression returns the raw value at the path;
    /// anything else renders to a string. A path absent from the payload is
    /// an error rather than an empty substitution, so a broken mapping
    /// surfaces instead of producing silently blank fields.
    pub fn eval(&self, payload: &serde_json::Value) -> Result<serde_json::Value, ExprError> {
        if let [Segment::Path(path)] = self.segments.as_slice() {
            return lookup(payload, path)
                .cloned()
                .ok_or_else(|| ExprError::MissingField(path.join(".")));
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Path(path) => {
                    let value = lookup(payload, path)
                        .ok_or_else(|| ExprError::MissingField(path.join(".")))?;
                    out.push_str(&stringify(value));
                }
            }
        }
        Ok(serde_json::Value::String(out))
    }
}

/// Walk a dotted path through nested payload objects
fn lookup<'a>(payload: &'a serde_json::Value, path: &[String]) -> Option<&'a serde_json::Value> {
    let mut current = payload;
    for component in path {
        current = current.get(component)?;
    }
    Some(current)
}

/// Walk a dotted path given as a single string (used by the detail filter)
pub(crate) fn lookup_dotted<'a>(
    payload: &'a serde_json::Value,
    dotted: &str,
) -> Option<&'a serde_json::Value> {
    let mut current = payload;
    for component in dotted.split('.') {
        current = current.get(component)?;
    }
    Some(current)
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        // Arrays and objects render as JSON
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_placeholder_returns_raw_value() {
        let expr = CompiledExpr::compile("{{tenantId}}").unwrap();
        let value = expr.eval(&json!({"tenantId": "t1"})).unwrap();
        assert_eq!(value, json!("t1"));

        let expr = CompiledExpr::compile("{{count}}").unwrap();
        let value = expr.eval(&json!({"count": 42})).unwrap();
        assert_eq!(value, json!(42));
    }

    #[test]
    fn test_mixed_text_renders_string() {
        let expr = CompiledExpr::compile("New lead from {{company}} ({{count}})").unwrap();
        let value = expr.eval(&json!({"company": "Acme", "count": 3})).unwrap();
        assert_eq!(value, json!("New lead from Acme (3)"));
    }

    #[test]
    fn test_dotted_path() {
        let expr = CompiledExpr::compile("{{lead.owner.name}}").unwrap();
        let value = expr
            .eval(&json!({"lead": {"owner": {"name": "Kim"}}}))
            .unwrap();
        assert_eq!(value, json!("Kim"));
    }

    #[test]
    fn test_missing_field_is_error() {
        let expr = CompiledExpr::compile("{{absent}}").unwrap();
        let err = expr.eval(&json!({"present": 1})).unwrap_err();
        assert!(matches!(err, ExprError::MissingField(_)));
    }

    #[test]
    fn test_eval_is_deterministic() {
        let expr = CompiledExpr::compile("Hi {{name}}").unwrap();
        let payload = json!({"name": "Ada"});
        assert_eq!(expr.eval(&payload).unwrap(), expr.eval(&payload).unwrap());
    }

    #[test]
    fn test_compile_unterminated() {
        let err = CompiledExpr::compile("broken {{name").unwrap_err();
        assert!(matches!(err, ExprError::Unterminated(_)));
    }

    #[test]
    fn test_compile_empty_placeholder() {
        let err = CompiledExpr::compile("{{  }}").unwrap_err();
        assert!(matches!(err, ExprError::EmptyPlaceholder(_)));
    }

    #[test]
    fn test_null_renders_empty_in_text() {
        let expr = CompiledExpr::compile("v={{maybe}}!").unwrap();
        let value = expr.eval(&json!({"maybe": null})).unwrap();
        assert_eq!(value, json!("v=!"));
    }

    #[test]
    fn test_is_template() {
        assert!(CompiledExpr::is_template("{{x}}"));
        assert!(!CompiledExpr::is_template("plain text"));
    }
}
