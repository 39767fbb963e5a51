//! Value-or-expression template fields.

use serde::de::DeserializeOwned;

use super::expr::{CompiledExpr, ExprError};

/// A template field: either a literal value or an expression computed from
/// the event payload.
#[derive(Debug, Clone)]
pub enum FieldValue<T> {
    /// A fixed value, independent of the payload
    Literal(T),
    /// A compiled payload expression
    Computed(CompiledExpr),
}

impl<T: DeserializeOwned> FieldValue<T> {
    /// Build a field from its raw configuration value.
    ///
    /// A string containing `{{` compiles to a `Computed` expression; any
    /// other value must deserialize to `T` and becomes a `Literal`. Type
    /// mismatches are caught here, at load time.
    pub fn from_spec(spec: &serde_json::Value) -> Result<Self, ExprError> {
        match spec {
            serde_json::Value::String(s) if CompiledExpr::is_template(s) => {
                Ok(FieldValue::Computed(CompiledExpr::compile(s)?))
            }
            other => serde_json::from_value(other.clone())
                .map(FieldValue::Literal)
                .map_err(|e| ExprError::IncompatibleValue {
                    expr: other.to_string(),
                    message: e.to_string(),
                }),
        }
    }
}

impl<T: DeserializeOwned + Clone> FieldValue<T> {
    /// Resolve the field against an event payload.
    ///
    /// Literal fields ignore the payload entirely; computed fields are
    /// evaluated exactly once per call and coerced into `T`.
    pub fn resolve(&self, payload: &serde_json::Value) -> Result<T, ExprError> {
        match self {
            FieldValue::Literal(value) => Ok(value.clone()),
            FieldValue::Computed(expr) => coerce(expr.eval(payload)?, expr.raw()),
        }
    }
}

/// Convert an evaluated JSON value into the field's target type, falling back
/// to string coercion so `"{{count}}"` can feed a text field.
fn coerce<T: DeserializeOwned>(value: serde_json::Value, raw: &str) -> Result<T, ExprError> {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(v) => Ok(v),
        Err(_) => {
            let text = match &value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            serde_json::from_value(serde_json::Value::String(text)).map_err(|e| {
                ExprError::IncompatibleValue {
                    expr: raw.to_string(),
                    message: e.to_string(),
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_ignores_payload() {
        let field: FieldValue<String> = FieldValue::from_spec(&json!("New Lead")).unwrap();
        assert_eq!(field.resolve(&json!({"anything": 1})).unwrap(), "New Lead");
        assert_eq!(field.resolve(&json!(null)).unwrap(), "New Lead");
    }

    #[test]
    fn test_computed_reads_payload() {
        let field: FieldValue<String> = FieldValue::from_spec(&json!("{{tenantId}}")).unwrap();
        assert_eq!(field.resolve(&json!({"tenantId": "t1"})).unwrap(), "t1");
    }

    #[test]
    fn test_computed_is_pure() {
        let field: FieldValue<String> =
            FieldValue::from_spec(&json!("Lead {{id}} assigned")).unwrap();
        let payload = json!({"id": "L-9"});
        assert_eq!(
            field.resolve(&payload).unwrap(),
            field.resolve(&payload).unwrap()
        );
    }

    #[test]
    fn test_numeric_coercion_into_string_field() {
        let field: FieldValue<String> = FieldValue::from_spec(&json!("{{count}}")).unwrap();
        assert_eq!(field.resolve(&json!({"count": 42})).unwrap(), "42");
    }

    #[test]
    fn test_typed_computed_field() {
        let field: FieldValue<u32> = FieldValue::from_spec(&json!("{{duration}}")).unwrap();
        assert_eq!(field.resolve(&json!({"duration": 15})).unwrap(), 15);
    }

    #[test]
    fn test_literal_type_mismatch_fails_at_load() {
        let result = FieldValue::<u32>::from_spec(&json!("not a number"));
        assert!(result.is_err());
    }

    #[test]
    fn test_literal_array_field() {
        let field: FieldValue<Vec<String>> =
            FieldValue::from_spec(&json!(["sales", "crm"])).unwrap();
        assert_eq!(
            field.resolve(&json!({})).unwrap(),
            vec!["sales".to_string(), "crm".to_string()]
        );
    }
}
