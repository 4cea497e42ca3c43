//! JEXL filter expressions for event triggers.
//!
//! An event-triggered workflow may carry `triggerConfig.when`, e.g.
//! `event.channel == 'general' && event.mentions|length > 0`. The payload is
//! always passed as context data and never interpolated into the expression.

use serde_json::{Value, json};

use super::condition::truthy;

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("expression context must be a JSON object")]
    InvalidContext,
}

/// JEXL evaluator with a small set of string/collection transforms.
pub struct FilterEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

fn str_arg(args: &[Value], idx: usize) -> &str {
    args.get(idx).and_then(Value::as_str).unwrap_or("")
}

impl FilterEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| Ok(json!(str_arg(args, 0).to_lowercase())))
            .with_transform("upper", |args: &[Value]| Ok(json!(str_arg(args, 0).to_uppercase())))
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate `expression` over `context` and coerce the result to a boolean.
    pub fn matches(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext);
        }
        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))?;
        Ok(truthy(&result))
    }
}

impl Default for FilterEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_payload() {
        let eval = FilterEvaluator::new();
        let ctx = json!({"event": {"channel": "general", "points": 12}});
        assert!(eval.matches("event.channel == 'general'", &ctx).unwrap());
        assert!(eval.matches("event.points > 10", &ctx).unwrap());
        assert!(!eval.matches("event.points > 100", &ctx).unwrap());
    }

    #[test]
    fn test_filter_transforms() {
        let eval = FilterEvaluator::new();
        let ctx = json!({"event": {"name": "Member.Joined", "tags": ["a", "b"]}});
        assert!(eval.matches("event.name|lower == 'member.joined'", &ctx).unwrap());
        assert!(eval.matches("event.tags|length == 2", &ctx).unwrap());
        assert!(eval.matches("event.name|startsWith('Member')", &ctx).unwrap());
    }

    #[test]
    fn test_filter_rejects_non_object_context() {
        let eval = FilterEvaluator::new();
        assert!(matches!(
            eval.matches("true", &json!([1])),
            Err(ExpressionError::InvalidContext)
        ));
    }

    #[test]
    fn test_filter_invalid_syntax() {
        let eval = FilterEvaluator::new();
        assert!(eval.matches("event.(", &json!({"event": {}})).is_err());
    }
}
