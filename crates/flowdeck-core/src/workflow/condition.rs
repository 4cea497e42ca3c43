//! Step condition evaluation.
//!
//! Both operands are resolved through the template resolver before being
//! compared. Unrecognized operators evaluate to `true`.

use flowdeck_types::workflow::{Condition, ConditionOperator};
use serde_json::Value;

use super::resolver::TemplateResolver;

/// Evaluate a condition against the current snapshot.
pub fn evaluate(condition: &Condition, resolver: &TemplateResolver<'_>) -> bool {
    let left = resolver.resolve(&condition.left);
    let right = resolver.resolve(&condition.right);
    compare(&condition.operator, &left, &right)
}

/// Apply `operator` to two already-resolved operands.
pub fn compare(operator: &ConditionOperator, left: &Value, right: &Value) -> bool {
    match operator {
        ConditionOperator::Equals => loosely_equal(left, right),
        ConditionOperator::NotEquals => !loosely_equal(left, right),
        ConditionOperator::GreaterThan => {
            ordering(left, right).is_some_and(|o| o == std::cmp::Ordering::Greater)
        }
        ConditionOperator::LessThan => {
            ordering(left, right).is_some_and(|o| o == std::cmp::Ordering::Less)
        }
        ConditionOperator::Contains => contains(left, right),
        ConditionOperator::Exists => !left.is_null(),
        ConditionOperator::Other(name) => {
            tracing::debug!(operator = %name, "unknown condition operator evaluated as true");
            true
        }
    }
}

/// Numeric view of a value: numbers, and strings that parse as numbers.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// JavaScript-like truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    if left.is_number() || right.is_number() {
        if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
            return a == b;
        }
    }
    false
}

fn ordering(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return a.partial_cmp(&b);
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(left: &Value, right: &Value) -> bool {
    match left {
        Value::String(haystack) => match right {
            Value::String(needle) => haystack.contains(needle.as_str()),
            Value::Number(_) | Value::Bool(_) => haystack.contains(&right.to_string()),
            _ => false,
        },
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, right)),
        Value::Object(map) => right.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::ContextSnapshot;
    use serde_json::json;

    fn cond(operator: &str, left: Value, right: Value) -> Condition {
        Condition { operator: ConditionOperator::from(operator.to_string()), left, right }
    }

    fn eval_with(ctx: Value, condition: &Condition) -> bool {
        let snap = ContextSnapshot::from_value(ctx);
        evaluate(condition, &TemplateResolver::new(&snap))
    }

    #[test]
    fn test_equals_resolves_templates() {
        let ctx = json!({"plan": "pro", "count": 5});
        assert!(eval_with(ctx.clone(), &cond("equals", json!("{{plan}}"), json!("pro"))));
        assert!(eval_with(ctx.clone(), &cond("equals", json!("{{count}}"), json!(5))));
        assert!(eval_with(ctx.clone(), &cond("not_equals", json!("{{plan}}"), json!("free"))));
        assert!(!eval_with(ctx, &cond("equals", json!("{{missing}}"), json!("pro"))));
    }

    #[test]
    fn test_numeric_string_equals_number() {
        assert!(compare(&ConditionOperator::Equals, &json!("42"), &json!(42)));
        assert!(compare(&ConditionOperator::Equals, &json!(1.0), &json!(1)));
        assert!(!compare(&ConditionOperator::Equals, &json!("1.0"), &json!("1")));
    }

    #[test]
    fn test_greater_and_less_than() {
        assert!(compare(&ConditionOperator::GreaterThan, &json!(10), &json!(3)));
        assert!(compare(&ConditionOperator::GreaterThan, &json!("10"), &json!(3)));
        assert!(compare(&ConditionOperator::LessThan, &json!("apple"), &json!("banana")));
        assert!(!compare(&ConditionOperator::LessThan, &json!(null), &json!(3)));
        assert!(!compare(&ConditionOperator::GreaterThan, &json!(3), &json!(3)));
    }

    #[test]
    fn test_contains() {
        assert!(compare(&ConditionOperator::Contains, &json!("hello world"), &json!("world")));
        assert!(!compare(&ConditionOperator::Contains, &json!("hello"), &json!("bye")));
        assert!(compare(&ConditionOperator::Contains, &json!(["a", "b"]), &json!("b")));
        assert!(compare(&ConditionOperator::Contains, &json!([1, 2]), &json!("2")));
        assert!(compare(&ConditionOperator::Contains, &json!({"k": 1}), &json!("k")));
        assert!(!compare(&ConditionOperator::Contains, &json!(null), &json!("k")));
    }

    #[test]
    fn test_exists_ignores_right() {
        let ctx = json!({"memberId": 9, "empty": null});
        assert!(eval_with(ctx.clone(), &cond("exists", json!("{{memberId}}"), json!("ignored"))));
        assert!(!eval_with(ctx.clone(), &cond("exists", json!("{{empty}}"), Value::Null)));
        assert!(!eval_with(ctx, &cond("exists", json!("{{nope}}"), Value::Null)));
    }

    #[test]
    fn test_unknown_operator_is_true() {
        assert!(eval_with(json!({}), &cond("matches_regex", json!("a"), json!("b"))));
    }

    #[test]
    fn test_truthiness() {
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([])));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&Value::Null));
    }
}
