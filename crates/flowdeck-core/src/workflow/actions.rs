//! Action handlers, one per [`ActionKind`].
//!
//! Every handler takes the step's resolved config and returns the JSON value
//! that becomes the step's result. Handlers are the only code that touches
//! external collaborators.

use std::cmp::Ordering;
use std::time::Duration;

use flowdeck_types::workflow::{ActionKind, ConditionOperator};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::calculate;
use super::collaborators::{ActionServices, EmailMessage, HttpRequest, Notification};
use super::condition::{self, as_number};
use super::context::{ContextSnapshot, lookup_path};
use super::resolver::stringify;
use super::step_runner::StepError;

/// What a handler may see besides its config.
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub tenant_id: &'a Uuid,
    pub snapshot: &'a ContextSnapshot,
    pub services: &'a ActionServices,
}

/// Run the handler for `kind`.
pub async fn dispatch(
    kind: ActionKind,
    config: &Value,
    ctx: ActionContext<'_>,
) -> Result<Value, StepError> {
    match kind {
        ActionKind::SendEmail => send_email(config, ctx).await,
        ActionKind::SendNotification => send_notification(config, ctx).await,
        ActionKind::CreateRecord => create_record(config, ctx).await,
        ActionKind::UpdateRecord => update_record(config, ctx).await,
        ActionKind::CallApi => call_api(config, ctx).await,
        ActionKind::Delay => delay(config).await,
        ActionKind::CalculateValue => calculate_value(config, ctx),
        ActionKind::TransformData => transform_data(config),
        ActionKind::SendWebhook => send_webhook(config, ctx).await,
        ActionKind::LogMessage => log_message(config),
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn first_of<'v>(config: &'v Value, keys: &[&str]) -> Option<&'v Value> {
    keys.iter()
        .filter_map(|k| config.get(*k))
        .find(|v| !v.is_null())
}

fn required_str<'v>(config: &'v Value, keys: &[&str]) -> Result<&'v str, StepError> {
    first_of(config, keys)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| StepError::InvalidConfig(format!("missing '{}'", keys[0])))
}

fn optional_string(config: &Value, keys: &[&str]) -> Option<String> {
    first_of(config, keys).map(stringify).filter(|s| !s.is_empty())
}

/// A list of strings from an array, or a comma-separated string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(stringify)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.to_string()],
    }
}

fn header_map(value: Option<&Value>) -> std::collections::BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), stringify(v))).collect())
        .unwrap_or_default()
}

fn require_http_url(url: &str) -> Result<(), StepError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(StepError::InvalidConfig(format!("url must be http(s): '{url}'")))
    }
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

async fn send_email(config: &Value, ctx: ActionContext<'_>) -> Result<Value, StepError> {
    let to = string_list(first_of(config, &["to", "recipients"]));
    if to.is_empty() {
        return Err(StepError::InvalidConfig("missing 'to'".to_string()));
    }
    let message = EmailMessage {
        to,
        subject: required_str(config, &["subject"])?.to_string(),
        body: optional_string(config, &["body", "text"]).unwrap_or_default(),
        html: optional_string(config, &["html"]),
        from: optional_string(config, &["from"]),
    };

    let receipt = ctx.services.email.send_email(ctx.tenant_id, &message).await?;
    tracing::debug!(recipients = message.to.len(), subject = %message.subject, "email sent");

    Ok(json!({
        "sent": true,
        "to": message.to,
        "subject": message.subject,
        "receipt": receipt,
    }))
}

async fn send_notification(config: &Value, ctx: ActionContext<'_>) -> Result<Value, StepError> {
    let recipients = string_list(first_of(config, &["recipients", "userIds", "to"]));
    if recipients.is_empty() {
        return Err(StepError::InvalidConfig("missing 'recipients'".to_string()));
    }
    let notification = Notification {
        recipients,
        title: optional_string(config, &["title"]).unwrap_or_else(|| "Notification".to_string()),
        body: required_str(config, &["message", "body"])?.to_string(),
        channel: optional_string(config, &["channel"]),
        data: config.get("data").cloned().unwrap_or(Value::Null),
    };

    let receipt = ctx
        .services
        .notifications
        .send_notification(ctx.tenant_id, &notification)
        .await?;

    Ok(json!({
        "sent": true,
        "recipients": notification.recipients.len(),
        "receipt": receipt,
    }))
}

fn log_message(config: &Value) -> Result<Value, StepError> {
    let message = required_str(config, &["message"])?;
    let level = config
        .get("level")
        .and_then(Value::as_str)
        .unwrap_or("info")
        .to_ascii_lowercase();
    let data = config.get("data").cloned().unwrap_or(Value::Null);

    match level.as_str() {
        "debug" => tracing::debug!(data = %data, "{message}"),
        "warn" | "warning" => tracing::warn!(data = %data, "{message}"),
        "error" => tracing::error!(data = %data, "{message}"),
        _ => tracing::info!(data = %data, "{message}"),
    }

    Ok(json!({"logged": true, "level": level, "message": message}))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

async fn create_record(config: &Value, ctx: ActionContext<'_>) -> Result<Value, StepError> {
    let collection = required_str(config, &["collection", "entity", "table"])?;
    let data = config
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| StepError::InvalidConfig("'data' must be an object".to_string()))?;

    let record = ctx
        .services
        .records
        .create_record(ctx.tenant_id, collection, data)
        .await?;

    Ok(json!({"id": record.get("id").cloned().unwrap_or(Value::Null), "record": record}))
}

async fn update_record(config: &Value, ctx: ActionContext<'_>) -> Result<Value, StepError> {
    let collection = required_str(config, &["collection", "entity", "table"])?;
    let id = first_of(config, &["id", "recordId"])
        .map(stringify)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StepError::InvalidConfig("missing 'id'".to_string()))?;
    let changes = config
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| StepError::InvalidConfig("'data' must be an object".to_string()))?;

    let record = ctx
        .services
        .records
        .update_record(ctx.tenant_id, collection, &id, changes)
        .await?;

    Ok(json!({"id": id, "record": record}))
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

async fn call_api(config: &Value, ctx: ActionContext<'_>) -> Result<Value, StepError> {
    let url = required_str(config, &["url"])?;
    require_http_url(url)?;

    let mut request = HttpRequest::new(
        config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_ascii_uppercase(),
        url,
    );
    request.headers = header_map(config.get("headers"));
    request.body = config.get("body").filter(|b| !b.is_null()).cloned();
    request.timeout = config
        .get("timeoutMs")
        .and_then(Value::as_u64)
        .map(Duration::from_millis);

    let response = ctx.services.http.send(&request).await?;
    let fail_on_status = config
        .get("failOnStatus")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if fail_on_status && !response.is_success() {
        return Err(StepError::ActionFailed(format!(
            "{} {} returned HTTP {}",
            request.method, url, response.status
        )));
    }

    Ok(json!({
        "status": response.status,
        "headers": response.headers,
        "body": response.body,
    }))
}

async fn send_webhook(config: &Value, ctx: ActionContext<'_>) -> Result<Value, StepError> {
    let url = required_str(config, &["url"])?;
    require_http_url(url)?;

    let mut request = HttpRequest::new("POST", url);
    request.headers = header_map(config.get("headers"));
    request
        .headers
        .entry("Content-Type".to_string())
        .or_insert_with(|| "application/json".to_string());
    request.body = Some(
        first_of(config, &["payload", "body"])
            .cloned()
            .unwrap_or_else(|| json!({})),
    );
    request.signing_secret = optional_string(config, &["secret"]);

    let response = ctx.services.http.send(&request).await?;
    if !response.is_success() {
        return Err(StepError::ActionFailed(format!(
            "webhook {url} returned HTTP {}",
            response.status
        )));
    }

    Ok(json!({
        "delivered": true,
        "status": response.status,
        "signed": request.signing_secret.is_some(),
    }))
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// Delay duration from `duration` (or `durationMs`) scaled by `unit`.
pub fn delay_duration(config: &Value) -> Result<Duration, StepError> {
    let amount = first_of(config, &["duration", "durationMs", "ms"])
        .and_then(as_number)
        .ok_or_else(|| StepError::InvalidConfig("missing numeric 'duration'".to_string()))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(StepError::InvalidConfig(format!(
            "duration must be non-negative, got {amount}"
        )));
    }

    let unit = config.get("unit").and_then(Value::as_str).unwrap_or("ms");
    let factor = match unit {
        "ms" | "millisecond" | "milliseconds" => 1.0,
        "s" | "second" | "seconds" => 1_000.0,
        "m" | "minute" | "minutes" => 60_000.0,
        "h" | "hour" | "hours" => 3_600_000.0,
        other => {
            return Err(StepError::InvalidConfig(format!("unknown delay unit '{other}'")));
        }
    };

    Ok(Duration::from_millis((amount * factor).round() as u64))
}

async fn delay(config: &Value) -> Result<Value, StepError> {
    let duration = delay_duration(config)?;
    tokio::time::sleep(duration).await;
    Ok(json!({"delayedMs": duration.as_millis() as u64}))
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

fn calculate_value(config: &Value, ctx: ActionContext<'_>) -> Result<Value, StepError> {
    let expression = match config.get("expression") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(StepError::InvalidConfig("missing 'expression'".to_string())),
    };

    let lookup = |path: &str| ctx.snapshot.lookup(path).and_then(as_number);
    let mut result = calculate::evaluate(&expression, &lookup)
        .map_err(|e| StepError::Expression(e.to_string()))?;

    if let Some(precision) = config.get("precision").and_then(Value::as_u64) {
        let scale = 10f64.powi(precision.min(12) as i32);
        result = (result * scale).round() / scale;
    }

    Ok(json!({"result": number_value(result), "expression": expression}))
}

fn transform_data(config: &Value) -> Result<Value, StepError> {
    let items = first_of(config, &["data", "input", "items"])
        .and_then(Value::as_array)
        .ok_or_else(|| StepError::InvalidConfig("'data' must be an array".to_string()))?;
    let operation = required_str(config, &["operation"])?;

    let result: Vec<Value> = match operation {
        "filter" => filter_items(items, config),
        "map" => map_items(items, config)?,
        "sort" => sort_items(items, config),
        other => {
            return Err(StepError::InvalidConfig(format!(
                "unknown transform operation '{other}'"
            )));
        }
    };

    Ok(json!({"count": result.len(), "result": result}))
}

fn field_of(item: &Value, field: Option<&str>) -> Value {
    match field {
        Some(path) => lookup_path(item, path).cloned().unwrap_or(Value::Null),
        None => item.clone(),
    }
}

fn filter_items(items: &[Value], config: &Value) -> Vec<Value> {
    let field = config.get("field").and_then(Value::as_str);
    let operator = ConditionOperator::from(
        config
            .get("operator")
            .and_then(Value::as_str)
            .unwrap_or("equals")
            .to_string(),
    );
    let expected = config.get("value").cloned().unwrap_or(Value::Null);

    items
        .iter()
        .filter(|item| condition::compare(&operator, &field_of(item, field), &expected))
        .cloned()
        .collect()
}

fn map_items(items: &[Value], config: &Value) -> Result<Vec<Value>, StepError> {
    if let Some(fields) = config.get("fields").and_then(Value::as_object) {
        return Ok(items
            .iter()
            .map(|item| {
                let projected: Map<String, Value> = fields
                    .iter()
                    .map(|(out, path)| {
                        let value = path
                            .as_str()
                            .map(|p| field_of(item, Some(p)))
                            .unwrap_or_else(|| path.clone());
                        (out.clone(), value)
                    })
                    .collect();
                Value::Object(projected)
            })
            .collect());
    }

    let field = config
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::InvalidConfig("map needs 'fields' or 'field'".to_string()))?;
    Ok(items.iter().map(|item| field_of(item, Some(field))).collect())
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn sort_items(items: &[Value], config: &Value) -> Vec<Value> {
    let field = config.get("field").and_then(Value::as_str);
    let descending = config
        .get("order")
        .and_then(Value::as_str)
        .is_some_and(|o| o.eq_ignore_ascii_case("desc"));

    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| {
        let ord = compare_values(&field_of(a, field), &field_of(b, field));
        if descending { ord.reverse() } else { ord }
    });
    sorted
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::Recorder;

    fn ctx_parts() -> (std::sync::Arc<Recorder>, ActionServices, ContextSnapshot, Uuid) {
        let recorder = Recorder::new();
        let services = recorder.services();
        let snapshot = ContextSnapshot::from_value(json!({
            "price": 20,
            "order": {"qty": "3"}
        }));
        (recorder, services, snapshot, Uuid::now_v7())
    }

    #[tokio::test]
    async fn test_send_email_records_message() {
        let (recorder, services, snapshot, tenant) = ctx_parts();
        let ctx = ActionContext { tenant_id: &tenant, snapshot: &snapshot, services: &services };
        let out = dispatch(
            ActionKind::SendEmail,
            &json!({"to": "a@example.com, b@example.com", "subject": "Welcome", "body": "Hi"}),
            ctx,
        )
        .await
        .unwrap();
        assert_eq!(out["sent"], true);
        assert_eq!(out["to"], json!(["a@example.com", "b@example.com"]));
        assert_eq!(out["receipt"]["messageId"], "msg-1");
        assert_eq!(recorder.email_count(), 1);
    }

    #[tokio::test]
    async fn test_send_email_requires_recipient() {
        let (_recorder, services, snapshot, tenant) = ctx_parts();
        let ctx = ActionContext { tenant_id: &tenant, snapshot: &snapshot, services: &services };
        let err = dispatch(ActionKind::SendEmail, &json!({"subject": "x"}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_create_then_update_record() {
        let (_recorder, services, snapshot, tenant) = ctx_parts();
        let ctx = ActionContext { tenant_id: &tenant, snapshot: &snapshot, services: &services };
        let created = dispatch(
            ActionKind::CreateRecord,
            &json!({"collection": "tasks", "data": {"title": "Onboard"}}),
            ctx,
        )
        .await
        .unwrap();
        assert_eq!(created["id"], "rec-1");

        let updated = dispatch(
            ActionKind::UpdateRecord,
            &json!({"collection": "tasks", "id": "rec-1", "data": {"done": true}}),
            ctx,
        )
        .await
        .unwrap();
        assert_eq!(updated["record"]["done"], true);
        assert_eq!(updated["record"]["title"], "Onboard");
    }

    #[tokio::test]
    async fn test_call_api_fails_on_error_status() {
        let (recorder, services, snapshot, tenant) = ctx_parts();
        let ctx = ActionContext { tenant_id: &tenant, snapshot: &snapshot, services: &services };
        let ok = dispatch(
            ActionKind::CallApi,
            &json!({"url": "https://api.example.com/x", "method": "post", "body": {"a": 1}}),
            ctx,
        )
        .await
        .unwrap();
        assert_eq!(ok["status"], 200);
        assert_eq!(recorder.requests.lock().unwrap()[0].method, "POST");

        *recorder.http_status.lock().unwrap() = Some(503);
        let err = dispatch(ActionKind::CallApi, &json!({"url": "https://api.example.com/x"}), ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));

        let err = dispatch(ActionKind::CallApi, &json!({"url": "file:///etc/passwd"}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_send_webhook_signs_when_secret_present() {
        let (recorder, services, snapshot, tenant) = ctx_parts();
        let ctx = ActionContext { tenant_id: &tenant, snapshot: &snapshot, services: &services };
        let out = dispatch(
            ActionKind::SendWebhook,
            &json!({"url": "https://hooks.example.com", "payload": {"k": "v"}, "secret": "s"}),
            ctx,
        )
        .await
        .unwrap();
        assert_eq!(out["signed"], true);
        let requests = recorder.requests.lock().unwrap();
        assert_eq!(requests[0].signing_secret.as_deref(), Some("s"));
        assert_eq!(requests[0].body, Some(json!({"k": "v"})));
    }

    #[test]
    fn test_delay_duration_units() {
        assert_eq!(delay_duration(&json!({"duration": 100})).unwrap(), Duration::from_millis(100));
        assert_eq!(
            delay_duration(&json!({"duration": 2, "unit": "seconds"})).unwrap(),
            Duration::from_secs(2)
        );
        assert_eq!(delay_duration(&json!({"duration": "50"})).unwrap(), Duration::from_millis(50));
        assert!(delay_duration(&json!({})).is_err());
        assert!(delay_duration(&json!({"duration": -1})).is_err());
        assert!(delay_duration(&json!({"duration": 1, "unit": "weeks"})).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_action_sleeps() {
        let (_recorder, services, snapshot, tenant) = ctx_parts();
        let ctx = ActionContext { tenant_id: &tenant, snapshot: &snapshot, services: &services };
        let start = tokio::time::Instant::now();
        let out = dispatch(ActionKind::Delay, &json!({"duration": 250}), ctx).await.unwrap();
        assert_eq!(out["delayedMs"], 250);
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_calculate_value_uses_context_paths() {
        let (_recorder, services, snapshot, tenant) = ctx_parts();
        let ctx = ActionContext { tenant_id: &tenant, snapshot: &snapshot, services: &services };
        let out = dispatch(
            ActionKind::CalculateValue,
            &json!({"expression": "price * order.qty + max(1, 2)"}),
            ctx,
        )
        .await
        .unwrap();
        assert_eq!(out["result"], json!(62));

        let out = dispatch(
            ActionKind::CalculateValue,
            &json!({"expression": "10 / 3", "precision": 2}),
            ctx,
        )
        .await
        .unwrap();
        assert_eq!(out["result"], json!(3.33));

        let err = dispatch(ActionKind::CalculateValue, &json!({"expression": "price +"}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Expression(_)));
    }

    #[test]
    fn test_transform_filter_map_sort() {
        let data = json!([
            {"name": "b", "score": 5, "meta": {"team": "red"}},
            {"name": "a", "score": 9, "meta": {"team": "blue"}},
            {"name": "c", "score": 1, "meta": {"team": "red"}}
        ]);

        let filtered = transform_data(&json!({
            "operation": "filter", "data": data, "field": "meta.team", "value": "red"
        }))
        .unwrap();
        assert_eq!(filtered["count"], 2);

        let filtered = transform_data(&json!({
            "operation": "filter", "data": data, "field": "score",
            "operator": "greater_than", "value": 4
        }))
        .unwrap();
        assert_eq!(filtered["count"], 2);

        let mapped = transform_data(&json!({
            "operation": "map", "data": data, "fields": {"who": "name", "team": "meta.team"}
        }))
        .unwrap();
        assert_eq!(mapped["result"][1], json!({"who": "a", "team": "blue"}));

        let plucked =
            transform_data(&json!({"operation": "map", "data": data, "field": "score"})).unwrap();
        assert_eq!(plucked["result"], json!([5, 9, 1]));

        let sorted = transform_data(&json!({
            "operation": "sort", "data": data, "field": "score", "order": "desc"
        }))
        .unwrap();
        let names: Vec<&str> = sorted["result"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        assert!(transform_data(&json!({"operation": "reduce", "data": []})).is_err());
        assert!(transform_data(&json!({"operation": "sort", "data": "nope"})).is_err());
    }

    #[test]
    fn test_log_message() {
        let out = log_message(&json!({"message": "hello", "level": "WARN"})).unwrap();
        assert_eq!(out, json!({"logged": true, "level": "warn", "message": "hello"}));
        assert!(log_message(&json!({})).is_err());
    }
}
