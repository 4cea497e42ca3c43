//! reqwest-backed [`HttpClient`] for the `call_api` and `send_webhook` actions.

use std::collections::BTreeMap;
use std::time::Duration;

use flowdeck_core::workflow::collaborators::{
    CollaboratorError, CollaboratorFuture, HttpClient, HttpRequest, HttpResponse,
};
use flowdeck_types::config::HttpSettings;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::webhook::{SIGNATURE_HEADER, sign_payload};

/// Outbound HTTP client shared by every execution.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, CollaboratorError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| CollaboratorError::Failed(format!("invalid HTTP method '{}'", request.method)))?;

        let mut builder = self.client.request(method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| CollaboratorError::Failed(format!("serialize body: {e}")))?;
            if let Some(secret) = &request.signing_secret {
                builder = builder.header(SIGNATURE_HEADER, sign_payload(secret, &bytes));
            }
            if !request.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder = builder.body(bytes);
        } else if let Some(secret) = &request.signing_secret {
            builder = builder.header(SIGNATURE_HEADER, sign_payload(secret, b""));
        }

        tracing::debug!(%method, url = %request.url, "outbound HTTP request");
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Transport(format!("request to {} timed out", request.url))
            } else {
                CollaboratorError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        tracing::debug!(status, url = %request.url, "outbound HTTP response");
        Ok(HttpResponse {
            status,
            headers,
            body: parse_body(&text),
        })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send<'a>(&'a self, request: &'a HttpRequest) -> CollaboratorFuture<'a, HttpResponse> {
        Box::pin(self.execute(request))
    }
}

/// JSON when the body parses, the raw text otherwise; empty bodies are null.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
