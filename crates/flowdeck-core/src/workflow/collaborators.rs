//! External collaborators the action handlers call into.
//!
//! Each collaborator is an object-safe trait returning a boxed future so the
//! engine can hold them as `Arc<dyn ...>` and swap implementations at runtime
//! (SQLite outbox in production, recording fakes in tests).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Boxed future returned by every collaborator method.
pub type CollaboratorFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CollaboratorError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{0}")]
    Failed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// Email / notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipients: Vec<String>,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
}

pub trait EmailSender: Send + Sync {
    /// Queue or send an email; returns a delivery receipt (e.g. `{messageId}`).
    fn send_email<'a>(
        &'a self,
        tenant_id: &'a Uuid,
        message: &'a EmailMessage,
    ) -> CollaboratorFuture<'a, Value>;
}

pub trait NotificationSender: Send + Sync {
    fn send_notification<'a>(
        &'a self,
        tenant_id: &'a Uuid,
        notification: &'a Notification,
    ) -> CollaboratorFuture<'a, Value>;
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Tenant-scoped storage for the platform's non-workflow entities.
pub trait RecordStore: Send + Sync {
    /// Create a record; returns it including its assigned `id`.
    fn create_record<'a>(
        &'a self,
        tenant_id: &'a Uuid,
        collection: &'a str,
        data: &'a Value,
    ) -> CollaboratorFuture<'a, Value>;

    /// Merge `changes` into an existing record; returns the updated record.
    fn update_record<'a>(
        &'a self,
        tenant_id: &'a Uuid,
        collection: &'a str,
        id: &'a str,
        changes: &'a Value,
    ) -> CollaboratorFuture<'a, Value>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
    /// When set, the client signs the serialized body with HMAC-SHA256 and
    /// sends it as `X-Flowdeck-Signature: sha256=<hex>`.
    pub signing_secret: Option<String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
            signing_secret: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, or the raw text as a JSON string.
    #[serde(default)]
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpClient: Send + Sync {
    fn send<'a>(&'a self, request: &'a HttpRequest) -> CollaboratorFuture<'a, HttpResponse>;
}

// ---------------------------------------------------------------------------
// ActionServices
// ---------------------------------------------------------------------------

/// The collaborator set handed to the step runner.
#[derive(Clone)]
pub struct ActionServices {
    pub email: Arc<dyn EmailSender>,
    pub notifications: Arc<dyn NotificationSender>,
    pub records: Arc<dyn RecordStore>,
    pub http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for ActionServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionServices").finish_non_exhaustive()
    }
}
