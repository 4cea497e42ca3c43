//! Delivery outbox for emails and notifications.
//!
//! Action handlers never talk to a mail server or push service directly.
//! `send_email` and `send_notification` append a pending row here and return
//! a receipt; a relay process drains pending rows and marks them sent or
//! failed.

use std::fmt;

use chrono::{DateTime, Utc};
use flowdeck_core::workflow::collaborators::{
    CollaboratorError, CollaboratorFuture, EmailMessage, EmailSender, Notification,
    NotificationSender,
};
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxChannel {
    Email,
    Notification,
}

impl OutboxChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for OutboxChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued delivery.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub channel: OutboxChannel,
    pub payload: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// SQLite outbox implementing both `EmailSender` and `NotificationSender`.
#[derive(Clone)]
pub struct SqliteOutbox {
    pool: DatabasePool,
}

impl SqliteOutbox {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn enqueue<T: Serialize>(
        &self,
        tenant_id: &Uuid,
        channel: OutboxChannel,
        payload: &T,
    ) -> Result<Uuid, CollaboratorError> {
        let id = Uuid::now_v7();
        let payload = serde_json::to_string(payload)
            .map_err(|e| CollaboratorError::Failed(format!("serialize {channel}: {e}")))?;

        sqlx::query(
            r#"INSERT INTO outbox (id, tenant_id, channel, payload, status, created_at)
               VALUES (?, ?, ?, ?, 'pending', ?)"#,
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(channel.as_str())
        .bind(payload)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        tracing::info!(%tenant_id, %channel, outbox_id = %id, "queued for delivery");
        Ok(id)
    }

    /// Pending deliveries, oldest first.
    pub async fn pending(&self, limit: u32) -> Result<Vec<OutboxEntry>, CollaboratorError> {
        let rows = sqlx::query(
            "SELECT * FROM outbox WHERE status = 'pending' ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Mark a pending delivery as sent (`delivered = true`) or failed.
    /// Returns `false` if the entry is unknown or no longer pending.
    pub async fn mark(&self, id: &Uuid, delivered: bool) -> Result<bool, CollaboratorError> {
        let status = if delivered { "sent" } else { "failed" };
        let result = sqlx::query(
            "UPDATE outbox SET status = ?, sent_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(status)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<OutboxEntry, CollaboratorError> {
    let corrupt = |e: String| CollaboratorError::Failed(format!("corrupt outbox row: {e}"));
    let get = |column: &str| -> Result<String, CollaboratorError> {
        row.try_get::<String, _>(column).map_err(|e| corrupt(e.to_string()))
    };

    let channel = match get("channel")?.as_str() {
        "email" => OutboxChannel::Email,
        "notification" => OutboxChannel::Notification,
        other => return Err(corrupt(format!("unknown channel '{other}'"))),
    };
    let sent_at: Option<String> = row.try_get("sent_at").map_err(|e| corrupt(e.to_string()))?;

    Ok(OutboxEntry {
        id: parse_uuid(&get("id")?).map_err(|e| corrupt(e.to_string()))?,
        tenant_id: parse_uuid(&get("tenant_id")?).map_err(|e| corrupt(e.to_string()))?,
        channel,
        payload: serde_json::from_str(&get("payload")?).map_err(|e| corrupt(e.to_string()))?,
        status: get("status")?,
        created_at: parse_datetime(&get("created_at")?).map_err(|e| corrupt(e.to_string()))?,
        sent_at: sent_at
            .as_deref()
            .map(parse_datetime)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?,
    })
}

impl EmailSender for SqliteOutbox {
    fn send_email<'a>(
        &'a self,
        tenant_id: &'a Uuid,
        message: &'a EmailMessage,
    ) -> CollaboratorFuture<'a, Value> {
        Box::pin(async move {
            if message.to.is_empty() {
                return Err(CollaboratorError::Failed("email has no recipients".to_string()));
            }
            let id = self.enqueue(tenant_id, OutboxChannel::Email, message).await?;
            Ok(json!({ "messageId": id.to_string(), "status": "queued" }))
        })
    }
}

impl NotificationSender for SqliteOutbox {
    fn send_notification<'a>(
        &'a self,
        tenant_id: &'a Uuid,
        notification: &'a Notification,
    ) -> CollaboratorFuture<'a, Value> {
        Box::pin(async move {
            let id = self
                .enqueue(tenant_id, OutboxChannel::Notification, notification)
                .await?;
            Ok(json!({
                "notificationId": id.to_string(),
                "recipients": notification.recipients.len(),
            }))
        })
    }
}
