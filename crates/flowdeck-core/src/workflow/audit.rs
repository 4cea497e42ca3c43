//! Append-only audit log.
//!
//! Every entry is written through the repository and mirrored as a `tracing`
//! event at the same level, so operators see the same lifecycle trail in the
//! process logs that tenants see through `getLogs`.

use std::sync::Arc;

use chrono::Utc;
use flowdeck_types::error::RepositoryError;
use flowdeck_types::log::{LogLevel, LogQuery, WorkflowLog};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::WorkflowRepository;

/// Scope of an audit entry.
#[derive(Debug, Clone, Copy)]
pub struct AuditScope {
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub execution_id: Option<Uuid>,
}

impl AuditScope {
    pub fn workflow(tenant_id: Uuid, workflow_id: Uuid) -> Self {
        Self {
            tenant_id,
            workflow_id,
            execution_id: None,
        }
    }

    pub fn execution(tenant_id: Uuid, workflow_id: Uuid, execution_id: Uuid) -> Self {
        Self {
            tenant_id,
            workflow_id,
            execution_id: Some(execution_id),
        }
    }
}

pub struct AuditLogger<R: WorkflowRepository> {
    repo: Arc<R>,
}

impl<R: WorkflowRepository> Clone for AuditLogger<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: WorkflowRepository> AuditLogger<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Append an entry, returning storage failures to the caller.
    pub async fn record(
        &self,
        scope: AuditScope,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Result<WorkflowLog, RepositoryError> {
        let entry = WorkflowLog {
            id: Uuid::now_v7(),
            tenant_id: scope.tenant_id,
            workflow_id: scope.workflow_id,
            execution_id: scope.execution_id,
            level,
            message: message.into(),
            data,
            created_at: Utc::now(),
        };

        mirror(&entry);
        self.repo.append_log(&entry).await?;
        Ok(entry)
    }

    /// Append an entry; a storage failure is reported through tracing only.
    pub async fn log(
        &self,
        scope: AuditScope,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        if let Err(e) = self.record(scope, level, message, data).await {
            tracing::error!(
                workflow_id = %scope.workflow_id,
                error = %e,
                "failed to append audit log entry"
            );
        }
    }

    pub async fn info(&self, scope: AuditScope, message: impl Into<String>, data: Option<Value>) {
        self.log(scope, LogLevel::Info, message, data).await;
    }

    pub async fn warn(&self, scope: AuditScope, message: impl Into<String>, data: Option<Value>) {
        self.log(scope, LogLevel::Warn, message, data).await;
    }

    pub async fn error(&self, scope: AuditScope, message: impl Into<String>, data: Option<Value>) {
        self.log(scope, LogLevel::Error, message, data).await;
    }

    /// Query entries, newest first.
    pub async fn query(
        &self,
        tenant_id: &Uuid,
        query: &LogQuery,
    ) -> Result<Vec<WorkflowLog>, RepositoryError> {
        self.repo.query_logs(tenant_id, query).await
    }
}

fn mirror(entry: &WorkflowLog) {
    let execution_id = entry
        .execution_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    match entry.level {
        LogLevel::Debug => tracing::debug!(
            workflow_id = %entry.workflow_id,
            execution_id = %execution_id,
            "{}", entry.message
        ),
        LogLevel::Info => tracing::info!(
            workflow_id = %entry.workflow_id,
            execution_id = %execution_id,
            "{}", entry.message
        ),
        LogLevel::Warn => tracing::warn!(
            workflow_id = %entry.workflow_id,
            execution_id = %execution_id,
            "{}", entry.message
        ),
        LogLevel::Error => tracing::error!(
            workflow_id = %entry.workflow_id,
            execution_id = %execution_id,
            "{}", entry.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryWorkflowRepository;
    use serde_json::json;

    #[tokio::test]
    async fn test_entries_are_appended_and_queryable() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let audit = AuditLogger::new(repo);
        let tenant = Uuid::now_v7();
        let workflow = Uuid::now_v7();
        let execution = Uuid::now_v7();

        audit
            .info(AuditScope::workflow(tenant, workflow), "workflow created", None)
            .await;
        audit
            .error(
                AuditScope::execution(tenant, workflow, execution),
                "step failed",
                Some(json!({"attempts": 3})),
            )
            .await;

        let all = audit.query(&tenant, &LogQuery::for_workflow(workflow)).await.unwrap();
        assert_eq!(all.len(), 2);
        // Newest first
        assert_eq!(all[0].message, "step failed");
        assert_eq!(all[0].execution_id, Some(execution));

        let errors = audit
            .query(
                &tenant,
                &LogQuery {
                    level: Some(LogLevel::Error),
                    ..LogQuery::for_workflow(workflow)
                },
            )
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data, Some(json!({"attempts": 3})));

        // Other tenants see nothing
        let other = audit
            .query(&Uuid::now_v7(), &LogQuery::for_workflow(workflow))
            .await
            .unwrap();
        assert!(other.is_empty());
    }
}
