//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `flowdeck-core` using sqlx with split
//! read/write pools. Enum columns hold their snake_case names; structured
//! values (configs, conditions, contexts, payloads) are JSON text. Every
//! statement is tenant-scoped.

use flowdeck_core::repository::{WorkflowFilter, WorkflowRepository};
use flowdeck_types::error::RepositoryError;
use flowdeck_types::execution::{
    ExecutionQuery, ExecutionStatus, StepExecutionStatus, WorkflowExecution,
    WorkflowStepExecution,
};
use flowdeck_types::log::{LogLevel, LogQuery, WorkflowLog};
use flowdeck_types::schedule::WorkflowSchedule;
use flowdeck_types::workflow::{
    ActionKind, StepType, TriggerKind, VariableType, Workflow, WorkflowStep, WorkflowVariable,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

/// SQLite-backed implementation of `WorkflowRepository`.
#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize: {e}")))
}

fn from_json<T: DeserializeOwned>(text: &str, column: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(text)
        .map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

fn opt_json<T: DeserializeOwned>(
    text: Option<String>,
    column: &str,
) -> Result<Option<T>, RepositoryError> {
    text.as_deref().map(|s| from_json(s, column)).transpose()
}

fn parse_enum<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T, RepositoryError> {
    s.parse::<T>().map_err(RepositoryError::Query)
}

fn parse_step_type(s: &str) -> Result<StepType, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid step type: {s}")))
}

fn opt_datetime(s: Option<String>) -> Result<Option<chrono::DateTime<chrono::Utc>>, RepositoryError> {
    s.as_deref().map(parse_datetime).transpose()
}

/// The non-null column value used for variable uniqueness.
fn variable_scope(workflow_id: Option<&Uuid>) -> String {
    workflow_id.map(Uuid::to_string).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(query_error)?;
    let trigger: String = row.try_get("trigger_kind").map_err(query_error)?;
    let trigger_config: String = row.try_get("trigger_config").map_err(query_error)?;
    let tags: String = row.try_get("tags").map_err(query_error)?;
    let metadata: String = row.try_get("metadata").map_err(query_error)?;
    let version: i64 = row.try_get("version").map_err(query_error)?;
    let created_at: String = row.try_get("created_at").map_err(query_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(query_error)?;

    Ok(Workflow {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        name: row.try_get("name").map_err(query_error)?,
        description: row.try_get("description").map_err(query_error)?,
        trigger: parse_enum::<TriggerKind>(&trigger)?,
        trigger_config: from_json(&trigger_config, "trigger_config")?,
        is_active: row.try_get("is_active").map_err(query_error)?,
        version: version as u32,
        tags: from_json(&tags, "tags")?,
        metadata: from_json(&metadata, "metadata")?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<WorkflowStep, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(query_error)?;
    let step_type: String = row.try_get("step_type").map_err(query_error)?;
    let action: Option<String> = row.try_get("action").map_err(query_error)?;
    let config: String = row.try_get("config").map_err(query_error)?;
    let condition: Option<String> = row.try_get("condition").map_err(query_error)?;
    let retry_policy: String = row.try_get("retry_policy").map_err(query_error)?;
    let timeout_ms: Option<i64> = row.try_get("timeout_ms").map_err(query_error)?;
    let dependencies: String = row.try_get("dependencies").map_err(query_error)?;

    Ok(WorkflowStep {
        id: parse_uuid(&id)?,
        workflow_id: parse_uuid(&workflow_id)?,
        name: row.try_get("name").map_err(query_error)?,
        step_type: parse_step_type(&step_type)?,
        action: action.as_deref().map(parse_enum::<ActionKind>).transpose()?,
        config: from_json(&config, "config")?,
        position: row.try_get("position").map_err(query_error)?,
        condition: opt_json(condition, "condition")?,
        retry_policy: from_json(&retry_policy, "retry_policy")?,
        timeout_ms: timeout_ms.map(|t| t as u64),
        dependencies: from_json(&dependencies, "dependencies")?,
        is_active: row.try_get("is_active").map_err(query_error)?,
    })
}

fn variable_from_row(row: &SqliteRow) -> Result<WorkflowVariable, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(query_error)?;
    let workflow_id: Option<String> = row.try_get("workflow_id").map_err(query_error)?;
    let value: String = row.try_get("value").map_err(query_error)?;
    let var_type: String = row.try_get("var_type").map_err(query_error)?;
    let created_at: String = row.try_get("created_at").map_err(query_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(query_error)?;

    Ok(WorkflowVariable {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        workflow_id: workflow_id.as_deref().map(parse_uuid).transpose()?,
        name: row.try_get("name").map_err(query_error)?,
        value: from_json(&value, "value")?,
        var_type: parse_enum::<VariableType>(&var_type)?,
        is_secret: row.try_get("is_secret").map_err(query_error)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(query_error)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(query_error)?;
    let version: i64 = row.try_get("workflow_version").map_err(query_error)?;
    let status: String = row.try_get("status").map_err(query_error)?;
    let trigger_data: String = row.try_get("trigger_data").map_err(query_error)?;
    let context: String = row.try_get("context").map_err(query_error)?;
    let started_at: String = row.try_get("started_at").map_err(query_error)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(query_error)?;
    let duration_ms: Option<i64> = row.try_get("duration_ms").map_err(query_error)?;

    Ok(WorkflowExecution {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        workflow_id: parse_uuid(&workflow_id)?,
        workflow_version: version as u32,
        status: parse_enum::<ExecutionStatus>(&status)?,
        trigger_data: from_json(&trigger_data, "trigger_data")?,
        context: from_json(&context, "context")?,
        started_at: parse_datetime(&started_at)?,
        completed_at: opt_datetime(completed_at)?,
        duration_ms: duration_ms.map(|d| d as u64),
        error: row.try_get("error").map_err(query_error)?,
    })
}

fn step_execution_from_row(row: &SqliteRow) -> Result<WorkflowStepExecution, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(query_error)?;
    let execution_id: String = row.try_get("execution_id").map_err(query_error)?;
    let step_id: String = row.try_get("step_id").map_err(query_error)?;
    let status: String = row.try_get("status").map_err(query_error)?;
    let input: Option<String> = row.try_get("input").map_err(query_error)?;
    let output: Option<String> = row.try_get("output").map_err(query_error)?;
    let attempts: i64 = row.try_get("attempts").map_err(query_error)?;
    let started_at: String = row.try_get("started_at").map_err(query_error)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(query_error)?;

    Ok(WorkflowStepExecution {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        execution_id: parse_uuid(&execution_id)?,
        step_id: parse_uuid(&step_id)?,
        step_name: row.try_get("step_name").map_err(query_error)?,
        status: parse_enum::<StepExecutionStatus>(&status)?,
        input: opt_json(input, "input")?,
        output: opt_json(output, "output")?,
        attempts: attempts as u32,
        started_at: parse_datetime(&started_at)?,
        completed_at: opt_datetime(completed_at)?,
        error: row.try_get("error").map_err(query_error)?,
    })
}

fn schedule_from_row(row: &SqliteRow) -> Result<WorkflowSchedule, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(query_error)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(query_error)?;
    let last_run_at: Option<String> = row.try_get("last_run_at").map_err(query_error)?;
    let next_run_at: Option<String> = row.try_get("next_run_at").map_err(query_error)?;
    let created_at: String = row.try_get("created_at").map_err(query_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(query_error)?;

    Ok(WorkflowSchedule {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        workflow_id: parse_uuid(&workflow_id)?,
        cron_expression: row.try_get("cron_expression").map_err(query_error)?,
        timezone: row.try_get("timezone").map_err(query_error)?,
        is_active: row.try_get("is_active").map_err(query_error)?,
        last_run_at: opt_datetime(last_run_at)?,
        next_run_at: opt_datetime(next_run_at)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<WorkflowLog, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(query_error)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(query_error)?;
    let execution_id: Option<String> = row.try_get("execution_id").map_err(query_error)?;
    let level: String = row.try_get("level").map_err(query_error)?;
    let data: Option<String> = row.try_get("data").map_err(query_error)?;
    let created_at: String = row.try_get("created_at").map_err(query_error)?;

    Ok(WorkflowLog {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        workflow_id: parse_uuid(&workflow_id)?,
        execution_id: execution_id.as_deref().map(parse_uuid).transpose()?,
        level: parse_enum::<LogLevel>(&level)?,
        message: row.try_get("message").map_err(query_error)?,
        data: opt_json(data, "data")?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn collect<T>(
    rows: &[SqliteRow],
    map: fn(&SqliteRow) -> Result<T, RepositoryError>,
) -> Result<Vec<T>, RepositoryError> {
    rows.iter().map(map).collect()
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflows
               (id, tenant_id, name, description, trigger_kind, trigger_config, is_active,
                version, tags, metadata, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.tenant_id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.trigger.as_str())
        .bind(to_json(&workflow.trigger_config)?)
        .bind(workflow.is_active)
        .bind(workflow.version as i64)
        .bind(to_json(&workflow.tags)?)
        .bind(to_json(&workflow.metadata)?)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("workflow {} already exists", workflow.id))
            }
            other => query_error(other),
        })?;

        Ok(())
    }

    async fn get_workflow(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn list_workflows(
        &self,
        tenant_id: &Uuid,
        filter: &WorkflowFilter,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflows
               WHERE tenant_id = ?
                 AND (? IS NULL OR trigger_kind = ?)
                 AND (? IS NULL OR is_active = ?)
               ORDER BY name ASC, id ASC"#,
        )
        .bind(tenant_id.to_string())
        .bind(filter.trigger.map(|t| t.as_str()))
        .bind(filter.trigger.map(|t| t.as_str()))
        .bind(filter.is_active)
        .bind(filter.is_active)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        collect(&rows, workflow_from_row)
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflows SET
                 name = ?, description = ?, trigger_kind = ?, trigger_config = ?,
                 is_active = ?, version = ?, tags = ?, metadata = ?, updated_at = ?
               WHERE id = ? AND tenant_id = ?"#,
        )
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.trigger.as_str())
        .bind(to_json(&workflow.trigger_config)?)
        .bind(workflow.is_active)
        .bind(workflow.version as i64)
        .bind(to_json(&workflow.tags)?)
        .bind(to_json(&workflow.metadata)?)
        .bind(format_datetime(&workflow.updated_at))
        .bind(workflow.id.to_string())
        .bind(workflow.tenant_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_workflow(&self, tenant_id: &Uuid, id: &Uuid) -> Result<bool, RepositoryError> {
        // Steps, variables and schedules cascade through foreign keys.
        let result = sqlx::query("DELETE FROM workflows WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn create_step(&self, tenant_id: &Uuid, step: &WorkflowStep) -> Result<(), RepositoryError> {
        let owned: Option<(String,)> =
            sqlx::query_as("SELECT id FROM workflows WHERE id = ? AND tenant_id = ?")
                .bind(step.workflow_id.to_string())
                .bind(tenant_id.to_string())
                .fetch_optional(&self.pool.writer)
                .await
                .map_err(query_error)?;
        if owned.is_none() {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query(
            r#"INSERT INTO workflow_steps
               (id, tenant_id, workflow_id, name, step_type, action, config, position,
                condition, retry_policy, timeout_ms, dependencies, is_active)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(tenant_id.to_string())
        .bind(step.workflow_id.to_string())
        .bind(&step.name)
        .bind(step.step_type.as_str())
        .bind(step.action.map(|a| a.as_str()))
        .bind(to_json(&step.config)?)
        .bind(step.position)
        .bind(step.condition.as_ref().map(to_json).transpose()?)
        .bind(to_json(&step.retry_policy)?)
        .bind(step.timeout_ms.map(|t| t as i64))
        .bind(to_json(&step.dependencies)?)
        .bind(step.is_active)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("step {} already exists", step.id))
            }
            other => query_error(other),
        })?;

        Ok(())
    }

    async fn update_step(&self, tenant_id: &Uuid, step: &WorkflowStep) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_steps SET
                 name = ?, step_type = ?, action = ?, config = ?, position = ?,
                 condition = ?, retry_policy = ?, timeout_ms = ?, dependencies = ?, is_active = ?
               WHERE id = ? AND tenant_id = ?"#,
        )
        .bind(&step.name)
        .bind(step.step_type.as_str())
        .bind(step.action.map(|a| a.as_str()))
        .bind(to_json(&step.config)?)
        .bind(step.position)
        .bind(step.condition.as_ref().map(to_json).transpose()?)
        .bind(to_json(&step.retry_policy)?)
        .bind(step.timeout_ms.map(|t| t as i64))
        .bind(to_json(&step.dependencies)?)
        .bind(step.is_active)
        .bind(step.id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_step(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        step_id: &Uuid,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM workflow_steps WHERE id = ? AND workflow_id = ? AND tenant_id = ?")
                .bind(step_id.to_string())
                .bind(workflow_id.to_string())
                .bind(tenant_id.to_string())
                .execute(&self.pool.writer)
                .await
                .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_steps(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowStep>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_steps WHERE workflow_id = ? AND tenant_id = ? ORDER BY position ASC, id ASC",
        )
        .bind(workflow_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        collect(&rows, step_from_row)
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    async fn upsert_variable(&self, variable: &WorkflowVariable) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_variables
               (id, tenant_id, workflow_id, scope, name, value, var_type, is_secret, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(tenant_id, scope, name) DO UPDATE SET
                 id = excluded.id,
                 value = excluded.value,
                 var_type = excluded.var_type,
                 is_secret = excluded.is_secret,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at"#,
        )
        .bind(variable.id.to_string())
        .bind(variable.tenant_id.to_string())
        .bind(variable.workflow_id.map(|id| id.to_string()))
        .bind(variable_scope(variable.workflow_id.as_ref()))
        .bind(&variable.name)
        .bind(to_json(&variable.value)?)
        .bind(variable.var_type.as_str())
        .bind(variable.is_secret)
        .bind(format_datetime(&variable.created_at))
        .bind(format_datetime(&variable.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn list_variables(
        &self,
        tenant_id: &Uuid,
        workflow_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowVariable>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_variables WHERE tenant_id = ? AND scope = ? ORDER BY name ASC",
        )
        .bind(tenant_id.to_string())
        .bind(variable_scope(workflow_id))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        collect(&rows, variable_from_row)
    }

    async fn delete_variable(
        &self,
        tenant_id: &Uuid,
        workflow_id: Option<&Uuid>,
        name: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM workflow_variables WHERE tenant_id = ? AND scope = ? AND name = ?",
        )
        .bind(tenant_id.to_string())
        .bind(variable_scope(workflow_id))
        .bind(name)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, tenant_id, workflow_id, workflow_version, status, trigger_data, context,
                started_at, completed_at, duration_ms, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.tenant_id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.workflow_version as i64)
        .bind(execution.status.as_str())
        .bind(to_json(&execution.trigger_data)?)
        .bind(to_json(&execution.context)?)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(execution.duration_ms.map(|d| d as i64))
        .bind(&execution.error)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        // Only running rows are updatable, so a terminal status never regresses.
        let result = sqlx::query(
            r#"UPDATE workflow_executions SET
                 status = ?, context = ?, completed_at = ?, duration_ms = ?, error = ?
               WHERE id = ? AND tenant_id = ? AND status = 'running'"#,
        )
        .bind(execution.status.as_str())
        .bind(to_json(&execution.context)?)
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(execution.duration_ms.map(|d| d as i64))
        .bind(&execution.error)
        .bind(execution.id.to_string())
        .bind(execution.tenant_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM workflow_executions WHERE id = ? AND tenant_id = ?")
                .bind(execution.id.to_string())
                .bind(execution.tenant_id.to_string())
                .fetch_optional(&self.pool.writer)
                .await
                .map_err(query_error)?;
        match current {
            Some((status,)) => Err(RepositoryError::Conflict(format!(
                "execution {} is already {status}",
                execution.id
            ))),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_execution(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list_executions(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        query: &ExecutionQuery,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let status = query.status.map(|s| s.as_str());
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_executions
               WHERE tenant_id = ? AND workflow_id = ? AND (? IS NULL OR status = ?)
               ORDER BY started_at DESC, id DESC
               LIMIT ? OFFSET ?"#,
        )
        .bind(tenant_id.to_string())
        .bind(workflow_id.to_string())
        .bind(status)
        .bind(status)
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        collect(&rows, execution_from_row)
    }

    // -----------------------------------------------------------------------
    // Step executions
    // -----------------------------------------------------------------------

    async fn create_step_execution(&self, step: &WorkflowStepExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_step_executions
               (id, tenant_id, execution_id, step_id, step_name, status, input, output,
                attempts, started_at, completed_at, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(step.tenant_id.to_string())
        .bind(step.execution_id.to_string())
        .bind(step.step_id.to_string())
        .bind(&step.step_name)
        .bind(step.status.as_str())
        .bind(step.input.as_ref().map(to_json).transpose()?)
        .bind(step.output.as_ref().map(to_json).transpose()?)
        .bind(step.attempts as i64)
        .bind(format_datetime(&step.started_at))
        .bind(step.completed_at.as_ref().map(format_datetime))
        .bind(&step.error)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn update_step_execution(&self, step: &WorkflowStepExecution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_step_executions SET
                 status = ?, input = ?, output = ?, attempts = ?, completed_at = ?, error = ?
               WHERE id = ? AND tenant_id = ?"#,
        )
        .bind(step.status.as_str())
        .bind(step.input.as_ref().map(to_json).transpose()?)
        .bind(step.output.as_ref().map(to_json).transpose()?)
        .bind(step.attempts as i64)
        .bind(step.completed_at.as_ref().map(format_datetime))
        .bind(&step.error)
        .bind(step.id.to_string())
        .bind(step.tenant_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_step_executions(
        &self,
        tenant_id: &Uuid,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowStepExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_step_executions
               WHERE execution_id = ? AND tenant_id = ?
               ORDER BY started_at ASC, id ASC"#,
        )
        .bind(execution_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        collect(&rows, step_execution_from_row)
    }

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    async fn create_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_schedules
               (id, tenant_id, workflow_id, cron_expression, timezone, is_active,
                last_run_at, next_run_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.tenant_id.to_string())
        .bind(schedule.workflow_id.to_string())
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.is_active)
        .bind(schedule.last_run_at.as_ref().map(format_datetime))
        .bind(schedule.next_run_at.as_ref().map(format_datetime))
        .bind(format_datetime(&schedule.created_at))
        .bind(format_datetime(&schedule.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            // The workflow row is gone (or never existed).
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
            other => query_error(other),
        })?;

        Ok(())
    }

    async fn update_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_schedules SET
                 cron_expression = ?, timezone = ?, is_active = ?, last_run_at = ?,
                 next_run_at = ?, updated_at = ?
               WHERE id = ? AND tenant_id = ?"#,
        )
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.is_active)
        .bind(schedule.last_run_at.as_ref().map(format_datetime))
        .bind(schedule.next_run_at.as_ref().map(format_datetime))
        .bind(format_datetime(&schedule.updated_at))
        .bind(schedule.id.to_string())
        .bind(schedule.tenant_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_schedule(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> Result<Option<WorkflowSchedule>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_schedules WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn list_schedules(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_schedules WHERE tenant_id = ? AND workflow_id = ? ORDER BY created_at ASC",
        )
        .bind(tenant_id.to_string())
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        collect(&rows, schedule_from_row)
    }

    async fn list_active_schedules(&self) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_schedules WHERE is_active = 1 ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        collect(&rows, schedule_from_row)
    }

    async fn delete_schedule(&self, tenant_id: &Uuid, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_schedules WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Audit log
    // -----------------------------------------------------------------------

    async fn append_log(&self, entry: &WorkflowLog) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_logs
               (id, tenant_id, workflow_id, execution_id, level, message, data, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.tenant_id.to_string())
        .bind(entry.workflow_id.to_string())
        .bind(entry.execution_id.map(|id| id.to_string()))
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(entry.data.as_ref().map(to_json).transpose()?)
        .bind(format_datetime(&entry.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn query_logs(
        &self,
        tenant_id: &Uuid,
        query: &LogQuery,
    ) -> Result<Vec<WorkflowLog>, RepositoryError> {
        let workflow_id = query.workflow_id.map(|id| id.to_string());
        let execution_id = query.execution_id.map(|id| id.to_string());
        let level = query.level.map(|l| l.as_str());
        let since = query.since.as_ref().map(format_datetime);
        let until = query.until.as_ref().map(format_datetime);

        let rows = sqlx::query(
            r#"SELECT * FROM workflow_logs
               WHERE tenant_id = ?
                 AND (? IS NULL OR workflow_id = ?)
                 AND (? IS NULL OR execution_id = ?)
                 AND (? IS NULL OR level = ?)
                 AND (? IS NULL OR created_at >= ?)
                 AND (? IS NULL OR created_at <= ?)
               ORDER BY created_at DESC, id DESC
               LIMIT ? OFFSET ?"#,
        )
        .bind(tenant_id.to_string())
        .bind(&workflow_id)
        .bind(&workflow_id)
        .bind(&execution_id)
        .bind(&execution_id)
        .bind(level)
        .bind(level)
        .bind(&since)
        .bind(&since)
        .bind(&until)
        .bind(&until)
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        collect(&rows, log_from_row)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_pool;
    use chrono::{Duration, Utc};
    use flowdeck_types::execution::ExecutionContextRecord;
    use flowdeck_types::workflow::{Condition, ConditionOperator, RetryPolicy};
    use serde_json::json;
    use std::collections::HashMap;

    fn sample_workflow(tenant_id: Uuid, name: &str) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: Uuid::now_v7(),
            tenant_id,
            name: name.to_string(),
            description: Some("onboarding".to_string()),
            trigger: TriggerKind::Event,
            trigger_config: json!({"eventType": "member.joined"}),
            is_active: true,
            version: 1,
            tags: vec!["community".to_string()],
            metadata: HashMap::from([("owner".to_string(), json!("ops"))]),
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_step(workflow_id: Uuid, position: i32) -> WorkflowStep {
        WorkflowStep {
            id: Uuid::now_v7(),
            workflow_id,
            name: format!("step-{position}"),
            step_type: StepType::Action,
            action: Some(ActionKind::SendEmail),
            config: json!({"to": "{{trigger.email}}", "subject": "Welcome"}),
            position,
            condition: Some(Condition {
                operator: ConditionOperator::Exists,
                left: json!("{{trigger.email}}"),
                right: json!(null),
            }),
            retry_policy: RetryPolicy {
                max_attempts: 5,
                backoff_multiplier: 0.5,
            },
            timeout_ms: Some(10_000),
            dependencies: vec![],
            is_active: true,
        }
    }

    fn sample_variable(tenant_id: Uuid, workflow_id: Option<Uuid>, name: &str) -> WorkflowVariable {
        let now = Utc::now();
        WorkflowVariable {
            id: Uuid::now_v7(),
            tenant_id,
            workflow_id,
            name: name.to_string(),
            value: json!("value"),
            var_type: VariableType::String,
            is_secret: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_execution(tenant_id: Uuid, workflow_id: Uuid) -> WorkflowExecution {
        WorkflowExecution {
            id: Uuid::now_v7(),
            tenant_id,
            workflow_id,
            workflow_version: 1,
            status: ExecutionStatus::Running,
            trigger_data: json!({"email": "a@example.com"}),
            context: ExecutionContextRecord::default(),
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error: None,
        }
    }

    fn sample_log(tenant_id: Uuid, workflow_id: Uuid, level: LogLevel) -> WorkflowLog {
        WorkflowLog {
            id: Uuid::now_v7(),
            tenant_id,
            workflow_id,
            execution_id: None,
            level,
            message: format!("{level} entry"),
            data: Some(json!({"k": 1})),
            created_at: Utc::now(),
        }
    }

    // -- Workflows --

    #[tokio::test]
    async fn test_create_and_get_workflow() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let wf = sample_workflow(tenant, "welcome");

        repo.create_workflow(&wf).await.unwrap();

        let loaded = repo.get_workflow(&tenant, &wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "welcome");
        assert_eq!(loaded.trigger, TriggerKind::Event);
        assert_eq!(loaded.trigger_config["eventType"], "member.joined");
        assert_eq!(loaded.tags, vec!["community".to_string()]);
        assert_eq!(loaded.metadata["owner"], json!("ops"));
        assert_eq!(
            format_datetime(&loaded.created_at),
            format_datetime(&wf.created_at)
        );

        // Other tenants see nothing.
        assert!(repo.get_workflow(&Uuid::now_v7(), &wf.id).await.unwrap().is_none());

        let dup = repo.create_workflow(&wf).await.unwrap_err();
        assert!(matches!(dup, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_workflows_filtered() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();

        let event = sample_workflow(tenant, "beta");
        let mut manual = sample_workflow(tenant, "alpha");
        manual.trigger = TriggerKind::Manual;
        let mut inactive = sample_workflow(tenant, "gamma");
        inactive.is_active = false;
        for wf in [&event, &manual, &inactive] {
            repo.create_workflow(wf).await.unwrap();
        }
        repo.create_workflow(&sample_workflow(Uuid::now_v7(), "other"))
            .await
            .unwrap();

        let all = repo
            .list_workflows(&tenant, &WorkflowFilter::default())
            .await
            .unwrap();
        let names: Vec<&str> = all.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);

        let active_events = repo
            .list_workflows(
                &tenant,
                &WorkflowFilter {
                    trigger: Some(TriggerKind::Event),
                    is_active: Some(true),
                },
            )
            .await
            .unwrap();
        assert_eq!(active_events.len(), 1);
        assert_eq!(active_events[0].id, event.id);
    }

    #[tokio::test]
    async fn test_update_workflow() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let mut wf = sample_workflow(tenant, "welcome");
        repo.create_workflow(&wf).await.unwrap();

        wf.version = 2;
        wf.is_active = false;
        repo.update_workflow(&wf).await.unwrap();
        let loaded = repo.get_workflow(&tenant, &wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert!(!loaded.is_active);

        let mut missing = sample_workflow(tenant, "missing");
        missing.id = Uuid::now_v7();
        assert!(matches!(
            repo.update_workflow(&missing).await.unwrap_err(),
            RepositoryError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_delete_workflow_cascades_definition_only() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let wf = sample_workflow(tenant, "doomed");
        repo.create_workflow(&wf).await.unwrap();
        repo.create_step(&tenant, &sample_step(wf.id, 1)).await.unwrap();
        repo.upsert_variable(&sample_variable(tenant, Some(wf.id), "apiKey"))
            .await
            .unwrap();
        let now = Utc::now();
        repo.create_schedule(&WorkflowSchedule {
            id: Uuid::now_v7(),
            tenant_id: tenant,
            workflow_id: wf.id,
            cron_expression: "0 0 9 * * *".to_string(),
            timezone: "UTC".to_string(),
            is_active: true,
            last_run_at: None,
            next_run_at: Some(now),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
        let execution = sample_execution(tenant, wf.id);
        repo.create_execution(&execution).await.unwrap();
        repo.append_log(&sample_log(tenant, wf.id, LogLevel::Info))
            .await
            .unwrap();

        assert!(repo.delete_workflow(&tenant, &wf.id).await.unwrap());
        assert!(!repo.delete_workflow(&tenant, &wf.id).await.unwrap());

        assert!(repo.list_steps(&tenant, &wf.id).await.unwrap().is_empty());
        assert!(repo.list_variables(&tenant, Some(&wf.id)).await.unwrap().is_empty());
        assert!(repo.list_schedules(&tenant, &wf.id).await.unwrap().is_empty());
        assert!(repo.get_execution(&tenant, &execution.id).await.unwrap().is_some());
        let logs = repo
            .query_logs(&tenant, &LogQuery::for_workflow(wf.id))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
    }

    // -- Steps --

    #[tokio::test]
    async fn test_step_roundtrip_and_ordering() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let wf = sample_workflow(tenant, "steps");
        repo.create_workflow(&wf).await.unwrap();

        let first = sample_step(wf.id, 1);
        let mut second = sample_step(wf.id, 2);
        second.step_type = StepType::Delay;
        second.action = None;
        second.condition = None;
        second.dependencies = vec![first.id];
        repo.create_step(&tenant, &second).await.unwrap();
        repo.create_step(&tenant, &first).await.unwrap();

        let steps = repo.list_steps(&tenant, &wf.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].id, first.id);
        assert_eq!(steps[0].action, Some(ActionKind::SendEmail));
        assert_eq!(steps[0].condition, first.condition);
        assert_eq!(steps[0].retry_policy.max_attempts, 5);
        assert_eq!(steps[0].timeout_ms, Some(10_000));
        assert_eq!(steps[1].step_type, StepType::Delay);
        assert_eq!(steps[1].action, None);
        assert_eq!(steps[1].dependencies, vec![first.id]);

        // Wrong tenant cannot attach steps.
        let foreign = sample_step(wf.id, 3);
        assert!(matches!(
            repo.create_step(&Uuid::now_v7(), &foreign).await.unwrap_err(),
            RepositoryError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete_step() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let wf = sample_workflow(tenant, "steps");
        repo.create_workflow(&wf).await.unwrap();
        let mut step = sample_step(wf.id, 1);
        repo.create_step(&tenant, &step).await.unwrap();

        step.name = "renamed".to_string();
        step.is_active = false;
        repo.update_step(&tenant, &step).await.unwrap();
        let loaded = repo.list_steps(&tenant, &wf.id).await.unwrap();
        assert_eq!(loaded[0].name, "renamed");
        assert!(!loaded[0].is_active);

        assert!(repo.delete_step(&tenant, &wf.id, &step.id).await.unwrap());
        assert!(!repo.delete_step(&tenant, &wf.id, &step.id).await.unwrap());
    }

    // -- Variables --

    #[tokio::test]
    async fn test_variable_scopes_and_upsert() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let wf = sample_workflow(tenant, "vars");
        repo.create_workflow(&wf).await.unwrap();

        repo.upsert_variable(&sample_variable(tenant, None, "region"))
            .await
            .unwrap();
        repo.upsert_variable(&sample_variable(tenant, Some(wf.id), "region"))
            .await
            .unwrap();

        let mut replacement = sample_variable(tenant, None, "region");
        replacement.value = json!(42);
        replacement.var_type = VariableType::Number;
        repo.upsert_variable(&replacement).await.unwrap();

        let global = repo.list_variables(&tenant, None).await.unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].value, json!(42));
        assert_eq!(global[0].var_type, VariableType::Number);
        assert!(global[0].workflow_id.is_none());

        let scoped = repo.list_variables(&tenant, Some(&wf.id)).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].value, json!("value"));

        assert!(repo.delete_variable(&tenant, None, "region").await.unwrap());
        assert!(!repo.delete_variable(&tenant, None, "region").await.unwrap());
        assert_eq!(repo.list_variables(&tenant, Some(&wf.id)).await.unwrap().len(), 1);
    }

    // -- Executions --

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let workflow_id = Uuid::now_v7();
        let mut execution = sample_execution(tenant, workflow_id);
        repo.create_execution(&execution).await.unwrap();

        execution.context.step_results.insert("a".to_string(), json!({"ok": true}));
        repo.update_execution(&execution).await.unwrap();

        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(Utc::now());
        execution.duration_ms = Some(12);
        repo.update_execution(&execution).await.unwrap();

        let loaded = repo.get_execution(&tenant, &execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.duration_ms, Some(12));
        assert_eq!(loaded.context.step_results["a"], json!({"ok": true}));
        assert_eq!(loaded.trigger_data["email"], "a@example.com");

        // Terminal rows are frozen.
        execution.status = ExecutionStatus::Failed;
        let err = repo.update_execution(&execution).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let missing = sample_execution(tenant, workflow_id);
        assert!(matches!(
            repo.update_execution(&missing).await.unwrap_err(),
            RepositoryError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_list_executions_newest_first_with_filter() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let workflow_id = Uuid::now_v7();
        let base = Utc::now();

        for i in 0..4 {
            let mut execution = sample_execution(tenant, workflow_id);
            execution.started_at = base + Duration::seconds(i);
            if i % 2 == 0 {
                execution.status = ExecutionStatus::Failed;
            }
            repo.create_execution(&execution).await.unwrap();
        }

        let all = repo
            .list_executions(&tenant, &workflow_id, &ExecutionQuery::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        assert!(all[0].started_at > all[3].started_at);

        let failed = repo
            .list_executions(
                &tenant,
                &workflow_id,
                &ExecutionQuery {
                    status: Some(ExecutionStatus::Failed),
                    limit: 1,
                    offset: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].started_at, all[3].started_at);
    }

    #[tokio::test]
    async fn test_step_executions() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let execution = sample_execution(tenant, Uuid::now_v7());
        repo.create_execution(&execution).await.unwrap();

        let mut record = WorkflowStepExecution {
            id: Uuid::now_v7(),
            tenant_id: tenant,
            execution_id: execution.id,
            step_id: Uuid::now_v7(),
            step_name: "greet".to_string(),
            status: StepExecutionStatus::Running,
            input: Some(json!({"to": "a@example.com"})),
            output: None,
            attempts: 1,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };
        repo.create_step_execution(&record).await.unwrap();

        record.status = StepExecutionStatus::Completed;
        record.attempts = 2;
        record.output = Some(json!({"messageId": "m1"}));
        record.completed_at = Some(Utc::now());
        repo.update_step_execution(&record).await.unwrap();

        let steps = repo.list_step_executions(&tenant, &execution.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepExecutionStatus::Completed);
        assert_eq!(steps[0].attempts, 2);
        assert_eq!(steps[0].output, Some(json!({"messageId": "m1"})));
        assert!(
            repo.list_step_executions(&Uuid::now_v7(), &execution.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    // -- Schedules --

    #[tokio::test]
    async fn test_schedule_crud_and_active_listing() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let wf = sample_workflow(tenant, "nightly");
        repo.create_workflow(&wf).await.unwrap();
        let now = Utc::now();
        let mut schedule = WorkflowSchedule {
            id: Uuid::now_v7(),
            tenant_id: tenant,
            workflow_id: wf.id,
            cron_expression: "0 0 2 * * *".to_string(),
            timezone: "+02:00".to_string(),
            is_active: true,
            last_run_at: None,
            next_run_at: Some(now + Duration::hours(1)),
            created_at: now,
            updated_at: now,
        };
        repo.create_schedule(&schedule).await.unwrap();
        assert_eq!(repo.list_active_schedules().await.unwrap().len(), 1);

        schedule.is_active = false;
        schedule.last_run_at = Some(now);
        repo.update_schedule(&schedule).await.unwrap();
        let loaded = repo.get_schedule(&tenant, &schedule.id).await.unwrap().unwrap();
        assert!(!loaded.is_active);
        assert!(loaded.last_run_at.is_some());
        assert_eq!(loaded.timezone, "+02:00");
        assert!(repo.list_active_schedules().await.unwrap().is_empty());

        assert!(repo.delete_schedule(&tenant, &schedule.id).await.unwrap());
        assert!(repo.get_schedule(&tenant, &schedule.id).await.unwrap().is_none());

        // Schedules for unknown workflows are rejected by the foreign key.
        schedule.id = Uuid::now_v7();
        schedule.workflow_id = Uuid::now_v7();
        assert!(matches!(
            repo.create_schedule(&schedule).await.unwrap_err(),
            RepositoryError::NotFound
        ));
    }

    // -- Logs --

    #[tokio::test]
    async fn test_query_logs_filters() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant = Uuid::now_v7();
        let workflow_id = Uuid::now_v7();
        let execution_id = Uuid::now_v7();

        let base = Utc::now();
        for (i, level) in [LogLevel::Info, LogLevel::Warn, LogLevel::Error].into_iter().enumerate() {
            let mut entry = sample_log(tenant, workflow_id, level);
            entry.created_at = base + Duration::milliseconds(i as i64 * 10);
            if level != LogLevel::Info {
                entry.execution_id = Some(execution_id);
            }
            repo.append_log(&entry).await.unwrap();
        }

        let all = repo
            .query_logs(&tenant, &LogQuery::for_workflow(workflow_id))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].level, LogLevel::Error);
        assert_eq!(all[2].data, Some(json!({"k": 1})));

        let errors = repo
            .query_logs(
                &tenant,
                &LogQuery {
                    execution_id: Some(execution_id),
                    level: Some(LogLevel::Error),
                    ..LogQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);

        let windowed = repo
            .query_logs(
                &tenant,
                &LogQuery {
                    since: Some(base + Duration::milliseconds(5)),
                    ..LogQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(windowed.len(), 2);

        assert!(
            repo.query_logs(&Uuid::now_v7(), &LogQuery::default())
                .await
                .unwrap()
                .is_empty()
        );
    }
}
