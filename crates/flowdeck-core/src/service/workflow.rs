//! Workflow management service.
//!
//! `WorkflowService` is the façade over the definition store, the execution
//! engine, the scheduler and the trigger router. Every definition mutation
//! (workflow fields, steps, workflow-scoped variables) bumps the workflow's
//! version and appends an audit entry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use flowdeck_types::error::RepositoryError;
use flowdeck_types::event::WorkflowEvent;
use flowdeck_types::execution::{ExecutionDetail, ExecutionQuery, WorkflowExecution};
use flowdeck_types::export::{REDACTED, WorkflowExport};
use flowdeck_types::log::{LogQuery, WorkflowLog};
use flowdeck_types::schedule::{ScheduleConfig, WorkflowSchedule};
use flowdeck_types::workflow::{
    NewStep, NewVariable, NewWorkflow, StepUpdate, Workflow, WorkflowStep, WorkflowUpdate,
    WorkflowVariable,
};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::repository::{WorkflowFilter, WorkflowRepository};
use crate::workflow::audit::{AuditLogger, AuditScope};
use crate::workflow::dag;
use crate::workflow::definition::{
    ExportFormat, WorkflowError, parse_export, serialize_export, validate_step,
};
use crate::workflow::executor::{ExecutorError, WorkflowEngine};
use crate::workflow::export::{build_export, plan_import};
use crate::workflow::scheduler::{SchedulerError, WorkflowScheduler};
use crate::workflow::trigger::{TriggerError, TriggerRouter, TriggeredRun};

// ---------------------------------------------------------------------------
// ServiceError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("step not found: {0}")]
    StepNotFound(Uuid),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error(transparent)]
    Validation(#[from] WorkflowError),

    #[error(transparent)]
    Execution(#[from] ExecutorError),

    #[error(transparent)]
    Scheduling(#[from] SchedulerError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Result of `import_workflow`.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub workflow: Workflow,
    pub steps: Vec<WorkflowStep>,
    /// Secret variables left out because no real value was supplied. Holds
    /// `triggerConfig.secret` when a webhook secret was left out; such
    /// workflows are imported inactive.
    pub skipped_variables: Vec<String>,
}

// ---------------------------------------------------------------------------
// WorkflowService
// ---------------------------------------------------------------------------

/// Service exposing every workflow operation.
///
/// Generic over `R: WorkflowRepository`; the engine, scheduler and trigger
/// router share the same repository.
pub struct WorkflowService<R: WorkflowRepository> {
    repo: Arc<R>,
    engine: Arc<WorkflowEngine<R>>,
    scheduler: Arc<WorkflowScheduler<R>>,
    triggers: TriggerRouter<R>,
    audit: AuditLogger<R>,
}

impl<R: WorkflowRepository + 'static> WorkflowService<R> {
    pub fn new(
        repo: Arc<R>,
        engine: Arc<WorkflowEngine<R>>,
        scheduler: Arc<WorkflowScheduler<R>>,
        triggers: TriggerRouter<R>,
    ) -> Self {
        Self {
            audit: AuditLogger::new(Arc::clone(&repo)),
            repo,
            engine,
            scheduler,
            triggers,
        }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine<R>> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Arc<WorkflowScheduler<R>> {
        &self.scheduler
    }

    /// Subscribe to execution progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.engine.event_bus().subscribe()
    }

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    pub async fn create_workflow(
        &self,
        tenant_id: &Uuid,
        request: NewWorkflow,
    ) -> Result<Workflow, ServiceError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(
                WorkflowError::ValidationError("workflow name must not be empty".to_string()).into(),
            );
        }

        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::now_v7(),
            tenant_id: *tenant_id,
            name,
            description: request.description,
            trigger: request.trigger,
            trigger_config: request.trigger_config,
            is_active: request.is_active,
            version: 1,
            tags: request.tags,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
        };
        self.repo.create_workflow(&workflow).await?;

        self.audit
            .info(
                AuditScope::workflow(*tenant_id, workflow.id),
                format!("workflow '{}' created", workflow.name),
                Some(json!({"trigger": workflow.trigger.as_str()})),
            )
            .await;
        tracing::info!(workflow_id = %workflow.id, name = %workflow.name, "workflow created");
        Ok(workflow)
    }

    pub async fn get_workflow(&self, tenant_id: &Uuid, id: &Uuid) -> Result<Workflow, ServiceError> {
        self.repo
            .get_workflow(tenant_id, id)
            .await?
            .ok_or(ServiceError::WorkflowNotFound(*id))
    }

    pub async fn list_workflows(
        &self,
        tenant_id: &Uuid,
        filter: &WorkflowFilter,
    ) -> Result<Vec<Workflow>, ServiceError> {
        Ok(self.repo.list_workflows(tenant_id, filter).await?)
    }

    pub async fn update_workflow(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
        update: WorkflowUpdate,
    ) -> Result<Workflow, ServiceError> {
        let mut workflow = self.get_workflow(tenant_id, id).await?;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(WorkflowError::ValidationError(
                    "workflow name must not be empty".to_string(),
                )
                .into());
            }
            workflow.name = name;
        }
        if let Some(description) = update.description {
            workflow.description = Some(description);
        }
        if let Some(trigger) = update.trigger {
            workflow.trigger = trigger;
        }
        if let Some(trigger_config) = update.trigger_config {
            workflow.trigger_config = trigger_config;
        }
        if let Some(is_active) = update.is_active {
            workflow.is_active = is_active;
        }
        if let Some(tags) = update.tags {
            workflow.tags = tags;
        }
        if let Some(metadata) = update.metadata {
            workflow.metadata = metadata;
        }

        self.touch(&mut workflow, "workflow updated", None).await?;
        Ok(workflow)
    }

    /// Delete a workflow with its steps, variables and schedules.
    ///
    /// Schedule timers are cancelled first. Executions, step executions and
    /// audit entries are kept, and in-flight executions run to completion.
    pub async fn delete_workflow(&self, tenant_id: &Uuid, id: &Uuid) -> Result<bool, ServiceError> {
        let Some(workflow) = self.repo.get_workflow(tenant_id, id).await? else {
            return Ok(false);
        };

        self.scheduler.unschedule_workflow(tenant_id, id).await?;
        let deleted = self.repo.delete_workflow(tenant_id, id).await?;
        if deleted {
            self.audit
                .info(
                    AuditScope::workflow(*tenant_id, *id),
                    format!("workflow '{}' deleted", workflow.name),
                    None,
                )
                .await;
            tracing::info!(workflow_id = %id, "workflow deleted");
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    pub async fn get_steps(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowStep>, ServiceError> {
        self.get_workflow(tenant_id, workflow_id).await?;
        Ok(self.repo.list_steps(tenant_id, workflow_id).await?)
    }

    /// Add a step. Without a position it is appended after the last step.
    pub async fn add_step(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        request: NewStep,
    ) -> Result<WorkflowStep, ServiceError> {
        self.insert_step(tenant_id, workflow_id, Uuid::now_v7(), request)
            .await
    }

    async fn insert_step(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        step_id: Uuid,
        request: NewStep,
    ) -> Result<WorkflowStep, ServiceError> {
        let mut workflow = self.get_workflow(tenant_id, workflow_id).await?;
        let mut steps = self.repo.list_steps(tenant_id, workflow_id).await?;

        let position = request
            .position
            .unwrap_or_else(|| steps.iter().map(|s| s.position).max().unwrap_or(0) + 1);
        let step = WorkflowStep {
            id: step_id,
            workflow_id: *workflow_id,
            name: request.name.trim().to_string(),
            step_type: request.step_type,
            action: request.action,
            config: request.config,
            position,
            condition: request.condition,
            retry_policy: request.retry_policy.unwrap_or_default(),
            timeout_ms: request.timeout_ms,
            dependencies: request.dependencies,
            is_active: request.is_active,
        };
        validate_step(&step)?;

        steps.push(step.clone());
        dag::check_references(&steps)?;

        self.repo.create_step(tenant_id, &step).await?;
        self.touch(
            &mut workflow,
            format!("step '{}' added", step.name),
            Some(json!({"stepId": step.id, "position": step.position})),
        )
        .await?;
        Ok(step)
    }

    pub async fn update_step(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        step_id: &Uuid,
        update: StepUpdate,
    ) -> Result<WorkflowStep, ServiceError> {
        let mut workflow = self.get_workflow(tenant_id, workflow_id).await?;
        let mut steps = self.repo.list_steps(tenant_id, workflow_id).await?;
        let step = steps
            .iter_mut()
            .find(|s| s.id == *step_id)
            .ok_or(ServiceError::StepNotFound(*step_id))?;

        update.apply_to(step);
        step.name = step.name.trim().to_string();
        validate_step(step)?;
        let updated = step.clone();
        dag::check_references(&steps)?;

        self.repo.update_step(tenant_id, &updated).await?;
        self.touch(
            &mut workflow,
            format!("step '{}' updated", updated.name),
            Some(json!({"stepId": updated.id})),
        )
        .await?;
        Ok(updated)
    }

    /// Remove a step. Rejected while other steps depend on it.
    pub async fn remove_step(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        step_id: &Uuid,
    ) -> Result<bool, ServiceError> {
        let mut workflow = self.get_workflow(tenant_id, workflow_id).await?;
        let steps = self.repo.list_steps(tenant_id, workflow_id).await?;
        let Some(step) = steps.iter().find(|s| s.id == *step_id) else {
            return Ok(false);
        };

        let dependents = dag::dependents_of(step_id, &steps);
        if !dependents.is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' is required by: {}",
                step.name,
                dependents.join(", ")
            ))
            .into());
        }

        let name = step.name.clone();
        let removed = self.repo.delete_step(tenant_id, workflow_id, step_id).await?;
        if removed {
            self.touch(
                &mut workflow,
                format!("step '{name}' removed"),
                Some(json!({"stepId": step_id})),
            )
            .await?;
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run a workflow and wait for its terminal state.
    pub async fn execute_workflow(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        trigger_data: Value,
    ) -> Result<WorkflowExecution, ServiceError> {
        Ok(self
            .engine
            .execute_workflow(tenant_id, workflow_id, trigger_data)
            .await?)
    }

    /// Start a workflow in the background and return the execution id.
    pub async fn start_workflow(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        trigger_data: Value,
    ) -> Result<Uuid, ServiceError> {
        Ok(self
            .engine
            .start_workflow(tenant_id, workflow_id, trigger_data)
            .await?)
    }

    pub async fn cancel_execution(
        &self,
        tenant_id: &Uuid,
        execution_id: &Uuid,
    ) -> Result<bool, ServiceError> {
        match self.engine.cancel_execution(tenant_id, execution_id).await {
            Err(ExecutorError::ExecutionNotFound(id)) => Err(ServiceError::ExecutionNotFound(id)),
            other => Ok(other?),
        }
    }

    pub async fn get_executions(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        query: &ExecutionQuery,
    ) -> Result<Vec<WorkflowExecution>, ServiceError> {
        Ok(self
            .repo
            .list_executions(tenant_id, workflow_id, query)
            .await?)
    }

    /// An execution with its step records.
    pub async fn get_execution(
        &self,
        tenant_id: &Uuid,
        execution_id: &Uuid,
    ) -> Result<ExecutionDetail, ServiceError> {
        let execution = self
            .repo
            .get_execution(tenant_id, execution_id)
            .await?
            .ok_or(ServiceError::ExecutionNotFound(*execution_id))?;
        let steps = self
            .repo
            .list_step_executions(tenant_id, execution_id)
            .await?;
        Ok(ExecutionDetail { execution, steps })
    }

    pub async fn get_logs(
        &self,
        tenant_id: &Uuid,
        query: &LogQuery,
    ) -> Result<Vec<WorkflowLog>, ServiceError> {
        Ok(self.audit.query(tenant_id, query).await?)
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    pub async fn dispatch_event(
        &self,
        tenant_id: &Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<Vec<TriggeredRun>, ServiceError> {
        Ok(self
            .triggers
            .dispatch_event(tenant_id, event_type, payload)
            .await?)
    }

    pub async fn handle_webhook(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<TriggeredRun, ServiceError> {
        Ok(self
            .triggers
            .handle_webhook(tenant_id, workflow_id, body, signature)
            .await?)
    }

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    pub async fn schedule_workflow(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        config: ScheduleConfig,
    ) -> Result<WorkflowSchedule, ServiceError> {
        let workflow = self.get_workflow(tenant_id, workflow_id).await?;
        Ok(self.scheduler.create_schedule(&workflow, config).await?)
    }

    pub async fn set_schedule_active(
        &self,
        tenant_id: &Uuid,
        schedule_id: &Uuid,
        active: bool,
    ) -> Result<WorkflowSchedule, ServiceError> {
        Ok(self
            .scheduler
            .set_active(tenant_id, schedule_id, active)
            .await?)
    }

    pub async fn delete_schedule(
        &self,
        tenant_id: &Uuid,
        schedule_id: &Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(self.scheduler.delete_schedule(tenant_id, schedule_id).await?)
    }

    pub async fn get_schedules(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowSchedule>, ServiceError> {
        Ok(self.scheduler.list_schedules(tenant_id, workflow_id).await?)
    }

    /// Re-register all active schedules (process startup).
    pub async fn restore_schedules(&self) -> Result<usize, ServiceError> {
        Ok(self.scheduler.restore().await?)
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    /// Variables of one scope (a workflow's own, or tenant-global for `None`).
    /// Secret values are masked.
    pub async fn get_variables(
        &self,
        tenant_id: &Uuid,
        workflow_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowVariable>, ServiceError> {
        let mut variables = self.repo.list_variables(tenant_id, workflow_id).await?;
        for var in &mut variables {
            if var.is_sensitive() {
                var.value = Value::String(REDACTED.to_string());
            }
        }
        Ok(variables)
    }

    /// Create or replace a variable by name within its scope.
    pub async fn set_variable(
        &self,
        tenant_id: &Uuid,
        request: NewVariable,
    ) -> Result<WorkflowVariable, ServiceError> {
        let name = request.name.trim().to_string();
        validate_variable_name(&name)?;

        let mut workflow = match &request.workflow_id {
            Some(id) => Some(self.get_workflow(tenant_id, id).await?),
            None => None,
        };

        let existing = self
            .repo
            .list_variables(tenant_id, request.workflow_id.as_ref())
            .await?
            .into_iter()
            .find(|v| v.name == name);
        let now = Utc::now();
        let variable = WorkflowVariable {
            id: existing.as_ref().map_or_else(Uuid::now_v7, |v| v.id),
            tenant_id: *tenant_id,
            workflow_id: request.workflow_id,
            name,
            value: request.value,
            var_type: request.var_type,
            is_secret: request.is_secret,
            created_at: existing.as_ref().map_or(now, |v| v.created_at),
            updated_at: now,
        };
        self.repo.upsert_variable(&variable).await?;

        // Values are never logged; secrets would leak into the audit trail.
        let message = format!("variable '{}' set", variable.name);
        let data = Some(json!({"type": variable.var_type.as_str(), "secret": variable.is_sensitive()}));
        match workflow.as_mut() {
            Some(wf) => self.touch(wf, message, data).await?,
            None => tracing::info!(variable = %variable.name, "global variable set"),
        }
        Ok(variable)
    }

    pub async fn delete_variable(
        &self,
        tenant_id: &Uuid,
        workflow_id: Option<&Uuid>,
        name: &str,
    ) -> Result<bool, ServiceError> {
        let mut workflow = match workflow_id {
            Some(id) => Some(self.get_workflow(tenant_id, id).await?),
            None => None,
        };
        let deleted = self.repo.delete_variable(tenant_id, workflow_id, name).await?;
        if deleted {
            if let Some(wf) = workflow.as_mut() {
                self.touch(wf, format!("variable '{name}' deleted"), None).await?;
            }
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Export / import
    // -----------------------------------------------------------------------

    /// Export a workflow with its steps and workflow-scoped variables.
    pub async fn export_workflow(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> Result<WorkflowExport, ServiceError> {
        let workflow = self.get_workflow(tenant_id, workflow_id).await?;
        let steps = self.repo.list_steps(tenant_id, workflow_id).await?;
        let variables = self.repo.list_variables(tenant_id, Some(workflow_id)).await?;
        Ok(build_export(&workflow, &steps, &variables))
    }

    pub async fn export_workflow_text(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        format: ExportFormat,
    ) -> Result<String, ServiceError> {
        let doc = self.export_workflow(tenant_id, workflow_id).await?;
        Ok(serialize_export(&doc, format)?)
    }

    /// Recreate an exported workflow under new ids.
    ///
    /// Redacted variables are skipped unless `secrets` supplies a value for
    /// them by name. A redacted webhook secret is supplied under
    /// `triggerConfig.secret`. The document is validated before anything is
    /// written.
    pub async fn import_workflow(
        &self,
        tenant_id: &Uuid,
        doc: &WorkflowExport,
        secrets: &HashMap<String, Value>,
    ) -> Result<ImportOutcome, ServiceError> {
        let plan = plan_import(doc, secrets)?;

        let created = self.create_workflow(tenant_id, plan.workflow).await?;
        let mut steps = Vec::with_capacity(plan.steps.len());
        for planned in plan.steps {
            let step = self
                .insert_step(tenant_id, &created.id, planned.id, planned.step)
                .await?;
            steps.push(step);
        }
        for mut variable in plan.variables {
            variable.workflow_id = Some(created.id);
            self.set_variable(tenant_id, variable).await?;
        }

        if !plan.skipped_variables.is_empty() {
            self.audit
                .warn(
                    AuditScope::workflow(*tenant_id, created.id),
                    format!(
                        "import skipped {} secret value(s) without replacements",
                        plan.skipped_variables.len()
                    ),
                    Some(json!({"variables": plan.skipped_variables})),
                )
                .await;
        }

        let workflow = self.get_workflow(tenant_id, &created.id).await?;
        Ok(ImportOutcome {
            workflow,
            steps,
            skipped_variables: plan.skipped_variables,
        })
    }

    pub async fn import_workflow_text(
        &self,
        tenant_id: &Uuid,
        text: &str,
        format: ExportFormat,
        secrets: &HashMap<String, Value>,
    ) -> Result<ImportOutcome, ServiceError> {
        let doc = parse_export(text, format)?;
        self.import_workflow(tenant_id, &doc, secrets).await
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Bump the version, persist, and audit a definition change.
    async fn touch(
        &self,
        workflow: &mut Workflow,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Result<(), ServiceError> {
        workflow.version += 1;
        workflow.updated_at = Utc::now();
        self.repo.update_workflow(workflow).await?;
        self.audit
            .info(
                AuditScope::workflow(workflow.tenant_id, workflow.id),
                message,
                data,
            )
            .await;
        Ok(())
    }
}

/// Variable names become template path segments, so no dots or braces.
fn validate_variable_name(name: &str) -> Result<(), WorkflowError> {
    if name.is_empty() {
        return Err(WorkflowError::ValidationError(
            "variable name must not be empty".to_string(),
        ));
    }
    if name.contains(['.', '{', '}']) || name.chars().any(char::is_whitespace) {
        return Err(WorkflowError::ValidationError(format!(
            "invalid variable name '{name}'"
        )));
    }
    Ok(())
}
