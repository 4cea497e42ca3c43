//! Workflow engine: runs one execution of a workflow from start to finish.
//!
//! The `WorkflowEngine` snapshots the workflow definition, builds the
//! execution context, and walks the steps one at a time in dependency order.
//! Every state transition is persisted through the `ExecutionRecorder` before
//! the engine moves on, mirrored to the audit log, and broadcast on the
//! `EventBus`.
//!
//! # Execution flow
//!
//! 1. Load and validate the workflow (a rejected workflow creates no execution).
//! 2. Build the context from global and workflow variables plus trigger data.
//! 3. Create a RUNNING execution record.
//! 4. Repeatedly pick the lowest-position step whose dependencies are all
//!    COMPLETED or SKIPPED:
//!    evaluate its condition -> resolve its config -> run with timeout and
//!    retries -> record the result.
//! 5. Close the execution as COMPLETED, FAILED or CANCELLED.
//!
//! Cancellation is observed at step boundaries and interrupts retry backoff
//! sleeps; a handler that is already running finishes its attempt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use flowdeck_types::config::EngineSettings;
use flowdeck_types::error::RepositoryError;
use flowdeck_types::event::WorkflowEvent;
use flowdeck_types::execution::{ExecutionStatus, StepExecutionStatus, WorkflowExecution};
use flowdeck_types::workflow::{Workflow, WorkflowStep};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::WorkflowRepository;

use super::audit::{AuditLogger, AuditScope};
use super::checkpoint::ExecutionRecorder;
use super::collaborators::ActionServices;
use super::condition;
use super::context::{ContextError, ContextLimits, WorkflowContext};
use super::dag;
use super::definition::{WorkflowError, validate_workflow};
use super::resolver::TemplateResolver;
use super::retry::RetryHandler;
use super::step_runner::{StepError, StepRunner};

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors returned to callers of the engine.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("workflow {0} is inactive")]
    WorkflowInactive(Uuid),

    /// The definition failed validation; no execution was created.
    #[error("invalid workflow: {0}")]
    Invalid(#[from] WorkflowError),

    /// A step exhausted its attempts. The execution is recorded as FAILED.
    #[error("step '{step_name}' failed after {attempts} attempt(s): {error}")]
    StepFailed {
        execution_id: Uuid,
        step_id: Uuid,
        step_name: String,
        attempts: u32,
        error: String,
    },

    #[error("execution {0} was cancelled")]
    Cancelled(Uuid),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Internal outcomes
// ---------------------------------------------------------------------------

/// Everything a validated execution needs to run.
struct PreparedRun {
    workflow: Workflow,
    steps: Vec<WorkflowStep>,
    context: WorkflowContext,
    execution: WorkflowExecution,
    token: CancellationToken,
}

enum WalkOutcome {
    Completed { steps_completed: u32 },
    Cancelled,
}

enum StepOutcome {
    Completed,
    Skipped,
    Cancelled,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Sequential DAG executor with per-transition persistence.
///
/// Generic over `R: WorkflowRepository` for storage flexibility.
pub struct WorkflowEngine<R: WorkflowRepository> {
    repo: Arc<R>,
    recorder: ExecutionRecorder<R>,
    audit: AuditLogger<R>,
    runner: StepRunner,
    event_bus: EventBus,
    settings: EngineSettings,
    /// Cancellation tokens of in-flight executions, keyed by execution id,
    /// together with the owning tenant.
    cancellation_tokens: DashMap<Uuid, (Uuid, CancellationToken)>,
}

impl<R: WorkflowRepository + 'static> WorkflowEngine<R> {
    pub fn new(repo: Arc<R>, services: ActionServices, settings: EngineSettings) -> Self {
        let event_bus = EventBus::new(settings.event_bus_capacity.max(1));
        Self::with_event_bus(repo, services, settings, event_bus)
    }

    /// Create an engine publishing to an existing bus.
    pub fn with_event_bus(
        repo: Arc<R>,
        services: ActionServices,
        settings: EngineSettings,
        event_bus: EventBus,
    ) -> Self {
        Self {
            recorder: ExecutionRecorder::new(Arc::clone(&repo)),
            audit: AuditLogger::new(Arc::clone(&repo)),
            repo,
            runner: StepRunner::new(services),
            event_bus,
            settings,
            cancellation_tokens: DashMap::new(),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Ids of executions currently running in this engine.
    pub fn running_executions(&self) -> Vec<Uuid> {
        self.cancellation_tokens.iter().map(|e| *e.key()).collect()
    }

    /// Run a workflow to completion and return the terminal execution.
    ///
    /// A step failure returns `ExecutorError::StepFailed` after the FAILED
    /// execution has been persisted; cancellation returns
    /// `ExecutorError::Cancelled` after the CANCELLED execution has been
    /// persisted.
    pub async fn execute_workflow(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        trigger_data: Value,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let prepared = self.prepare(tenant_id, workflow_id, trigger_data).await?;
        self.run_prepared(prepared).await
    }

    /// Validate and create the execution, then run it on a background task.
    ///
    /// Returns the new execution id as soon as the RUNNING record exists.
    pub async fn start_workflow(
        self: &Arc<Self>,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        trigger_data: Value,
    ) -> Result<Uuid, ExecutorError> {
        let prepared = self.prepare(tenant_id, workflow_id, trigger_data).await?;
        let execution_id = prepared.execution.id;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.run_prepared(prepared).await {
                tracing::debug!(execution_id = %execution_id, error = %e, "background execution ended with error");
            }
        });

        Ok(execution_id)
    }

    /// Request cancellation of a running execution.
    ///
    /// An execution owned by this engine stops at its next step boundary. A
    /// RUNNING execution with no live owner here (left behind by another
    /// process) is closed as CANCELLED directly. Returns `false` when the
    /// execution already reached a terminal status.
    pub async fn cancel_execution(
        &self,
        tenant_id: &Uuid,
        execution_id: &Uuid,
    ) -> Result<bool, ExecutorError> {
        let owned = self
            .cancellation_tokens
            .get(execution_id)
            .filter(|entry| entry.value().0 == *tenant_id)
            .map(|entry| entry.value().1.clone());
        if let Some(token) = owned {
            token.cancel();
            tracing::info!(execution_id = %execution_id, "execution cancellation requested");
            return Ok(true);
        }

        let mut execution = self
            .repo
            .get_execution(tenant_id, execution_id)
            .await?
            .ok_or(ExecutorError::ExecutionNotFound(*execution_id))?;
        if execution.status.is_terminal() {
            return Ok(false);
        }

        let context = execution.context.clone();
        self.recorder
            .finish_execution(
                &mut execution,
                ExecutionStatus::Cancelled,
                context,
                Some("execution cancelled".to_string()),
            )
            .await?;
        let scope = AuditScope::execution(*tenant_id, execution.workflow_id, execution.id);
        self.audit.warn(scope, "execution cancelled", None).await;
        self.event_bus.publish(WorkflowEvent::ExecutionCancelled {
            execution_id: execution.id,
            workflow_id: execution.workflow_id,
        });
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Preparation
    // -----------------------------------------------------------------------

    async fn prepare(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        trigger_data: Value,
    ) -> Result<PreparedRun, ExecutorError> {
        let workflow = self
            .repo
            .get_workflow(tenant_id, workflow_id)
            .await?
            .ok_or(ExecutorError::WorkflowNotFound(*workflow_id))?;
        if !workflow.is_active {
            return Err(ExecutorError::WorkflowInactive(workflow.id));
        }

        let steps = self.repo.list_steps(tenant_id, workflow_id).await?;
        if let Err(e) = validate_workflow(&workflow, &steps) {
            self.audit
                .warn(
                    AuditScope::workflow(*tenant_id, workflow.id),
                    format!("execution rejected: {e}"),
                    None,
                )
                .await;
            return Err(e.into());
        }

        let globals = self.repo.list_variables(tenant_id, None).await?;
        let locals = self.repo.list_variables(tenant_id, Some(workflow_id)).await?;
        let trigger_label = trigger_label(&workflow, &trigger_data);
        let context = WorkflowContext::new(
            &globals,
            &locals,
            trigger_data.clone(),
            ContextLimits::from(&self.settings),
        );

        let execution = self
            .recorder
            .start_execution(Uuid::now_v7(), &workflow, trigger_data, context.to_record())
            .await?;

        let token = CancellationToken::new();
        self.cancellation_tokens
            .insert(execution.id, (*tenant_id, token.clone()));

        let scope = AuditScope::execution(*tenant_id, workflow.id, execution.id);
        self.audit
            .info(
                scope,
                format!("execution started ({trigger_label})"),
                Some(json!({"version": workflow.version, "steps": steps.len()})),
            )
            .await;
        self.event_bus.publish(WorkflowEvent::ExecutionStarted {
            execution_id: execution.id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            trigger: trigger_label,
        });

        Ok(PreparedRun {
            workflow,
            steps,
            context,
            execution,
            token,
        })
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    async fn run_prepared(&self, prepared: PreparedRun) -> Result<WorkflowExecution, ExecutorError> {
        let PreparedRun {
            workflow,
            steps,
            mut context,
            mut execution,
            token,
        } = prepared;
        let scope = AuditScope::execution(workflow.tenant_id, workflow.id, execution.id);

        let outcome = self
            .walk(scope, &steps, &mut context, &mut execution, &token)
            .await;
        self.cancellation_tokens.remove(&execution.id);

        match outcome {
            Ok(WalkOutcome::Completed { steps_completed }) => {
                self.recorder
                    .finish_execution(
                        &mut execution,
                        ExecutionStatus::Completed,
                        context.to_record(),
                        None,
                    )
                    .await?;
                let duration_ms = execution.duration_ms.unwrap_or(0);
                self.audit
                    .info(
                        scope,
                        "execution completed",
                        Some(json!({"durationMs": duration_ms, "stepsCompleted": steps_completed})),
                    )
                    .await;
                self.event_bus.publish(WorkflowEvent::ExecutionCompleted {
                    execution_id: execution.id,
                    workflow_id: workflow.id,
                    duration_ms,
                    steps_completed,
                });
                Ok(execution)
            }
            Ok(WalkOutcome::Cancelled) => {
                self.recorder
                    .finish_execution(
                        &mut execution,
                        ExecutionStatus::Cancelled,
                        context.to_record(),
                        Some("execution cancelled".to_string()),
                    )
                    .await?;
                self.audit.warn(scope, "execution cancelled", None).await;
                self.event_bus.publish(WorkflowEvent::ExecutionCancelled {
                    execution_id: execution.id,
                    workflow_id: workflow.id,
                });
                Err(ExecutorError::Cancelled(execution.id))
            }
            Err(ExecutorError::Repository(RepositoryError::Conflict(reason))) => {
                // Closed from outside (another process cancelled it).
                tracing::info!(execution_id = %execution.id, %reason, "execution closed externally");
                Err(ExecutorError::Cancelled(execution.id))
            }
            Err(error) => {
                let message = error.to_string();
                if let Err(e) = self
                    .recorder
                    .finish_execution(
                        &mut execution,
                        ExecutionStatus::Failed,
                        context.to_record(),
                        Some(message.clone()),
                    )
                    .await
                {
                    tracing::error!(execution_id = %execution.id, error = %e, "failed to record execution failure");
                }
                self.audit
                    .error(scope, format!("execution failed: {message}"), None)
                    .await;
                self.event_bus.publish(WorkflowEvent::ExecutionFailed {
                    execution_id: execution.id,
                    workflow_id: workflow.id,
                    error: message,
                });
                Err(error)
            }
        }
    }

    /// Walk the steps in dependency order until all are done, one fails, or
    /// the execution is cancelled.
    async fn walk(
        &self,
        scope: AuditScope,
        steps: &[WorkflowStep],
        context: &mut WorkflowContext,
        execution: &mut WorkflowExecution,
        token: &CancellationToken,
    ) -> Result<WalkOutcome, ExecutorError> {
        let mut pending = dag::execution_order(steps);
        let mut statuses: HashMap<Uuid, StepExecutionStatus> = HashMap::new();
        let mut steps_completed = 0u32;

        while !pending.is_empty() {
            if token.is_cancelled() {
                return Ok(WalkOutcome::Cancelled);
            }

            let ready = pending.iter().position(|step| {
                step.dependencies.iter().all(|dep| {
                    statuses
                        .get(dep)
                        .is_some_and(StepExecutionStatus::satisfies_dependents)
                })
            });
            let Some(index) = ready else {
                // Validation rejects cycles, so this only happens if the
                // definition changed underneath us.
                return Err(WorkflowError::ValidationError(
                    "no runnable step: unresolved dependencies".to_string(),
                )
                .into());
            };
            let step = pending.remove(index);

            match self.run_step(scope, step, context, execution, token).await? {
                StepOutcome::Completed => {
                    statuses.insert(step.id, StepExecutionStatus::Completed);
                    steps_completed += 1;
                }
                StepOutcome::Skipped => {
                    statuses.insert(step.id, StepExecutionStatus::Skipped);
                }
                StepOutcome::Cancelled => return Ok(WalkOutcome::Cancelled),
            }
        }

        Ok(WalkOutcome::Completed { steps_completed })
    }

    async fn run_step(
        &self,
        scope: AuditScope,
        step: &WorkflowStep,
        context: &mut WorkflowContext,
        execution: &mut WorkflowExecution,
        token: &CancellationToken,
    ) -> Result<StepOutcome, ExecutorError> {
        if !step.is_active {
            self.skip_step(scope, execution, step, "step is inactive").await?;
            return Ok(StepOutcome::Skipped);
        }

        let snapshot = context.snapshot();
        let resolver = TemplateResolver::new(&snapshot);

        if let Some(predicate) = &step.condition {
            if !condition::evaluate(predicate, &resolver) {
                self.skip_step(scope, execution, step, "condition evaluated to false")
                    .await?;
                return Ok(StepOutcome::Skipped);
            }
        }

        let resolved = resolver.resolve(&step.config);
        let mut record = self.recorder.step_started(execution, step, &resolved).await?;
        let timeout_ms = step.timeout_ms.unwrap_or(self.settings.default_step_timeout_ms);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            self.recorder.step_attempt(&mut record, attempts).await?;
            self.event_bus.publish(WorkflowEvent::StepStarted {
                execution_id: execution.id,
                step_id: step.id,
                step_name: step.name.clone(),
                attempt: attempts,
            });
            tracing::debug!(step = %step.name, attempt = attempts, "running step");

            let started = Instant::now();
            let result = match tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.runner
                    .run(&execution.tenant_id, step, &resolved, &snapshot),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(StepError::Timeout(timeout_ms)),
            };

            let error = match result {
                Ok(output) => {
                    if let Err(e) = context.record_result(&step.id.to_string(), output.clone()) {
                        self.recorder.step_failed(&mut record, &e.to_string()).await?;
                        return Err(e.into());
                    }
                    let stored = context
                        .result(&step.id.to_string())
                        .cloned()
                        .unwrap_or(Value::Null);
                    self.recorder.step_completed(&mut record, stored).await?;
                    self.recorder
                        .save_context(execution, context.to_record())
                        .await?;

                    let duration_ms = started.elapsed().as_millis() as u64;
                    self.event_bus.publish(WorkflowEvent::StepCompleted {
                        execution_id: execution.id,
                        step_id: step.id,
                        step_name: step.name.clone(),
                        duration_ms,
                    });
                    tracing::debug!(step = %step.name, duration_ms, "step completed");
                    return Ok(StepOutcome::Completed);
                }
                Err(e) => e.to_string(),
            };

            if RetryHandler::should_retry(&step.retry_policy, attempts) {
                let delay = RetryHandler::backoff_delay(&step.retry_policy, attempts);
                let delay_ms = delay.as_millis() as u64;
                self.recorder.step_retrying(&mut record, &error).await?;
                self.audit
                    .warn(
                        scope,
                        format!(
                            "step '{}' failed (attempt {}/{}), retrying in {}ms: {}",
                            step.name, attempts, step.retry_policy.max_attempts, delay_ms, error
                        ),
                        Some(json!({"stepId": step.id, "attempt": attempts, "delayMs": delay_ms})),
                    )
                    .await;
                self.event_bus.publish(WorkflowEvent::StepRetrying {
                    execution_id: execution.id,
                    step_id: step.id,
                    step_name: step.name.clone(),
                    attempt: attempts,
                    delay_ms,
                    error: error.clone(),
                });

                tokio::select! {
                    _ = token.cancelled() => {
                        self.recorder
                            .step_failed(&mut record, "execution cancelled during retry backoff")
                            .await?;
                        return Ok(StepOutcome::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            self.recorder.step_failed(&mut record, &error).await?;
            self.audit
                .error(
                    scope,
                    format!(
                        "step '{}' failed after {} attempt(s): {}",
                        step.name, attempts, error
                    ),
                    Some(json!({"stepId": step.id, "attempts": attempts})),
                )
                .await;
            self.event_bus.publish(WorkflowEvent::StepFailed {
                execution_id: execution.id,
                step_id: step.id,
                step_name: step.name.clone(),
                error: error.clone(),
            });

            return Err(ExecutorError::StepFailed {
                execution_id: execution.id,
                step_id: step.id,
                step_name: step.name.clone(),
                attempts,
                error,
            });
        }
    }

    async fn skip_step(
        &self,
        scope: AuditScope,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        reason: &str,
    ) -> Result<(), ExecutorError> {
        self.recorder.step_skipped(execution, step, reason).await?;
        self.audit
            .info(
                scope,
                format!("step '{}' skipped: {reason}", step.name),
                Some(json!({"stepId": step.id})),
            )
            .await;
        self.event_bus.publish(WorkflowEvent::StepSkipped {
            execution_id: execution.id,
            step_id: step.id,
            step_name: step.name.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

/// Trigger label for events and logs: `trigger_data.trigger` when the caller
/// supplied one, else the workflow's trigger kind.
fn trigger_label(workflow: &Workflow, trigger_data: &Value) -> String {
    trigger_data
        .get("trigger")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| workflow.trigger.as_str().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
