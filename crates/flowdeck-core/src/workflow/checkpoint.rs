//! Persistence of execution and step-execution state.
//!
//! `ExecutionRecorder` wraps the repository with the transitions the engine
//! performs: create the execution, open a record per step, move it through
//! retrying/completed/failed/skipped, and close the execution with a terminal
//! status. Every transition is persisted before the engine moves on.

use std::sync::Arc;

use chrono::Utc;
use flowdeck_types::error::RepositoryError;
use flowdeck_types::execution::{
    ExecutionContextRecord, ExecutionStatus, StepExecutionStatus, WorkflowExecution,
    WorkflowStepExecution,
};
use flowdeck_types::workflow::{Workflow, WorkflowStep};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::WorkflowRepository;

pub struct ExecutionRecorder<R: WorkflowRepository> {
    repo: Arc<R>,
}

impl<R: WorkflowRepository> Clone for ExecutionRecorder<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: WorkflowRepository> ExecutionRecorder<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    // -----------------------------------------------------------------------
    // Execution-level
    // -----------------------------------------------------------------------

    /// Create a RUNNING execution for `workflow`.
    pub async fn start_execution(
        &self,
        execution_id: Uuid,
        workflow: &Workflow,
        trigger_data: Value,
        context: ExecutionContextRecord,
    ) -> Result<WorkflowExecution, RepositoryError> {
        let execution = WorkflowExecution {
            id: execution_id,
            tenant_id: workflow.tenant_id,
            workflow_id: workflow.id,
            workflow_version: workflow.version,
            status: ExecutionStatus::Running,
            trigger_data,
            context,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error: None,
        };
        self.repo.create_execution(&execution).await?;
        Ok(execution)
    }

    /// Persist the accumulated context of a running execution.
    pub async fn save_context(
        &self,
        execution: &mut WorkflowExecution,
        context: ExecutionContextRecord,
    ) -> Result<(), RepositoryError> {
        execution.context = context;
        self.repo.update_execution(execution).await
    }

    /// Move the execution to a terminal status.
    pub async fn finish_execution(
        &self,
        execution: &mut WorkflowExecution,
        status: ExecutionStatus,
        context: ExecutionContextRecord,
        error: Option<String>,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now();
        execution.status = status;
        execution.context = context;
        execution.completed_at = Some(now);
        execution.duration_ms = Some(elapsed_ms(execution.started_at, now));
        execution.error = error;
        self.repo.update_execution(execution).await
    }

    // -----------------------------------------------------------------------
    // Step-level
    // -----------------------------------------------------------------------

    /// Open a RUNNING record for the first attempt of `step`.
    pub async fn step_started(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        input: &Value,
    ) -> Result<WorkflowStepExecution, RepositoryError> {
        let record = WorkflowStepExecution {
            id: Uuid::now_v7(),
            tenant_id: execution.tenant_id,
            execution_id: execution.id,
            step_id: step.id,
            step_name: step.name.clone(),
            status: StepExecutionStatus::Running,
            input: Some(input.clone()),
            output: None,
            attempts: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };
        self.repo.create_step_execution(&record).await?;
        Ok(record)
    }

    /// Record the start of an attempt (`attempts` already incremented).
    pub async fn step_attempt(
        &self,
        record: &mut WorkflowStepExecution,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        record.attempts = attempts;
        record.status = StepExecutionStatus::Running;
        self.repo.update_step_execution(record).await
    }

    pub async fn step_retrying(
        &self,
        record: &mut WorkflowStepExecution,
        error: &str,
    ) -> Result<(), RepositoryError> {
        record.status = StepExecutionStatus::Retrying;
        record.error = Some(error.to_string());
        self.repo.update_step_execution(record).await
    }

    pub async fn step_completed(
        &self,
        record: &mut WorkflowStepExecution,
        output: Value,
    ) -> Result<(), RepositoryError> {
        record.status = StepExecutionStatus::Completed;
        record.output = Some(output);
        record.error = None;
        record.completed_at = Some(Utc::now());
        self.repo.update_step_execution(record).await
    }

    pub async fn step_failed(
        &self,
        record: &mut WorkflowStepExecution,
        error: &str,
    ) -> Result<(), RepositoryError> {
        record.status = StepExecutionStatus::Failed;
        record.error = Some(error.to_string());
        record.completed_at = Some(Utc::now());
        self.repo.update_step_execution(record).await
    }

    /// Record a step that was skipped without invoking its handler.
    pub async fn step_skipped(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        reason: &str,
    ) -> Result<WorkflowStepExecution, RepositoryError> {
        let now = Utc::now();
        let record = WorkflowStepExecution {
            id: Uuid::now_v7(),
            tenant_id: execution.tenant_id,
            execution_id: execution.id,
            step_id: step.id,
            step_name: step.name.clone(),
            status: StepExecutionStatus::Skipped,
            input: None,
            output: Some(serde_json::json!({"skipped": true, "reason": reason})),
            attempts: 0,
            started_at: now,
            completed_at: Some(now),
            error: None,
        };
        self.repo.create_step_execution(&record).await?;
        Ok(record)
    }

    pub async fn step_records(
        &self,
        tenant_id: &Uuid,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowStepExecution>, RepositoryError> {
        self.repo.list_step_executions(tenant_id, execution_id).await
    }
}

fn elapsed_ms(start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryWorkflowRepository;
    use flowdeck_types::workflow::{ActionKind, RetryPolicy, StepType, TriggerKind};
    use serde_json::json;
    use std::collections::HashMap;

    fn fixtures() -> (Workflow, WorkflowStep) {
        let now = Utc::now();
        let wf = Workflow {
            id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            name: "checkpointed".to_string(),
            description: None,
            trigger: TriggerKind::Manual,
            trigger_config: Value::Null,
            is_active: true,
            version: 2,
            tags: vec![],
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        let step = WorkflowStep {
            id: Uuid::now_v7(),
            workflow_id: wf.id,
            name: "email".to_string(),
            step_type: StepType::Action,
            action: Some(ActionKind::SendEmail),
            config: json!({}),
            position: 1,
            condition: None,
            retry_policy: RetryPolicy::default(),
            timeout_ms: None,
            dependencies: vec![],
            is_active: true,
        };
        (wf, step)
    }

    #[tokio::test]
    async fn test_step_lifecycle_is_persisted() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let recorder = ExecutionRecorder::new(repo.clone());
        let (wf, step) = fixtures();

        let mut exec = recorder
            .start_execution(Uuid::now_v7(), &wf, json!({}), Default::default())
            .await
            .unwrap();
        assert_eq!(exec.workflow_version, 2);

        let mut record = recorder.step_started(&exec, &step, &json!({"to": "x"})).await.unwrap();
        recorder.step_attempt(&mut record, 1).await.unwrap();
        recorder.step_retrying(&mut record, "boom").await.unwrap();
        recorder.step_attempt(&mut record, 2).await.unwrap();
        recorder.step_completed(&mut record, json!({"ok": true})).await.unwrap();

        let stored = recorder.step_records(&wf.tenant_id, &exec.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, StepExecutionStatus::Completed);
        assert_eq!(stored[0].attempts, 2);
        assert!(stored[0].error.is_none());

        recorder
            .finish_execution(&mut exec, ExecutionStatus::Completed, Default::default(), None)
            .await
            .unwrap();
        let stored = repo.get_execution(&wf.tenant_id, &exec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert!(stored.duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_terminal_execution_cannot_regress() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let recorder = ExecutionRecorder::new(repo);
        let (wf, _) = fixtures();

        let mut exec = recorder
            .start_execution(Uuid::now_v7(), &wf, json!({}), Default::default())
            .await
            .unwrap();
        recorder
            .finish_execution(&mut exec, ExecutionStatus::Failed, Default::default(), Some("x".into()))
            .await
            .unwrap();
        let again = recorder
            .finish_execution(&mut exec, ExecutionStatus::Completed, Default::default(), None)
            .await;
        assert!(matches!(again, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_skipped_step_has_zero_attempts() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let recorder = ExecutionRecorder::new(repo);
        let (wf, step) = fixtures();
        let exec = recorder
            .start_execution(Uuid::now_v7(), &wf, json!({}), Default::default())
            .await
            .unwrap();
        let skipped = recorder.step_skipped(&exec, &step, "condition false").await.unwrap();
        assert_eq!(skipped.status, StepExecutionStatus::Skipped);
        assert_eq!(skipped.attempts, 0);
    }
}
