//! In-memory `WorkflowRepository` backed by `DashMap`s.
//!
//! Used by the engine's tests and by the CLI's `--ephemeral` mode. Semantics
//! mirror the SQLite implementation: tenant scoping, cascade on workflow
//! delete, variable uniqueness per scope, and the running-only execution
//! update guard.

use dashmap::DashMap;
use flowdeck_types::error::RepositoryError;
use flowdeck_types::execution::{
    ExecutionQuery, ExecutionStatus, WorkflowExecution, WorkflowStepExecution,
};
use flowdeck_types::log::{LogQuery, WorkflowLog};
use flowdeck_types::schedule::WorkflowSchedule;
use flowdeck_types::workflow::{Workflow, WorkflowStep, WorkflowVariable};
use uuid::Uuid;

use super::workflow::{WorkflowFilter, WorkflowRepository};

/// Thread-safe in-memory repository.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: DashMap<Uuid, Workflow>,
    /// Steps keyed by step id; the tenant is kept alongside for scoping.
    steps: DashMap<Uuid, (Uuid, WorkflowStep)>,
    variables: DashMap<Uuid, WorkflowVariable>,
    executions: DashMap<Uuid, WorkflowExecution>,
    step_executions: DashMap<Uuid, WorkflowStepExecution>,
    schedules: DashMap<Uuid, WorkflowSchedule>,
    logs: DashMap<Uuid, WorkflowLog>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(items: Vec<T>, offset: u32, limit: u32) -> Vec<T> {
    items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        if self.workflows.contains_key(&workflow.id) {
            return Err(RepositoryError::Conflict(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self
            .workflows
            .get(id)
            .filter(|w| w.tenant_id == *tenant_id)
            .map(|w| w.value().clone()))
    }

    async fn list_workflows(
        &self,
        tenant_id: &Uuid,
        filter: &WorkflowFilter,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let mut workflows: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|w| w.tenant_id == *tenant_id && filter.matches(w.value()))
            .map(|w| w.value().clone())
            .collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(workflows)
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        match self.workflows.get_mut(&workflow.id) {
            Some(mut existing) if existing.tenant_id == workflow.tenant_id => {
                *existing = workflow.clone();
                Ok(())
            }
            _ => Err(RepositoryError::NotFound),
        }
    }

    async fn delete_workflow(&self, tenant_id: &Uuid, id: &Uuid) -> Result<bool, RepositoryError> {
        let removed = self
            .workflows
            .remove_if(id, |_, w| w.tenant_id == *tenant_id)
            .is_some();
        if removed {
            self.steps.retain(|_, (_, step)| step.workflow_id != *id);
            self.variables.retain(|_, v| v.workflow_id != Some(*id));
            self.schedules.retain(|_, s| s.workflow_id != *id);
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn create_step(&self, tenant_id: &Uuid, step: &WorkflowStep) -> Result<(), RepositoryError> {
        let owned = self
            .workflows
            .get(&step.workflow_id)
            .is_some_and(|w| w.tenant_id == *tenant_id);
        if !owned {
            return Err(RepositoryError::NotFound);
        }
        if self.steps.contains_key(&step.id) {
            return Err(RepositoryError::Conflict(format!("step {} already exists", step.id)));
        }
        self.steps.insert(step.id, (*tenant_id, step.clone()));
        Ok(())
    }

    async fn update_step(&self, tenant_id: &Uuid, step: &WorkflowStep) -> Result<(), RepositoryError> {
        match self.steps.get_mut(&step.id) {
            Some(mut entry) if entry.0 == *tenant_id => {
                entry.1 = step.clone();
                Ok(())
            }
            _ => Err(RepositoryError::NotFound),
        }
    }

    async fn delete_step(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        step_id: &Uuid,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .steps
            .remove_if(step_id, |_, (tenant, step)| {
                tenant == tenant_id && step.workflow_id == *workflow_id
            })
            .is_some())
    }

    async fn list_steps(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowStep>, RepositoryError> {
        let mut steps: Vec<WorkflowStep> = self
            .steps
            .iter()
            .filter(|e| e.0 == *tenant_id && e.1.workflow_id == *workflow_id)
            .map(|e| e.1.clone())
            .collect();
        steps.sort_by(|a, b| a.position.cmp(&b.position).then(a.id.cmp(&b.id)));
        Ok(steps)
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    async fn upsert_variable(&self, variable: &WorkflowVariable) -> Result<(), RepositoryError> {
        let existing = self
            .variables
            .iter()
            .find(|v| {
                v.tenant_id == variable.tenant_id
                    && v.workflow_id == variable.workflow_id
                    && v.name == variable.name
            })
            .map(|v| *v.key());
        if let Some(id) = existing {
            self.variables.remove(&id);
        }
        self.variables.insert(variable.id, variable.clone());
        Ok(())
    }

    async fn list_variables(
        &self,
        tenant_id: &Uuid,
        workflow_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowVariable>, RepositoryError> {
        let mut vars: Vec<WorkflowVariable> = self
            .variables
            .iter()
            .filter(|v| v.tenant_id == *tenant_id && v.workflow_id.as_ref() == workflow_id)
            .map(|v| v.value().clone())
            .collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(vars)
    }

    async fn delete_variable(
        &self,
        tenant_id: &Uuid,
        workflow_id: Option<&Uuid>,
        name: &str,
    ) -> Result<bool, RepositoryError> {
        let found = self
            .variables
            .iter()
            .find(|v| {
                v.tenant_id == *tenant_id && v.workflow_id.as_ref() == workflow_id && v.name == name
            })
            .map(|v| *v.key());
        Ok(found.and_then(|id| self.variables.remove(&id)).is_some())
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        match self.executions.get_mut(&execution.id) {
            Some(mut existing) if existing.tenant_id == execution.tenant_id => {
                if existing.status != ExecutionStatus::Running {
                    return Err(RepositoryError::Conflict(format!(
                        "execution {} is already {}",
                        execution.id,
                        existing.status.as_str()
                    )));
                }
                *existing = execution.clone();
                Ok(())
            }
            _ => Err(RepositoryError::NotFound),
        }
    }

    async fn get_execution(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self
            .executions
            .get(id)
            .filter(|e| e.tenant_id == *tenant_id)
            .map(|e| e.value().clone()))
    }

    async fn list_executions(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        query: &ExecutionQuery,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut executions: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|e| {
                e.tenant_id == *tenant_id
                    && e.workflow_id == *workflow_id
                    && query.status.is_none_or(|s| e.status == s)
            })
            .map(|e| e.value().clone())
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(paginate(executions, query.offset, query.limit))
    }

    // -----------------------------------------------------------------------
    // Step executions
    // -----------------------------------------------------------------------

    async fn create_step_execution(&self, step: &WorkflowStepExecution) -> Result<(), RepositoryError> {
        self.step_executions.insert(step.id, step.clone());
        Ok(())
    }

    async fn update_step_execution(&self, step: &WorkflowStepExecution) -> Result<(), RepositoryError> {
        match self.step_executions.get_mut(&step.id) {
            Some(mut existing) => {
                *existing = step.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list_step_executions(
        &self,
        tenant_id: &Uuid,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowStepExecution>, RepositoryError> {
        let mut steps: Vec<WorkflowStepExecution> = self
            .step_executions
            .iter()
            .filter(|s| s.tenant_id == *tenant_id && s.execution_id == *execution_id)
            .map(|s| s.value().clone())
            .collect();
        steps.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(steps)
    }

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    async fn create_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        self.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn update_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        match self.schedules.get_mut(&schedule.id) {
            Some(mut existing) if existing.tenant_id == schedule.tenant_id => {
                *existing = schedule.clone();
                Ok(())
            }
            _ => Err(RepositoryError::NotFound),
        }
    }

    async fn get_schedule(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> Result<Option<WorkflowSchedule>, RepositoryError> {
        Ok(self
            .schedules
            .get(id)
            .filter(|s| s.tenant_id == *tenant_id)
            .map(|s| s.value().clone()))
    }

    async fn list_schedules(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let mut schedules: Vec<WorkflowSchedule> = self
            .schedules
            .iter()
            .filter(|s| s.tenant_id == *tenant_id && s.workflow_id == *workflow_id)
            .map(|s| s.value().clone())
            .collect();
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(schedules)
    }

    async fn list_active_schedules(&self) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let mut schedules: Vec<WorkflowSchedule> = self
            .schedules
            .iter()
            .filter(|s| s.is_active)
            .map(|s| s.value().clone())
            .collect();
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(schedules)
    }

    async fn delete_schedule(&self, tenant_id: &Uuid, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self
            .schedules
            .remove_if(id, |_, s| s.tenant_id == *tenant_id)
            .is_some())
    }

    // -----------------------------------------------------------------------
    // Audit log
    // -----------------------------------------------------------------------

    async fn append_log(&self, entry: &WorkflowLog) -> Result<(), RepositoryError> {
        self.logs.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn query_logs(
        &self,
        tenant_id: &Uuid,
        query: &LogQuery,
    ) -> Result<Vec<WorkflowLog>, RepositoryError> {
        let mut logs: Vec<WorkflowLog> = self
            .logs
            .iter()
            .filter(|l| l.tenant_id == *tenant_id && query.matches(l.value()))
            .map(|l| l.value().clone())
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(logs, query.offset, query.limit))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowdeck_types::execution::ExecutionContextRecord;
    use flowdeck_types::workflow::{
        ActionKind, RetryPolicy, StepType, TriggerKind, VariableType,
    };
    use serde_json::json;
    use std::collections::HashMap;

    fn workflow(tenant_id: Uuid, name: &str) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: Uuid::now_v7(),
            tenant_id,
            name: name.to_string(),
            description: None,
            trigger: TriggerKind::Manual,
            trigger_config: json!({}),
            is_active: true,
            version: 1,
            tags: vec![],
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn step(workflow_id: Uuid, position: i32) -> WorkflowStep {
        WorkflowStep {
            id: Uuid::now_v7(),
            workflow_id,
            name: format!("step-{position}"),
            step_type: StepType::Action,
            action: Some(ActionKind::LogMessage),
            config: json!({}),
            position,
            condition: None,
            retry_policy: RetryPolicy::default(),
            timeout_ms: None,
            dependencies: vec![],
            is_active: true,
        }
    }

    fn variable(tenant_id: Uuid, workflow_id: Option<Uuid>, name: &str, value: i64) -> WorkflowVariable {
        let now = Utc::now();
        WorkflowVariable {
            id: Uuid::now_v7(),
            tenant_id,
            workflow_id,
            name: name.to_string(),
            value: json!(value),
            var_type: VariableType::Number,
            is_secret: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let repo = InMemoryWorkflowRepository::new();
        let tenant_a = Uuid::now_v7();
        let tenant_b = Uuid::now_v7();
        let wf = workflow(tenant_a, "welcome");
        repo.create_workflow(&wf).await.unwrap();

        assert!(repo.get_workflow(&tenant_a, &wf.id).await.unwrap().is_some());
        assert!(repo.get_workflow(&tenant_b, &wf.id).await.unwrap().is_none());
        assert!(!repo.delete_workflow(&tenant_b, &wf.id).await.unwrap());
        assert!(
            repo.list_workflows(&tenant_b, &WorkflowFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_steps_sorted_by_position() {
        let repo = InMemoryWorkflowRepository::new();
        let tenant = Uuid::now_v7();
        let wf = workflow(tenant, "ordered");
        repo.create_workflow(&wf).await.unwrap();
        for position in [3, 1, 2] {
            repo.create_step(&tenant, &step(wf.id, position)).await.unwrap();
        }
        let positions: Vec<i32> = repo
            .list_steps(&tenant, &wf.id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.position)
            .collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delete_workflow_cascades() {
        let repo = InMemoryWorkflowRepository::new();
        let tenant = Uuid::now_v7();
        let wf = workflow(tenant, "cascade");
        repo.create_workflow(&wf).await.unwrap();
        repo.create_step(&tenant, &step(wf.id, 1)).await.unwrap();
        repo.upsert_variable(&variable(tenant, Some(wf.id), "limit", 5))
            .await
            .unwrap();
        repo.upsert_variable(&variable(tenant, None, "global", 1))
            .await
            .unwrap();

        assert!(repo.delete_workflow(&tenant, &wf.id).await.unwrap());
        assert!(repo.list_steps(&tenant, &wf.id).await.unwrap().is_empty());
        assert!(repo.list_variables(&tenant, Some(&wf.id)).await.unwrap().is_empty());
        // Tenant-global variables survive
        assert_eq!(repo.list_variables(&tenant, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_variable_replaces_by_name() {
        let repo = InMemoryWorkflowRepository::new();
        let tenant = Uuid::now_v7();
        repo.upsert_variable(&variable(tenant, None, "limit", 5))
            .await
            .unwrap();
        repo.upsert_variable(&variable(tenant, None, "limit", 9))
            .await
            .unwrap();
        let vars = repo.list_variables(&tenant, None).await.unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].value, json!(9));
    }

    #[tokio::test]
    async fn test_update_execution_rejects_terminal() {
        let repo = InMemoryWorkflowRepository::new();
        let tenant = Uuid::now_v7();
        let mut exec = WorkflowExecution {
            id: Uuid::now_v7(),
            tenant_id: tenant,
            workflow_id: Uuid::now_v7(),
            workflow_version: 1,
            status: ExecutionStatus::Running,
            trigger_data: json!({}),
            context: ExecutionContextRecord::default(),
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error: None,
        };
        repo.create_execution(&exec).await.unwrap();

        exec.status = ExecutionStatus::Completed;
        repo.update_execution(&exec).await.unwrap();

        exec.status = ExecutionStatus::Running;
        let err = repo.update_execution(&exec).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        let stored = repo.get_execution(&tenant, &exec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
    }
}
