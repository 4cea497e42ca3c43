//! Workflow repository trait definition.
//!
//! Defines the tenant-scoped storage interface for everything the engine
//! persists: definitions (workflows, steps, variables), execution state
//! (executions, step executions), schedules, and the audit log. The
//! infrastructure layer (flowdeck-infra) implements this trait with SQLite;
//! [`super::memory::InMemoryWorkflowRepository`] backs tests and ephemeral runs.

use flowdeck_types::error::RepositoryError;
use flowdeck_types::execution::{ExecutionQuery, WorkflowExecution, WorkflowStepExecution};
use flowdeck_types::log::{LogQuery, WorkflowLog};
use flowdeck_types::schedule::WorkflowSchedule;
use flowdeck_types::workflow::{TriggerKind, Workflow, WorkflowStep, WorkflowVariable};
use uuid::Uuid;

/// Filters for listing workflows.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub trigger: Option<TriggerKind>,
    pub is_active: Option<bool>,
}

impl WorkflowFilter {
    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.trigger.is_none_or(|t| workflow.trigger == t)
            && self.is_active.is_none_or(|a| workflow.is_active == a)
    }
}

/// Repository trait for workflow persistence.
///
/// Every read and delete takes the tenant id; rows belonging to another
/// tenant are invisible. Writes take the tenant from the entity itself.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    fn create_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_workflow(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List workflows ordered by name.
    fn list_workflows(
        &self,
        tenant_id: &Uuid,
        filter: &WorkflowFilter,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Replace a workflow row. Fails with `NotFound` if it does not exist.
    fn update_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a workflow with its steps, variables and schedules.
    /// Returns `true` if it existed.
    fn delete_workflow(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn create_step(
        &self,
        tenant_id: &Uuid,
        step: &WorkflowStep,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn update_step(
        &self,
        tenant_id: &Uuid,
        step: &WorkflowStep,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn delete_step(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        step_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// List a workflow's steps ordered by position ascending.
    fn list_steps(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowStep>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    /// Insert or replace a variable by `(tenant, workflow_id, name)`.
    fn upsert_variable(
        &self,
        variable: &WorkflowVariable,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List variables of exactly one scope: a workflow's own variables, or the
    /// tenant-global ones when `workflow_id` is `None`. Ordered by name.
    fn list_variables(
        &self,
        tenant_id: &Uuid,
        workflow_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowVariable>, RepositoryError>> + Send;

    fn delete_variable(
        &self,
        tenant_id: &Uuid,
        workflow_id: Option<&Uuid>,
        name: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace an execution row while it is still running.
    ///
    /// Fails with `Conflict` if the stored execution already reached a
    /// terminal status, so status never regresses.
    fn update_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// List a workflow's executions, newest first.
    fn list_executions(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        query: &ExecutionQuery,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step executions
    // -----------------------------------------------------------------------

    fn create_step_execution(
        &self,
        step: &WorkflowStepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn update_step_execution(
        &self,
        step: &WorkflowStepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List an execution's step records ordered by start time.
    fn list_step_executions(
        &self,
        tenant_id: &Uuid,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowStepExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    fn create_schedule(
        &self,
        schedule: &WorkflowSchedule,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn update_schedule(
        &self,
        schedule: &WorkflowSchedule,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_schedule(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowSchedule>, RepositoryError>> + Send;

    fn list_schedules(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowSchedule>, RepositoryError>> + Send;

    /// Every active schedule across all tenants (startup restore).
    fn list_active_schedules(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowSchedule>, RepositoryError>> + Send;

    fn delete_schedule(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Audit log
    // -----------------------------------------------------------------------

    /// Append an audit entry. Entries are never updated or deleted here.
    fn append_log(
        &self,
        entry: &WorkflowLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Query audit entries, newest first.
    fn query_logs(
        &self,
        tenant_id: &Uuid,
        query: &LogQuery,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowLog>, RepositoryError>> + Send;
}
