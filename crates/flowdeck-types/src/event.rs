//! Event types for the execution progress bus.
//!
//! `WorkflowEvent` is broadcast by the engine as executions progress. All
//! variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted while a workflow execution runs.
///
/// Subscribers (CLI progress output, metrics, UI push) receive every event
/// published after they subscribe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
        workflow_name: String,
        trigger: String,
    },

    StepStarted {
        execution_id: Uuid,
        step_id: Uuid,
        step_name: String,
        attempt: u32,
    },

    StepCompleted {
        execution_id: Uuid,
        step_id: Uuid,
        step_name: String,
        duration_ms: u64,
    },

    StepSkipped {
        execution_id: Uuid,
        step_id: Uuid,
        step_name: String,
        reason: String,
    },

    /// A step attempt failed and will be retried after `delay_ms`.
    StepRetrying {
        execution_id: Uuid,
        step_id: Uuid,
        step_name: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    StepFailed {
        execution_id: Uuid,
        step_id: Uuid,
        step_name: String,
        error: String,
    },

    ExecutionCompleted {
        execution_id: Uuid,
        workflow_id: Uuid,
        duration_ms: u64,
        steps_completed: u32,
    },

    ExecutionFailed {
        execution_id: Uuid,
        workflow_id: Uuid,
        error: String,
    },

    ExecutionCancelled {
        execution_id: Uuid,
        workflow_id: Uuid,
    },
}

impl WorkflowEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::StepStarted { execution_id, .. }
            | Self::StepCompleted { execution_id, .. }
            | Self::StepSkipped { execution_id, .. }
            | Self::StepRetrying { execution_id, .. }
            | Self::StepFailed { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionFailed { execution_id, .. }
            | Self::ExecutionCancelled { execution_id, .. } => *execution_id,
        }
    }

    /// Whether this event ends its execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExecutionCompleted { .. }
                | Self::ExecutionFailed { .. }
                | Self::ExecutionCancelled { .. }
        )
    }
}
