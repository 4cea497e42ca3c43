//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (flowdeck-infra) implements. The core crate never depends on any
//! specific storage technology; the in-memory implementation here exists
//! for tests and ephemeral runs.

pub mod memory;
pub mod workflow;

pub use memory::InMemoryWorkflowRepository;
pub use workflow::{WorkflowFilter, WorkflowRepository};
