//! Business logic services (use cases).
//!
//! Services orchestrate repository calls, the engine and the scheduler
//! behind the operations the CLI exposes. They depend on traits (ports),
//! never on concrete infrastructure implementations.

pub mod workflow;

pub use workflow::{ImportOutcome, ServiceError, WorkflowService};
