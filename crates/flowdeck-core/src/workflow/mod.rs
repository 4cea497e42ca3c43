//! Workflow engine: definitions, validation, execution, scheduling and triggers.
//!
//! Layout:
//! - `definition` / `dag`: definition checks, dependency graph, export parsing
//! - `context` / `resolver` / `condition`: run context, templates, predicates
//! - `actions` / `step_runner` / `calculate`: step handlers
//! - `executor` / `retry` / `checkpoint` / `audit`: the execution engine
//! - `scheduler` / `trigger`: cron, event and webhook triggers
//! - `export`: export documents and import plans

pub mod actions;
pub mod audit;
pub mod calculate;
pub mod checkpoint;
pub mod collaborators;
pub mod condition;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod export;
pub mod expression;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod step_runner;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;
