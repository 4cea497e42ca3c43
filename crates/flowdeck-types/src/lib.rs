//! Shared domain types for Flowdeck.
//!
//! This crate contains the domain types used across the workflow engine:
//! workflow definitions, executions, schedules, audit logs, progress events,
//! the export document format, configuration, and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod export;
pub mod log;
pub mod schedule;
pub mod workflow;
