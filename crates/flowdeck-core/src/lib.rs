//! Workflow engine and repository trait definitions for Flowdeck.
//!
//! This crate defines the "ports" (repository and collaborator traits) that
//! the infrastructure layer implements, plus the engine itself: validation,
//! template resolution, action dispatch, retries, execution, scheduling and
//! audit logging. It depends only on `flowdeck-types` -- never on
//! `flowdeck-infra` or any database/IO crate.

pub mod event;
pub mod repository;
pub mod service;
pub mod workflow;
