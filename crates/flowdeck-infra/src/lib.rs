//! Infrastructure layer for Flowdeck.
//!
//! Contains implementations of the ports defined in `flowdeck-core`:
//! SQLite storage (workflow repository, record store, delivery outbox), the
//! reqwest-backed HTTP client, HMAC-SHA256 webhook signing, and the
//! `config.toml` loader.

pub mod config;
pub mod http;
pub mod sqlite;
pub mod webhook;
