//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. `DatabasePool` keeps a
//! multi-connection reader pool for concurrent reads and a single-connection
//! writer pool for serialized writes. Both use WAL journal mode and enforce
//! foreign keys (step, variable and schedule rows cascade with their workflow).

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Split read/write pool for SQLite with WAL mode.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (or create) the database and run migrations on the writer.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts)
            .await?;

        // Migrate before the reader pool opens; read-only connections cannot
        // create the WAL file.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_opts)
            .await?;

        tracing::debug!(url = %database_url, "database pool ready");
        Ok(Self { reader, writer })
    }

    /// Open the database file inside `data_dir`, creating the directory.
    pub async fn open(data_dir: &Path, database_file: &str) -> Result<Self, sqlx::Error> {
        tokio::fs::create_dir_all(data_dir).await?;
        let url = format!("sqlite://{}?mode=rwc", data_dir.join(database_file).display());
        Self::new(&url).await
    }

    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_creates_tables() {
        let (pool, _dir) = crate::sqlite::test_pool().await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in [
            "outbox",
            "records",
            "workflow_executions",
            "workflow_logs",
            "workflow_schedules",
            "workflow_step_executions",
            "workflow_steps",
            "workflow_variables",
            "workflows",
        ] {
            assert!(names.contains(&expected), "{expected} table missing");
        }
    }

    #[tokio::test]
    async fn test_pool_wal_and_foreign_keys() {
        let (pool, _dir) = crate::sqlite::test_pool().await;

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");

        let fk: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(fk.0, 1, "foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_open_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("flowdeck");
        let pool = DatabasePool::open(&data_dir, "flowdeck.db").await.unwrap();
        assert!(data_dir.join("flowdeck.db").exists());
        pool.close().await;
    }
}
