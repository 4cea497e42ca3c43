//! Application state wiring all services together.
//!
//! `AppState` pins the generic engine, scheduler and service to the SQLite
//! repository and the infra collaborators (outbox, record store, reqwest).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use flowdeck_core::event::bus::EventBus;
use flowdeck_core::service::WorkflowService;
use flowdeck_core::workflow::collaborators::ActionServices;
use flowdeck_core::workflow::executor::WorkflowEngine;
use flowdeck_core::workflow::scheduler::{CronTimer, WorkflowScheduler};
use flowdeck_core::workflow::trigger::TriggerRouter;
use flowdeck_infra::config::load_config;
use flowdeck_infra::http::ReqwestHttpClient;
use flowdeck_infra::sqlite::outbox::SqliteOutbox;
use flowdeck_infra::sqlite::pool::DatabasePool;
use flowdeck_infra::sqlite::records::SqliteRecordStore;
use flowdeck_infra::sqlite::workflow::SqliteWorkflowRepository;
use flowdeck_infra::webhook::HmacVerifier;
use flowdeck_types::config::FlowdeckConfig;
use uuid::Uuid;

/// Concrete type alias for the service pinned to SQLite.
pub type ConcreteWorkflowService = WorkflowService<SqliteWorkflowRepository>;

/// Shared application state used by every CLI command.
#[derive(Clone)]
pub struct AppState {
    pub workflow_service: Arc<ConcreteWorkflowService>,
    pub cron_timer: Arc<CronTimer>,
    pub config: FlowdeckConfig,
    pub data_dir: PathBuf,
    /// Tenant every command operates on.
    pub tenant_id: Uuid,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Load config, open the database and wire the services.
    pub async fn init(data_dir: PathBuf, tenant: Option<Uuid>) -> anyhow::Result<Self> {
        let config = load_config(&data_dir).await;

        let db_pool = DatabasePool::open(&data_dir, &config.database_file)
            .await
            .with_context(|| format!("failed to open database in {}", data_dir.display()))?;

        let repo = Arc::new(SqliteWorkflowRepository::new(db_pool.clone()));
        let outbox = Arc::new(SqliteOutbox::new(db_pool.clone()));
        let http = ReqwestHttpClient::new(&config.http).context("failed to build HTTP client")?;
        let services = ActionServices {
            email: outbox.clone(),
            notifications: outbox,
            records: Arc::new(SqliteRecordStore::new(db_pool.clone())),
            http: Arc::new(http),
        };

        let engine = Arc::new(WorkflowEngine::with_event_bus(
            Arc::clone(&repo),
            services,
            config.engine.clone(),
            EventBus::new(config.engine.event_bus_capacity),
        ));

        let cron_timer = Arc::new(CronTimer::new());
        let scheduler = Arc::new(
            WorkflowScheduler::new(Arc::clone(&repo), Arc::clone(&engine), cron_timer.clone())
                .with_missed_run_reporting(config.scheduler.report_missed_runs),
        );
        let triggers = TriggerRouter::new(Arc::clone(&repo), Arc::clone(&engine), Arc::new(HmacVerifier));

        let workflow_service = WorkflowService::new(repo, engine, scheduler, triggers);

        // --tenant / FLOWDECK_TENANT, then config, then the nil tenant.
        let tenant_id = tenant.or(config.default_tenant).unwrap_or_else(Uuid::nil);
        tracing::debug!(data_dir = %data_dir.display(), %tenant_id, "application state ready");

        Ok(Self {
            workflow_service: Arc::new(workflow_service),
            cron_timer,
            config,
            data_dir,
            tenant_id,
            db_pool,
        })
    }
}
