//! Cron scheduling of workflow executions.
//!
//! Provides:
//! - Cron expression validation (5-field or 6-field) and human-readable
//!   shorthand normalization ("every 5 minutes" -> cron)
//! - Timezone parsing (`UTC` or fixed offsets) and `nextRunAt` computation
//! - `WorkflowScheduler`, which owns one timer handle per active schedule and
//!   fires the engine with `{trigger: "schedule", scheduleId}`
//! - Missed-run detection on restart (reported to the audit log)
//!
//! Timers come from the `ScheduleTimer` trait. `CronTimer` wraps
//! `tokio-cron-scheduler`; tests substitute a manually fired timer.

use std::sync::{Arc, Weak};

use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowdeck_types::error::RepositoryError;
use flowdeck_types::schedule::{ScheduleConfig, WorkflowSchedule};
use flowdeck_types::workflow::Workflow;
use futures_util::future::BoxFuture;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::repository::WorkflowRepository;

use super::audit::{AuditLogger, AuditScope};
use super::executor::{ExecutorError, WorkflowEngine};

/// Upper bound on missed runs listed in a single audit entry.
const MAX_REPORTED_MISSED_RUNS: usize = 100;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Malformed cron expression or shorthand.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid timezone: '{0}' (expected UTC or an offset like +05:30)")]
    InvalidTimezone(String),

    /// The timer backend failed to register or cancel a job.
    #[error("timer error: {0}")]
    Timer(String),

    #[error("schedule not found: {0}")]
    NotFound(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Expression handling
// ---------------------------------------------------------------------------

/// Normalize a schedule to a 6-field cron expression (with seconds).
///
/// Accepts 5-field cron (seconds fixed at 0), 6-field cron, and the
/// case-insensitive shorthands `every minute|hour|day`, `minutely`, `hourly`,
/// `daily`, `weekly`, `every N seconds|minutes|hours` and
/// `every day at HH:MM`.
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();
    let invalid = || SchedulerError::InvalidSchedule(format!("unrecognized schedule: '{trimmed}'"));

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let looks_like_cron = fields
        .first()
        .is_some_and(|f| !f.chars().all(char::is_alphabetic));
    if looks_like_cron {
        return match fields.len() {
            5 => Ok(format!("0 {}", fields.join(" "))),
            6 => Ok(fields.join(" ")),
            n => Err(SchedulerError::InvalidSchedule(format!(
                "expected 5 or 6 cron fields, got {n}"
            ))),
        };
    }

    let lower = trimmed.to_lowercase();
    let fixed = match lower.as_str() {
        "every minute" | "minutely" => Some("0 * * * * *"),
        "every hour" | "hourly" => Some("0 0 * * * *"),
        "every day" | "daily" => Some("0 0 0 * * *"),
        "every week" | "weekly" => Some("0 0 0 * * 0"),
        _ => None,
    };
    if let Some(expr) = fixed {
        return Ok(expr.to_string());
    }

    let rest = lower.strip_prefix("every ").ok_or_else(invalid)?;

    if let Some(at) = rest.strip_prefix("day at ") {
        let (hour, minute) = at.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        if hour >= 24 || minute >= 60 {
            return Err(invalid());
        }
        return Ok(format!("0 {minute} {hour} * * *"));
    }

    let (count, unit) = rest.split_once(' ').ok_or_else(invalid)?;
    let n: u32 = count.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(SchedulerError::InvalidSchedule("interval must be > 0".to_string()));
    }
    match unit.trim().trim_end_matches('s') {
        "second" => Ok(format!("*/{n} * * * * *")),
        "minute" => Ok(format!("0 */{n} * * * *")),
        "hour" => Ok(format!("0 0 */{n} * * *")),
        _ => Err(invalid()),
    }
}

/// Parse a timezone: `UTC`, `GMT`, `Z`, or a fixed offset such as `+05:30`,
/// `-0800`, `+02` (optionally prefixed with `UTC`).
pub fn parse_timezone(input: &str) -> Result<FixedOffset, SchedulerError> {
    let invalid = || SchedulerError::InvalidTimezone(input.to_string());
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();
    if matches!(upper.as_str(), "UTC" | "GMT" | "Z" | "ETC/UTC") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let offset = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);
    let (sign, digits) = match offset.as_bytes().first() {
        Some(b'+') => (1, &offset[1..]),
        Some(b'-') => (-1, &offset[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes >= 60 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn parse_cron(expr: &str) -> Result<croner::Cron, SchedulerError> {
    expr.parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidSchedule(format!("{expr}: {e}")))
}

/// The first fire time strictly after `after`, evaluated in `timezone`.
pub fn next_run_after(
    expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulerError> {
    let cron = parse_cron(&normalize_schedule(expression)?)?;
    let offset = parse_timezone(timezone)?;
    cron.find_next_occurrence(&after.with_timezone(&offset), false)
        .map(|next| next.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))
}

/// Fire times in `(since, until)` that a schedule would have produced.
pub fn missed_runs(
    expression: &str,
    timezone: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
    let cron = parse_cron(&normalize_schedule(expression)?)?;
    let offset = parse_timezone(timezone)?;
    Ok(cron
        .iter_after(since.with_timezone(&offset))
        .map(|t| t.with_timezone(&Utc))
        .take_while(|t| *t < until)
        .take(MAX_REPORTED_MISSED_RUNS)
        .collect())
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

/// Invoked on every timer fire.
pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Source of recurring timers.
pub trait ScheduleTimer: Send + Sync {
    /// Register `callback` to run on every fire of the 6-field `cron`
    /// expression in `timezone`. Returns a handle for `cancel`.
    fn register(
        &self,
        cron: String,
        timezone: FixedOffset,
        callback: TimerCallback,
    ) -> BoxFuture<'_, Result<Uuid, SchedulerError>>;

    fn cancel(&self, handle: Uuid) -> BoxFuture<'_, Result<(), SchedulerError>>;
}

/// `ScheduleTimer` backed by `tokio-cron-scheduler`. The underlying
/// `JobScheduler` is started lazily on the first registration.
pub struct CronTimer {
    inner: RwLock<Option<JobScheduler>>,
}

impl CronTimer {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    async fn scheduler(&self) -> Result<JobScheduler, SchedulerError> {
        if let Some(scheduler) = self.inner.read().await.as_ref() {
            return Ok(scheduler.clone());
        }

        let mut inner = self.inner.write().await;
        if let Some(scheduler) = inner.as_ref() {
            return Ok(scheduler.clone());
        }
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Timer(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Timer(e.to_string()))?;
        tracing::info!("cron timer started");
        *inner = Some(scheduler.clone());
        Ok(scheduler)
    }

    /// Stop the job scheduler and drop every registered job.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.write().await;
        if let Some(mut scheduler) = inner.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::Timer(e.to_string()))?;
            tracing::info!("cron timer stopped");
        }
        Ok(())
    }
}

impl Default for CronTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleTimer for CronTimer {
    fn register(
        &self,
        cron: String,
        timezone: FixedOffset,
        callback: TimerCallback,
    ) -> BoxFuture<'_, Result<Uuid, SchedulerError>> {
        Box::pin(async move {
            let scheduler = self.scheduler().await?;
            let job = Job::new_async_tz(cron.as_str(), timezone, move |_uuid, _lock| {
                let cb = Arc::clone(&callback);
                Box::pin(async move {
                    cb().await;
                })
            })
            .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

            let handle = job.guid();
            scheduler
                .add(job)
                .await
                .map_err(|e| SchedulerError::Timer(e.to_string()))?;
            Ok(handle)
        })
    }

    fn cancel(&self, handle: Uuid) -> BoxFuture<'_, Result<(), SchedulerError>> {
        Box::pin(async move {
            let scheduler = self.inner.read().await.clone();
            if let Some(scheduler) = scheduler {
                scheduler
                    .remove(&handle)
                    .await
                    .map_err(|e| SchedulerError::Timer(e.to_string()))?;
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowScheduler
// ---------------------------------------------------------------------------

/// Owns the timers of active schedules and runs workflows when they fire.
pub struct WorkflowScheduler<R: WorkflowRepository> {
    repo: Arc<R>,
    engine: Arc<WorkflowEngine<R>>,
    timer: Arc<dyn ScheduleTimer>,
    audit: AuditLogger<R>,
    /// Live timer handles keyed by schedule id.
    handles: DashMap<Uuid, Uuid>,
    report_missed: bool,
}

impl<R: WorkflowRepository + 'static> WorkflowScheduler<R> {
    pub fn new(repo: Arc<R>, engine: Arc<WorkflowEngine<R>>, timer: Arc<dyn ScheduleTimer>) -> Self {
        Self {
            audit: AuditLogger::new(Arc::clone(&repo)),
            repo,
            engine,
            timer,
            handles: DashMap::new(),
            report_missed: true,
        }
    }

    /// Toggle the audit warning written for fires missed while offline.
    pub fn with_missed_run_reporting(mut self, enabled: bool) -> Self {
        self.report_missed = enabled;
        self
    }

    /// Number of schedules with a live timer.
    pub fn active_timer_count(&self) -> usize {
        self.handles.len()
    }

    pub fn is_registered(&self, schedule_id: &Uuid) -> bool {
        self.handles.contains_key(schedule_id)
    }

    /// Validate `config`, persist a schedule for `workflow`, and start its
    /// timer when active. A malformed expression or timezone stores nothing.
    pub async fn create_schedule(
        self: &Arc<Self>,
        workflow: &Workflow,
        config: ScheduleConfig,
    ) -> Result<WorkflowSchedule, SchedulerError> {
        let now = Utc::now();
        let next_run_at = next_run_after(&config.cron_expression, &config.timezone, now)?;

        let schedule = WorkflowSchedule {
            id: Uuid::now_v7(),
            tenant_id: workflow.tenant_id,
            workflow_id: workflow.id,
            cron_expression: config.cron_expression.trim().to_string(),
            timezone: config.timezone.trim().to_string(),
            is_active: config.is_active,
            last_run_at: None,
            next_run_at: config.is_active.then_some(next_run_at),
            created_at: now,
            updated_at: now,
        };
        self.repo.create_schedule(&schedule).await?;

        if schedule.is_active {
            if let Err(e) = self.activate(&schedule).await {
                self.repo.delete_schedule(&schedule.tenant_id, &schedule.id).await?;
                return Err(e);
            }
        }

        self.audit
            .info(
                AuditScope::workflow(workflow.tenant_id, workflow.id),
                format!(
                    "schedule created: {} ({})",
                    schedule.cron_expression, schedule.timezone
                ),
                Some(json!({"scheduleId": schedule.id, "isActive": schedule.is_active})),
            )
            .await;
        Ok(schedule)
    }

    /// Activate or deactivate a schedule, registering or cancelling its timer.
    pub async fn set_active(
        self: &Arc<Self>,
        tenant_id: &Uuid,
        schedule_id: &Uuid,
        active: bool,
    ) -> Result<WorkflowSchedule, SchedulerError> {
        let mut schedule = self
            .repo
            .get_schedule(tenant_id, schedule_id)
            .await?
            .ok_or(SchedulerError::NotFound(*schedule_id))?;

        if active {
            self.activate(&schedule).await?;
            schedule.next_run_at = Some(next_run_after(
                &schedule.cron_expression,
                &schedule.timezone,
                Utc::now(),
            )?);
        } else {
            self.deactivate(schedule_id).await?;
            schedule.next_run_at = None;
        }
        schedule.is_active = active;
        schedule.updated_at = Utc::now();
        self.repo.update_schedule(&schedule).await?;

        self.audit
            .info(
                AuditScope::workflow(*tenant_id, schedule.workflow_id),
                format!(
                    "schedule {} {}",
                    schedule.id,
                    if active { "activated" } else { "deactivated" }
                ),
                None,
            )
            .await;
        Ok(schedule)
    }

    /// Cancel the timer and delete the schedule. Returns `false` if it did not exist.
    pub async fn delete_schedule(
        &self,
        tenant_id: &Uuid,
        schedule_id: &Uuid,
    ) -> Result<bool, SchedulerError> {
        let Some(schedule) = self.repo.get_schedule(tenant_id, schedule_id).await? else {
            return Ok(false);
        };
        self.deactivate(schedule_id).await?;
        let deleted = self.repo.delete_schedule(tenant_id, schedule_id).await?;
        self.audit
            .info(
                AuditScope::workflow(*tenant_id, schedule.workflow_id),
                format!("schedule {} deleted", schedule.id),
                None,
            )
            .await;
        Ok(deleted)
    }

    /// Cancel the timers of every schedule of a workflow (rows are left to
    /// the caller, which deletes them with the workflow).
    pub async fn unschedule_workflow(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> Result<usize, SchedulerError> {
        let schedules = self.repo.list_schedules(tenant_id, workflow_id).await?;
        let mut cancelled = 0;
        for schedule in &schedules {
            if self.deactivate(&schedule.id).await? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    pub async fn list_schedules(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowSchedule>, SchedulerError> {
        Ok(self.repo.list_schedules(tenant_id, workflow_id).await?)
    }

    /// Re-register every active schedule (idempotent) and report runs missed
    /// while the process was down. Returns the number of live timers.
    pub async fn restore(self: &Arc<Self>) -> Result<usize, SchedulerError> {
        let schedules = self.repo.list_active_schedules().await?;
        let now = Utc::now();

        for mut schedule in schedules {
            if let Some(last_run) = schedule.last_run_at.filter(|_| self.report_missed) {
                self.report_missed_runs(&schedule, last_run, now).await;
            }

            if let Err(e) = self.activate(&schedule).await {
                tracing::warn!(schedule_id = %schedule.id, error = %e, "failed to restore schedule");
                continue;
            }

            match next_run_after(&schedule.cron_expression, &schedule.timezone, now) {
                Ok(next) => {
                    schedule.next_run_at = Some(next);
                    self.repo.update_schedule(&schedule).await?;
                }
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "cannot compute next run");
                }
            }
        }

        let count = self.handles.len();
        tracing::info!(count, "schedules restored");
        Ok(count)
    }

    /// Cancel every live timer (process shutdown).
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.handles.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Err(e) = self.deactivate(&id).await {
                tracing::warn!(schedule_id = %id, error = %e, "failed to cancel timer");
            }
        }
    }

    /// Run one scheduled execution, then record `lastRunAt`/`nextRunAt`.
    ///
    /// Returns the execution id, or `None` when the schedule is gone,
    /// inactive, or its workflow could not be started.
    pub async fn fire(
        &self,
        tenant_id: &Uuid,
        schedule_id: &Uuid,
    ) -> Result<Option<Uuid>, SchedulerError> {
        let Some(mut schedule) = self.repo.get_schedule(tenant_id, schedule_id).await? else {
            return Ok(None);
        };
        if !schedule.is_active {
            return Ok(None);
        }

        let fired_at = Utc::now();
        tracing::debug!(schedule_id = %schedule.id, workflow_id = %schedule.workflow_id, "schedule fired");

        let trigger_data = json!({"trigger": "schedule", "scheduleId": schedule.id});
        let execution_id = match self
            .engine
            .execute_workflow(tenant_id, &schedule.workflow_id, trigger_data)
            .await
        {
            Ok(execution) => Some(execution.id),
            Err(ExecutorError::StepFailed { execution_id, .. })
            | Err(ExecutorError::Cancelled(execution_id)) => Some(execution_id),
            Err(e) => {
                self.audit
                    .warn(
                        AuditScope::workflow(*tenant_id, schedule.workflow_id),
                        format!("scheduled run could not start: {e}"),
                        Some(json!({"scheduleId": schedule.id})),
                    )
                    .await;
                None
            }
        };

        schedule.last_run_at = Some(fired_at);
        schedule.next_run_at =
            next_run_after(&schedule.cron_expression, &schedule.timezone, Utc::now()).ok();
        schedule.updated_at = Utc::now();
        match self.repo.update_schedule(&schedule).await {
            Ok(()) => {}
            // Deleted while the run was in flight.
            Err(RepositoryError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        Ok(execution_id)
    }

    // -----------------------------------------------------------------------
    // Timer bookkeeping
    // -----------------------------------------------------------------------

    /// Register a timer for `schedule` unless one is already live.
    async fn activate(self: &Arc<Self>, schedule: &WorkflowSchedule) -> Result<(), SchedulerError> {
        if self.handles.contains_key(&schedule.id) {
            return Ok(());
        }

        let cron = normalize_schedule(&schedule.cron_expression)?;
        parse_cron(&cron)?;
        let timezone = parse_timezone(&schedule.timezone)?;

        let weak: Weak<Self> = Arc::downgrade(self);
        let tenant_id = schedule.tenant_id;
        let schedule_id = schedule.id;
        let callback: TimerCallback = Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(scheduler) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = scheduler.fire(&tenant_id, &schedule_id).await {
                    tracing::error!(%schedule_id, error = %e, "scheduled run failed");
                }
            })
        });

        let handle = self.timer.register(cron, timezone, callback).await?;

        // A concurrent activation may have registered while this one awaited;
        // the first handle in the map wins and the extra timer is cancelled.
        match self.handles.entry(schedule.id) {
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(handle);
                tracing::info!(schedule_id = %schedule.id, workflow_id = %schedule.workflow_id, "schedule timer registered");
                return Ok(());
            }
        }
        self.timer.cancel(handle).await?;
        tracing::debug!(schedule_id = %schedule.id, "duplicate schedule timer cancelled");
        Ok(())
    }

    /// Cancel the timer of a schedule. Returns `true` if one was live.
    async fn deactivate(&self, schedule_id: &Uuid) -> Result<bool, SchedulerError> {
        let Some((_, handle)) = self.handles.remove(schedule_id) else {
            return Ok(false);
        };
        self.timer.cancel(handle).await?;
        tracing::info!(%schedule_id, "schedule timer cancelled");
        Ok(true)
    }

    async fn report_missed_runs(
        &self,
        schedule: &WorkflowSchedule,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let missed = match missed_runs(&schedule.cron_expression, &schedule.timezone, since, now) {
            Ok(missed) => missed,
            Err(_) => return,
        };
        if missed.is_empty() {
            return;
        }

        tracing::warn!(schedule_id = %schedule.id, count = missed.len(), "detected missed scheduled runs");
        self.audit
            .warn(
                AuditScope::workflow(schedule.tenant_id, schedule.workflow_id),
                format!("{} scheduled run(s) missed while offline", missed.len()),
                Some(json!({
                    "scheduleId": schedule.id,
                    "missed": missed.iter().map(DateTime::to_rfc3339).collect::<Vec<_>>(),
                })),
            )
            .await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
