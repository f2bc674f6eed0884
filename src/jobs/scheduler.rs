use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler as TokioCronScheduler};

use crate::config::SchedulerConfig;
use crate::jobs::cron::CronExpression;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::executor::{ExecutionEngine, SubmitOptions};
use crate::jobs::models::{JobDefinition, Schedule};
use crate::jobs::schedule::progress_after_fire;
use crate::jobs::types::TriggerType;
use crate::repositories::Stores;

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Inline cron occurrences that produced an execution
    pub cron_fired: usize,
    /// Explicit schedules that produced an execution
    pub schedules_fired: usize,
    /// Due work skipped because the job was still running
    pub skipped: usize,
    pub errors: usize,
}

enum Fire {
    Submitted,
    Skipped,
}

/// Periodically turns due cron occurrences and schedules into executions.
///
/// Inline cron is exact-once: each occurrence is recorded on the job before
/// it is submitted, so a restart never replays it. Occurrences before the
/// scheduler started are never caught up.
pub struct Scheduler {
    stores: Stores,
    engine: ExecutionEngine,
    config: SchedulerConfig,
    started_at: DateTime<Utc>,
    runner: Mutex<Option<TokioCronScheduler>>,
}

fn scheduler_error(e: impl ToString) -> JobError {
    JobError::Scheduler(e.to_string())
}

impl Scheduler {
    pub fn new(engine: ExecutionEngine, config: SchedulerConfig) -> Self {
        Self::starting_at(engine, config, Utc::now())
    }

    /// A scheduler that ignores occurrences at or before `started_at`
    pub fn starting_at(engine: ExecutionEngine, config: SchedulerConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            stores: engine.stores().clone(),
            engine,
            config,
            started_at,
            runner: Mutex::new(None),
        }
    }

    /// Start ticking every `tick_seconds`
    pub async fn start(self: &Arc<Self>) -> JobResult<()> {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            return Ok(());
        }

        let scheduler = TokioCronScheduler::new().await.map_err(scheduler_error)?;
        let this = Arc::clone(self);
        let period = Duration::from_secs(self.config.tick_seconds.max(1));

        let tick_job = Job::new_repeated_async(period, move |_uuid, _lock| {
            let this = Arc::clone(&this);
            Box::pin(async move {
                match this.tick(Utc::now()).await {
                    Ok(report) if report != TickReport::default() => {
                        tracing::info!(
                            cron_fired = report.cron_fired,
                            schedules_fired = report.schedules_fired,
                            skipped = report.skipped,
                            errors = report.errors,
                            "Scheduler tick"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Scheduler tick failed"),
                }
            })
        })
        .map_err(scheduler_error)?;

        scheduler.add(tick_job).await.map_err(scheduler_error)?;
        scheduler.start().await.map_err(scheduler_error)?;
        *runner = Some(scheduler);

        tracing::info!(tick_seconds = period.as_secs(), "Scheduler started");
        Ok(())
    }

    /// Stop the scheduler gracefully
    pub async fn stop(&self) -> JobResult<()> {
        if let Some(mut scheduler) = self.runner.lock().await.take() {
            scheduler.shutdown().await.map_err(scheduler_error)?;
            tracing::info!("Scheduler stopped");
        }
        Ok(())
    }

    /// Evaluate everything due at `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> JobResult<TickReport> {
        let mut report = TickReport::default();

        for job in self.stores.jobs.list_cron_enabled().await? {
            match self.fire_inline_cron(&job, now).await {
                Ok(Some(Fire::Submitted)) => report.cron_fired += 1,
                Ok(Some(Fire::Skipped)) => report.skipped += 1,
                Ok(None) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(job_id = %job.id, job_name = %job.name, error = %e, "Inline cron evaluation failed");
                }
            }
        }

        for schedule in self.stores.schedules.find_due(now).await? {
            match self.fire_schedule(&schedule, now).await {
                Ok(Fire::Submitted) => report.schedules_fired += 1,
                Ok(Fire::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "Schedule evaluation failed");
                }
            }
        }

        Ok(report)
    }

    async fn fire_inline_cron(&self, job: &JobDefinition, now: DateTime<Utc>) -> JobResult<Option<Fire>> {
        let Some(expression) = job.cron_expression.as_deref() else {
            return Ok(None);
        };
        let cron = CronExpression::parse(expression)?;

        let watermark = job
            .last_scheduled_at
            .map_or(self.started_at, |last| last.max(self.started_at));
        let Some(occurrence) = cron.latest_between(watermark, now) else {
            return Ok(None);
        };

        // Recorded first: a crash between the two never fires twice
        self.stores.jobs.mark_scheduled(job.id, occurrence).await?;

        if self.stores.executions.has_running(job.id).await? {
            tracing::info!(job_id = %job.id, job_name = %job.name, occurrence = %occurrence, "Skipping cron fire, job still running");
            return Ok(Some(Fire::Skipped));
        }

        let options = SubmitOptions {
            metadata: json!({ "cronOccurrence": occurrence }),
            ..SubmitOptions::default()
        };
        self.engine
            .submit(job.id, TriggerType::Scheduled, options)
            .await?;
        Ok(Some(Fire::Submitted))
    }

    async fn fire_schedule(&self, schedule: &Schedule, now: DateTime<Utc>) -> JobResult<Fire> {
        let fire = if self.stores.executions.has_running(schedule.job_definition_id).await? {
            tracing::info!(schedule_id = %schedule.id, job_id = %schedule.job_definition_id, "Skipping schedule fire, job still running");
            Fire::Skipped
        } else {
            let options = SubmitOptions {
                metadata: json!({ "scheduleId": schedule.id }),
                ..SubmitOptions::default()
            };
            self.engine
                .submit(schedule.job_definition_id, TriggerType::Scheduled, options)
                .await?;
            Fire::Submitted
        };

        // The occurrence is consumed either way
        let progress = progress_after_fire(schedule, now)?;
        self.stores.schedules.update_progress(schedule.id, &progress).await?;
        Ok(fire)
    }
}
