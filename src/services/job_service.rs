//! Job registry: CRUD and validation over job definitions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::jobs::cron::{self, CronExpression};
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::executor::ExecutionEngine;
use crate::jobs::models::{
    CreateJobDefinition, ExecutionFilter, JobDefinition, JobDefinitionFilter, PageRequest,
    UpdateJobDefinition,
};
use crate::jobs::types::ExecutionStatus;
use crate::repositories::Stores;

/// Number of fire times reported by [`JobService::validate_cron`]
pub const CRON_PREVIEW_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub next_executions: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatistics {
    pub total_jobs: i64,
    pub active_jobs: i64,
    pub completed_executions: i64,
    pub failed_executions: i64,
    pub running_executions: i64,
    pub average_execution_time_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingExecution {
    pub job_id: Uuid,
    pub job_name: String,
    pub cron_expression: String,
    pub next_execution: DateTime<Utc>,
}

/// Job service for handling job-definition business logic.
#[derive(Clone)]
pub struct JobService {
    stores: Stores,
    engine: ExecutionEngine,
}

impl JobService {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            stores: engine.stores().clone(),
            engine,
        }
    }

    /// Creates a job definition after validating its fields and cron expression.
    pub async fn create(&self, create: CreateJobDefinition) -> JobResult<JobDefinition> {
        create.validate()?;
        if let Some(expression) = &create.cron_expression {
            cron::validate(expression)?;
        }

        let job = self.stores.jobs.insert(create.into_definition(Utc::now())).await?;
        tracing::info!(job_id = %job.id, job_name = %job.name, script_type = %job.script_type, "Job definition created");
        Ok(job)
    }

    /// Ordered by priority, then newest first
    pub async fn list(&self, filter: &JobDefinitionFilter) -> JobResult<Vec<JobDefinition>> {
        self.stores.jobs.list(filter).await
    }

    pub async fn get(&self, id: Uuid) -> JobResult<JobDefinition> {
        self.stores
            .jobs
            .find(id)
            .await?
            .ok_or(JobError::JobNotFound(id))
    }

    /// Applies a partial update; a changed cron expression restarts inline cron tracking.
    pub async fn update(&self, id: Uuid, mut patch: UpdateJobDefinition) -> JobResult<JobDefinition> {
        patch.validate()?;
        let current = self.get(id).await?;

        if let Some(Some(expression)) = &patch.cron_expression {
            cron::validate(expression)?;
        }
        if let Some(cron_expression) = &patch.cron_expression
            && *cron_expression != current.cron_expression
        {
            patch.last_scheduled_at = Some(None);
        }
        patch.updated_at = Some(Utc::now());

        let job = self.stores.jobs.update(id, patch).await?;
        tracing::info!(job_id = %job.id, job_name = %job.name, "Job definition updated");
        Ok(job)
    }

    /// Cancels live executions of the job, then deletes it with its history and schedules.
    pub async fn remove(&self, id: Uuid) -> JobResult<()> {
        let job = self.get(id).await?;

        let live = ExecutionFilter {
            job_definition_id: Some(id),
            statuses: vec![ExecutionStatus::Pending, ExecutionStatus::Running],
            ..ExecutionFilter::default()
        };
        let page = self
            .stores
            .executions
            .list(&live, PageRequest::new(1, PageRequest::MAX_LIMIT))
            .await?;
        for execution in page.items {
            match self.engine.cancel(execution.id).await {
                Ok(_) | Err(JobError::InvalidStateTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if !self.stores.jobs.delete(id).await? {
            return Err(JobError::JobNotFound(id));
        }
        tracing::info!(job_id = %id, job_name = %job.name, "Job definition deleted");
        Ok(())
    }

    pub async fn toggle_active(&self, id: Uuid) -> JobResult<JobDefinition> {
        let current = self.get(id).await?;
        let patch = UpdateJobDefinition {
            is_active: Some(!current.is_active),
            updated_at: Some(Utc::now()),
            ..UpdateJobDefinition::default()
        };
        let job = self.stores.jobs.update(id, patch).await?;
        tracing::info!(job_id = %job.id, is_active = job.is_active, "Job definition toggled");
        Ok(job)
    }

    /// Never fails; an invalid expression is reported in the result
    pub fn validate_cron(&self, expression: &str) -> CronValidation {
        validate_cron_at(expression, Utc::now())
    }

    pub async fn statistics(&self) -> JobResult<JobStatistics> {
        let (total_jobs, active_jobs) = self.stores.jobs.count().await?;
        let counts = self.stores.executions.status_counts(None).await?;
        let average = self.stores.executions.average_execution_ms(None).await?;

        Ok(JobStatistics {
            total_jobs,
            active_jobs,
            completed_executions: counts.completed,
            failed_executions: counts.failed,
            running_executions: counts.running,
            average_execution_time_ms: average,
        })
    }

    /// Next inline cron occurrence of each active job, soonest first
    pub async fn upcoming(&self, limit: usize) -> JobResult<Vec<UpcomingExecution>> {
        let now = Utc::now();
        let mut upcoming: Vec<_> = self
            .stores
            .jobs
            .list_cron_enabled()
            .await?
            .into_iter()
            .filter_map(|job| {
                let expression = job.cron_expression?;
                let next = CronExpression::parse(&expression).ok()?.next_after(now)?;
                Some(UpcomingExecution {
                    job_id: job.id,
                    job_name: job.name,
                    cron_expression: expression,
                    next_execution: next,
                })
            })
            .collect();

        upcoming.sort_by_key(|u| u.next_execution);
        upcoming.truncate(limit);
        Ok(upcoming)
    }
}

pub fn validate_cron_at(expression: &str, now: DateTime<Utc>) -> CronValidation {
    match CronExpression::parse(expression) {
        Ok(cron) => CronValidation {
            valid: true,
            error: None,
            next_executions: cron.upcoming(now, CRON_PREVIEW_COUNT),
        },
        Err(e) => CronValidation {
            valid: false,
            error: Some(e.to_string()),
            next_executions: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::{CreateSchedule, Execution};
    use crate::jobs::types::{ScheduleType, TriggerType};
    use chrono::TimeZone;
    use serde_json::json;

    fn service() -> JobService {
        JobService::new(ExecutionEngine::builder(Stores::memory()).build())
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let service = service();
        service.create(CreateJobDefinition::shell("backup", "true")).await.unwrap();

        assert!(matches!(
            service.create(CreateJobDefinition::shell("backup", "false")).await,
            Err(JobError::DuplicateName(name)) if name == "backup"
        ));
    }

    #[tokio::test]
    async fn test_invalid_fields_rejected() {
        let service = service();

        let mut bad_cron = CreateJobDefinition::shell("a", "true");
        bad_cron.cron_expression = Some("every day".into());
        assert!(matches!(
            service.create(bad_cron).await,
            Err(JobError::InvalidCronExpression { .. })
        ));

        let mut bad_timeout = CreateJobDefinition::shell("b", "true");
        bad_timeout.timeout_seconds = 0;
        assert!(matches!(
            service.create(bad_timeout).await,
            Err(JobError::Validation { field, .. }) if field == "timeout_seconds"
        ));

        assert!(matches!(
            service.create(CreateJobDefinition::shell("", "true")).await,
            Err(JobError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_revalidates_and_resets_cron_tracking() {
        let service = service();
        let mut create = CreateJobDefinition::shell("nightly", "true");
        create.cron_expression = Some("0 2 * * *".into());
        let job = service.create(create).await.unwrap();
        service
            .stores
            .jobs
            .mark_scheduled(job.id, Utc::now())
            .await
            .unwrap();

        let bad = UpdateJobDefinition {
            cron_expression: Some(Some("61 * * * *".into())),
            ..Default::default()
        };
        assert!(service.update(job.id, bad).await.is_err());

        let patch = UpdateJobDefinition {
            cron_expression: Some(Some("0 3 * * *".into())),
            ..Default::default()
        };
        let updated = service.update(job.id, patch).await.unwrap();
        assert_eq!(updated.cron_expression.as_deref(), Some("0 3 * * *"));
        assert_eq!(updated.last_scheduled_at, None);

        assert!(matches!(
            service.update(Uuid::new_v4(), UpdateJobDefinition::default()).await,
            Err(JobError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_cancels_live_executions_and_schedules() {
        let service = service();
        let job = service.create(CreateJobDefinition::shell("doomed", "true")).await.unwrap();
        let execution = service
            .stores
            .executions
            .insert(Execution::pending(job.id, TriggerType::Manual, None, json!({}), Utc::now()))
            .await
            .unwrap();
        let mut schedule = CreateSchedule::new(job.id, ScheduleType::Interval);
        schedule.interval_minutes = Some(5);
        service
            .stores
            .schedules
            .insert(schedule.into_schedule(Utc::now()).unwrap())
            .await
            .unwrap();

        let mut events = service.engine.notifier().subscribe();
        service.remove(job.id).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.execution_id, execution.id);
        assert!(service.stores.schedules.list(Some(job.id)).await.unwrap().is_empty());
        assert!(matches!(service.get(job.id).await, Err(JobError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_toggle_and_statistics() {
        let service = service();
        let job = service.create(CreateJobDefinition::shell("t", "true")).await.unwrap();
        assert!(!service.toggle_active(job.id).await.unwrap().is_active);
        assert!(service.toggle_active(job.id).await.unwrap().is_active);

        let stats = service.statistics().await.unwrap();
        assert_eq!(stats.total_jobs, 1);
        assert_eq!(stats.active_jobs, 1);
        assert_eq!(stats.running_executions, 0);
        assert_eq!(stats.average_execution_time_ms, None);
    }

    #[test]
    fn test_validate_cron_previews_five_times() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 30).unwrap();
        let result = validate_cron_at("*/10 * * * *", now);
        assert!(result.valid);
        assert_eq!(result.next_executions.len(), CRON_PREVIEW_COUNT);
        assert_eq!(
            result.next_executions[0],
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 10, 0).unwrap()
        );

        let invalid = validate_cron_at("nope", now);
        assert!(!invalid.valid);
        assert!(invalid.error.is_some());
        assert!(invalid.next_executions.is_empty());
    }

    #[tokio::test]
    async fn test_upcoming_sorted_and_limited() {
        let service = service();
        for (name, expr) in [("hourly", "0 * * * *"), ("minutely", "* * * * *"), ("daily", "0 0 * * *")] {
            let mut create = CreateJobDefinition::shell(name, "true");
            create.cron_expression = Some(expr.into());
            service.create(create).await.unwrap();
        }

        let upcoming = service.upcoming(2).await.unwrap();
        assert_eq!(upcoming.len(), 2);
        assert!(upcoming[0].next_execution - Utc::now() <= chrono::Duration::seconds(60));
        assert!(upcoming[0].next_execution <= upcoming[1].next_execution);
    }
}
