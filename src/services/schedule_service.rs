//! Explicit schedules attached to job definitions.

use chrono::Utc;
use uuid::Uuid;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::models::{CreateSchedule, Schedule, ScheduleProgress};
use crate::jobs::schedule::initial_progress;
use crate::repositories::Stores;

#[derive(Clone)]
pub struct ScheduleService {
    stores: Stores,
}

impl ScheduleService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn list(&self, job_definition_id: Option<Uuid>) -> JobResult<Vec<Schedule>> {
        self.stores.schedules.list(job_definition_id).await
    }

    pub async fn get(&self, id: Uuid) -> JobResult<Schedule> {
        self.stores
            .schedules
            .find(id)
            .await?
            .ok_or(JobError::ScheduleNotFound(id))
    }

    /// Validates the type-specific fields and computes the first execution
    pub async fn create(&self, create: CreateSchedule) -> JobResult<Schedule> {
        if self.stores.jobs.find(create.job_definition_id).await?.is_none() {
            return Err(JobError::JobNotFound(create.job_definition_id));
        }

        let schedule = self
            .stores
            .schedules
            .insert(create.into_schedule(Utc::now())?)
            .await?;
        tracing::info!(
            schedule_id = %schedule.id,
            job_id = %schedule.job_definition_id,
            schedule_type = %schedule.schedule_type,
            next_execution = ?schedule.next_execution,
            "Schedule created"
        );
        Ok(schedule)
    }

    pub async fn pause(&self, id: Uuid) -> JobResult<Schedule> {
        let schedule = self.get(id).await?;
        let progress = ScheduleProgress {
            next_execution: schedule.next_execution,
            last_execution: schedule.last_execution,
            is_active: false,
            updated_at: Utc::now(),
        };
        let paused = self.stores.schedules.update_progress(id, &progress).await?;
        tracing::info!(schedule_id = %id, "Schedule paused");
        Ok(paused)
    }

    /// Re-activates and recomputes the next execution from now
    pub async fn resume(&self, id: Uuid) -> JobResult<Schedule> {
        let schedule = self.get(id).await?;
        let progress = initial_progress(&schedule, Utc::now())?;
        let resumed = self.stores.schedules.update_progress(id, &progress).await?;
        tracing::info!(
            schedule_id = %id,
            is_active = resumed.is_active,
            next_execution = ?resumed.next_execution,
            "Schedule resumed"
        );
        Ok(resumed)
    }

    pub async fn delete(&self, id: Uuid) -> JobResult<()> {
        if !self.stores.schedules.delete(id).await? {
            return Err(JobError::ScheduleNotFound(id));
        }
        tracing::info!(schedule_id = %id, "Schedule deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::CreateJobDefinition;
    use crate::jobs::types::ScheduleType;

    async fn setup() -> (ScheduleService, Uuid) {
        let stores = Stores::memory();
        let job = stores
            .jobs
            .insert(CreateJobDefinition::shell("scheduled", "true").into_definition(Utc::now()))
            .await
            .unwrap();
        (ScheduleService::new(stores), job.id)
    }

    #[tokio::test]
    async fn test_create_validates_and_computes_next() {
        let (service, job_id) = setup().await;

        assert!(matches!(
            service.create(CreateSchedule::new(job_id, ScheduleType::Interval)).await,
            Err(JobError::Validation { .. })
        ));
        assert!(matches!(
            service.create(CreateSchedule::new(Uuid::new_v4(), ScheduleType::Once)).await,
            Err(JobError::JobNotFound(_))
        ));

        let mut create = CreateSchedule::new(job_id, ScheduleType::Interval);
        create.interval_minutes = Some(15);
        let before = Utc::now();
        let schedule = service.create(create).await.unwrap();
        assert!(schedule.is_active);
        let next = schedule.next_execution.unwrap();
        assert!(next >= before + chrono::Duration::minutes(15));
    }

    #[tokio::test]
    async fn test_pause_resume_delete() {
        let (service, job_id) = setup().await;
        let mut create = CreateSchedule::new(job_id, ScheduleType::Cron);
        create.cron_expression = Some("0 * * * *".into());
        let schedule = service.create(create).await.unwrap();

        let paused = service.pause(schedule.id).await.unwrap();
        assert!(!paused.is_active);
        assert!(service.stores.schedules.find_due(Utc::now() + chrono::Duration::days(1)).await.unwrap().is_empty());

        let resumed = service.resume(schedule.id).await.unwrap();
        assert!(resumed.is_active);
        assert!(resumed.next_execution.unwrap() > Utc::now());

        service.delete(schedule.id).await.unwrap();
        assert!(matches!(
            service.delete(schedule.id).await,
            Err(JobError::ScheduleNotFound(_))
        ));
        assert!(service.list(Some(job_id)).await.unwrap().is_empty());
    }
}
