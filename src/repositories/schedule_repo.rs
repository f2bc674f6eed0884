use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::db::AsyncDbPool;
use crate::error::DatabaseErrorConverter;
use crate::jobs::models::{Schedule, ScheduleProgress};
use crate::jobs::{JobError, JobResult};
use crate::repositories::{ScheduleStore, connection};
use crate::schema::{job_definitions, job_schedules};

#[derive(Clone)]
pub struct ScheduleRepository {
    pool: AsyncDbPool,
}

impl ScheduleRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleStore for ScheduleRepository {
    async fn insert(&self, schedule: Schedule) -> JobResult<Schedule> {
        let mut conn = connection(&self.pool).await?;
        let job_id = schedule.job_definition_id;

        diesel::insert_into(job_schedules::table)
            .values(&schedule)
            .returning(Schedule::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| match DatabaseErrorConverter::convert_diesel_error(e, "insert schedule") {
                JobError::Validation { field, .. } if field == "jobDefinitionId" => {
                    JobError::JobNotFound(job_id)
                }
                other => other,
            })
    }

    async fn find(&self, id: Uuid) -> JobResult<Option<Schedule>> {
        let mut conn = connection(&self.pool).await?;

        job_schedules::table
            .find(id)
            .select(Schedule::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "find schedule"))
    }

    async fn list(&self, job_definition_id: Option<Uuid>) -> JobResult<Vec<Schedule>> {
        let mut conn = connection(&self.pool).await?;

        let mut query = job_schedules::table
            .select(Schedule::as_select())
            .order(job_schedules::created_at.asc())
            .into_boxed();
        if let Some(job_id) = job_definition_id {
            query = query.filter(job_schedules::job_definition_id.eq(job_id));
        }

        query
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "list schedules"))
    }

    async fn find_due(&self, now: DateTime<Utc>) -> JobResult<Vec<Schedule>> {
        let mut conn = connection(&self.pool).await?;

        job_schedules::table
            .inner_join(job_definitions::table)
            .filter(job_schedules::is_active.eq(true))
            .filter(job_definitions::is_active.eq(true))
            .filter(job_schedules::next_execution.le(now))
            .order(job_schedules::next_execution.asc())
            .select(Schedule::as_select())
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "find due schedules"))
    }

    async fn update_progress(&self, id: Uuid, progress: &ScheduleProgress) -> JobResult<Schedule> {
        let mut conn = connection(&self.pool).await?;

        diesel::update(job_schedules::table.find(id))
            .set(progress)
            .returning(Schedule::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => JobError::ScheduleNotFound(id),
                other => DatabaseErrorConverter::convert_diesel_error(other, "update schedule"),
            })
    }

    async fn delete(&self, id: Uuid) -> JobResult<bool> {
        let mut conn = connection(&self.pool).await?;

        let deleted = diesel::delete(job_schedules::table.find(id))
            .execute(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "delete schedule"))?;

        Ok(deleted > 0)
    }
}
