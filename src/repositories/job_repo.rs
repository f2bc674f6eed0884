use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::db::AsyncDbPool;
use crate::error::DatabaseErrorConverter;
use crate::jobs::models::{JobDefinition, JobDefinitionFilter, UpdateJobDefinition};
use crate::jobs::{JobError, JobResult};
use crate::repositories::{JobDefinitionStore, connection};
use crate::schema::job_definitions;

#[derive(Clone)]
pub struct JobRepository {
    pool: AsyncDbPool,
}

impl JobRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl JobDefinitionStore for JobRepository {
    async fn insert(&self, job: JobDefinition) -> JobResult<JobDefinition> {
        let mut conn = connection(&self.pool).await?;

        diesel::insert_into(job_definitions::table)
            .values(&job)
            .returning(JobDefinition::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| match DatabaseErrorConverter::convert_diesel_error(e, "insert job definition") {
                JobError::DuplicateName(_) => JobError::DuplicateName(job.name.clone()),
                other => other,
            })
    }

    async fn find(&self, id: Uuid) -> JobResult<Option<JobDefinition>> {
        let mut conn = connection(&self.pool).await?;

        job_definitions::table
            .find(id)
            .select(JobDefinition::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "find job definition"))
    }

    async fn list(&self, filter: &JobDefinitionFilter) -> JobResult<Vec<JobDefinition>> {
        let mut conn = connection(&self.pool).await?;

        let mut query = job_definitions::table
            .select(JobDefinition::as_select())
            .into_boxed();

        if let Some(active) = filter.is_active {
            query = query.filter(job_definitions::is_active.eq(active));
        }
        if let Some(script_type) = filter.script_type {
            query = query.filter(job_definitions::script_type.eq(script_type));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", escape_like(search));
            query = query.filter(
                job_definitions::name
                    .ilike(pattern.clone())
                    .or(job_definitions::description.ilike(pattern)),
            );
        }

        query
            .order((
                job_definitions::priority.asc(),
                job_definitions::created_at.desc(),
            ))
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "list job definitions"))
    }

    async fn list_cron_enabled(&self) -> JobResult<Vec<JobDefinition>> {
        let mut conn = connection(&self.pool).await?;

        job_definitions::table
            .filter(job_definitions::is_active.eq(true))
            .filter(job_definitions::cron_expression.is_not_null())
            .select(JobDefinition::as_select())
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "list cron job definitions"))
    }

    async fn update(&self, id: Uuid, patch: UpdateJobDefinition) -> JobResult<JobDefinition> {
        let mut conn = connection(&self.pool).await?;
        let new_name = patch.name.clone();

        diesel::update(job_definitions::table.find(id))
            .set(&patch)
            .returning(JobDefinition::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => JobError::JobNotFound(id),
                other => match DatabaseErrorConverter::convert_diesel_error(other, "update job definition") {
                    JobError::DuplicateName(_) => {
                        JobError::DuplicateName(new_name.unwrap_or_default())
                    }
                    converted => converted,
                },
            })
    }

    async fn mark_scheduled(&self, id: Uuid, occurrence: DateTime<Utc>) -> JobResult<()> {
        let mut conn = connection(&self.pool).await?;

        let updated = diesel::update(job_definitions::table.find(id))
            .set(job_definitions::last_scheduled_at.eq(Some(occurrence)))
            .execute(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "mark job scheduled"))?;

        if updated == 0 {
            return Err(JobError::JobNotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> JobResult<bool> {
        let mut conn = connection(&self.pool).await?;

        // Executions and schedules go with it through ON DELETE CASCADE
        let deleted = diesel::delete(job_definitions::table.find(id))
            .execute(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "delete job definition"))?;

        Ok(deleted > 0)
    }

    async fn count(&self) -> JobResult<(i64, i64)> {
        let mut conn = connection(&self.pool).await?;

        let total: i64 = job_definitions::table
            .count()
            .get_result(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "count job definitions"))?;

        let active: i64 = job_definitions::table
            .filter(job_definitions::is_active.eq(true))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "count active job definitions"))?;

        Ok((total, active))
    }
}
