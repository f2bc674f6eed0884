use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::{count_star, sql};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Double, Integer, Nullable, Timestamptz};
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::db::AsyncDbPool;
use crate::error::DatabaseErrorConverter;
use crate::jobs::JobResult;
use crate::jobs::models::{
    Execution, ExecutionFilter, ExecutionOutcome, Page, PageRequest, RetryProfile, StatusCounts,
};
use crate::jobs::types::{ExecutionStatus, TriggerType};
use crate::repositories::{ExecutionStore, connection};
use crate::schema::job_executions;

const TERMINAL: [ExecutionStatus; 3] = [
    ExecutionStatus::Completed,
    ExecutionStatus::Failed,
    ExecutionStatus::Cancelled,
];

#[derive(Clone)]
pub struct ExecutionRepository {
    pool: AsyncDbPool,
}

impl ExecutionRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }
}

fn filtered(filter: &ExecutionFilter) -> job_executions::BoxedQuery<'static, Pg> {
    let mut query = job_executions::table.into_boxed();

    if let Some(job_id) = filter.job_definition_id {
        query = query.filter(job_executions::job_definition_id.eq(job_id));
    }
    if !filter.statuses.is_empty() {
        query = query.filter(job_executions::status.eq_any(filter.statuses.clone()));
    }
    if let Some(trigger) = filter.trigger_type {
        query = query.filter(job_executions::trigger_type.eq(trigger));
    }
    if let Some(after) = filter.created_after {
        query = query.filter(job_executions::created_at.ge(after));
    }
    if let Some(before) = filter.created_before {
        query = query.filter(job_executions::created_at.lt(before));
    }

    query
}

#[derive(QueryableByName)]
struct RetryRow {
    #[diesel(sql_type = BigInt)]
    total: i64,
    #[diesel(sql_type = BigInt)]
    failed: i64,
    #[diesel(sql_type = BigInt)]
    retried: i64,
    #[diesel(sql_type = BigInt)]
    success_after_retry: i64,
    #[diesel(sql_type = Integer)]
    max_retry_count: i32,
    #[diesel(sql_type = BigInt)]
    retry_count_sum: i64,
}

#[async_trait]
impl ExecutionStore for ExecutionRepository {
    async fn insert(&self, execution: Execution) -> JobResult<Execution> {
        let mut conn = connection(&self.pool).await?;

        diesel::insert_into(job_executions::table)
            .values(&execution)
            .returning(Execution::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "insert execution"))
    }

    async fn find(&self, id: Uuid) -> JobResult<Option<Execution>> {
        let mut conn = connection(&self.pool).await?;

        job_executions::table
            .find(id)
            .select(Execution::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "find execution"))
    }

    async fn claim(&self, id: Uuid, started_at: DateTime<Utc>) -> JobResult<Option<Execution>> {
        let mut conn = connection(&self.pool).await?;

        diesel::update(
            job_executions::table
                .find(id)
                .filter(job_executions::status.eq(ExecutionStatus::Pending)),
        )
        .set((
            job_executions::status.eq(ExecutionStatus::Running),
            job_executions::started_at.eq(Some(started_at)),
            job_executions::updated_at.eq(started_at),
        ))
        .returning(Execution::as_returning())
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "claim execution"))
    }

    async fn finish(&self, id: Uuid, outcome: &ExecutionOutcome) -> JobResult<Option<Execution>> {
        let mut conn = connection(&self.pool).await?;

        diesel::update(
            job_executions::table
                .find(id)
                .filter(job_executions::status.eq(ExecutionStatus::Running)),
        )
        .set((
            job_executions::status.eq(outcome.status),
            job_executions::completed_at.eq(Some(outcome.completed_at)),
            job_executions::execution_time_ms.eq(Some(outcome.execution_time_ms)),
            job_executions::output_log.eq(outcome.output_log.clone()),
            job_executions::error_log.eq(outcome.error_log.clone()),
            job_executions::updated_at.eq(outcome.completed_at),
        ))
        .returning(Execution::as_returning())
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "finish execution"))
    }

    async fn reopen(
        &self,
        id: Uuid,
        retry_count: i32,
        now: DateTime<Utc>,
    ) -> JobResult<Option<Execution>> {
        let mut conn = connection(&self.pool).await?;

        diesel::update(
            job_executions::table
                .find(id)
                .filter(job_executions::status.eq(ExecutionStatus::Failed)),
        )
        .set((
            job_executions::status.eq(ExecutionStatus::Pending),
            job_executions::trigger_type.eq(TriggerType::Retry),
            job_executions::retry_count.eq(retry_count),
            job_executions::completed_at.eq(None::<DateTime<Utc>>),
            job_executions::updated_at.eq(now),
        ))
        .returning(Execution::as_returning())
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "reopen execution"))
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> JobResult<Option<Execution>> {
        let mut conn = connection(&self.pool).await?;

        diesel::update(job_executions::table.find(id).filter(
            job_executions::status.eq_any(vec![ExecutionStatus::Pending, ExecutionStatus::Running]),
        ))
        .set((
            job_executions::status.eq(ExecutionStatus::Cancelled),
            job_executions::completed_at.eq(Some(now)),
            job_executions::updated_at.eq(now),
        ))
        .returning(Execution::as_returning())
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "cancel execution"))
    }

    async fn running_for_job(&self, job_definition_id: Uuid) -> JobResult<Vec<Execution>> {
        let mut conn = connection(&self.pool).await?;

        job_executions::table
            .filter(job_executions::job_definition_id.eq(job_definition_id))
            .filter(job_executions::status.eq(ExecutionStatus::Running))
            .select(Execution::as_select())
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "list running executions"))
    }

    async fn has_running(&self, job_definition_id: Uuid) -> JobResult<bool> {
        let mut conn = connection(&self.pool).await?;

        diesel::select(diesel::dsl::exists(
            job_executions::table
                .filter(job_executions::job_definition_id.eq(job_definition_id))
                .filter(job_executions::status.eq(ExecutionStatus::Running)),
        ))
        .get_result(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "check running execution"))
    }

    async fn list(&self, filter: &ExecutionFilter, page: PageRequest) -> JobResult<Page<Execution>> {
        let mut conn = connection(&self.pool).await?;

        let total: i64 = filtered(filter)
            .count()
            .get_result(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "count executions"))?;

        let items = filtered(filter)
            .select(Execution::as_select())
            .order(job_executions::created_at.desc())
            .limit(page.limit as i64)
            .offset(page.offset())
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "list executions"))?;

        Ok(Page {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn status_counts(&self, job_definition_id: Option<Uuid>) -> JobResult<StatusCounts> {
        let mut conn = connection(&self.pool).await?;

        let mut query = job_executions::table
            .group_by(job_executions::status)
            .select((job_executions::status, count_star()))
            .into_boxed();
        if let Some(job_id) = job_definition_id {
            query = query.filter(job_executions::job_definition_id.eq(job_id));
        }

        let rows: Vec<(ExecutionStatus, i64)> = query
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "count executions by status"))?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status, count);
        }
        Ok(counts)
    }

    async fn average_execution_ms(&self, job_definition_id: Option<Uuid>) -> JobResult<Option<f64>> {
        let mut conn = connection(&self.pool).await?;

        let mut query = job_executions::table
            .filter(job_executions::status.eq(ExecutionStatus::Completed))
            .select(sql::<Nullable<Double>>("AVG(execution_time_ms)::float8"))
            .into_boxed();
        if let Some(job_id) = job_definition_id {
            query = query.filter(job_executions::job_definition_id.eq(job_id));
        }

        query
            .get_result(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "average execution time"))
    }

    async fn retry_profile(
        &self,
        job_definition_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> JobResult<RetryProfile> {
        let mut conn = connection(&self.pool).await?;

        let row: RetryRow = diesel::sql_query(
            "SELECT COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE status = 'failed') AS failed, \
                    COUNT(*) FILTER (WHERE retry_count > 0) AS retried, \
                    COUNT(*) FILTER (WHERE retry_count > 0 AND status = 'completed') AS success_after_retry, \
                    COALESCE(MAX(retry_count), 0) AS max_retry_count, \
                    COALESCE(SUM(retry_count), 0)::int8 AS retry_count_sum \
             FROM job_executions \
             WHERE created_at >= $1 AND ($2::uuid IS NULL OR job_definition_id = $2)",
        )
        .bind::<Timestamptz, _>(since)
        .bind::<Nullable<diesel::sql_types::Uuid>, _>(job_definition_id)
        .get_result(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "retry statistics"))?;

        Ok(RetryProfile {
            total: row.total,
            failed: row.failed,
            retried: row.retried,
            success_after_retry: row.success_after_retry,
            max_retry_count: row.max_retry_count,
            retry_count_sum: row.retry_count_sum,
        })
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let mut conn = connection(&self.pool).await?;

        let deleted = diesel::delete(
            job_executions::table
                .filter(job_executions::status.eq_any(TERMINAL.to_vec()))
                .filter(job_executions::completed_at.lt(cutoff)),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "delete old executions"))?;

        Ok(deleted as u64)
    }

    async fn delete_finished(&self, id: Uuid) -> JobResult<bool> {
        let mut conn = connection(&self.pool).await?;

        let deleted = diesel::delete(
            job_executions::table
                .find(id)
                .filter(job_executions::status.eq_any(TERMINAL.to_vec())),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert_diesel_error(e, "delete execution"))?;

        Ok(deleted > 0)
    }
}
