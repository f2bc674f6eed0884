//! Repository layer for data access operations.
//!
//! The engine talks to storage through the store traits below. Two backends
//! implement them: PostgreSQL through diesel-async and an in-process store.
//!
//! Execution state changes are compare-and-set operations: each one only
//! applies when the row is still in the expected status and returns `None`
//! otherwise, so redelivered work and finish/cancel races resolve at the store.

mod execution_repo;
mod job_repo;
mod memory;
mod schedule_repo;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::bb8::PooledConnection;

use crate::db::AsyncDbPool;
use crate::jobs::{JobError, JobResult};
use crate::jobs::models::{
    Execution, ExecutionFilter, ExecutionOutcome, JobDefinition, JobDefinitionFilter, Page,
    PageRequest, RetryProfile, Schedule, ScheduleProgress, StatusCounts, UpdateJobDefinition,
};

pub use execution_repo::ExecutionRepository;
pub use job_repo::JobRepository;
pub use memory::MemoryStore;
pub use schedule_repo::ScheduleRepository;

/// Check out a pooled connection, reporting failures as repository errors
pub(crate) async fn connection(
    pool: &AsyncDbPool,
) -> JobResult<PooledConnection<'_, AsyncPgConnection>> {
    pool.get()
        .await
        .map_err(|e| JobError::repository("acquire connection", e))
}

#[async_trait]
pub trait JobDefinitionStore: Send + Sync {
    /// Fails with `DuplicateName` when the name is taken
    async fn insert(&self, job: JobDefinition) -> JobResult<JobDefinition>;

    async fn find(&self, id: Uuid) -> JobResult<Option<JobDefinition>>;

    /// Ordered by priority ascending, then newest first
    async fn list(&self, filter: &JobDefinitionFilter) -> JobResult<Vec<JobDefinition>>;

    /// Active definitions that carry an inline cron expression
    async fn list_cron_enabled(&self) -> JobResult<Vec<JobDefinition>>;

    /// Fails with `JobNotFound` or `DuplicateName`
    async fn update(&self, id: Uuid, patch: UpdateJobDefinition) -> JobResult<JobDefinition>;

    /// Record the latest inline cron occurrence accounted for
    async fn mark_scheduled(&self, id: Uuid, occurrence: DateTime<Utc>) -> JobResult<()>;

    /// Removes the definition together with its executions and schedules
    async fn delete(&self, id: Uuid) -> JobResult<bool>;

    /// `(total, active)`
    async fn count(&self) -> JobResult<(i64, i64)>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert(&self, execution: Execution) -> JobResult<Execution>;

    async fn find(&self, id: Uuid) -> JobResult<Option<Execution>>;

    /// PENDING -> RUNNING
    async fn claim(&self, id: Uuid, started_at: DateTime<Utc>) -> JobResult<Option<Execution>>;

    /// RUNNING -> COMPLETED | FAILED
    async fn finish(&self, id: Uuid, outcome: &ExecutionOutcome) -> JobResult<Option<Execution>>;

    /// FAILED -> PENDING with a new retry count; the trigger becomes RETRY
    async fn reopen(
        &self,
        id: Uuid,
        retry_count: i32,
        now: DateTime<Utc>,
    ) -> JobResult<Option<Execution>>;

    /// PENDING | RUNNING -> CANCELLED
    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> JobResult<Option<Execution>>;

    async fn running_for_job(&self, job_definition_id: Uuid) -> JobResult<Vec<Execution>>;

    async fn has_running(&self, job_definition_id: Uuid) -> JobResult<bool> {
        Ok(!self.running_for_job(job_definition_id).await?.is_empty())
    }

    /// Newest first
    async fn list(&self, filter: &ExecutionFilter, page: PageRequest) -> JobResult<Page<Execution>>;

    async fn status_counts(&self, job_definition_id: Option<Uuid>) -> JobResult<StatusCounts>;

    /// Mean `execution_time_ms` of completed executions
    async fn average_execution_ms(&self, job_definition_id: Option<Uuid>) -> JobResult<Option<f64>>;

    async fn retry_profile(
        &self,
        job_definition_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> JobResult<RetryProfile>;

    /// Deletes terminal executions completed before `cutoff`
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64>;

    /// Deletes a single execution if it is in a terminal state
    async fn delete_finished(&self, id: Uuid) -> JobResult<bool>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn insert(&self, schedule: Schedule) -> JobResult<Schedule>;

    async fn find(&self, id: Uuid) -> JobResult<Option<Schedule>>;

    async fn list(&self, job_definition_id: Option<Uuid>) -> JobResult<Vec<Schedule>>;

    /// Active schedules with `next_execution <= now`, earliest first
    async fn find_due(&self, now: DateTime<Utc>) -> JobResult<Vec<Schedule>>;

    async fn update_progress(&self, id: Uuid, progress: &ScheduleProgress) -> JobResult<Schedule>;

    async fn delete(&self, id: Uuid) -> JobResult<bool>;
}

/// Aggregates the stores the engine and services share.
///
/// Cloning is cheap; every store sits behind an `Arc`.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobDefinitionStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub schedules: Arc<dyn ScheduleStore>,
}

impl Stores {
    /// PostgreSQL-backed stores sharing one pool
    pub fn postgres(pool: AsyncDbPool) -> Self {
        Self {
            jobs: Arc::new(JobRepository::new(pool.clone())),
            executions: Arc::new(ExecutionRepository::new(pool.clone())),
            schedules: Arc::new(ScheduleRepository::new(pool)),
        }
    }

    /// Process-local stores; contents are lost on restart
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            jobs: store.clone(),
            executions: store.clone(),
            schedules: store,
        }
    }
}
