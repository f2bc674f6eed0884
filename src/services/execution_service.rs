//! Execution queries and lifecycle commands.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::executor::{ExecutionEngine, SubmitOptions};
use crate::jobs::models::{Execution, ExecutionFilter, Page, PageRequest, RetryProfile};
use crate::jobs::process::RunningProcess;
use crate::jobs::types::TriggerType;
use crate::repositories::Stores;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStatistics {
    pub total: i64,
    pub failed: i64,
    pub retried: i64,
    pub success_after_retry: i64,
    pub max_retry_count: i32,
    pub avg_retry_count: f64,
    /// Percentage of retried executions that eventually completed
    pub retry_success_rate: f64,
}

impl From<RetryProfile> for RetryStatistics {
    fn from(profile: RetryProfile) -> Self {
        let avg_retry_count = if profile.total > 0 {
            profile.retry_count_sum as f64 / profile.total as f64
        } else {
            0.0
        };
        let retry_success_rate = if profile.retried > 0 {
            profile.success_after_retry as f64 * 100.0 / profile.retried as f64
        } else {
            0.0
        };

        Self {
            total: profile.total,
            failed: profile.failed,
            retried: profile.retried,
            success_after_retry: profile.success_after_retry,
            max_retry_count: profile.max_retry_count,
            avg_retry_count,
            retry_success_rate,
        }
    }
}

#[derive(Clone)]
pub struct ExecutionService {
    stores: Stores,
    engine: ExecutionEngine,
}

impl ExecutionService {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            stores: engine.stores().clone(),
            engine,
        }
    }

    pub async fn submit(
        &self,
        job_id: Uuid,
        trigger: TriggerType,
        options: SubmitOptions,
    ) -> JobResult<Execution> {
        self.engine.submit(job_id, trigger, options).await
    }

    pub async fn list(&self, filter: &ExecutionFilter, page: PageRequest) -> JobResult<Page<Execution>> {
        self.stores.executions.list(filter, page).await
    }

    pub async fn get(&self, id: Uuid) -> JobResult<Execution> {
        self.stores
            .executions
            .find(id)
            .await?
            .ok_or(JobError::ExecutionNotFound(id))
    }

    pub async fn cancel(&self, id: Uuid) -> JobResult<Execution> {
        self.engine.cancel(id).await
    }

    pub async fn retry(&self, id: Uuid, triggered_by_user_id: Option<String>) -> JobResult<Execution> {
        self.engine.retry_manually(id, triggered_by_user_id).await
    }

    /// Only finished executions can be deleted
    pub async fn delete(&self, id: Uuid) -> JobResult<()> {
        let execution = self.get(id).await?;
        if !execution.status.is_terminal() || !self.stores.executions.delete_finished(id).await? {
            return Err(JobError::InvalidStateTransition {
                execution_id: id,
                status: execution.status,
                action: "delete",
            });
        }
        Ok(())
    }

    pub async fn retry_statistics(
        &self,
        job_definition_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> JobResult<RetryStatistics> {
        let profile = self
            .stores
            .executions
            .retry_profile(job_definition_id, since)
            .await?;
        Ok(profile.into())
    }

    pub fn running(&self) -> Vec<RunningProcess> {
        self.engine.running()
    }
}
