use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::registry::{InternalTask, TaskContext};

pub const TASK_NAME: &str = "execution-history-cleanup";
pub const RETENTION_ENV: &str = "RETENTION_DAYS";

/// Deletes finished executions older than the retention window
pub struct ExecutionHistoryCleanup;

impl ExecutionHistoryCleanup {
    fn retention_days(ctx: &TaskContext) -> JobResult<u32> {
        let Some(raw) = ctx.env.get(RETENTION_ENV) else {
            return Ok(ctx.executor.history_retention_days);
        };

        match raw.trim().parse::<u32>() {
            Ok(days) if days > 0 => Ok(days),
            _ => Err(JobError::contract(
                TASK_NAME,
                format!("{} must be a positive integer, got '{}'", RETENTION_ENV, raw),
            )),
        }
    }
}

#[async_trait]
impl InternalTask for ExecutionHistoryCleanup {
    fn name(&self) -> &'static str {
        TASK_NAME
    }

    fn description(&self) -> &'static str {
        "Delete finished executions older than RETENTION_DAYS"
    }

    async fn execute(&self, ctx: TaskContext) -> JobResult<String> {
        let days = Self::retention_days(&ctx)?;
        let cutoff = Utc::now() - Duration::days(days as i64);
        let deleted = ctx.stores.executions.delete_finished_before(cutoff).await?;

        tracing::info!(
            deleted_count = deleted,
            retention_days = days,
            "Execution history cleanup completed"
        );

        Ok(format!(
            "Deleted {} finished executions older than {} days\n",
            deleted, days
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::{CreateJobDefinition, Execution};
    use crate::jobs::registry::testing::context;
    use crate::jobs::types::{ExecutionStatus, ScriptType, TriggerType};
    use crate::repositories::Stores;
    use serde_json::json;
    use std::collections::HashMap;

    fn finished(job_id: uuid::Uuid, days_ago: i64) -> Execution {
        let done = Utc::now() - Duration::days(days_ago);
        let mut execution = Execution::pending(job_id, TriggerType::Manual, None, json!({}), done);
        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(done);
        execution
    }

    #[tokio::test]
    async fn test_deletes_only_old_finished_executions() {
        let stores = Stores::memory();
        let job = stores
            .jobs
            .insert(
                CreateJobDefinition::new("cleanup", ScriptType::Internal, TASK_NAME)
                    .into_definition(Utc::now()),
            )
            .await
            .unwrap();

        let old = stores.executions.insert(finished(job.id, 40)).await.unwrap();
        let recent = stores.executions.insert(finished(job.id, 2)).await.unwrap();

        let env = HashMap::from([(RETENTION_ENV.to_string(), "30".to_string())]);
        let (ctx, _guard) = context(job, json!({}), env, stores.clone());
        let output = ExecutionHistoryCleanup.execute(ctx).await.unwrap();

        assert!(output.contains("Deleted 1"));
        assert!(stores.executions.find(old.id).await.unwrap().is_none());
        assert!(stores.executions.find(recent.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_retention_violates_contract() {
        let stores = Stores::memory();
        let job = CreateJobDefinition::new("cleanup", ScriptType::Internal, TASK_NAME)
            .into_definition(Utc::now());
        let env = HashMap::from([(RETENTION_ENV.to_string(), "soon".to_string())]);
        let (ctx, _guard) = context(job, json!({}), env, stores);

        assert!(matches!(
            ExecutionHistoryCleanup.execute(ctx).await,
            Err(JobError::InternalScriptContractViolation { .. })
        ));
    }
}
