use async_trait::async_trait;

use crate::jobs::JobResult;
use crate::jobs::types::ExecutionStatus;
use crate::notifications::event::{JobEvent, JobEventKind};
use crate::notifications::sink::NotificationSink;

/// Writes every event to the tracing log
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn publish(&self, event: &JobEvent) -> JobResult<()> {
        match (event.kind, event.status) {
            (JobEventKind::Failed, _) | (_, ExecutionStatus::Failed) => tracing::warn!(
                event = %event.kind,
                job_id = %event.job_id,
                execution_id = %event.execution_id,
                job_name = %event.job_name,
                status = %event.status,
                error = event.error.as_deref().unwrap_or(""),
                "Job event"
            ),
            _ => tracing::info!(
                event = %event.kind,
                job_id = %event.job_id,
                execution_id = %event.execution_id,
                job_name = %event.job_name,
                status = %event.status,
                execution_time_ms = event.execution_time_ms,
                "Job event"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
