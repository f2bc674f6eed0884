use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::jobs::models::{Execution, JobDefinition};
use crate::jobs::types::ExecutionStatus;

/// The five lifecycle moments an execution reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobEventKind {
    Started,
    Completed,
    Failed,
    Retry,
    Cancelled,
}

impl JobEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobEventKind::Started => "started",
            JobEventKind::Completed => "completed",
            JobEventKind::Failed => "failed",
            JobEventKind::Retry => "retry",
            JobEventKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job_id: Uuid,
    pub execution_id: Uuid,
    pub job_name: String,
    pub status: ExecutionStatus,
    pub timestamp: DateTime<Utc>,
    pub metadata: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job: &JobDefinition, execution: &Execution) -> Self {
        Self {
            kind,
            job_id: job.id,
            execution_id: execution.id,
            job_name: job.name.clone(),
            status: execution.status,
            timestamp: Utc::now(),
            metadata: execution.metadata.clone(),
            error: None,
            execution_time_ms: execution.execution_time_ms,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
