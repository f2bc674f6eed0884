use thiserror::Error;
use uuid::Uuid;

use crate::jobs::types::ExecutionStatus;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job definition name already in use: {0}")]
    DuplicateName(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Job definition not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job definition is inactive: {0}")]
    JobInactive(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    #[error("Cannot {action} execution {execution_id} in status {status}")]
    InvalidStateTransition {
        execution_id: Uuid,
        status: ExecutionStatus,
        action: &'static str,
    },

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Execution timed out after {0}s")]
    TimedOut(u64),

    #[error("Process exited with code {code}: {stderr}")]
    ProcessExitNonZero { code: i32, stderr: String },

    #[error("Execution {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Internal task '{task}' contract violation: {reason}")]
    InternalScriptContractViolation { task: String, reason: String },

    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Repository operation '{operation}' failed: {message}")]
    Repository { operation: String, message: String },

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl JobError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        JobError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn repository(operation: impl Into<String>, message: impl ToString) -> Self {
        JobError::Repository {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_cron(expression: impl Into<String>, reason: impl ToString) -> Self {
        JobError::InvalidCronExpression {
            expression: expression.into(),
            reason: reason.to_string(),
        }
    }

    pub fn contract(task: impl Into<String>, reason: impl Into<String>) -> Self {
        JobError::InternalScriptContractViolation {
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Errors the caller can fix by changing its request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            JobError::DuplicateName(_)
                | JobError::InvalidCronExpression { .. }
                | JobError::JobNotFound(_)
                | JobError::JobInactive(_)
                | JobError::ExecutionNotFound(_)
                | JobError::ScheduleNotFound(_)
                | JobError::InvalidStateTransition { .. }
                | JobError::Validation { .. }
        )
    }
}

impl From<validator::ValidationErrors> for JobError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        match fields.first() {
            Some((field, errs)) => {
                let reason = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                JobError::validation(field.to_string(), reason)
            }
            None => JobError::validation("request", errors.to_string()),
        }
    }
}

pub type JobResult<T> = Result<T, JobError>;
