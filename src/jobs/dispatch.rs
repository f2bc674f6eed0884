//! How a pending execution reaches `perform`.
//!
//! [`DurableQueueStrategy`] hands it to the broker; [`ImmediateLocalStrategy`]
//! runs it on this process. [`FallbackDispatch`] tries the queue first and
//! degrades to local execution on any enqueue failure.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::executor::{EngineInner, ExecutionEngine, resolve_script_path};
use crate::jobs::models::JobDefinition;
use crate::jobs::queue::{EnqueueOptions, QueueAdapter};
use crate::jobs::types::ScriptType;

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub job: JobDefinition,
    pub execution_id: Uuid,
    /// Wait before the execution becomes eligible (retry backoff)
    pub delay: Duration,
}

#[async_trait]
pub trait DispatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn try_submit(&self, request: &DispatchRequest) -> JobResult<()>;
}

pub struct DurableQueueStrategy {
    queue: Arc<dyn QueueAdapter>,
}

impl DurableQueueStrategy {
    pub fn new(queue: Arc<dyn QueueAdapter>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl DispatchStrategy for DurableQueueStrategy {
    fn name(&self) -> &'static str {
        "queue"
    }

    async fn try_submit(&self, request: &DispatchRequest) -> JobResult<()> {
        let options = EnqueueOptions {
            delay: request.delay,
            priority: request.job.priority,
        };
        self.queue
            .enqueue(&request.job, request.execution_id, options)
            .await
            .map_err(|e| match e {
                JobError::QueueUnavailable(_) => e,
                other => JobError::QueueUnavailable(other.to_string()),
            })
    }
}

/// Performs the execution on a task of this process
pub struct ImmediateLocalStrategy {
    engine: Weak<EngineInner>,
}

impl ImmediateLocalStrategy {
    pub(crate) fn new(engine: Weak<EngineInner>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl DispatchStrategy for ImmediateLocalStrategy {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn try_submit(&self, request: &DispatchRequest) -> JobResult<()> {
        let inner = self
            .engine
            .upgrade()
            .ok_or_else(|| JobError::Spawn("execution engine has shut down".into()))?;
        let engine = ExecutionEngine::from_inner(inner);
        let execution_id = request.execution_id;
        let delay = request.delay;

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = engine.perform(execution_id).await {
                tracing::error!(execution_id = %execution_id, error = %e, "Local execution failed");
            }
        });
        Ok(())
    }
}

/// Queue first, local on failure; some jobs never leave the process
pub struct FallbackDispatch {
    primary: Option<Arc<dyn DispatchStrategy>>,
    local: Arc<dyn DispatchStrategy>,
    cwd: std::path::PathBuf,
}

impl FallbackDispatch {
    pub fn new(
        primary: Option<Arc<dyn DispatchStrategy>>,
        local: Arc<dyn DispatchStrategy>,
        cwd: impl AsRef<Path>,
    ) -> Self {
        Self {
            primary,
            local,
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub fn has_queue(&self) -> bool {
        self.primary.is_some()
    }

    /// INTERNAL tasks and literal shell commands have nothing to hand off
    pub fn requires_local(&self, job: &JobDefinition) -> bool {
        match job.script_type {
            ScriptType::Internal => true,
            ScriptType::Shell => !resolve_script_path(&self.cwd, &job.script_path).is_file(),
            ScriptType::Node | ScriptType::Python => false,
        }
    }

    /// Returns the name of the strategy that accepted the request
    pub async fn dispatch(&self, request: &DispatchRequest) -> JobResult<&'static str> {
        if let Some(primary) = &self.primary
            && !self.requires_local(&request.job)
        {
            match primary.try_submit(request).await {
                Ok(()) => return Ok(primary.name()),
                Err(e) => {
                    tracing::warn!(
                        execution_id = %request.execution_id,
                        job_name = %request.job.name,
                        strategy = primary.name(),
                        error = %e,
                        "Dispatch failed, falling back to local execution"
                    );
                }
            }
        }

        self.local.try_submit(request).await?;
        Ok(self.local.name())
    }
}
