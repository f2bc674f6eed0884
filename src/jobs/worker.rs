use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::jobs::error::JobResult;
use crate::jobs::executor::ExecutionEngine;
use crate::jobs::queue::{QueueAdapter, QueueMessage};

/// Consumes the durable queue and performs claimed executions.
///
/// A message whose job already has a RUNNING execution, or was started
/// earlier in the same batch, goes back to the queue for one poll interval,
/// so one job never runs twice concurrently.
pub struct QueueWorker {
    queue: Arc<dyn QueueAdapter>,
    engine: ExecutionEngine,
    poll_interval: Duration,
    batch_size: usize,
}

/// Outcome of one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub started: usize,
    pub deferred: usize,
    /// Claimed but neither started nor put back
    pub lost: usize,
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn QueueAdapter>, engine: ExecutionEngine, config: &QueueConfig) -> Self {
        Self {
            queue,
            engine,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Poll until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Queue worker started"
        );

        loop {
            if let Err(e) = self.poll_once(Utc::now()).await {
                tracing::warn!(error = %e, "Queue poll failed");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("Queue worker stopped");
    }

    pub async fn poll_once(&self, now: DateTime<Utc>) -> JobResult<PollReport> {
        let mut report = PollReport::default();
        // The batch is already off the queue; each message is settled on its own
        let messages = self.queue.claim_due(now, self.batch_size).await?;
        let mut started_jobs = HashSet::new();

        for message in messages {
            match self.settle(&message, &mut started_jobs).await {
                Ok(true) => report.started += 1,
                Ok(false) => report.deferred += 1,
                Err(e) => {
                    tracing::error!(
                        execution_id = %message.execution_id,
                        job_name = %message.job_name,
                        error = %e,
                        "Failed to requeue message; execution stays pending"
                    );
                    report.lost += 1;
                }
            }
        }

        Ok(report)
    }

    /// Starts the message's execution, or requeues it; true when started
    async fn settle(&self, message: &QueueMessage, started_jobs: &mut HashSet<Uuid>) -> JobResult<bool> {
        let job_id = message.job_definition_id;
        // A spawned perform has not claimed its row yet, so the store alone
        // cannot see runs started in this batch
        let busy = started_jobs.contains(&job_id)
            || match self.engine.stores().executions.has_running(job_id).await {
                Ok(busy) => busy,
                Err(e) => {
                    tracing::warn!(
                        execution_id = %message.execution_id,
                        error = %e,
                        "Could not check running executions, deferring message"
                    );
                    true
                }
            };

        if busy {
            tracing::debug!(
                execution_id = %message.execution_id,
                job_name = %message.job_name,
                "Job busy, deferring message"
            );
            self.queue.requeue(message, self.poll_interval).await?;
            return Ok(false);
        }

        started_jobs.insert(job_id);
        let engine = self.engine.clone();
        let execution_id = message.execution_id;
        tokio::spawn(async move {
            if let Err(e) = engine.perform(execution_id).await {
                tracing::error!(execution_id = %execution_id, error = %e, "Queued execution failed");
            }
        });
        Ok(true)
    }
}
