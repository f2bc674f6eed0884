//! Execution engine: drives executions from PENDING to a terminal state.
//!
//! Every state change goes through a compare-and-set on the execution store,
//! so `perform` may safely be called more than once for the same id (queue
//! redelivery, racing consumers). A finish that loses against `cancel` is
//! dropped; the first terminal state written wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::jobs::dispatch::{
    DispatchRequest, DispatchStrategy, DurableQueueStrategy, FallbackDispatch, ImmediateLocalStrategy,
};
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::models::{Execution, ExecutionOutcome, JobDefinition, json_object_to_env};
use crate::jobs::process::{
    self, CommandSpec, ProcessLimits, ProcessSlot, ProcessTable, RunningProcess, Termination,
    truncate_log,
};
use crate::jobs::queue::QueueAdapter;
use crate::jobs::registry::{InternalTaskRegistry, TaskContext};
use crate::jobs::types::{ExecutionStatus, ScriptType, TriggerType};
use crate::notifications::{JobEvent, JobEventKind, NotificationHub};
use crate::repositories::Stores;

/// Metadata key under which submit-time environment overrides are kept
pub const ENV_OVERRIDES_KEY: &str = "envOverrides";
/// Metadata key linking a manual retry to the execution it repeats
pub const RETRIED_FROM_KEY: &str = "retriedFrom";

/// Optional inputs of a submission
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOptions {
    #[serde(default)]
    pub env_overrides: HashMap<String, String>,
    pub triggered_by_user_id: Option<String>,
    #[serde(default)]
    pub metadata: JsonValue,
}

/// Resolves a script path against the engine's working directory
pub fn resolve_script_path(cwd: &Path, script_path: &str) -> PathBuf {
    let path = Path::new(script_path.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Delay before automatic retry number `retry_count`: 2^retry_count seconds
pub fn retry_backoff(retry_count: i32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(retry_count.max(0) as u32))
}

pub(crate) struct EngineInner {
    stores: Stores,
    notifier: NotificationHub,
    registry: InternalTaskRegistry,
    dispatcher: FallbackDispatch,
    processes: ProcessTable,
    config: ExecutorConfig,
    cwd: PathBuf,
}

/// Output of a successful attempt
struct Captured {
    stdout: String,
    stderr: String,
}

/// A failed attempt and whatever it printed
struct Failure {
    error: JobError,
    stdout: String,
    stderr: String,
}

impl From<JobError> for Failure {
    fn from(error: JobError) -> Self {
        Self {
            error,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

impl Failure {
    fn error_log(&self) -> String {
        match &self.error {
            JobError::ProcessExitNonZero { .. } => self.error.to_string(),
            _ if !self.stderr.trim().is_empty() => format!("{}\n{}", self.error, self.stderr),
            _ => self.error.to_string(),
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

fn as_object(value: &JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

pub struct EngineBuilder {
    stores: Stores,
    notifier: Option<NotificationHub>,
    registry: InternalTaskRegistry,
    queue: Option<Arc<dyn QueueAdapter>>,
    config: ExecutorConfig,
    cwd: Option<PathBuf>,
}

impl EngineBuilder {
    pub fn notifier(mut self, notifier: NotificationHub) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn registry(mut self, registry: InternalTaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn queue(mut self, queue: Option<Arc<dyn QueueAdapter>>) -> Self {
        self.queue = queue;
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory used when a script's own directory cannot be resolved
    pub fn working_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn build(self) -> ExecutionEngine {
        let cwd = self
            .cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));
        let notifier = self.notifier.unwrap_or_default();
        let queue = self.queue;

        let inner = Arc::new_cyclic(|weak| {
            let primary = queue
                .map(|q| Arc::new(DurableQueueStrategy::new(q)) as Arc<dyn DispatchStrategy>);
            let local = Arc::new(ImmediateLocalStrategy::new(weak.clone()));

            EngineInner {
                stores: self.stores,
                notifier,
                registry: self.registry,
                dispatcher: FallbackDispatch::new(primary, local, &cwd),
                processes: ProcessTable::new(),
                config: self.config,
                cwd,
            }
        });

        ExecutionEngine { inner }
    }
}

/// Creates executions and drives them through process supervision,
/// retries and cancellation. Cloning is cheap.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    pub fn builder(stores: Stores) -> EngineBuilder {
        EngineBuilder {
            stores,
            notifier: None,
            registry: InternalTaskRegistry::builtin(),
            queue: None,
            config: ExecutorConfig::default(),
            cwd: None,
        }
    }

    pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn notifier(&self) -> &NotificationHub {
        &self.inner.notifier
    }

    pub fn registry(&self) -> &InternalTaskRegistry {
        &self.inner.registry
    }

    pub fn has_queue(&self) -> bool {
        self.inner.dispatcher.has_queue()
    }

    /// Live executions and their OS pids
    pub fn running(&self) -> Vec<RunningProcess> {
        self.inner.processes.snapshot()
    }

    async fn find_job(&self, id: Uuid) -> JobResult<JobDefinition> {
        self.inner
            .stores
            .jobs
            .find(id)
            .await?
            .ok_or(JobError::JobNotFound(id))
    }

    async fn find_execution(&self, id: Uuid) -> JobResult<Execution> {
        self.inner
            .stores
            .executions
            .find(id)
            .await?
            .ok_or(JobError::ExecutionNotFound(id))
    }

    async fn emit(&self, kind: JobEventKind, job: &JobDefinition, execution: &Execution, error: Option<String>) {
        let event = JobEvent::new(kind, job, execution);
        let event = match error {
            Some(error) => event.with_error(error),
            None => event,
        };
        self.inner.notifier.emit(event).await;
    }

    /// Creates a PENDING execution and hands it to the dispatcher.
    ///
    /// Returns as soon as the execution is dispatched; its outcome is
    /// observable through the store or the notification stream.
    pub async fn submit(
        &self,
        job_id: Uuid,
        trigger: TriggerType,
        options: SubmitOptions,
    ) -> JobResult<Execution> {
        let job = self.find_job(job_id).await?;
        if !job.is_active {
            return Err(JobError::JobInactive(job.name));
        }

        let mut metadata = as_object(&options.metadata);
        if !options.env_overrides.is_empty() {
            metadata.insert(
                ENV_OVERRIDES_KEY.to_string(),
                serde_json::to_value(&options.env_overrides).unwrap_or_default(),
            );
        }

        let execution = Execution::pending(
            job.id,
            trigger,
            options.triggered_by_user_id,
            JsonValue::Object(metadata),
            Utc::now(),
        );
        let execution = self.inner.stores.executions.insert(execution).await?;

        let strategy = self
            .inner
            .dispatcher
            .dispatch(&DispatchRequest {
                job: job.clone(),
                execution_id: execution.id,
                delay: Duration::ZERO,
            })
            .await?;

        tracing::info!(
            execution_id = %execution.id,
            job_id = %job.id,
            job_name = %job.name,
            trigger = %trigger,
            strategy = strategy,
            "Execution submitted"
        );

        Ok(execution)
    }

    /// Runs one attempt of a PENDING execution.
    ///
    /// Returns `None` when the execution was not PENDING (already claimed,
    /// finished or cancelled), otherwise the execution as left by the attempt.
    pub async fn perform(&self, execution_id: Uuid) -> JobResult<Option<Execution>> {
        let execution = self.find_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Pending {
            tracing::debug!(
                execution_id = %execution_id,
                status = %execution.status,
                "Skipping execution that is no longer pending"
            );
            return Ok(None);
        }
        let job = self.find_job(execution.job_definition_id).await?;

        // Tracked before the claim so a cancel right after it still finds the slot
        let Some(guard) = self.inner.processes.track(execution_id) else {
            tracing::debug!(execution_id = %execution_id, "Execution already being performed");
            return Ok(None);
        };
        let Some(running) = self
            .inner
            .stores
            .executions
            .claim(execution_id, Utc::now())
            .await?
        else {
            tracing::debug!(execution_id = %execution_id, "Execution claimed elsewhere");
            return Ok(None);
        };

        tracing::info!(
            execution_id = %execution_id,
            job_id = %job.id,
            job_name = %job.name,
            retry_count = running.retry_count,
            "Execution started"
        );
        self.emit(JobEventKind::Started, &job, &running, None).await;

        let clock = Instant::now();
        let env = self.environment(&job, &running);
        let result = self.run_attempt(&job, &running, env, guard.slot()).await;
        let cancelled = guard.slot().is_cancelled();
        drop(guard);
        let execution_time_ms = clock.elapsed().as_millis() as i64;

        if cancelled {
            // cancel() already wrote CANCELLED and emitted the event
            return self.inner.stores.executions.find(execution_id).await;
        }

        match result {
            Ok(captured) => self.complete(&job, &running, captured, execution_time_ms).await,
            Err(failure) => self.fail(&job, &running, failure, execution_time_ms).await,
        }
    }

    async fn complete(
        &self,
        job: &JobDefinition,
        running: &Execution,
        captured: Captured,
        execution_time_ms: i64,
    ) -> JobResult<Option<Execution>> {
        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Completed,
            completed_at: Utc::now(),
            execution_time_ms,
            output_log: Some(captured.stdout),
            error_log: non_empty(captured.stderr),
        };

        let Some(done) = self.inner.stores.executions.finish(running.id, &outcome).await? else {
            return self.inner.stores.executions.find(running.id).await;
        };

        tracing::info!(
            execution_id = %done.id,
            job_name = %job.name,
            status = %done.status,
            execution_time_ms = execution_time_ms,
            "Execution completed"
        );
        self.emit(JobEventKind::Completed, job, &done, None).await;
        Ok(Some(done))
    }

    async fn fail(
        &self,
        job: &JobDefinition,
        running: &Execution,
        failure: Failure,
        execution_time_ms: i64,
    ) -> JobResult<Option<Execution>> {
        let error_log = failure.error_log();
        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Failed,
            completed_at: Utc::now(),
            execution_time_ms,
            output_log: non_empty(failure.stdout),
            error_log: Some(error_log),
        };

        let Some(failed) = self.inner.stores.executions.finish(running.id, &outcome).await? else {
            return self.inner.stores.executions.find(running.id).await;
        };

        tracing::warn!(
            execution_id = %failed.id,
            job_name = %job.name,
            status = %failed.status,
            retry_count = failed.retry_count,
            error = %failure.error,
            "Execution failed"
        );
        self.emit(JobEventKind::Failed, job, &failed, Some(failure.error.to_string()))
            .await;

        if failed.retry_count >= job.max_retries {
            return Ok(Some(failed));
        }

        let retry_count = failed.retry_count + 1;
        let Some(reopened) = self
            .inner
            .stores
            .executions
            .reopen(failed.id, retry_count, Utc::now())
            .await?
        else {
            return Ok(Some(failed));
        };

        let delay = retry_backoff(retry_count);
        tracing::info!(
            execution_id = %reopened.id,
            job_name = %job.name,
            retry_count = retry_count,
            delay_secs = delay.as_secs(),
            "Scheduling retry"
        );
        self.emit(JobEventKind::Retry, job, &reopened, Some(failure.error.to_string()))
            .await;

        let request = DispatchRequest {
            job: job.clone(),
            execution_id: reopened.id,
            delay,
        };
        if let Err(e) = self.inner.dispatcher.dispatch(&request).await {
            tracing::error!(execution_id = %reopened.id, error = %e, "Failed to dispatch retry");
        }

        Ok(Some(reopened))
    }

    /// Cancels a PENDING or RUNNING execution and stops its process
    pub async fn cancel(&self, execution_id: Uuid) -> JobResult<Execution> {
        let execution = self.find_execution(execution_id).await?;
        let invalid = |status| JobError::InvalidStateTransition {
            execution_id,
            status,
            action: "cancel",
        };
        if !execution.status.is_cancellable() {
            return Err(invalid(execution.status));
        }

        let Some(cancelled) = self
            .inner
            .stores
            .executions
            .cancel(execution_id, Utc::now())
            .await?
        else {
            let current = self.find_execution(execution_id).await?;
            return Err(invalid(current.status));
        };

        let signalled = self.inner.processes.cancel(execution_id);
        tracing::info!(
            execution_id = %execution_id,
            signalled = signalled,
            previous_status = %execution.status,
            "Execution cancelled"
        );

        if let Some(job) = self.inner.stores.jobs.find(cancelled.job_definition_id).await? {
            self.emit(JobEventKind::Cancelled, &job, &cancelled, None).await;
        }
        Ok(cancelled)
    }

    /// Starts a fresh MANUAL execution repeating a FAILED one
    pub async fn retry_manually(
        &self,
        execution_id: Uuid,
        triggered_by_user_id: Option<String>,
    ) -> JobResult<Execution> {
        let original = self.find_execution(execution_id).await?;
        if original.status != ExecutionStatus::Failed {
            return Err(JobError::InvalidStateTransition {
                execution_id,
                status: original.status,
                action: "retry",
            });
        }

        let mut metadata = as_object(&original.metadata);
        metadata.insert(
            RETRIED_FROM_KEY.to_string(),
            JsonValue::String(execution_id.to_string()),
        );

        self.submit(
            original.job_definition_id,
            TriggerType::Manual,
            SubmitOptions {
                env_overrides: HashMap::new(),
                triggered_by_user_id: triggered_by_user_id.or(original.triggered_by_user_id),
                metadata: JsonValue::Object(metadata),
            },
        )
        .await
    }

    /// Process env, then job vars, then submit-time overrides, then JOB_ID/JOB_NAME
    fn environment(&self, job: &JobDefinition, execution: &Execution) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(job.env_vars());
        if let Some(overrides) = execution.metadata.get(ENV_OVERRIDES_KEY) {
            env.extend(json_object_to_env(overrides));
        }
        env.insert("JOB_ID".to_string(), job.id.to_string());
        env.insert("JOB_NAME".to_string(), job.name.clone());
        env
    }

    fn limits(&self, job: &JobDefinition) -> ProcessLimits {
        ProcessLimits {
            timeout: job.timeout(),
            kill_grace: Duration::from_secs(self.inner.config.kill_grace_seconds),
            max_log_bytes: self.inner.config.max_log_bytes,
        }
    }

    async fn run_attempt(
        &self,
        job: &JobDefinition,
        execution: &Execution,
        env: HashMap<String, String>,
        slot: &ProcessSlot,
    ) -> Result<Captured, Failure> {
        if job.script_type == ScriptType::Internal {
            return self.run_internal(job, execution, env, slot).await;
        }

        let spec = self.command_for(job, env)?;
        let report = process::supervise(&spec, self.limits(job), slot).await?;

        let error = match report.termination {
            Termination::Exited(0) => {
                return Ok(Captured {
                    stdout: report.stdout,
                    stderr: report.stderr,
                });
            }
            Termination::Exited(code) => JobError::ProcessExitNonZero {
                code,
                stderr: report.stderr.clone(),
            },
            Termination::Signaled(signal) => JobError::ProcessExitNonZero {
                code: 128 + signal,
                stderr: report.stderr.clone(),
            },
            Termination::TimedOut => JobError::TimedOut(job.timeout().as_secs()),
            Termination::Cancelled => JobError::Cancelled(execution.id),
        };

        Err(Failure {
            error,
            stdout: report.stdout,
            stderr: report.stderr,
        })
    }

    fn command_for(&self, job: &JobDefinition, env: HashMap<String, String>) -> JobResult<CommandSpec> {
        let config = &self.inner.config;
        let script = resolve_script_path(&self.inner.cwd, &job.script_path);
        let script_dir = script
            .parent()
            .filter(|dir| dir.is_dir())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.inner.cwd.clone());

        let (program, args, cwd) = match job.script_type {
            ScriptType::Shell if script.is_file() => (
                config.shell.clone(),
                vec![script.to_string_lossy().into_owned()],
                script_dir,
            ),
            // Not a file: the whole path is a command line
            ScriptType::Shell => (
                config.shell.clone(),
                vec!["-c".to_string(), job.script_path.clone()],
                self.inner.cwd.clone(),
            ),
            ScriptType::Node | ScriptType::Python => {
                if !script.is_file() {
                    return Err(JobError::ScriptNotFound(script.display().to_string()));
                }
                let interpreter = if job.script_type == ScriptType::Node {
                    &config.node
                } else {
                    &config.python
                };
                (
                    interpreter.clone(),
                    vec![script.to_string_lossy().into_owned()],
                    script_dir,
                )
            }
            ScriptType::Internal => {
                return Err(JobError::validation(
                    "scriptType",
                    "INTERNAL jobs do not spawn a process",
                ));
            }
        };

        Ok(CommandSpec {
            program,
            args,
            env,
            cwd,
        })
    }

    async fn run_internal(
        &self,
        job: &JobDefinition,
        execution: &Execution,
        env: HashMap<String, String>,
        slot: &ProcessSlot,
    ) -> Result<Captured, Failure> {
        let task = self
            .inner
            .registry
            .get(&job.script_path)
            .ok_or_else(|| JobError::ScriptNotFound(job.script_path.clone()))?;

        let mut metadata = as_object(&job.metadata);
        metadata.extend(as_object(&execution.metadata));

        // The task gets its own token so a timeout here can stop it
        // without the run looking cancelled
        let task_slot = slot.child();
        let stop = task_slot.token().clone();
        let limits = self.limits(job);
        let ctx = TaskContext {
            job: job.clone(),
            execution: execution.clone(),
            env,
            metadata: JsonValue::Object(metadata),
            timeout: job.timeout(),
            limits,
            slot: task_slot,
            stores: self.inner.stores.clone(),
            executor: self.inner.config.clone(),
        };

        let run = task.execute(ctx);
        tokio::pin!(run);

        let interrupted = tokio::select! {
            result = &mut run => {
                return result
                    .map(|stdout| Captured {
                        stdout: truncate_log(stdout, limits.max_log_bytes),
                        stderr: String::new(),
                    })
                    .map_err(Failure::from);
            }
            _ = tokio::time::sleep(limits.timeout) => JobError::TimedOut(limits.timeout.as_secs()),
            _ = slot.token().cancelled() => JobError::Cancelled(execution.id),
        };

        // Let the task tear down its process group before giving up on it:
        // SIGTERM, the grace period, SIGKILL, then draining its output
        stop.cancel();
        let settle = limits.kill_grace * 3 + Duration::from_secs(1);
        if tokio::time::timeout(settle, &mut run).await.is_err() {
            tracing::warn!(
                execution_id = %execution.id,
                task = task.name(),
                "Internal task did not stop after cancellation"
            );
        }

        Err(interrupted.into())
    }
}
