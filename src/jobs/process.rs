//! Child process supervision.
//!
//! Every subprocess runs in its own process group. Timeout and cancellation
//! signal the whole group with SIGTERM, wait for the grace period, then send
//! SIGKILL and reap the child. Live processes are tracked in a
//! [`ProcessTable`] keyed by execution id.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::error::{JobError, JobResult};

const READ_CHUNK: usize = 8 * 1024;
const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Program, arguments and environment of one subprocess
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Complete environment; the parent environment is not inherited
    pub env: HashMap<String, String>,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    pub timeout: Duration,
    pub kill_grace: Duration,
    pub max_log_bytes: usize,
}

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    /// Killed by a signal it did not get from us
    Signaled(i32),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub stdout: String,
    pub stderr: String,
    pub termination: Termination,
}

impl ProcessReport {
    pub fn succeeded(&self) -> bool {
        self.termination == Termination::Exited(0)
    }
}

/// Live execution as reported by diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningProcess {
    pub execution_id: Uuid,
    pub pid: Option<u32>,
}

#[derive(Debug)]
struct Tracked {
    pid: Option<u32>,
    token: CancellationToken,
}

/// Executions currently being performed, with their OS pid once spawned
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    entries: Arc<DashMap<Uuid, Tracked>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an execution; the entry lives as long as the returned guard.
    ///
    /// Returns `None` while another guard holds the same execution, so a
    /// duplicate delivery can neither replace nor remove the live entry.
    pub fn track(&self, execution_id: Uuid) -> Option<SlotGuard> {
        let Entry::Vacant(vacant) = self.entries.entry(execution_id) else {
            return None;
        };
        let token = CancellationToken::new();
        vacant.insert(Tracked {
            pid: None,
            token: token.clone(),
        });
        Some(SlotGuard(ProcessSlot {
            table: self.clone(),
            execution_id,
            token,
        }))
    }

    /// Signals the execution to stop; false when nothing is tracked
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self.entries.get(&execution_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, execution_id: Uuid) -> bool {
        self.entries.contains_key(&execution_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<RunningProcess> {
        let mut running: Vec<_> = self
            .entries
            .iter()
            .map(|entry| RunningProcess {
                execution_id: *entry.key(),
                pid: entry.value().pid,
            })
            .collect();
        running.sort_by_key(|r| r.execution_id);
        running
    }

    fn set_pid(&self, execution_id: Uuid, pid: Option<u32>) {
        if let Some(mut entry) = self.entries.get_mut(&execution_id) {
            entry.pid = pid;
        }
    }

    fn remove(&self, execution_id: Uuid) {
        self.entries.remove(&execution_id);
    }
}

/// Handle to one tracked execution
#[derive(Debug, Clone)]
pub struct ProcessSlot {
    table: ProcessTable,
    execution_id: Uuid,
    token: CancellationToken,
}

impl ProcessSlot {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Slot on the same entry whose token also trips on its own,
    /// without cancelling this one
    pub(crate) fn child(&self) -> ProcessSlot {
        ProcessSlot {
            table: self.table.clone(),
            execution_id: self.execution_id,
            token: self.token.child_token(),
        }
    }

    fn attach(&self, pid: Option<u32>) {
        self.table.set_pid(self.execution_id, pid);
    }
}

/// Removes the execution from its table on drop
#[derive(Debug)]
pub struct SlotGuard(ProcessSlot);

impl SlotGuard {
    pub fn slot(&self) -> &ProcessSlot {
        &self.0
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.table.remove(self.0.execution_id);
    }
}

/// Spawns `spec` and waits for it under `limits`.
///
/// Only a failure to start the process is an error; exits, timeouts and
/// cancellation are reported through [`ProcessReport::termination`].
pub async fn supervise(
    spec: &CommandSpec,
    limits: ProcessLimits,
    slot: &ProcessSlot,
) -> JobResult<ProcessReport> {
    if slot.is_cancelled() {
        return Ok(ProcessReport {
            stdout: String::new(),
            stderr: String::new(),
            termination: Termination::Cancelled,
        });
    }

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .env_clear()
        .envs(&spec.env)
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| JobError::Spawn(format!("{}: {}", spec.program, e)))?;
    let pid = child.id();
    slot.attach(pid);

    tracing::debug!(
        execution_id = %slot.execution_id(),
        pid = pid,
        program = %spec.program,
        cwd = %spec.cwd.display(),
        "Process spawned"
    );

    let stdout = child.stdout.take().map(|r| capture(r, limits.max_log_bytes));
    let stderr = child.stderr.take().map(|r| capture(r, limits.max_log_bytes));

    // Dropping the sleep on any branch disarms the timer
    let termination = tokio::select! {
        status = child.wait() => exit_termination(
            status.map_err(|e| JobError::Spawn(format!("wait failed: {}", e)))?,
        ),
        _ = tokio::time::sleep(limits.timeout) => {
            terminate_group(&mut child, pid, limits.kill_grace).await;
            Termination::TimedOut
        }
        _ = slot.token().cancelled() => {
            terminate_group(&mut child, pid, limits.kill_grace).await;
            Termination::Cancelled
        }
    };

    Ok(ProcessReport {
        stdout: collect(stdout, limits.kill_grace).await,
        stderr: collect(stderr, limits.kill_grace).await,
        termination,
    })
}

fn exit_termination(status: ExitStatus) -> Termination {
    match (status.code(), status.signal()) {
        (Some(code), _) => Termination::Exited(code),
        (None, Some(signal)) => Termination::Signaled(signal),
        (None, None) => Termination::Exited(-1),
    }
}

/// SIGTERM the group, wait `grace`, then SIGKILL and reap
async fn terminate_group(child: &mut Child, pid: Option<u32>, grace: Duration) {
    let Some(pid) = pid else {
        // Already reaped
        return;
    };
    let group = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(group, Signal::SIGTERM) {
        tracing::debug!(pid = pid, error = %e, "SIGTERM to process group failed");
    }

    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        // The leader is gone; sweep any members that ignored SIGTERM
        let _ = killpg(group, Signal::SIGKILL);
        return;
    }

    tracing::warn!(pid = pid, grace_secs = grace.as_secs(), "Process ignored SIGTERM, killing");
    if let Err(e) = killpg(group, Signal::SIGKILL) {
        tracing::debug!(pid = pid, error = %e, "SIGKILL to process group failed");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(pid = pid, error = %e, "Failed to reap killed process");
    }
}

/// Cuts `text` to at most `max_bytes` on a char boundary, marking the cut
pub(crate) fn truncate_log(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str(TRUNCATION_MARKER);
    text
}

fn capture<R>(mut reader: R, max_bytes: usize) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let mut truncated = false;
        let mut chunk = vec![0u8; READ_CHUNK];

        // Keep draining past the cap so the child never blocks on a full pipe
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = max_bytes.saturating_sub(kept.len());
                    if n > room {
                        truncated = true;
                    }
                    kept.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }

        let mut text = String::from_utf8_lossy(&kept).into_owned();
        if truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    })
}

/// Background children may hold the pipe open; stop waiting after `grace`
async fn collect(handle: Option<JoinHandle<String>>, grace: Duration) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(grace.max(Duration::from_millis(100)), &mut handle).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}
