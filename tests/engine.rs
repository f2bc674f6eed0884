mod common;

use std::time::{Duration, Instant};

use opsdeck::jobs::{
    CreateJobDefinition, ExecutionStatus, JobError, ScriptType, SubmitOptions, TriggerType,
};
use opsdeck::notifications::JobEventKind;
use serde_json::json;

use common::{engine, live_group_members, services, shell_job, wait_for_pid, wait_for_status};

#[tokio::test]
async fn literal_command_completes_with_output() {
    let engine = engine();
    let services = services(&engine);
    let job = shell_job(&services, "hello", "echo hello").await;

    let submitted = services
        .executions
        .submit(job.id, TriggerType::Manual, SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(submitted.status, ExecutionStatus::Pending);

    let done = wait_for_status(&engine, submitted.id, ExecutionStatus::Completed, Duration::from_secs(5)).await;
    assert_eq!(done.output_log.as_deref(), Some("hello\n"));
    assert!(done.execution_time_ms.unwrap() < 5000);
    assert_eq!(done.retry_count, 0);
}

#[tokio::test]
async fn timeout_fails_and_kills_the_process() {
    let engine = engine();
    let services = services(&engine);
    let mut create = CreateJobDefinition::shell("sleeper", "sleep 10");
    create.timeout_seconds = 1;
    create.max_retries = 0;
    let job = services.jobs.create(create).await.unwrap();

    let started = Instant::now();
    let submitted = services
        .executions
        .submit(job.id, TriggerType::Manual, SubmitOptions::default())
        .await
        .unwrap();
    wait_for_status(&engine, submitted.id, ExecutionStatus::Running, Duration::from_secs(2)).await;

    let pid = wait_for_pid(&engine, submitted.id, Duration::from_secs(2)).await;

    let failed = wait_for_status(&engine, submitted.id, ExecutionStatus::Failed, Duration::from_secs(5)).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(failed.error_log.unwrap().to_lowercase().contains("timed out"));
    assert!(engine.running().iter().all(|p| p.execution_id != submitted.id));

    // The child has been reaped, so signalling it must fail
    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok();
    assert!(!alive, "process {pid} outlived its timeout");
}

#[tokio::test]
async fn terminal_command_timeout_stops_whole_process_group() {
    let engine = engine();
    let services = services(&engine);
    let project = tempfile::tempdir().unwrap();
    let mut create =
        CreateJobDefinition::new("terminal-timeout", ScriptType::Internal, "terminal-command");
    create.timeout_seconds = 1;
    create.max_retries = 0;
    create.metadata = json!({
        "command": "sleep 30; echo never",
        "projectPath": project.path().to_str().unwrap(),
    });
    let job = services.jobs.create(create).await.unwrap();

    let submitted = services
        .executions
        .submit(job.id, TriggerType::Manual, SubmitOptions::default())
        .await
        .unwrap();
    let pgid = wait_for_pid(&engine, submitted.id, Duration::from_secs(3)).await;
    assert!(!live_group_members(pgid).is_empty());

    let failed = wait_for_status(&engine, submitted.id, ExecutionStatus::Failed, Duration::from_secs(10)).await;
    assert!(failed.error_log.unwrap().to_lowercase().contains("timed out"));
    assert!(failed.output_log.is_none());

    let mut survivors = live_group_members(pgid);
    for _ in 0..20 {
        if survivors.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        survivors = live_group_members(pgid);
    }
    assert!(survivors.is_empty(), "group {pgid} still has {survivors:?}");
}

#[tokio::test]
async fn cancelling_terminal_command_stops_its_process() {
    let engine = engine();
    let services = services(&engine);
    let project = tempfile::tempdir().unwrap();
    let mut create =
        CreateJobDefinition::new("terminal-cancel", ScriptType::Internal, "terminal-command");
    create.max_retries = 0;
    create.metadata = json!({
        "command": "sleep 30; echo never",
        "projectPath": project.path().to_str().unwrap(),
    });
    let job = services.jobs.create(create).await.unwrap();

    let submitted = services
        .executions
        .submit(job.id, TriggerType::Manual, SubmitOptions::default())
        .await
        .unwrap();
    let pgid = wait_for_pid(&engine, submitted.id, Duration::from_secs(3)).await;

    let cancelled = services.executions.cancel(submitted.id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

    common::wait_idle(&engine, Duration::from_secs(10)).await;
    assert!(live_group_members(pgid).is_empty());
    let row = services.executions.get(submitted.id).await.unwrap();
    assert_eq!(row.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn unrelated_jobs_run_concurrently() {
    let engine = engine();
    let services = services(&engine);
    let slow = shell_job(&services, "slow", "sleep 5").await;
    let fast = shell_job(&services, "fast", "echo fast").await;

    let slow_execution = services
        .executions
        .submit(slow.id, TriggerType::Manual, SubmitOptions::default())
        .await
        .unwrap();
    let fast_execution = services
        .executions
        .submit(fast.id, TriggerType::Manual, SubmitOptions::default())
        .await
        .unwrap();

    wait_for_status(&engine, fast_execution.id, ExecutionStatus::Completed, Duration::from_secs(3)).await;
    let slow_now = services.executions.get(slow_execution.id).await.unwrap();
    assert_eq!(slow_now.status, ExecutionStatus::Running);

    services.executions.cancel(slow_execution.id).await.unwrap();
}

#[tokio::test]
async fn failure_retries_with_backoff_until_exhausted() {
    let engine = engine();
    let services = services(&engine);
    let mut create = CreateJobDefinition::shell("flaky", "exit 3");
    create.max_retries = 1;
    let job = services.jobs.create(create).await.unwrap();
    let mut events = engine.notifier().subscribe();

    let submitted = services
        .executions
        .submit(job.id, TriggerType::Manual, SubmitOptions::default())
        .await
        .unwrap();

    let mut kinds = Vec::new();
    let mut first_failure = None;
    let mut retry_started = None;
    let collect = async {
        while let Ok(event) = events.recv().await {
            if event.execution_id != submitted.id {
                continue;
            }
            kinds.push(event.kind);
            match event.kind {
                JobEventKind::Failed if first_failure.is_none() => first_failure = Some(Instant::now()),
                JobEventKind::Started if first_failure.is_some() => retry_started = Some(Instant::now()),
                _ => {}
            }
            if kinds.iter().filter(|k| **k == JobEventKind::Failed).count() == 2 {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("both attempts should fail");

    assert_eq!(
        kinds,
        vec![
            JobEventKind::Started,
            JobEventKind::Failed,
            JobEventKind::Retry,
            JobEventKind::Started,
            JobEventKind::Failed,
        ]
    );
    let waited = retry_started.unwrap() - first_failure.unwrap();
    assert!(waited >= Duration::from_millis(1900), "retry came after {waited:?}");

    let failed = services.executions.get(submitted.id).await.unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.trigger_type, TriggerType::Retry);

    // Exhausted: nothing else is scheduled
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let still = services.executions.get(submitted.id).await.unwrap();
    assert_eq!(still.status, ExecutionStatus::Failed);
    assert_eq!(still.retry_count, 1);
}

#[tokio::test]
async fn cancel_of_finished_execution_is_rejected() {
    let engine = engine();
    let services = services(&engine);
    let job = shell_job(&services, "quick", "true").await;

    let submitted = services
        .executions
        .submit(job.id, TriggerType::Manual, SubmitOptions::default())
        .await
        .unwrap();
    let done = wait_for_status(&engine, submitted.id, ExecutionStatus::Completed, Duration::from_secs(5)).await;

    let err = services.executions.cancel(submitted.id).await.unwrap_err();
    assert!(matches!(
        err,
        JobError::InvalidStateTransition { status: ExecutionStatus::Completed, .. }
    ));
    assert_eq!(services.executions.get(submitted.id).await.unwrap(), done);
}

#[tokio::test]
async fn duplicate_job_names_are_rejected() {
    let engine = engine();
    let services = services(&engine);
    shell_job(&services, "nightly-backup", "true").await;

    let err = services
        .jobs
        .create(CreateJobDefinition::shell("nightly-backup", "echo again"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::DuplicateName(name) if name == "nightly-backup"));
}

#[tokio::test]
async fn manual_retry_creates_linked_execution() {
    let engine = engine();
    let services = services(&engine);
    let job = shell_job(&services, "broken", "echo nope >&2; exit 1").await;

    let submitted = services
        .executions
        .submit(job.id, TriggerType::Manual, SubmitOptions::default())
        .await
        .unwrap();
    let failed = wait_for_status(&engine, submitted.id, ExecutionStatus::Failed, Duration::from_secs(5)).await;
    assert!(failed.error_log.unwrap().contains("nope"));

    let retried = services
        .executions
        .retry(submitted.id, Some("operator".into()))
        .await
        .unwrap();
    assert_ne!(retried.id, submitted.id);
    assert_eq!(retried.metadata["retriedFrom"], submitted.id.to_string());
    assert_eq!(retried.triggered_by_user_id.as_deref(), Some("operator"));
    wait_for_status(&engine, retried.id, ExecutionStatus::Failed, Duration::from_secs(5)).await;
}
