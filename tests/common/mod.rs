#![allow(dead_code)]

use std::time::Duration;

use opsdeck::config::ExecutorConfig;
use opsdeck::jobs::{
    CreateJobDefinition, Execution, ExecutionEngine, ExecutionStatus, JobDefinition,
};
use opsdeck::notifications::NotificationHub;
use opsdeck::repositories::Stores;
use opsdeck::services::Services;
use uuid::Uuid;

pub fn engine() -> ExecutionEngine {
    let config = ExecutorConfig {
        kill_grace_seconds: 1,
        ..ExecutorConfig::default()
    };
    ExecutionEngine::builder(Stores::memory())
        .notifier(NotificationHub::new(64))
        .config(config)
        .working_dir(std::env::temp_dir())
        .build()
}

pub fn services(engine: &ExecutionEngine) -> Services {
    Services::new(engine.clone())
}

pub async fn shell_job(services: &Services, name: &str, command: &str) -> JobDefinition {
    let mut create = CreateJobDefinition::shell(name, command);
    create.max_retries = 0;
    services.jobs.create(create).await.expect("job should be created")
}

/// Polls until the execution reaches `status` or `limit` elapses
pub async fn wait_for_status(
    engine: &ExecutionEngine,
    execution_id: Uuid,
    status: ExecutionStatus,
    limit: Duration,
) -> Execution {
    let poll = async {
        loop {
            let execution = engine
                .stores()
                .executions
                .find(execution_id)
                .await
                .expect("store read")
                .expect("execution exists");
            if execution.status == status {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    };
    tokio::time::timeout(limit, poll)
        .await
        .unwrap_or_else(|_| panic!("execution {execution_id} did not reach {status} within {limit:?}"))
}

/// Pid of the execution's process once it has been spawned
pub async fn wait_for_pid(engine: &ExecutionEngine, execution_id: Uuid, limit: Duration) -> u32 {
    let poll = async {
        loop {
            if let Some(pid) = engine
                .running()
                .iter()
                .find(|p| p.execution_id == execution_id)
                .and_then(|p| p.pid)
            {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(limit, poll)
        .await
        .expect("process should be spawned")
}

/// Processes in group `pgid` that have not exited, read from /proc
pub fn live_group_members(pgid: u32) -> Vec<u32> {
    let mut members = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return members;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // After the parenthesised command: state, ppid, pgrp
        let Some((_, rest)) = stat.rsplit_once(')') else {
            continue;
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() > 2 && fields[0] != "Z" && fields[2].parse::<u32>() == Ok(pgid) {
            members.push(pid);
        }
    }
    members
}

/// Waits until no execution of the engine has a live process
pub async fn wait_idle(engine: &ExecutionEngine, limit: Duration) {
    let poll = async {
        while !engine.running().is_empty() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    };
    tokio::time::timeout(limit, poll)
        .await
        .expect("engine should become idle");
}
