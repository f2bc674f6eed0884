use std::path::Path;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::process::{self, CommandSpec, Termination};
use crate::jobs::registry::{InternalTask, TaskContext};

pub const TASK_NAME: &str = "terminal-command";

/// Runs `metadata.command` through the shell inside `metadata.projectPath`
pub struct TerminalCommand;

fn required_str<'a>(metadata: &'a JsonValue, key: &str) -> JobResult<&'a str> {
    metadata
        .get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| JobError::contract(TASK_NAME, format!("metadata.{} is required", key)))
}

#[async_trait]
impl InternalTask for TerminalCommand {
    fn name(&self) -> &'static str {
        TASK_NAME
    }

    fn description(&self) -> &'static str {
        "Run metadata.command in metadata.projectPath"
    }

    async fn execute(&self, ctx: TaskContext) -> JobResult<String> {
        let command = required_str(&ctx.metadata, "command")?;
        let project_path = required_str(&ctx.metadata, "projectPath")?;

        if !Path::new(project_path).is_dir() {
            return Err(JobError::contract(
                TASK_NAME,
                format!("projectPath '{}' is not a directory", project_path),
            ));
        }

        let spec = CommandSpec {
            program: ctx.executor.shell.clone(),
            args: vec!["-c".to_string(), command.to_string()],
            env: ctx.env.clone(),
            cwd: project_path.into(),
        };
        let report = process::supervise(&spec, ctx.limits, &ctx.slot).await?;

        match report.termination {
            Termination::Exited(0) => Ok(report.stdout),
            Termination::Exited(code) => Err(JobError::ProcessExitNonZero {
                code,
                stderr: report.stderr,
            }),
            Termination::Signaled(signal) => Err(JobError::ProcessExitNonZero {
                code: 128 + signal,
                stderr: report.stderr,
            }),
            Termination::TimedOut => Err(JobError::TimedOut(ctx.limits.timeout.as_secs())),
            Termination::Cancelled => Err(JobError::Cancelled(ctx.execution.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::CreateJobDefinition;
    use crate::jobs::registry::testing::context;
    use crate::jobs::types::ScriptType;
    use crate::repositories::Stores;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    fn job() -> crate::jobs::models::JobDefinition {
        CreateJobDefinition::new("terminal", ScriptType::Internal, TASK_NAME).into_definition(Utc::now())
    }

    #[tokio::test]
    async fn test_runs_command_in_project_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let metadata = json!({
            "command": "ls",
            "projectPath": dir.path().to_str().unwrap(),
        });
        let env = HashMap::from([("PATH".to_string(), "/usr/bin:/bin".to_string())]);
        let (ctx, _guard) = context(job(), metadata, env, Stores::memory());

        let output = TerminalCommand.execute(ctx).await.unwrap();
        assert!(output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_missing_fields_violate_contract() {
        let (ctx, _guard) = context(job(), json!({"command": "ls"}), HashMap::new(), Stores::memory());
        match TerminalCommand.execute(ctx).await {
            Err(JobError::InternalScriptContractViolation { reason, .. }) => {
                assert!(reason.contains("projectPath"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let metadata = json!({"command": "ls", "projectPath": "/no/such/dir"});
        let (ctx, _guard) = context(job(), metadata, HashMap::new(), Stores::memory());
        assert!(matches!(
            TerminalCommand.execute(ctx).await,
            Err(JobError::InternalScriptContractViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = json!({"command": "echo bad >&2; exit 4", "projectPath": dir.path().to_str().unwrap()});
        let (ctx, _guard) = context(job(), metadata, HashMap::new(), Stores::memory());

        match TerminalCommand.execute(ctx).await {
            Err(JobError::ProcessExitNonZero { code, stderr }) => {
                assert_eq!(code, 4);
                assert_eq!(stderr, "bad\n");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
