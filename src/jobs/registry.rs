use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::config::ExecutorConfig;
use crate::jobs::error::JobResult;
use crate::jobs::models::{Execution, JobDefinition};
use crate::jobs::process::{ProcessLimits, ProcessSlot};
use crate::jobs::tasks::{ExecutionHistoryCleanup, TerminalCommand};
use crate::repositories::Stores;

/// Everything an internal task may use while it runs
#[derive(Clone)]
pub struct TaskContext {
    pub job: JobDefinition,
    pub execution: Execution,
    /// Effective environment, overrides included
    pub env: HashMap<String, String>,
    /// Job metadata overlaid with execution metadata
    pub metadata: JsonValue,
    pub timeout: Duration,
    pub limits: ProcessLimits,
    pub slot: ProcessSlot,
    pub stores: Stores,
    pub executor: ExecutorConfig,
}

/// A task compiled into the binary and run in-process
#[async_trait]
pub trait InternalTask: Send + Sync {
    /// Name a job's `script_path` refers to
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Returns the text stored as the execution's output log
    async fn execute(&self, ctx: TaskContext) -> JobResult<String>;
}

/// Maps task names to their implementations
#[derive(Clone, Default)]
pub struct InternalTaskRegistry {
    tasks: BTreeMap<&'static str, Arc<dyn InternalTask>>,
}

impl InternalTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in task
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(ExecutionHistoryCleanup)
            .register(TerminalCommand);
        registry
    }

    pub fn register<T>(&mut self, task: T) -> &mut Self
    where
        T: InternalTask + 'static,
    {
        self.tasks.insert(task.name(), Arc::new(task));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InternalTask>> {
        self.tasks.get(name.trim()).cloned()
    }

    /// `(name, description)` pairs, sorted by name
    pub fn describe(&self) -> Vec<(&'static str, &'static str)> {
        self.tasks
            .values()
            .map(|task| (task.name(), task.description()))
            .collect()
    }
}
