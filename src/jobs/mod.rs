pub mod cron;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod models;
pub mod process;
pub mod queue;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod tasks;
pub mod types;
pub mod worker;

pub use error::{JobError, JobResult};
pub use executor::{EngineBuilder, ExecutionEngine, SubmitOptions};
pub use models::{
    CreateJobDefinition, CreateSchedule, Execution, ExecutionFilter, JobDefinition,
    JobDefinitionFilter, Page, PageRequest, Schedule, UpdateJobDefinition,
};
pub use queue::{QueueAdapter, RedisQueue};
pub use registry::{InternalTask, InternalTaskRegistry, TaskContext};
pub use scheduler::{Scheduler, TickReport};
pub use types::{ExecutionStatus, ScheduleType, ScriptType, TriggerType};
pub use worker::QueueWorker;
