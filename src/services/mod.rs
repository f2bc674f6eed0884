//! Service layer for business logic operations.
//!
//! Services validate requests and coordinate between the stores and the
//! execution engine. They form the surface a controller layer would call.

mod execution_service;
mod job_service;
mod schedule_service;

pub use execution_service::{ExecutionService, RetryStatistics};
pub use job_service::{
    CRON_PREVIEW_COUNT, CronValidation, JobService, JobStatistics, UpcomingExecution,
    validate_cron_at,
};
pub use schedule_service::ScheduleService;

use crate::jobs::executor::ExecutionEngine;

/// Aggregates all services for convenient access.
///
/// Cloning is cheap since the engine and stores use `Arc` internally.
#[derive(Clone)]
pub struct Services {
    pub jobs: JobService,
    pub executions: ExecutionService,
    pub schedules: ScheduleService,
}

impl Services {
    /// Creates the services sharing one engine and its stores.
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            jobs: JobService::new(engine.clone()),
            executions: ExecutionService::new(engine.clone()),
            schedules: ScheduleService::new(engine.stores().clone()),
        }
    }
}
