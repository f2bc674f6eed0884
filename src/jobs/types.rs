use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

/// How a job definition's `script_path` is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::ScriptType")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptType {
    Shell,
    Node,
    Python,
    /// A task compiled into the binary, resolved through the internal task registry
    Internal,
}

/// Execution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::ExecutionStatus")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Only pending and running executions can be cancelled
    pub fn is_cancellable(self) -> bool {
        matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

/// What caused an execution to be created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::TriggerType")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Retry,
}

/// Rule kind of an explicit schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::ScheduleType")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    Cron,
    Interval,
    SpecificDates,
    Once,
}

macro_rules! display_as_serde_name {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(<$ty>::$variant => write!(f, $name),)+
                }
            }
        }
    };
}

display_as_serde_name!(ScriptType {
    Shell => "SHELL",
    Node => "NODE",
    Python => "PYTHON",
    Internal => "INTERNAL",
});

display_as_serde_name!(ExecutionStatus {
    Pending => "PENDING",
    Running => "RUNNING",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Cancelled => "CANCELLED",
});

display_as_serde_name!(TriggerType {
    Manual => "MANUAL",
    Scheduled => "SCHEDULED",
    Retry => "RETRY",
});

display_as_serde_name!(ScheduleType {
    Cron => "CRON",
    Interval => "INTERVAL",
    SpecificDates => "SPECIFIC_DATES",
    Once => "ONCE",
});
