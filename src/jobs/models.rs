use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::jobs::types::{ExecutionStatus, ScheduleType, ScriptType, TriggerType};
use crate::schema::{job_definitions, job_executions, job_schedules};

pub const DEFAULT_PRIORITY: i32 = 5;
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 300;
pub const DEFAULT_MAX_RETRIES: i32 = 3;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_timeout_seconds() -> i32 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_max_retries() -> i32 {
    DEFAULT_MAX_RETRIES
}

fn default_true() -> bool {
    true
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

// ============================================================================
// JobDefinition Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = job_definitions)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub script_type: ScriptType,
    pub script_path: String,
    pub environment_vars: JsonValue,
    pub is_active: bool,
    pub priority: i32,
    pub timeout_seconds: i32,
    pub max_retries: i32,
    pub cron_expression: Option<String>,
    pub metadata: JsonValue,
    /// Latest inline cron occurrence the scheduler has accounted for
    pub last_scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    /// Environment variables as string pairs; non-string JSON values are rendered as JSON
    pub fn env_vars(&self) -> HashMap<String, String> {
        json_object_to_env(&self.environment_vars)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds.max(1) as u64)
    }
}

pub(crate) fn json_object_to_env(value: &JsonValue) -> HashMap<String, String> {
    match value {
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        _ => HashMap::new(),
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobDefinition {
    #[validate(length(min = 1, max = 255, message = "Job name must be between 1 and 255 characters"))]
    pub name: String,

    pub description: Option<String>,

    pub script_type: ScriptType,

    #[validate(length(min = 1, message = "Script path must not be empty"))]
    pub script_path: String,

    #[serde(default)]
    pub environment_vars: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[validate(range(min = 1, max = 86400, message = "Timeout must be between 1 and 86400 seconds"))]
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: i32,

    #[validate(range(min = 0, max = 20, message = "Max retries must be between 0 and 20"))]
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    #[validate(length(min = 1, max = 255, message = "Cron expression must be between 1 and 255 characters"))]
    pub cron_expression: Option<String>,

    #[serde(default = "empty_object")]
    pub metadata: JsonValue,
}

impl CreateJobDefinition {
    /// A shell job with default limits
    pub fn shell(name: impl Into<String>, script_path: impl Into<String>) -> Self {
        Self::new(name, ScriptType::Shell, script_path)
    }

    pub fn new(name: impl Into<String>, script_type: ScriptType, script_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            script_type,
            script_path: script_path.into(),
            environment_vars: HashMap::new(),
            is_active: true,
            priority: DEFAULT_PRIORITY,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            cron_expression: None,
            metadata: empty_object(),
        }
    }

    pub fn into_definition(self, now: DateTime<Utc>) -> JobDefinition {
        JobDefinition {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            script_type: self.script_type,
            script_path: self.script_path,
            environment_vars: serde_json::to_value(self.environment_vars)
                .unwrap_or_else(|_| empty_object()),
            is_active: self.is_active,
            priority: self.priority,
            timeout_seconds: self.timeout_seconds,
            max_retries: self.max_retries,
            cron_expression: self.cron_expression,
            metadata: self.metadata,
            last_scheduled_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; `None` leaves a column untouched
#[derive(Debug, Clone, Default, Deserialize, Validate, AsChangeset)]
#[diesel(table_name = job_definitions)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobDefinition {
    #[validate(length(min = 1, max = 255, message = "Job name must be between 1 and 255 characters"))]
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub script_type: Option<ScriptType>,
    #[validate(length(min = 1, message = "Script path must not be empty"))]
    pub script_path: Option<String>,
    pub environment_vars: Option<JsonValue>,
    pub is_active: Option<bool>,
    pub priority: Option<i32>,
    #[validate(range(min = 1, max = 86400, message = "Timeout must be between 1 and 86400 seconds"))]
    pub timeout_seconds: Option<i32>,
    #[validate(range(min = 0, max = 20, message = "Max retries must be between 0 and 20"))]
    pub max_retries: Option<i32>,
    pub cron_expression: Option<Option<String>>,
    pub metadata: Option<JsonValue>,
    /// Set by the registry when the cron expression changes
    #[serde(skip)]
    pub last_scheduled_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UpdateJobDefinition {
    pub fn apply_to(&self, job: &mut JobDefinition) {
        if let Some(name) = &self.name {
            job.name = name.clone();
        }
        if let Some(description) = &self.description {
            job.description = description.clone();
        }
        if let Some(script_type) = self.script_type {
            job.script_type = script_type;
        }
        if let Some(script_path) = &self.script_path {
            job.script_path = script_path.clone();
        }
        if let Some(vars) = &self.environment_vars {
            job.environment_vars = vars.clone();
        }
        if let Some(is_active) = self.is_active {
            job.is_active = is_active;
        }
        if let Some(priority) = self.priority {
            job.priority = priority;
        }
        if let Some(timeout) = self.timeout_seconds {
            job.timeout_seconds = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            job.max_retries = max_retries;
        }
        if let Some(cron) = &self.cron_expression {
            job.cron_expression = cron.clone();
        }
        if let Some(metadata) = &self.metadata {
            job.metadata = metadata.clone();
        }
        if let Some(last) = self.last_scheduled_at {
            job.last_scheduled_at = last;
        }
        if let Some(updated_at) = self.updated_at {
            job.updated_at = updated_at;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinitionFilter {
    /// Case-insensitive substring of name or description
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub script_type: Option<ScriptType>,
}

impl JobDefinitionFilter {
    pub fn matches(&self, job: &JobDefinition) -> bool {
        if let Some(active) = self.is_active
            && job.is_active != active
        {
            return false;
        }
        if let Some(script_type) = self.script_type
            && job.script_type != script_type
        {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let in_name = job.name.to_lowercase().contains(&needle);
            let in_description = job
                .description
                .as_ref()
                .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !in_name && !in_description {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Execution Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = job_executions)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Uuid,
    pub job_definition_id: Uuid,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i64>,
    pub output_log: Option<String>,
    pub error_log: Option<String>,
    pub retry_count: i32,
    pub triggered_by_user_id: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    pub fn pending(
        job_definition_id: Uuid,
        trigger_type: TriggerType,
        triggered_by_user_id: Option<String>,
        metadata: JsonValue,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_definition_id,
            status: ExecutionStatus::Pending,
            trigger_type,
            started_at: None,
            completed_at: None,
            execution_time_ms: None,
            output_log: None,
            error_log: None,
            retry_count: 0,
            triggered_by_user_id,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Terminal result written by `ExecutionStore::finish`
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub completed_at: DateTime<Utc>,
    pub execution_time_ms: i64,
    pub output_log: Option<String>,
    pub error_log: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFilter {
    pub job_definition_id: Option<Uuid>,
    /// Empty means any status
    #[serde(default)]
    pub statuses: Vec<ExecutionStatus>,
    pub trigger_type: Option<TriggerType>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl ExecutionFilter {
    pub fn matches(&self, execution: &Execution) -> bool {
        self.job_definition_id
            .is_none_or(|id| execution.job_definition_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&execution.status))
            && self
                .trigger_type
                .is_none_or(|t| execution.trigger_type == t)
            && self
                .created_after
                .is_none_or(|after| execution.created_at >= after)
            && self
                .created_before
                .is_none_or(|before| execution.created_at < before)
    }
}

/// Per-status execution counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: ExecutionStatus, count: i64) {
        match status {
            ExecutionStatus::Pending => self.pending += count,
            ExecutionStatus::Running => self.running += count,
            ExecutionStatus::Completed => self.completed += count,
            ExecutionStatus::Failed => self.failed += count,
            ExecutionStatus::Cancelled => self.cancelled += count,
        }
    }
}

/// Raw retry figures over a set of executions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryProfile {
    pub total: i64,
    pub failed: i64,
    pub retried: i64,
    pub success_after_retry: i64,
    pub max_retry_count: i32,
    pub retry_count_sum: i64,
}

// ============================================================================
// Schedule Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = job_schedules)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: Uuid,
    pub job_definition_id: Uuid,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub interval_minutes: Option<i32>,
    pub specific_dates: Vec<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSchedule {
    pub job_definition_id: Uuid,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub interval_minutes: Option<i32>,
    #[serde(default)]
    pub specific_dates: Vec<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl CreateSchedule {
    pub fn new(job_definition_id: Uuid, schedule_type: ScheduleType) -> Self {
        Self {
            job_definition_id,
            schedule_type,
            cron_expression: None,
            interval_minutes: None,
            specific_dates: Vec::new(),
            start_date: None,
            end_date: None,
        }
    }
}

/// Columns the scheduler rewrites after a fire or on resume
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = job_schedules)]
pub struct ScheduleProgress {
    pub next_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Pagination
// ============================================================================

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    /// 1-based page number
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const MAX_LIMIT: u32 = 200;

    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.limit as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(name: &str, description: Option<&str>) -> JobDefinition {
        let mut create = CreateJobDefinition::shell(name, "echo hi");
        create.description = description.map(str::to_string);
        create.into_definition(Utc::now())
    }

    #[test]
    fn test_env_vars_render_non_strings() {
        let mut def = job("env", None);
        def.environment_vars = json!({"A": "x", "B": 3, "C": true, "D": null});
        let env = def.env_vars();
        assert_eq!(env["A"], "x");
        assert_eq!(env["B"], "3");
        assert_eq!(env["C"], "true");
        assert_eq!(env["D"], "");
    }

    #[test]
    fn test_create_defaults_from_json() {
        let create: CreateJobDefinition = serde_json::from_value(json!({
            "name": "backup",
            "scriptType": "PYTHON",
            "scriptPath": "/opt/backup.py"
        }))
        .unwrap();
        assert_eq!(create.priority, 5);
        assert_eq!(create.timeout_seconds, 300);
        assert_eq!(create.max_retries, 3);
        assert!(create.is_active);
        assert!(create.validate().is_ok());
    }

    #[test]
    fn test_create_validation_rejects_bad_limits() {
        let mut create = CreateJobDefinition::shell("x", "true");
        create.timeout_seconds = 0;
        assert!(create.validate().is_err());

        let mut create = CreateJobDefinition::shell("", "true");
        create.max_retries = 1;
        assert!(create.validate().is_err());
    }

    #[test]
    fn test_update_apply_only_touches_set_fields() {
        let mut def = job("a", Some("keep"));
        let before = def.clone();
        let patch = UpdateJobDefinition {
            priority: Some(1),
            cron_expression: Some(Some("*/5 * * * *".to_string())),
            ..Default::default()
        };
        patch.apply_to(&mut def);
        assert_eq!(def.priority, 1);
        assert_eq!(def.cron_expression.as_deref(), Some("*/5 * * * *"));
        assert_eq!(def.description, before.description);
        assert_eq!(def.name, before.name);
    }

    #[test]
    fn test_job_filter_search_is_case_insensitive() {
        let def = job("Nightly-Backup", Some("Dumps the DB"));
        let by_name = JobDefinitionFilter {
            search: Some("backup".into()),
            ..Default::default()
        };
        let by_description = JobDefinitionFilter {
            search: Some("dumps".into()),
            ..Default::default()
        };
        let miss = JobDefinitionFilter {
            search: Some("report".into()),
            ..Default::default()
        };
        assert!(by_name.matches(&def));
        assert!(by_description.matches(&def));
        assert!(!miss.matches(&def));
    }

    #[test]
    fn test_execution_filter() {
        let now = Utc::now();
        let exec = Execution::pending(Uuid::new_v4(), TriggerType::Manual, None, json!({}), now);
        let filter = ExecutionFilter {
            statuses: vec![ExecutionStatus::Running],
            ..Default::default()
        };
        assert!(!filter.matches(&exec));
        let filter = ExecutionFilter {
            job_definition_id: Some(exec.job_definition_id),
            created_after: Some(now),
            ..Default::default()
        };
        assert!(filter.matches(&exec));
    }

    #[test]
    fn test_page_request_bounds() {
        let page = PageRequest::new(0, 10_000);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, PageRequest::MAX_LIMIT);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }
}
