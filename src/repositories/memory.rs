use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::jobs::models::{
    Execution, ExecutionFilter, ExecutionOutcome, JobDefinition, JobDefinitionFilter, Page,
    PageRequest, RetryProfile, Schedule, ScheduleProgress, StatusCounts, UpdateJobDefinition,
};
use crate::jobs::types::{ExecutionStatus, TriggerType};
use crate::jobs::{JobError, JobResult};
use crate::repositories::{ExecutionStore, JobDefinitionStore, ScheduleStore};

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, JobDefinition>,
    executions: HashMap<Uuid, Execution>,
    schedules: HashMap<Uuid, Schedule>,
}

/// In-process implementation of all three stores behind one lock
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn name_taken(state: &MemoryState, name: &str, except: Option<Uuid>) -> bool {
    state
        .jobs
        .values()
        .any(|job| job.name == name && Some(job.id) != except)
}

#[async_trait]
impl JobDefinitionStore for MemoryStore {
    async fn insert(&self, job: JobDefinition) -> JobResult<JobDefinition> {
        let mut state = self.state.write().await;
        if name_taken(&state, &job.name, None) {
            return Err(JobError::DuplicateName(job.name));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find(&self, id: Uuid) -> JobResult<Option<JobDefinition>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn list(&self, filter: &JobDefinitionFilter) -> JobResult<Vec<JobDefinition>> {
        let state = self.state.read().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(jobs)
    }

    async fn list_cron_enabled(&self) -> JobResult<Vec<JobDefinition>> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| job.is_active && job.cron_expression.is_some())
            .cloned()
            .collect())
    }

    async fn update(&self, id: Uuid, patch: UpdateJobDefinition) -> JobResult<JobDefinition> {
        let mut state = self.state.write().await;
        if let Some(name) = &patch.name
            && name_taken(&state, name, Some(id))
        {
            return Err(JobError::DuplicateName(name.clone()));
        }
        let job = state.jobs.get_mut(&id).ok_or(JobError::JobNotFound(id))?;
        patch.apply_to(job);
        Ok(job.clone())
    }

    async fn mark_scheduled(&self, id: Uuid, occurrence: DateTime<Utc>) -> JobResult<()> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&id).ok_or(JobError::JobNotFound(id))?;
        job.last_scheduled_at = Some(occurrence);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> JobResult<bool> {
        let mut state = self.state.write().await;
        let removed = state.jobs.remove(&id).is_some();
        if removed {
            state.executions.retain(|_, e| e.job_definition_id != id);
            state.schedules.retain(|_, s| s.job_definition_id != id);
        }
        Ok(removed)
    }

    async fn count(&self) -> JobResult<(i64, i64)> {
        let state = self.state.read().await;
        let active = state.jobs.values().filter(|job| job.is_active).count();
        Ok((state.jobs.len() as i64, active as i64))
    }
}

impl MemoryStore {
    /// Apply `change` when the execution is in one of `expected`
    async fn transition(
        &self,
        id: Uuid,
        expected: &[ExecutionStatus],
        change: impl FnOnce(&mut Execution),
    ) -> JobResult<Option<Execution>> {
        let mut state = self.state.write().await;
        match state.executions.get_mut(&id) {
            Some(execution) if expected.contains(&execution.status) => {
                change(execution);
                Ok(Some(execution.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn insert(&self, execution: Execution) -> JobResult<Execution> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&execution.job_definition_id) {
            return Err(JobError::JobNotFound(execution.job_definition_id));
        }
        state.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn find(&self, id: Uuid) -> JobResult<Option<Execution>> {
        Ok(self.state.read().await.executions.get(&id).cloned())
    }

    async fn claim(&self, id: Uuid, started_at: DateTime<Utc>) -> JobResult<Option<Execution>> {
        self.transition(id, &[ExecutionStatus::Pending], |e| {
            e.status = ExecutionStatus::Running;
            e.started_at = Some(started_at);
            e.updated_at = started_at;
        })
        .await
    }

    async fn finish(&self, id: Uuid, outcome: &ExecutionOutcome) -> JobResult<Option<Execution>> {
        self.transition(id, &[ExecutionStatus::Running], |e| {
            e.status = outcome.status;
            e.completed_at = Some(outcome.completed_at);
            e.execution_time_ms = Some(outcome.execution_time_ms);
            e.output_log = outcome.output_log.clone();
            e.error_log = outcome.error_log.clone();
            e.updated_at = outcome.completed_at;
        })
        .await
    }

    async fn reopen(
        &self,
        id: Uuid,
        retry_count: i32,
        now: DateTime<Utc>,
    ) -> JobResult<Option<Execution>> {
        self.transition(id, &[ExecutionStatus::Failed], |e| {
            e.status = ExecutionStatus::Pending;
            e.trigger_type = TriggerType::Retry;
            e.retry_count = retry_count;
            e.completed_at = None;
            e.updated_at = now;
        })
        .await
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> JobResult<Option<Execution>> {
        self.transition(
            id,
            &[ExecutionStatus::Pending, ExecutionStatus::Running],
            |e| {
                e.status = ExecutionStatus::Cancelled;
                e.completed_at = Some(now);
                e.updated_at = now;
            },
        )
        .await
    }

    async fn running_for_job(&self, job_definition_id: Uuid) -> JobResult<Vec<Execution>> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .values()
            .filter(|e| {
                e.job_definition_id == job_definition_id && e.status == ExecutionStatus::Running
            })
            .cloned()
            .collect())
    }

    async fn list(&self, filter: &ExecutionFilter, page: PageRequest) -> JobResult<Page<Execution>> {
        let state = self.state.read().await;
        let mut matching: Vec<_> = state
            .executions
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();

        Ok(Page {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn status_counts(&self, job_definition_id: Option<Uuid>) -> JobResult<StatusCounts> {
        let state = self.state.read().await;
        let mut counts = StatusCounts::default();
        for execution in state
            .executions
            .values()
            .filter(|e| job_definition_id.is_none_or(|id| e.job_definition_id == id))
        {
            counts.add(execution.status, 1);
        }
        Ok(counts)
    }

    async fn average_execution_ms(&self, job_definition_id: Option<Uuid>) -> JobResult<Option<f64>> {
        let state = self.state.read().await;
        let durations: Vec<i64> = state
            .executions
            .values()
            .filter(|e| {
                e.status == ExecutionStatus::Completed
                    && job_definition_id.is_none_or(|id| e.job_definition_id == id)
            })
            .filter_map(|e| e.execution_time_ms)
            .collect();

        if durations.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            durations.iter().sum::<i64>() as f64 / durations.len() as f64,
        ))
    }

    async fn retry_profile(
        &self,
        job_definition_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> JobResult<RetryProfile> {
        let state = self.state.read().await;
        let mut profile = RetryProfile::default();
        for e in state.executions.values().filter(|e| {
            e.created_at >= since && job_definition_id.is_none_or(|id| e.job_definition_id == id)
        }) {
            profile.total += 1;
            if e.status == ExecutionStatus::Failed {
                profile.failed += 1;
            }
            if e.retry_count > 0 {
                profile.retried += 1;
                if e.status == ExecutionStatus::Completed {
                    profile.success_after_retry += 1;
                }
            }
            profile.max_retry_count = profile.max_retry_count.max(e.retry_count);
            profile.retry_count_sum += e.retry_count as i64;
        }
        Ok(profile)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let mut state = self.state.write().await;
        let before = state.executions.len();
        state.executions.retain(|_, e| {
            !(e.status.is_terminal() && e.completed_at.is_some_and(|done| done < cutoff))
        });
        Ok((before - state.executions.len()) as u64)
    }

    async fn delete_finished(&self, id: Uuid) -> JobResult<bool> {
        let mut state = self.state.write().await;
        match state.executions.get(&id) {
            Some(e) if e.status.is_terminal() => {
                state.executions.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn insert(&self, schedule: Schedule) -> JobResult<Schedule> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&schedule.job_definition_id) {
            return Err(JobError::JobNotFound(schedule.job_definition_id));
        }
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn find(&self, id: Uuid) -> JobResult<Option<Schedule>> {
        Ok(self.state.read().await.schedules.get(&id).cloned())
    }

    async fn list(&self, job_definition_id: Option<Uuid>) -> JobResult<Vec<Schedule>> {
        let state = self.state.read().await;
        let mut schedules: Vec<_> = state
            .schedules
            .values()
            .filter(|s| job_definition_id.is_none_or(|id| s.job_definition_id == id))
            .cloned()
            .collect();
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(schedules)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> JobResult<Vec<Schedule>> {
        let state = self.state.read().await;
        let mut due: Vec<_> = state
            .schedules
            .values()
            .filter(|s| s.is_active && s.next_execution.is_some_and(|next| next <= now))
            .filter(|s| {
                state
                    .jobs
                    .get(&s.job_definition_id)
                    .is_some_and(|job| job.is_active)
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_execution.cmp(&b.next_execution));
        Ok(due)
    }

    async fn update_progress(&self, id: Uuid, progress: &ScheduleProgress) -> JobResult<Schedule> {
        let mut state = self.state.write().await;
        let schedule = state
            .schedules
            .get_mut(&id)
            .ok_or(JobError::ScheduleNotFound(id))?;
        schedule.next_execution = progress.next_execution;
        schedule.last_execution = progress.last_execution;
        schedule.is_active = progress.is_active;
        schedule.updated_at = progress.updated_at;
        Ok(schedule.clone())
    }

    async fn delete(&self, id: Uuid) -> JobResult<bool> {
        Ok(self.state.write().await.schedules.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::CreateJobDefinition;
    use serde_json::json;

    async fn store_with_job() -> (MemoryStore, JobDefinition) {
        let store = MemoryStore::new();
        let job = JobDefinitionStore::insert(
            &store,
            CreateJobDefinition::shell("job", "true").into_definition(Utc::now()),
        )
        .await
        .unwrap();
        (store, job)
    }

    fn pending(job: &JobDefinition) -> Execution {
        Execution::pending(job.id, TriggerType::Manual, None, json!({}), Utc::now())
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (store, _) = store_with_job().await;
        let dup = CreateJobDefinition::shell("job", "false").into_definition(Utc::now());
        let err = JobDefinitionStore::insert(&store, dup).await.unwrap_err();
        assert!(matches!(err, JobError::DuplicateName(name) if name == "job"));
    }

    #[tokio::test]
    async fn test_rename_onto_existing_name_rejected() {
        let (store, _) = store_with_job().await;
        let other = JobDefinitionStore::insert(
            &store,
            CreateJobDefinition::shell("other", "true").into_definition(Utc::now()),
        )
        .await
        .unwrap();

        let patch = UpdateJobDefinition {
            name: Some("job".into()),
            ..Default::default()
        };
        assert!(matches!(
            JobDefinitionStore::update(&store, other.id, patch).await,
            Err(JobError::DuplicateName(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let (store, job) = store_with_job().await;
        let exec = ExecutionStore::insert(&store, pending(&job)).await.unwrap();

        let first = store.claim(exec.id, Utc::now()).await.unwrap();
        assert_eq!(first.unwrap().status, ExecutionStatus::Running);
        assert!(store.claim(exec.id, Utc::now()).await.unwrap().is_none());
        assert!(store.has_running(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_first_terminal_state_wins() {
        let (store, job) = store_with_job().await;
        let exec = ExecutionStore::insert(&store, pending(&job)).await.unwrap();
        store.claim(exec.id, Utc::now()).await.unwrap();

        assert!(store.cancel(exec.id, Utc::now()).await.unwrap().is_some());
        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Completed,
            completed_at: Utc::now(),
            execution_time_ms: 5,
            output_log: Some("late".into()),
            error_log: None,
        };
        assert!(store.finish(exec.id, &outcome).await.unwrap().is_none());

        let stored = ExecutionStore::find(&store, exec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert_eq!(stored.output_log, None);
    }

    #[tokio::test]
    async fn test_reopen_only_from_failed() {
        let (store, job) = store_with_job().await;
        let exec = ExecutionStore::insert(&store, pending(&job)).await.unwrap();
        assert!(store.reopen(exec.id, 1, Utc::now()).await.unwrap().is_none());

        store.claim(exec.id, Utc::now()).await.unwrap();
        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Failed,
            completed_at: Utc::now(),
            execution_time_ms: 1,
            output_log: None,
            error_log: Some("boom".into()),
        };
        store.finish(exec.id, &outcome).await.unwrap();

        let reopened = store.reopen(exec.id, 1, Utc::now()).await.unwrap().unwrap();
        assert_eq!(reopened.status, ExecutionStatus::Pending);
        assert_eq!(reopened.retry_count, 1);
        assert_eq!(reopened.trigger_type, TriggerType::Retry);
        assert!(reopened.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_delete_job_cascades() {
        let (store, job) = store_with_job().await;
        let exec = ExecutionStore::insert(&store, pending(&job)).await.unwrap();
        assert!(JobDefinitionStore::delete(&store, job.id).await.unwrap());
        assert!(ExecutionStore::find(&store, exec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_pages_newest_first() {
        let (store, job) = store_with_job().await;
        let base = Utc::now();
        for i in 0..5 {
            let mut exec = pending(&job);
            exec.created_at = base + chrono::Duration::seconds(i);
            ExecutionStore::insert(&store, exec).await.unwrap();
        }

        let page = ExecutionStore::list(&store, &ExecutionFilter::default(), PageRequest::new(2, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].created_at, base + chrono::Duration::seconds(2));
    }
}
