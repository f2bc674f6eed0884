//! Next-execution rules for explicit schedules

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::jobs::cron::CronExpression;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::models::{CreateSchedule, Schedule, ScheduleProgress};
use crate::jobs::types::ScheduleType;

/// Check the type-specific fields of a new schedule
pub fn validate(create: &CreateSchedule) -> JobResult<()> {
    if let (Some(start), Some(end)) = (create.start_date, create.end_date)
        && end < start
    {
        return Err(JobError::validation(
            "endDate",
            "End date must not precede start date",
        ));
    }

    match create.schedule_type {
        ScheduleType::Cron => match &create.cron_expression {
            Some(expr) => CronExpression::parse(expr).map(|_| ()),
            None => Err(JobError::validation(
                "cronExpression",
                "CRON schedules require a cron expression",
            )),
        },
        ScheduleType::Interval => match create.interval_minutes {
            Some(minutes) if minutes > 0 => Ok(()),
            _ => Err(JobError::validation(
                "intervalMinutes",
                "INTERVAL schedules require a positive interval",
            )),
        },
        ScheduleType::SpecificDates => {
            if create.specific_dates.is_empty() {
                Err(JobError::validation(
                    "specificDates",
                    "SPECIFIC_DATES schedules require at least one date",
                ))
            } else {
                Ok(())
            }
        }
        ScheduleType::Once => Ok(()),
    }
}

impl CreateSchedule {
    pub fn into_schedule(self, now: DateTime<Utc>) -> JobResult<Schedule> {
        validate(&self)?;

        let mut schedule = Schedule {
            id: Uuid::new_v4(),
            job_definition_id: self.job_definition_id,
            schedule_type: self.schedule_type,
            cron_expression: self.cron_expression,
            interval_minutes: self.interval_minutes,
            specific_dates: self.specific_dates,
            start_date: self.start_date,
            end_date: self.end_date,
            next_execution: None,
            last_execution: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        schedule.specific_dates.sort();

        let progress = initial_progress(&schedule, now)?;
        schedule.next_execution = progress.next_execution;
        schedule.is_active = progress.is_active;
        Ok(schedule)
    }
}

/// First execution of a new or resumed schedule
pub fn initial_progress(schedule: &Schedule, now: DateTime<Utc>) -> JobResult<ScheduleProgress> {
    let next = match schedule.schedule_type {
        ScheduleType::Cron => next_cron(schedule, now)?,
        ScheduleType::Interval => Some(now + interval(schedule)?),
        ScheduleType::SpecificDates => next_specific_date(schedule, now),
        ScheduleType::Once => Some(schedule.start_date.unwrap_or(now)),
    };

    Ok(finish(schedule, clamp_to_start(schedule, next), schedule.last_execution, now))
}

/// State after the schedule fired at `fired_at`
pub fn progress_after_fire(
    schedule: &Schedule,
    fired_at: DateTime<Utc>,
) -> JobResult<ScheduleProgress> {
    let next = match schedule.schedule_type {
        ScheduleType::Cron => next_cron(schedule, fired_at)?,
        ScheduleType::Interval => Some(fired_at + interval(schedule)?),
        ScheduleType::SpecificDates => next_specific_date(schedule, fired_at),
        ScheduleType::Once => None,
    };

    Ok(finish(
        schedule,
        clamp_to_start(schedule, next),
        Some(fired_at),
        fired_at,
    ))
}

fn finish(
    schedule: &Schedule,
    next: Option<DateTime<Utc>>,
    last_execution: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ScheduleProgress {
    let within_end = match (next, schedule.end_date) {
        (Some(next), Some(end)) => next <= end,
        (Some(_), None) => true,
        (None, _) => false,
    };

    ScheduleProgress {
        next_execution: if within_end { next } else { None },
        last_execution,
        is_active: within_end,
        updated_at: now,
    }
}

fn clamp_to_start(schedule: &Schedule, next: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (next, schedule.start_date) {
        (Some(next), Some(start)) if next < start => Some(start),
        (next, _) => next,
    }
}

fn next_cron(schedule: &Schedule, after: DateTime<Utc>) -> JobResult<Option<DateTime<Utc>>> {
    let expression = schedule
        .cron_expression
        .as_deref()
        .ok_or_else(|| JobError::validation("cronExpression", "missing cron expression"))?;
    let cron = CronExpression::parse(expression)?;

    // Stay on the cron grid when the start date lies ahead
    let from = match schedule.start_date {
        Some(start) if start > after => start - Duration::nanoseconds(1),
        _ => after,
    };
    Ok(cron.next_after(from))
}

fn interval(schedule: &Schedule) -> JobResult<Duration> {
    match schedule.interval_minutes {
        Some(minutes) if minutes > 0 => Ok(Duration::minutes(minutes as i64)),
        _ => Err(JobError::validation(
            "intervalMinutes",
            "missing or non-positive interval",
        )),
    }
}

fn next_specific_date(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let floor = schedule.start_date.map_or(after, |start| start.max(after));
    schedule
        .specific_dates
        .iter()
        .copied()
        .filter(|date| *date > after && *date >= floor)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, h, m, 0).unwrap()
    }

    fn build(create: CreateSchedule, now: DateTime<Utc>) -> Schedule {
        create.into_schedule(now).expect("valid schedule")
    }

    #[test]
    fn test_validation_per_type() {
        let job = Uuid::new_v4();
        assert!(validate(&CreateSchedule::new(job, ScheduleType::Cron)).is_err());
        assert!(validate(&CreateSchedule::new(job, ScheduleType::Interval)).is_err());
        assert!(validate(&CreateSchedule::new(job, ScheduleType::SpecificDates)).is_err());
        assert!(validate(&CreateSchedule::new(job, ScheduleType::Once)).is_ok());

        let mut bad_cron = CreateSchedule::new(job, ScheduleType::Cron);
        bad_cron.cron_expression = Some("nope".into());
        assert!(matches!(
            validate(&bad_cron),
            Err(JobError::InvalidCronExpression { .. })
        ));

        let mut inverted = CreateSchedule::new(job, ScheduleType::Once);
        inverted.start_date = Some(t(12, 0));
        inverted.end_date = Some(t(11, 0));
        assert!(validate(&inverted).is_err());
    }

    #[test]
    fn test_interval_advances_from_fire_time() {
        let mut create = CreateSchedule::new(Uuid::new_v4(), ScheduleType::Interval);
        create.interval_minutes = Some(15);
        let schedule = build(create, t(10, 0));
        assert_eq!(schedule.next_execution, Some(t(10, 15)));

        let progress = progress_after_fire(&schedule, t(10, 16)).unwrap();
        assert_eq!(progress.next_execution, Some(t(10, 31)));
        assert_eq!(progress.last_execution, Some(t(10, 16)));
        assert!(progress.is_active);
    }

    #[test]
    fn test_next_never_precedes_start_date() {
        let mut create = CreateSchedule::new(Uuid::new_v4(), ScheduleType::Interval);
        create.interval_minutes = Some(5);
        create.start_date = Some(t(18, 0));
        let schedule = build(create, t(10, 0));
        assert_eq!(schedule.next_execution, Some(t(18, 0)));

        let mut create = CreateSchedule::new(Uuid::new_v4(), ScheduleType::Cron);
        create.cron_expression = Some("*/7 * * * *".into());
        create.start_date = Some(t(18, 1));
        let schedule = build(create, t(10, 0));
        assert_eq!(schedule.next_execution, Some(t(18, 7)));
    }

    #[test]
    fn test_specific_dates_walk_then_deactivate() {
        let mut create = CreateSchedule::new(Uuid::new_v4(), ScheduleType::SpecificDates);
        create.specific_dates = vec![t(14, 0), t(9, 0), t(12, 0)];
        let schedule = build(create, t(10, 0));
        assert_eq!(schedule.next_execution, Some(t(12, 0)));

        let progress = progress_after_fire(&schedule, t(12, 0)).unwrap();
        assert_eq!(progress.next_execution, Some(t(14, 0)));

        let progress = progress_after_fire(&schedule, t(14, 0)).unwrap();
        assert_eq!(progress.next_execution, None);
        assert!(!progress.is_active);
    }

    #[test]
    fn test_once_deactivates_after_fire() {
        let schedule = build(CreateSchedule::new(Uuid::new_v4(), ScheduleType::Once), t(10, 0));
        assert_eq!(schedule.next_execution, Some(t(10, 0)));
        assert!(schedule.is_active);

        let progress = progress_after_fire(&schedule, t(10, 0)).unwrap();
        assert!(!progress.is_active);
        assert_eq!(progress.next_execution, None);
    }

    #[test]
    fn test_end_date_deactivates() {
        let mut create = CreateSchedule::new(Uuid::new_v4(), ScheduleType::Interval);
        create.interval_minutes = Some(60);
        create.end_date = Some(t(11, 30));
        let schedule = build(create, t(10, 0));
        assert_eq!(schedule.next_execution, Some(t(11, 0)));

        let progress = progress_after_fire(&schedule, t(11, 0)).unwrap();
        assert!(!progress.is_active);
        assert_eq!(progress.next_execution, None);
    }
}
