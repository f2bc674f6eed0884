//! Cron expression parsing and occurrence computation
//!
//! Accepts the 6/7-field syntax of the `cron` crate (seconds first) as well
//! as classic 5-field crontab lines, which run at second zero. In 5-field
//! lines the day-of-week field uses crontab numbering (0 or 7 = Sunday).

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::jobs::error::{JobError, JobResult};

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    schedule: cron::Schedule,
}

impl CronExpression {
    pub fn parse(expression: &str) -> JobResult<Self> {
        let trimmed = expression.trim();
        let fields: Vec<&str> = trimmed.split_whitespace().collect();

        let normalized = match fields.len() {
            5 => {
                let dow = crontab_weekdays(fields[4])
                    .ok_or_else(|| JobError::invalid_cron(trimmed, "invalid day-of-week field"))?;
                format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], dow)
            }
            6 | 7 => fields.join(" "),
            n => {
                return Err(JobError::invalid_cron(
                    trimmed,
                    format!("expected 5, 6 or 7 fields, found {}", n),
                ));
            }
        };

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| JobError::invalid_cron(trimmed, e))?;

        // Expressions such as "0 0 0 30 2 *" parse but never fire
        if schedule.upcoming(Utc).next().is_none() {
            return Err(JobError::invalid_cron(trimmed, "expression never fires"));
        }

        Ok(Self {
            source: trimmed.to_string(),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First occurrence strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// The next `count` occurrences strictly after `after`
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&after).take(count).collect()
    }

    /// Latest occurrence in `(after, until]`
    pub fn latest_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after)
            .take_while(|t| *t <= until)
            .last()
    }
}

/// Check that an expression parses and fires at least once
pub fn validate(expression: &str) -> JobResult<()> {
    CronExpression::parse(expression).map(|_| ())
}

/// Map crontab day-of-week numbers (0-7, Sunday = 0 or 7) to names, leaving step values alone
fn crontab_weekdays(field: &str) -> Option<String> {
    let mut parts = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        let stepped = |range: String| match step {
            Some(step) => format!("{}/{}", range, step),
            None => range,
        };

        match range.split_once('-') {
            Some((start, end)) if is_number(start) && is_number(end) => {
                let start = weekday_number(start)?;
                let end = weekday_number(end)?;
                if end == 7 && start > 0 {
                    // Named ranges cannot wrap, so "5-7" becomes Fri-Sat plus Sunday
                    let every: usize = match step {
                        Some(step) => step.parse().ok().filter(|n| *n > 0)?,
                        None => 1,
                    };
                    match start {
                        7 => {}
                        6 => parts.push(WEEKDAYS[6].to_string()),
                        _ => parts.push(stepped(format!("{}-Sat", WEEKDAYS[start]))),
                    }
                    if (7 - start) % every == 0 {
                        parts.push(WEEKDAYS[0].to_string());
                    }
                } else {
                    let end = if end == 7 { 6 } else { end };
                    parts.push(stepped(format!("{}-{}", WEEKDAYS[start], WEEKDAYS[end])));
                }
            }
            _ => {
                let mapped = range
                    .split('-')
                    .map(|token| {
                        if is_number(token) {
                            weekday_number(token).map(|day| WEEKDAYS[day % 7].to_string())
                        } else {
                            Some(token.to_string())
                        }
                    })
                    .collect::<Option<Vec<_>>>()?
                    .join("-");
                parts.push(stepped(mapped));
            }
        }
    }
    Some(parts.join(","))
}

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

fn weekday_number(token: &str) -> Option<usize> {
    token.parse().ok().filter(|day| *day <= 7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_five_field_runs_at_second_zero() {
        let cron = CronExpression::parse("*/1 * * * *").unwrap();
        let next = cron.next_after(at(10, 0, 30)).unwrap();
        assert_eq!(next, at(10, 1, 0));
        assert_eq!(cron.as_str(), "*/1 * * * *");
    }

    #[test]
    fn test_six_field_with_seconds() {
        let cron = CronExpression::parse("*/15 * * * * *").unwrap();
        assert_eq!(cron.upcoming(at(10, 0, 0), 3), vec![at(10, 0, 15), at(10, 0, 30), at(10, 0, 45)]);
    }

    #[test]
    fn test_crontab_sunday_numbering() {
        // 2025-03-10 is a Monday
        let cron = CronExpression::parse("0 9 * * 0").unwrap();
        let next = cron.next_after(at(0, 0, 0)).unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Sun);
        assert_eq!(next.hour(), 9);

        let weekdays = CronExpression::parse("30 8 * * 1-5").unwrap();
        let next = weekdays.next_after(at(9, 0, 0)).unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Tue);
    }

    #[test]
    fn test_weekday_step_is_not_renamed() {
        assert_eq!(crontab_weekdays("*/2").unwrap(), "*/2");
        assert_eq!(crontab_weekdays("1-5/2").unwrap(), "Mon-Fri/2");
        assert_eq!(crontab_weekdays("0,6").unwrap(), "Sun,Sat");
        assert!(crontab_weekdays("8").is_none());
    }

    #[test]
    fn test_weekday_ranges_ending_on_seven() {
        assert_eq!(crontab_weekdays("1-7").unwrap(), "Mon-Sat,Sun");
        assert_eq!(crontab_weekdays("5-7").unwrap(), "Fri-Sat,Sun");
        assert_eq!(crontab_weekdays("6-7").unwrap(), "Sat,Sun");
        assert_eq!(crontab_weekdays("0-7").unwrap(), "Sun-Sat");
        assert_eq!(crontab_weekdays("1-7/2").unwrap(), "Mon-Sat/2,Sun");
        assert_eq!(crontab_weekdays("2-7/2").unwrap(), "Tue-Sat/2");
        assert!(crontab_weekdays("1-7/0").is_none());

        // 2025-03-10 is a Monday
        let every_day = CronExpression::parse("0 9 * * 1-7").unwrap();
        let days: Vec<_> = every_day
            .upcoming(at(10, 0, 0), 7)
            .iter()
            .map(|t| t.weekday())
            .collect();
        assert_eq!(days.len(), 7);
        assert_eq!(days[0], chrono::Weekday::Tue);
        assert_eq!(days[6], chrono::Weekday::Mon);

        let weekend = CronExpression::parse("0 9 * * 5-7").unwrap();
        let days: Vec<_> = weekend
            .upcoming(at(0, 0, 0), 3)
            .iter()
            .map(|t| t.weekday())
            .collect();
        assert_eq!(
            days,
            vec![chrono::Weekday::Fri, chrono::Weekday::Sat, chrono::Weekday::Sun]
        );
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in ["", "* * *", "61 * * * *", "not a cron", "* * * * * * * *"] {
            assert!(
                matches!(
                    CronExpression::parse(expr),
                    Err(JobError::InvalidCronExpression { .. })
                ),
                "expected '{}' to be rejected",
                expr
            );
        }
    }

    #[test]
    fn test_latest_between_coalesces() {
        let cron = CronExpression::parse("* * * * *").unwrap();
        let latest = cron.latest_between(at(10, 0, 0), at(10, 4, 30)).unwrap();
        assert_eq!(latest, at(10, 4, 0));
        assert!(cron.latest_between(at(10, 0, 0), at(10, 0, 59)).is_none());
    }

    proptest! {
        #[test]
        fn prop_occurrences_strictly_increase(
            expr in prop::sample::select(vec![
                "*/1 * * * *",
                "0 */2 * * *",
                "15 3 * * 1-5",
                "*/10 * * * * *",
                "0 0 12 1 * *",
                "0 30 9 * * Mon,Wed,Fri",
            ]),
            offset_secs in 0i64..(365 * 24 * 3600),
        ) {
            let cron = CronExpression::parse(expr).unwrap();
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds(offset_secs);
            let times = cron.upcoming(start, 20);
            prop_assert!(!times.is_empty());
            prop_assert!(times[0] > start);
            for pair in times.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
        }
    }
}
