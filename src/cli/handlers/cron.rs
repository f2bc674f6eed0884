//! Cron command handler
//!
//! Parses an expression with the same rules the scheduler uses and prints
//! its next fire times.

use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::jobs::cron::CronExpression;

/// Handler for the cron command
pub struct CronCommandHandler {
    expression: String,
    count: usize,
}

impl CronCommandHandler {
    pub fn new(expression: impl Into<String>, count: usize) -> Self {
        Self {
            expression: expression.into(),
            count,
        }
    }

    /// Print validity and upcoming fire times
    ///
    /// # Errors
    /// Returns `JobError::InvalidCronExpression` for a malformed expression,
    /// so the process exits non-zero.
    pub fn execute(&self) -> AppResult<()> {
        match self.preview(Utc::now()) {
            Ok(times) => {
                println!("✓ '{}' is a valid cron expression", self.expression.trim());
                println!("Next {} fire time(s) (UTC):", times.len());
                for time in times {
                    println!("  - {}", time.format("%Y-%m-%d %H:%M:%S %a"));
                }
                Ok(())
            }
            Err(e) => {
                println!("✗ {}", e);
                Err(e)
            }
        }
    }

    /// Occurrences strictly after `now`
    pub fn preview(&self, now: DateTime<Utc>) -> AppResult<Vec<DateTime<Utc>>> {
        let cron = CronExpression::parse(&self.expression)?;
        Ok(cron.upcoming(now, self.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::jobs::JobError;
    use chrono::TimeZone;

    #[test]
    fn test_preview_five_field_expression() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 10, 7, 30).unwrap();
        let times = CronCommandHandler::new("*/15 * * * *", 3).preview(now).unwrap();
        assert_eq!(
            times,
            vec![
                Utc.with_ymd_and_hms(2025, 1, 1, 10, 15, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 1, 10, 30, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 1, 10, 45, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_invalid_expression_is_an_error() {
        let result = CronCommandHandler::new("not a cron", 5).execute();
        assert!(matches!(
            result,
            Err(AppError::Job(JobError::InvalidCronExpression { .. }))
        ));
    }
}
