use std::sync::OnceLock;

use regex::Regex;

/// Extracts structured information from PostgreSQL constraint violation texts.
pub struct ConstraintParser;

struct RegexPatterns {
    /// "Key (field)=(value)" as found in the DETAIL line
    key_value: Regex,
    /// "<table>_<column>_key" / "<table>_<column>_check"
    constraint_suffix: Regex,
}

static REGEX_PATTERNS: OnceLock<Option<RegexPatterns>> = OnceLock::new();

impl ConstraintParser {
    fn patterns() -> Option<&'static RegexPatterns> {
        REGEX_PATTERNS
            .get_or_init(|| {
                Some(RegexPatterns {
                    key_value: Regex::new(r"Key \(([^)]+)\)=\(([^)]*)\)").ok()?,
                    constraint_suffix: Regex::new(r"^(job_definitions|job_executions|job_schedules)_(.+)_(key|check|fkey)$").ok()?,
                })
            })
            .as_ref()
    }

    /// Returns `(field, value)` for a unique violation.
    ///
    /// The value is read from the detail text; the field falls back to the
    /// constraint name when the detail is unavailable.
    ///
    /// ```ignore
    /// let detail = "Key (name)=(nightly-backup) already exists.";
    /// let parsed = ConstraintParser::parse_unique_violation(Some(detail), Some("job_definitions_name_key"));
    /// assert_eq!(parsed, Some(("name".to_string(), Some("nightly-backup".to_string()))));
    /// ```
    pub fn parse_unique_violation(
        detail: Option<&str>,
        constraint_name: Option<&str>,
    ) -> Option<(String, Option<String>)> {
        let patterns = Self::patterns()?;

        if let Some(captures) = detail.and_then(|d| patterns.key_value.captures(d)) {
            return Some((captures[1].to_string(), Some(captures[2].to_string())));
        }

        constraint_name
            .and_then(|c| patterns.constraint_suffix.captures(c))
            .map(|captures| (captures[2].to_string(), None))
    }

    /// Returns the column guarded by a check constraint, e.g. `timeout` for
    /// `job_definitions_timeout_check`
    pub fn parse_check_violation(constraint_name: Option<&str>) -> Option<String> {
        let patterns = Self::patterns()?;
        constraint_name
            .and_then(|c| patterns.constraint_suffix.captures(c))
            .map(|captures| captures[2].to_string())
    }
}
