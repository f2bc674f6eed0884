//! CLI argument validation functions
//!
//! This module provides custom validation functions for CLI arguments
//! that go beyond what clap can validate automatically.

use std::fs;
use std::path::PathBuf;

use crate::config::validation::{MAX_TICK_SECONDS, MIN_TICK_SECONDS};

/// Upper bound for `cron --count`
const MAX_PREVIEW_COUNT: usize = 100;

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("Configuration file does not exist: '{}'", path_str));
    }

    if !path.is_file() {
        return Err(format!("Configuration path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!("Cannot read configuration file '{}': {}", path_str, e)),
    }
}

/// Validate rollback steps is a positive number
pub fn validate_rollback_steps(steps_str: &str) -> Result<u32, String> {
    let steps: u32 = steps_str
        .parse()
        .map_err(|_| format!("Rollback steps must be a valid positive number, got: '{}'", steps_str))?;

    if steps == 0 {
        return Err("Rollback steps must be greater than 0".to_string());
    }

    if steps > 100 {
        return Err("Rollback steps cannot exceed 100 for safety reasons".to_string());
    }

    Ok(steps)
}

/// Validate the scheduler tick interval
pub fn validate_tick_seconds(value: &str) -> Result<u64, String> {
    let seconds: u64 = value
        .parse()
        .map_err(|_| format!("Tick interval must be a whole number of seconds, got: '{}'", value))?;

    if !(MIN_TICK_SECONDS..=MAX_TICK_SECONDS).contains(&seconds) {
        return Err(format!(
            "Tick interval must be between {} and {} seconds",
            MIN_TICK_SECONDS, MAX_TICK_SECONDS
        ));
    }

    Ok(seconds)
}

/// Validate the number of fire times to preview
pub fn validate_preview_count(value: &str) -> Result<usize, String> {
    let count: usize = value
        .parse()
        .map_err(|_| format!("Count must be a valid positive number, got: '{}'", value))?;

    if count == 0 || count > MAX_PREVIEW_COUNT {
        return Err(format!("Count must be between 1 and {}", MAX_PREVIEW_COUNT));
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_file_path_validation() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]").unwrap();
        let path = file.path().to_str().unwrap();
        assert_eq!(validate_config_file_path(path).unwrap(), file.path());

        assert!(validate_config_file_path("/definitely/not/here.toml").is_err());

        let dir = tempfile::tempdir().unwrap();
        let err = validate_config_file_path(dir.path().to_str().unwrap()).unwrap_err();
        assert!(err.contains("not a file"));
    }

    #[test]
    fn test_rollback_steps_validation_valid() {
        for steps_str in ["1", "5", "10", "50", "100"] {
            assert!(validate_rollback_steps(steps_str).is_ok(), "Steps {} should be valid", steps_str);
        }
    }

    #[test]
    fn test_rollback_steps_validation_invalid() {
        for steps_str in ["0", "101", "999", "-1", "abc", ""] {
            assert!(validate_rollback_steps(steps_str).is_err(), "Steps '{}' should be invalid", steps_str);
        }
    }

    #[test]
    fn test_tick_seconds_bounds() {
        assert_eq!(validate_tick_seconds("1"), Ok(1));
        assert_eq!(validate_tick_seconds("60"), Ok(60));
        for value in ["0", "61", "-5", "ten", ""] {
            assert!(validate_tick_seconds(value).is_err(), "'{}' should be rejected", value);
        }
    }

    #[test]
    fn test_preview_count_bounds() {
        assert_eq!(validate_preview_count("5"), Ok(5));
        assert!(validate_preview_count("0").is_err());
        assert!(validate_preview_count("101").is_err());
    }
}
