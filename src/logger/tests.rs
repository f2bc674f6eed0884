//! Tests for the logger module

use crate::logger::config::*;
use crate::logger::writer::RotatingFileWriter;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;

#[cfg(test)]
mod config_tests {
    use super::*;

    fn create_test_config() -> LoggerConfig {
        LoggerConfig {
            console: ConsoleConfig {
                enabled: true,
                colored: false,
            },
            file: FileConfig {
                enabled: false,
                path: PathBuf::from("test.log"),
                append: true,
                format: LogFormat::Full,
                max_size: 0,
                max_files: 0,
            },
            level: "info".to_string(),
        }
    }

    #[test]
    fn test_default_config_creation() {
        let config = LoggerConfig::default();
        assert!(config.console.enabled);
        assert!(config.console.colored);
        assert!(!config.file.enabled);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_config_validation() {
        let mut config = create_test_config();
        assert!(config.validate().is_ok());

        config.console.enabled = false;
        config.file.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let mut config = create_test_config();
        config.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rollover_requires_backups() {
        let mut config = create_test_config();
        config.file.enabled = true;
        config.file.max_size = 1024;
        config.file.max_files = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::default(), LogFormat::Full);
    }
}

#[cfg(test)]
mod writer_tests {
    use super::*;
    use tempfile::TempDir;

    fn file_config(dir: &TempDir, max_size: u64, max_files: usize) -> FileConfig {
        FileConfig {
            enabled: true,
            path: dir.path().join("nested").join("app.log"),
            append: true,
            format: LogFormat::Full,
            max_size,
            max_files,
        }
    }

    #[test]
    fn test_writer_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir, 0, 1);
        let writer = RotatingFileWriter::new(&config).unwrap();

        let mut guard = writer.make_writer();
        guard.write_all(b"hello\n").unwrap();
        guard.flush().unwrap();
        drop(guard);

        let content = std::fs::read_to_string(&config.path).unwrap();
        assert_eq!(content, "hello\n");
        assert!(!writer.is_in_fallback_mode());
    }

    #[test]
    fn test_writer_rolls_over_and_keeps_max_files() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir, 10, 2);
        let writer = RotatingFileWriter::new(&config).unwrap();

        for line in ["aaaaaaaa\n", "bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
            let mut guard = writer.make_writer();
            guard.write_all(line.as_bytes()).unwrap();
            guard.flush().unwrap();
        }

        let live = std::fs::read_to_string(&config.path).unwrap();
        assert_eq!(live, "dddddddd\n");

        let first = config.path.with_file_name("app.log.1");
        let second = config.path.with_file_name("app.log.2");
        let third = config.path.with_file_name("app.log.3");
        assert_eq!(std::fs::read_to_string(first).unwrap(), "cccccccc\n");
        assert_eq!(std::fs::read_to_string(second).unwrap(), "bbbbbbbb\n");
        assert!(!third.exists());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn property_known_levels_parse(level in prop::sample::select(vec!["trace", "DEBUG", "Info", "warn", "error"])) {
            let config = LoggerConfig { level: level.to_string(), ..LoggerConfig::default() };
            prop_assert!(config.validate().is_ok());
        }
    }
}
