use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::error::ConstraintParser;
use crate::jobs::JobError;

/// Converts Diesel errors into `JobError` variants.
pub struct DatabaseErrorConverter;

impl DatabaseErrorConverter {
    /// Unique violations on a job name become `DuplicateName`; everything
    /// else is reported as a repository failure of `operation`.
    pub fn convert_diesel_error(error: DieselError, operation: &str) -> JobError {
        match error {
            DieselError::DatabaseError(kind, info) => {
                Self::convert_database_error(kind, info.as_ref(), operation)
            }
            DieselError::NotFound => JobError::repository(operation, "record not found"),
            other => JobError::repository(operation, other),
        }
    }

    fn convert_database_error(
        kind: DatabaseErrorKind,
        info: &(dyn diesel::result::DatabaseErrorInformation + Send + Sync),
        operation: &str,
    ) -> JobError {
        match kind {
            DatabaseErrorKind::UniqueViolation => {
                match ConstraintParser::parse_unique_violation(info.details(), info.constraint_name())
                {
                    Some((field, value)) if field == "name" => {
                        JobError::DuplicateName(value.unwrap_or_default())
                    }
                    _ => JobError::repository(
                        operation,
                        format!("Unique constraint violation: {}", info.message()),
                    ),
                }
            }
            DatabaseErrorKind::CheckViolation => {
                match ConstraintParser::parse_check_violation(info.constraint_name()) {
                    Some(field) => JobError::validation(field, info.message()),
                    None => JobError::repository(operation, info.message()),
                }
            }
            DatabaseErrorKind::ForeignKeyViolation => {
                JobError::validation("jobDefinitionId", info.message())
            }
            _ => JobError::repository(operation, format!("Database error: {}", info.message())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockDatabaseErrorInfo {
        message: String,
        details: Option<String>,
        constraint_name: Option<String>,
    }

    impl diesel::result::DatabaseErrorInformation for MockDatabaseErrorInfo {
        fn message(&self) -> &str {
            &self.message
        }

        fn details(&self) -> Option<&str> {
            self.details.as_deref()
        }

        fn hint(&self) -> Option<&str> {
            None
        }

        fn table_name(&self) -> Option<&str> {
            None
        }

        fn column_name(&self) -> Option<&str> {
            None
        }

        fn constraint_name(&self) -> Option<&str> {
            self.constraint_name.as_deref()
        }

        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    fn db_error(kind: DatabaseErrorKind, details: Option<&str>, constraint: Option<&str>) -> DieselError {
        DieselError::DatabaseError(
            kind,
            Box::new(MockDatabaseErrorInfo {
                message: "constraint violated".to_string(),
                details: details.map(str::to_string),
                constraint_name: constraint.map(str::to_string),
            }),
        )
    }

    #[test]
    fn test_duplicate_name() {
        let error = db_error(
            DatabaseErrorKind::UniqueViolation,
            Some("Key (name)=(backup) already exists."),
            Some("job_definitions_name_key"),
        );
        match DatabaseErrorConverter::convert_diesel_error(error, "insert job") {
            JobError::DuplicateName(name) => assert_eq!(name, "backup"),
            other => panic!("Expected DuplicateName, got {other:?}"),
        }
    }

    #[test]
    fn test_check_violation_becomes_validation() {
        let error = db_error(
            DatabaseErrorKind::CheckViolation,
            None,
            Some("job_definitions_timeout_check"),
        );
        assert!(matches!(
            DatabaseErrorConverter::convert_diesel_error(error, "update job"),
            JobError::Validation { field, .. } if field == "timeout"
        ));
    }

    #[test]
    fn test_other_errors_are_repository_errors() {
        match DatabaseErrorConverter::convert_diesel_error(DieselError::NotFound, "find job") {
            JobError::Repository { operation, .. } => assert_eq!(operation, "find job"),
            other => panic!("Expected Repository, got {other:?}"),
        }
    }
}
