//! Turns an [`AccessError`] into an error [`Response`].
//!
//! Validation failures already know their code. Storage failures are
//! classified from SQLite's extended result codes first and, where those are
//! generic, from the text of the message. The text inspection is a best
//! effort: SQLite wording is stable but not a contract.

use rusqlite::{ffi, ErrorCode as SqliteCode};
use serde_json::{Map, Value};
use tracing::error;

use crate::error::AccessError;
use crate::response::{ErrorCode, ErrorDetails, Response};

pub fn translate<T>(failure: &AccessError, operation: &str) -> Response<T> {
    let (code, exception_type, message, extra) = classify(failure);
    error!(operation, code = %code, exception = %exception_type, error = %failure, "operation failed");
    Response::error(
        code,
        message,
        ErrorDetails {
            operation: operation.to_string(),
            exception_type,
            original_message: failure.to_string(),
            extra,
        },
    )
}

fn classify(failure: &AccessError) -> (ErrorCode, String, String, Map<String, Value>) {
    let validation = |code: ErrorCode, kind: &str, details: &Map<String, Value>| {
        (code, kind.to_string(), failure.to_string(), details.clone())
    };
    match failure {
        AccessError::TableNotFound { table } => {
            let extra = Map::from_iter([("table".to_string(), Value::from(table.as_str()))]);
            (ErrorCode::TableNotFound, "TableNotFound".into(), failure.to_string(), extra)
        }
        AccessError::ColumnNotFound { table, column } => {
            let extra = Map::from_iter([
                ("table".to_string(), Value::from(table.as_str())),
                ("column".to_string(), Value::from(column.as_str())),
            ]);
            (ErrorCode::ColumnNotFound, "ColumnNotFound".into(), failure.to_string(), extra)
        }
        AccessError::InvalidFilter { details, .. } => validation(ErrorCode::InvalidFilter, "InvalidFilter", details),
        AccessError::InvalidOrderBy { details, .. } => validation(ErrorCode::InvalidOrderBy, "InvalidOrderBy", details),
        AccessError::InvalidParameters { details, .. } => {
            validation(ErrorCode::InvalidParameters, "InvalidParameters", details)
        }
        AccessError::InvalidJoinCondition { details, .. } => {
            validation(ErrorCode::InvalidJoinCondition, "InvalidJoinCondition", details)
        }
        AccessError::InvalidDataType { details, .. } => {
            validation(ErrorCode::InvalidDataType, "InvalidDataType", details)
        }
        AccessError::Storage(e) => {
            let (code, kind) = storage(e);
            (code, kind, storage_message(code).to_string(), Map::new())
        }
        AccessError::Lock(_) => (
            ErrorCode::ConnectionLost,
            "Lock".into(),
            storage_message(ErrorCode::ConnectionLost).to_string(),
            Map::new(),
        ),
        AccessError::Schema(_) | AccessError::Config(_) => (
            ErrorCode::OperationFailed,
            "Configuration".into(),
            failure.to_string(),
            Map::new(),
        ),
    }
}

/// Code and exception type name for a storage failure.
fn storage(e: &rusqlite::Error) -> (ErrorCode, String) {
    match e {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let text = message.clone().unwrap_or_else(|| e.to_string());
            let code = match failure.code {
                SqliteCode::ConstraintViolation => match failure.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ErrorCode::DuplicateKey,
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ErrorCode::ForeignKeyViolation,
                    ffi::SQLITE_CONSTRAINT_NOTNULL => ErrorCode::NullValueNotAllowed,
                    ffi::SQLITE_CONSTRAINT_CHECK => {
                        if text.contains("length(") {
                            ErrorCode::DataTooLong
                        } else {
                            ErrorCode::CheckConstraintViolation
                        }
                    }
                    _ => from_text(&text).unwrap_or(ErrorCode::CheckConstraintViolation),
                },
                SqliteCode::DatabaseBusy | SqliteCode::DatabaseLocked | SqliteCode::OperationInterrupted => {
                    ErrorCode::QueryTimeout
                }
                SqliteCode::CannotOpen | SqliteCode::NotADatabase | SqliteCode::PermissionDenied => {
                    ErrorCode::ConnectionFailed
                }
                SqliteCode::SystemIoFailure | SqliteCode::DatabaseCorrupt => ErrorCode::ConnectionLost,
                SqliteCode::TooBig => ErrorCode::DataTooLong,
                SqliteCode::TypeMismatch => ErrorCode::InvalidDataType,
                _ => from_text(&text).unwrap_or(ErrorCode::UnknownError),
            };
            (code, format!("{:?}", failure.code))
        }
        rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..)
        | rusqlite::Error::ToSqlConversionFailure(_) => (ErrorCode::InvalidDataType, "Conversion".into()),
        rusqlite::Error::InvalidParameterCount(..) | rusqlite::Error::InvalidParameterName(_) => {
            (ErrorCode::QuerySyntaxError, "InvalidParameter".into())
        }
        other => (from_text(&other.to_string()).unwrap_or(ErrorCode::UnknownError), "Storage".into()),
    }
}

/// Substring heuristics over the raw message.
fn from_text(text: &str) -> Option<ErrorCode> {
    let text = text.to_lowercase();
    let code = if text.contains("unique") || text.contains("duplicate") {
        ErrorCode::DuplicateKey
    } else if text.contains("foreign key") {
        ErrorCode::ForeignKeyViolation
    } else if text.contains("not null") {
        ErrorCode::NullValueNotAllowed
    } else if text.contains("check constraint") {
        if text.contains("length(") {
            ErrorCode::DataTooLong
        } else {
            ErrorCode::CheckConstraintViolation
        }
    } else if text.contains("timeout") || text.contains("database is locked") || text.contains("busy") {
        ErrorCode::QueryTimeout
    } else if text.contains("no such table") || (text.contains("table") && text.contains("does not exist")) {
        ErrorCode::TableNotFound
    } else if text.contains("no such column") || (text.contains("column") && text.contains("does not exist")) {
        ErrorCode::ColumnNotFound
    } else if text.contains("syntax error") {
        ErrorCode::QuerySyntaxError
    } else if text.contains("unable to open") || text.contains("connection") {
        ErrorCode::ConnectionFailed
    } else {
        return None;
    };
    Some(code)
}

fn storage_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::DuplicateKey => "A record with the same key already exists",
        ErrorCode::ForeignKeyViolation => "The referenced record does not exist or is still referenced",
        ErrorCode::NullValueNotAllowed => "A required field cannot be empty",
        ErrorCode::CheckConstraintViolation => "The data violates a check constraint",
        ErrorCode::DataTooLong => "A value is longer than the column allows",
        ErrorCode::QueryTimeout => "The database did not respond in time",
        ErrorCode::ConnectionFailed => "Could not connect to the database",
        ErrorCode::ConnectionLost => "The connection to the database was lost",
        ErrorCode::QuerySyntaxError => "The generated query was rejected by the database",
        ErrorCode::TableNotFound => "The table does not exist in the database",
        ErrorCode::ColumnNotFound => "The column does not exist in the database",
        ErrorCode::InvalidDataType => "A value has the wrong data type",
        _ => "Unexpected database error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn failing(sql: &str) -> AccessError {
        let connection = Connection::open_in_memory().unwrap();
        connection
            .execute_batch(
                "pragma foreign_keys = on;
                 create table parent (id integer primary key);
                 create table child (
                     id integer primary key,
                     parent_id integer references parent(id),
                     label text not null check (length(label) <= 3),
                     weight real check (weight > 0)
                 );
                 insert into parent (id) values (1);",
            )
            .unwrap();
        AccessError::from(connection.execute_batch(sql).unwrap_err())
    }

    fn code(sql: &str) -> Option<ErrorCode> {
        translate::<Value>(&failing(sql), "test").error_code()
    }

    #[test]
    fn constraint_failures_map_to_specific_codes() {
        assert_eq!(code("insert into parent (id) values (1)"), Some(ErrorCode::DuplicateKey));
        assert_eq!(code("insert into child (parent_id, label) values (7, 'a')"), Some(ErrorCode::ForeignKeyViolation));
        assert_eq!(code("insert into child (parent_id) values (1)"), Some(ErrorCode::NullValueNotAllowed));
        assert_eq!(code("insert into child (label, weight) values ('a', -1)"), Some(ErrorCode::CheckConstraintViolation));
        assert_eq!(code("insert into child (label) values ('abcdef')"), Some(ErrorCode::DataTooLong));
    }

    #[test]
    fn generic_errors_are_refined_by_text() {
        assert_eq!(code("select * from nowhere"), Some(ErrorCode::TableNotFound));
        assert_eq!(code("select nothing from parent"), Some(ErrorCode::ColumnNotFound));
        assert_eq!(code("selec 1"), Some(ErrorCode::QuerySyntaxError));
    }

    #[test]
    fn details_always_carry_the_basics() {
        let response: Response<Value> = translate(&failing("insert into parent (id) values (1)"), "insert");
        let details = response.error_details().unwrap();
        assert_eq!(details.operation, "insert");
        assert_eq!(details.exception_type, "ConstraintViolation");
        assert!(details.original_message.contains("UNIQUE"));
        assert!(!response.message().is_empty());
    }

    #[test]
    fn validation_details_are_kept() {
        let failure = AccessError::invalid_parameters("Missing required fields: name")
            .with_detail("missing_fields", vec!["name"]);
        let response: Response<Value> = translate(&failure, "insert");
        assert_eq!(response.error_code(), Some(ErrorCode::InvalidParameters));
        assert_eq!(response.error_details().unwrap().extra["missing_fields"], serde_json::json!(["name"]));
        assert_eq!(response.message(), "Invalid parameters: Missing required fields: name");
    }

    #[test]
    fn text_heuristics() {
        assert_eq!(from_text("duplicate key value violates"), Some(ErrorCode::DuplicateKey));
        assert_eq!(from_text("relation \"x\" table does not exist"), Some(ErrorCode::TableNotFound));
        assert_eq!(from_text("something else entirely"), None);
    }
}
