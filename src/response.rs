//! The uniform result envelope returned by every public operation.
//!
//! A [`Response`] is never thrown: validation failures, storage failures and
//! successes all travel back to the caller as a value with a [`ResponseStatus`],
//! a human readable message and, on error, an [`ErrorCode`] plus details.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Warning,
}

/// Closed taxonomy of failure codes. The serialized form is the stable wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "DB_CONNECTION_FAILED")]
    ConnectionFailed,
    #[serde(rename = "DB_CONNECTION_LOST")]
    ConnectionLost,
    #[serde(rename = "QUERY_TIMEOUT")]
    QueryTimeout,
    #[serde(rename = "QUERY_SYNTAX_ERROR")]
    QuerySyntaxError,
    #[serde(rename = "TABLE_NOT_FOUND")]
    TableNotFound,
    #[serde(rename = "COLUMN_NOT_FOUND")]
    ColumnNotFound,
    #[serde(rename = "INVALID_FILTER")]
    InvalidFilter,
    #[serde(rename = "INVALID_ORDER_BY")]
    InvalidOrderBy,
    #[serde(rename = "INVALID_PARAMETERS")]
    InvalidParameters,
    #[serde(rename = "INVALID_JOIN_CONDITION")]
    InvalidJoinCondition,
    #[serde(rename = "INVALID_DATA_TYPE")]
    InvalidDataType,
    #[serde(rename = "DUPLICATE_KEY")]
    DuplicateKey,
    #[serde(rename = "FOREIGN_KEY_VIOLATION")]
    ForeignKeyViolation,
    #[serde(rename = "NULL_VALUE_NOT_ALLOWED")]
    NullValueNotAllowed,
    #[serde(rename = "CHECK_CONSTRAINT_VIOLATION")]
    CheckConstraintViolation,
    #[serde(rename = "DATA_TOO_LONG")]
    DataTooLong,
    #[serde(rename = "OPERATION_FAILED")]
    OperationFailed,
    #[serde(rename = "UNKNOWN_ERROR")]
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionFailed => "DB_CONNECTION_FAILED",
            Self::ConnectionLost => "DB_CONNECTION_LOST",
            Self::QueryTimeout => "QUERY_TIMEOUT",
            Self::QuerySyntaxError => "QUERY_SYNTAX_ERROR",
            Self::TableNotFound => "TABLE_NOT_FOUND",
            Self::ColumnNotFound => "COLUMN_NOT_FOUND",
            Self::InvalidFilter => "INVALID_FILTER",
            Self::InvalidOrderBy => "INVALID_ORDER_BY",
            Self::InvalidParameters => "INVALID_PARAMETERS",
            Self::InvalidJoinCondition => "INVALID_JOIN_CONDITION",
            Self::InvalidDataType => "INVALID_DATA_TYPE",
            Self::DuplicateKey => "DUPLICATE_KEY",
            Self::ForeignKeyViolation => "FOREIGN_KEY_VIOLATION",
            Self::NullValueNotAllowed => "NULL_VALUE_NOT_ALLOWED",
            Self::CheckConstraintViolation => "CHECK_CONSTRAINT_VIOLATION",
            Self::DataTooLong => "DATA_TOO_LONG",
            Self::OperationFailed => "OPERATION_FAILED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Codes raised by input validation rather than by the storage layer.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ColumnNotFound
                | Self::InvalidFilter
                | Self::InvalidOrderBy
                | Self::InvalidParameters
                | Self::InvalidJoinCondition
                | Self::InvalidDataType
        )
    }

    /// Codes raised by integrity constraints of the stored data.
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            Self::DuplicateKey
                | Self::ForeignKeyViolation
                | Self::NullValueNotAllowed
                | Self::CheckConstraintViolation
                | Self::DataTooLong
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured failure description. `operation`, `exception_type` and
/// `original_message` are always present; anything else lands in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub operation: String,
    pub exception_type: String,
    pub original_message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T = Value> {
    status: ResponseStatus,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<ErrorDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    affected_rows: Option<usize>,
}

impl<T> Response<T> {
    pub const DEFAULT_SUCCESS_MESSAGE: &'static str = "Operation completed successfully";

    pub fn success(data: T, message: impl Into<String>, affected_rows: Option<usize>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            data: Some(data),
            error_code: None,
            error_details: None,
            affected_rows,
        }
    }

    pub fn error(error_code: ErrorCode, message: impl Into<String>, error_details: ErrorDetails) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            data: None,
            error_code: Some(error_code),
            error_details: Some(error_details),
            affected_rows: None,
        }
    }

    pub fn warning(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            status: ResponseStatus::Warning,
            message: message.into(),
            data,
            error_code: None,
            error_details: None,
            affected_rows: None,
        }
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }
    pub fn message(&self) -> &str {
        &self.message
    }
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }
    pub fn into_data(self) -> Option<T> {
        self.data
    }
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error_code
    }
    pub fn error_details(&self) -> Option<&ErrorDetails> {
        self.error_details.as_ref()
    }
    pub fn affected_rows(&self) -> Option<usize> {
        self.affected_rows
    }
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }

    /// Carries an error or warning over to a response of another payload type.
    /// Successful payloads are converted with `f`.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            status: self.status,
            message: self.message,
            data: self.data.map(f),
            error_code: self.error_code,
            error_details: self.error_details,
            affected_rows: self.affected_rows,
        }
    }
}

impl<T: Serialize> Response<T> {
    /// The envelope as a JSON value, the shape handed to presentation code.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "status": "error",
                "message": format!("Response could not be serialized: {e}"),
                "error_code": ErrorCode::UnknownError.as_str(),
            })
        })
    }
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}
