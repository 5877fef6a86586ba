
use serde_json::{Map, Value};
use thiserror::Error;

/// Extra key/value pairs attached to a validation failure, surfaced to callers
/// through `error_details` of the response envelope.
pub type Details = Map<String, Value>;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Table '{table}' does not exist")]
    TableNotFound { table: String },
    #[error("Column '{column}' does not exist in table '{table}'")]
    ColumnNotFound { table: String, column: String },
    #[error("Invalid filter: {message}")]
    InvalidFilter { message: String, details: Details },
    #[error("Invalid order by: {message}")]
    InvalidOrderBy { message: String, details: Details },
    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String, details: Details },
    #[error("Invalid join condition: {message}")]
    InvalidJoinCondition { message: String, details: Details },
    #[error("Invalid data type: {message}")]
    InvalidDataType { message: String, details: Details },
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, AccessError>;

impl AccessError {
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter { message: message.into(), details: Details::new() }
    }
    pub fn invalid_order_by(message: impl Into<String>) -> Self {
        Self::InvalidOrderBy { message: message.into(), details: Details::new() }
    }
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidParameters { message: message.into(), details: Details::new() }
    }
    pub fn invalid_join(message: impl Into<String>) -> Self {
        Self::InvalidJoinCondition { message: message.into(), details: Details::new() }
    }
    pub fn invalid_data_type(message: impl Into<String>) -> Self {
        Self::InvalidDataType { message: message.into(), details: Details::new() }
    }

    /// Attaches a detail entry. Variants without a detail map are returned unchanged.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        match &mut self {
            Self::InvalidFilter { details, .. }
            | Self::InvalidOrderBy { details, .. }
            | Self::InvalidParameters { details, .. }
            | Self::InvalidJoinCondition { details, .. }
            | Self::InvalidDataType { details, .. } => {
                details.insert(key.to_string(), value.into());
            }
            _ => (),
        }
        self
    }

    /// True for failures that may succeed when the same call is issued again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
            ),
            _ => false,
        }
    }
}

// Helper conversions
impl From<config::ConfigError> for AccessError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}

impl<T> From<std::sync::PoisonError<T>> for AccessError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
