//! Conversion between caller supplied JSON values and stored SQLite values.
//!
//! Every column has a [`TypeClass`]; input is coerced towards the storage form
//! of that class and stored values are turned back into JSON on the way out.
//! Dates and timestamps are stored as text in one canonical form so that they
//! compare correctly as strings, and are handed back as ISO-8601.

// used for persistence
use rusqlite::types::{Value as SqlValue, ValueRef};
// used for timestamps in the database
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Number, Value};

use crate::metadata::TypeClass;

pub const STORED_DATETIME: &str = "%Y-%m-%d %H:%M:%S";
pub const STORED_DATE: &str = "%Y-%m-%d";
pub const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%S";

lazy_static! {
    static ref DAY_FIRST: Regex = Regex::new(r"^\d{1,2}[./]\d{1,2}[./]\d{4}").unwrap();
}

const YEAR_FIRST_DATETIMES: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];
const DAY_FIRST_DATETIMES: [&str; 4] = ["%d.%m.%Y %H:%M:%S", "%d.%m.%Y %H:%M", "%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M"];
const DAY_FIRST_DATES: [&str; 2] = ["%d.%m.%Y", "%d/%m/%Y"];

/// Parses the textual date and timestamp shapes accepted from callers.
/// Offsets are converted to UTC; date-only input is taken at midnight.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if DAY_FIRST.is_match(text) {
        return DAY_FIRST_DATETIMES
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .or_else(|| {
                DAY_FIRST_DATES
                    .iter()
                    .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                    .map(|date| date.and_time(NaiveTime::MIN))
            });
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
        return Some(stamp.naive_utc());
    }
    YEAR_FIRST_DATETIMES
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, STORED_DATE)
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

/// The stored text for a date or timestamp column.
pub fn normalize_temporal(class: TypeClass, text: &str) -> Option<String> {
    let stamp = parse_datetime(text)?;
    Some(match class {
        TypeClass::Date => stamp.date().format(STORED_DATE).to_string(),
        _ => stamp.format(STORED_DATETIME).to_string(),
    })
}

/// Coerces a JSON value into the storage form of `class`. `None` means the
/// value has no sensible reading as that type. JSON `null` always becomes SQL
/// `NULL`; whether that is allowed is for the caller to decide.
pub fn coerce(class: TypeClass, value: &Value) -> Option<SqlValue> {
    if value.is_null() {
        return Some(SqlValue::Null);
    }
    match class {
        TypeClass::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(f))
                        .map(|f| f as i64)
                })
                .map(SqlValue::Integer),
            Value::String(s) => s.trim().parse::<i64>().ok().map(SqlValue::Integer),
            _ => None,
        },
        TypeClass::Numeric => match value {
            Value::Number(n) => n.as_f64().map(SqlValue::Real),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(SqlValue::Real),
            _ => None,
        },
        TypeClass::Text => match value {
            Value::String(s) => Some(SqlValue::Text(s.clone())),
            Value::Number(n) => Some(SqlValue::Text(n.to_string())),
            Value::Bool(b) => Some(SqlValue::Text(b.to_string())),
            _ => None,
        },
        TypeClass::Enum => value.as_str().map(|s| SqlValue::Text(s.to_string())),
        TypeClass::Boolean => match value {
            Value::Bool(b) => Some(SqlValue::Integer(*b as i64)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(SqlValue::Integer(0)),
                Some(1) => Some(SqlValue::Integer(1)),
                _ => None,
            },
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(SqlValue::Integer(1)),
                "false" | "0" | "no" => Some(SqlValue::Integer(0)),
                _ => None,
            },
            _ => None,
        },
        TypeClass::Date | TypeClass::DateTime => value
            .as_str()
            .and_then(|s| normalize_temporal(class, s))
            .map(SqlValue::Text),
        TypeClass::Array => match value {
            Value::Array(_) => Some(SqlValue::Text(value.to_string())),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Array(_)) => Some(SqlValue::Text(parsed.to_string())),
                _ => None,
            },
            _ => None,
        },
    }
}

/// Human readable name of a type class, used in validation messages.
pub fn expected(class: TypeClass) -> &'static str {
    match class {
        TypeClass::Integer => "integer",
        TypeClass::Numeric => "number",
        TypeClass::Text => "text",
        TypeClass::Boolean => "boolean",
        TypeClass::Date => "date",
        TypeClass::DateTime => "date-time",
        TypeClass::Enum => "enum value",
        TypeClass::Array => "array",
    }
}

/// Converts a stored value back into JSON according to the column's class.
pub fn to_json(class: TypeClass, value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if class == TypeClass::Boolean => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            match class {
                TypeClass::DateTime => match parse_datetime(&text) {
                    Some(stamp) => Value::String(stamp.format(ISO_DATETIME).to_string()),
                    None => Value::String(text.into_owned()),
                },
                TypeClass::Date => match parse_datetime(&text) {
                    Some(stamp) => Value::String(stamp.date().format(STORED_DATE).to_string()),
                    None => Value::String(text.into_owned()),
                },
                TypeClass::Array => {
                    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
                }
                _ => Value::String(text.into_owned()),
            }
        }
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}
