//! The `column__operator` filter language.
//!
//! A filter map such as `{"price__gt": 1, "name__ilike": "bolt"}` is turned
//! into a list of [`Predicate`]s, each a parameterized SQL fragment. All
//! validation happens here, before any statement reaches the database:
//! unknown columns, value shapes that do not fit the operator, values that do
//! not coerce to the column type and values outside an enum domain.

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::datatype::{coerce, expected};
use crate::error::{AccessError, Result};
use crate::metadata::{ColumnDescriptor, TableMetadata, TypeClass};
use crate::persist::FOLD_CASE;
use crate::schema::quote_ident;

/// Caller supplied filters, keyed by `column`, `column__operator` or
/// `table.column__operator`.
pub type Filters = Map<String, Value>;

pub const SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Between,
    IsNull,
}

impl Operator {
    pub const ALL: [Operator; 14] = [
        Self::Equals,
        Self::Neq,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Like,
        Self::Ilike,
        Self::StartsWith,
        Self::EndsWith,
        Self::In,
        Self::NotIn,
        Self::Between,
        Self::IsNull,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::Ilike => "ilike",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Between => "between",
            Self::IsNull => "is_null",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.tag() == tag)
    }

    fn is_pattern(&self) -> bool {
        matches!(self, Self::Like | Self::Ilike | Self::StartsWith | Self::EndsWith)
    }

    fn comparison(&self) -> Option<&'static str> {
        match self {
            Self::Gt => Some(">"),
            Self::Gte => Some(">="),
            Self::Lt => Some("<"),
            Self::Lte => Some("<="),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A filter key split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterKey {
    pub table: Option<String>,
    pub column: String,
    pub operator: Operator,
}

impl FilterKey {
    /// Splits on the last separator whose suffix names an operator. A key
    /// without a recognized suffix is a plain column compared for equality.
    pub fn parse(key: &str) -> Self {
        let (target, operator) = match key.rsplit_once(SEPARATOR) {
            Some((head, tail)) => match Operator::parse(tail) {
                Some(operator) => (head, operator),
                None => (key, Operator::Equals),
            },
            None => (key, Operator::Equals),
        };
        match target.split_once('.') {
            Some((table, column)) => Self {
                table: Some(table.to_string()),
                column: column.to_string(),
                operator,
            },
            None => Self { table: None, column: target.to_string(), operator },
        }
    }
}

/// One validated condition, ready to be AND-ed into a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    table: String,
    column: String,
    operator: Operator,
    sql: String,
    params: Vec<SqlValue>,
}

impl Predicate {
    pub fn table(&self) -> &str {
        &self.table
    }
    pub fn column(&self) -> &str {
        &self.column
    }
    pub fn operator(&self) -> Operator {
        self.operator
    }
    pub fn sql(&self) -> &str {
        &self.sql
    }
    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

/// Builds predicates for `filters` against `primary`, or against one of the
/// other `tables` when a key is dotted.
pub fn build(filters: &Filters, tables: &[Arc<TableMetadata>], primary: &str) -> Result<Vec<Predicate>> {
    let mut predicates = Vec::with_capacity(filters.len());
    for (key, value) in filters {
        let parsed = FilterKey::parse(key);
        let table_name = parsed.table.as_deref().unwrap_or(primary);
        let table = tables
            .iter()
            .find(|t| t.table() == table_name)
            .ok_or_else(|| {
                AccessError::invalid_filter(format!("Table '{table_name}' is not part of this query"))
                    .with_detail("filter", key.as_str())
            })?;
        let column = table.column(&parsed.column)?;
        let predicate = predicate(table.table(), column, parsed.operator, value)
            .map_err(|e| e.with_detail("filter", key.as_str()))?;
        predicates.push(predicate);
    }
    Ok(predicates)
}

fn predicate(table: &str, column: &ColumnDescriptor, operator: Operator, value: &Value) -> Result<Predicate> {
    let target = format!("{}.{}", quote_ident(table), quote_ident(&column.name));
    let (sql, params) = match operator {
        Operator::Equals | Operator::Neq => {
            let (null_test, comparison) =
                if operator == Operator::Equals { ("IS NULL", "=") } else { ("IS NOT NULL", "<>") };
            if value.is_null() {
                (format!("{target} {null_test}"), vec![])
            } else {
                check_enum(column, std::slice::from_ref(value))?;
                (format!("{target} {comparison} ?"), vec![scalar(column, operator, value)?])
            }
        }
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            check_ordinal(column, operator)?;
            let comparison = operator.comparison().unwrap_or("=");
            (format!("{target} {comparison} ?"), vec![scalar(column, operator, value)?])
        }
        Operator::Like | Operator::Ilike | Operator::StartsWith | Operator::EndsWith => {
            let needle = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(shape(column, operator, "a string")),
            };
            let text = match column.type_class {
                TypeClass::Integer | TypeClass::Numeric | TypeClass::Boolean => {
                    format!("CAST({target} AS TEXT)")
                }
                _ => target.clone(),
            };
            if needle.is_empty() {
                // an empty pattern matches every present value
                (format!("{target} IS NOT NULL"), vec![])
            } else {
                match operator {
                    Operator::Like => (format!("instr({text}, ?) > 0"), vec![SqlValue::Text(needle)]),
                    Operator::Ilike => (
                        format!("instr({FOLD_CASE}({text}), {FOLD_CASE}(?)) > 0"),
                        vec![SqlValue::Text(needle)],
                    ),
                    Operator::StartsWith => (
                        format!("substr({text}, 1, length(?)) = ?"),
                        vec![SqlValue::Text(needle.clone()), SqlValue::Text(needle)],
                    ),
                    _ => (
                        format!("substr({text}, -length(?)) = ?"),
                        vec![SqlValue::Text(needle.clone()), SqlValue::Text(needle)],
                    ),
                }
            }
        }
        Operator::In | Operator::NotIn => {
            let items = value.as_array().ok_or_else(|| shape(column, operator, "a list"))?;
            if items.is_empty() {
                let constant = if operator == Operator::In { "0 = 1" } else { "1 = 1" };
                (constant.to_string(), vec![])
            } else {
                if items.iter().any(Value::is_null) {
                    return Err(AccessError::invalid_filter(format!(
                        "Operator '{operator}' on column '{}' does not accept null members",
                        column.name
                    )));
                }
                check_enum(column, items)?;
                let params = items
                    .iter()
                    .map(|item| scalar(column, operator, item))
                    .collect::<Result<Vec<_>>>()?;
                let marks = vec!["?"; params.len()].join(", ");
                let keyword = if operator == Operator::In { "IN" } else { "NOT IN" };
                (format!("{target} {keyword} ({marks})"), params)
            }
        }
        Operator::Between => {
            let bounds = match value.as_array() {
                Some(bounds) if bounds.len() == 2 => bounds,
                _ => return Err(shape(column, operator, "a list of exactly two bounds")),
            };
            if bounds.iter().any(Value::is_null) {
                return Err(AccessError::invalid_filter(format!(
                    "Operator 'between' on column '{}' requires two non-null bounds",
                    column.name
                ))
                .with_detail("column", column.name.as_str()));
            }
            check_ordinal(column, operator)?;
            let low = scalar(column, operator, &bounds[0])?;
            let high = scalar(column, operator, &bounds[1])?;
            (format!("{target} BETWEEN ? AND ?"), vec![low, high])
        }
        Operator::IsNull => match value {
            Value::Bool(true) => (format!("{target} IS NULL"), vec![]),
            Value::Bool(false) => (format!("{target} IS NOT NULL"), vec![]),
            _ => return Err(shape(column, operator, "a boolean")),
        },
    };
    Ok(Predicate { table: table.to_string(), column: column.name.clone(), operator, sql, params })
}

/// Coerces one comparison operand, refusing nulls and nested values.
fn scalar(column: &ColumnDescriptor, operator: Operator, value: &Value) -> Result<SqlValue> {
    let nested = matches!(value, Value::Object(_))
        || (matches!(value, Value::Array(_)) && column.type_class != TypeClass::Array);
    if value.is_null() || nested {
        return Err(shape(column, operator, "a single non-null value"));
    }
    coerce(column.type_class, value).ok_or_else(|| {
        AccessError::invalid_filter(format!(
            "Value {value} for column '{}' is not a valid {}",
            column.name,
            expected(column.type_class)
        ))
        .with_detail("column", column.name.as_str())
        .with_detail("expected_type", expected(column.type_class))
    })
}

fn check_ordinal(column: &ColumnDescriptor, operator: Operator) -> Result<()> {
    if column.type_class.is_ordinal() {
        Ok(())
    } else {
        Err(AccessError::invalid_filter(format!(
            "Ordering comparison not allowed: operator '{operator}' on {} column '{}'",
            expected(column.type_class),
            column.name
        ))
        .with_detail("column", column.name.as_str())
        .with_detail("operator", operator.tag()))
    }
}

fn check_enum(column: &ColumnDescriptor, values: &[Value]) -> Result<()> {
    let allowed = match &column.enum_values {
        Some(allowed) => allowed,
        None => return Ok(()),
    };
    let offending: Vec<Value> = values
        .iter()
        .filter(|v| !v.as_str().is_some_and(|s| allowed.iter().any(|a| a == s)))
        .cloned()
        .collect();
    if offending.is_empty() {
        return Ok(());
    }
    Err(AccessError::invalid_filter(format!(
        "Invalid value(s) for enum column '{}'. Allowed values: {}",
        column.name,
        allowed.join(", ")
    ))
    .with_detail("column", column.name.as_str())
    .with_detail("invalid_values", offending)
    .with_detail("allowed_values", allowed.clone()))
}

fn shape(column: &ColumnDescriptor, operator: Operator, wanted: &str) -> AccessError {
    AccessError::invalid_filter(format!(
        "Operator '{operator}' on column '{}' expects {wanted}",
        column.name
    ))
    .with_detail("column", column.name.as_str())
    .with_detail("operator", operator.tag())
}
