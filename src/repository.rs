//! The query executor: select, insert, update and delete over any table of
//! the registry.
//!
//! Every public method returns a [`Response`]. Internally the work is a
//! `Result`-returning closure handed to [`Repository::run`], which applies the
//! retry policy and sends any remaining error through the translator. Input
//! is validated completely before the connection is touched.

use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::datatype::{coerce, expected, to_json};
use crate::error::{AccessError, Result};
use crate::filter::{self, Filters, Predicate};
use crate::join::{JoinResolver, JoinSpec};
use crate::metadata::{ColumnDescriptor, MetadataResolver, TableMetadata, TypeClass};
use crate::persist::Database;
use crate::response::Response;
use crate::schema::{quote_ident, SchemaRegistry};

/// One result row, keyed by output column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}

impl RetryPolicy {
    /// `attempts` counts the first try; zero is treated as one.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts: attempts.max(1), delay }
    }
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Runs `work` until it succeeds, fails permanently, or runs out of
    /// attempts. Only transient storage failures are retried.
    pub fn run<T>(&self, operation: &str, mut work: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match work() {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(operation, attempt, error = %e, "transient failure, retrying");
                    thread::sleep(self.delay);
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
    fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Ordering as `(column, direction)` pairs, applied in sequence. From JSON it
/// is read either as a list of pairs or as an object of column to direction,
/// keeping the order in which the object's keys appear.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(into = "Vec<(String, String)>")]
pub struct OrderBy(Vec<(String, String)>);

impl<'de> Deserialize<'de> for OrderBy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderVisitor;

        impl<'de> Visitor<'de> for OrderVisitor {
            type Value = OrderBy;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a list of [column, direction] pairs or an object of column to direction")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<OrderBy, A::Error> {
                let mut pairs = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(pair) = seq.next_element::<(String, String)>()? {
                    pairs.push(pair);
                }
                Ok(OrderBy(pairs))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<OrderBy, A::Error> {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(pair) = map.next_entry::<String, String>()? {
                    pairs.push(pair);
                }
                Ok(OrderBy(pairs))
            }
        }

        deserializer.deserialize_any(OrderVisitor)
    }
}

impl From<OrderBy> for Vec<(String, String)> {
    fn from(order: OrderBy) -> Self {
        order.0
    }
}

impl OrderBy {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectQuery {
    pub table: String,
    /// Output columns, `column` or `table.column`. All columns when absent.
    pub columns: Option<Vec<String>>,
    pub filters: Filters,
    pub joins: Vec<JoinSpec>,
    pub order_by: OrderBy,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(table: &str) -> Self {
        Self { table: table.to_string(), ..Self::default() }
    }
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
    pub fn filter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.filters.insert(key.to_string(), value.into());
        self
    }
    pub fn join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }
    pub fn order_by(mut self, column: &str, direction: &str) -> Self {
        self.order_by.0.push((column.to_string(), direction.to_string()));
        self
    }
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A selected expression and the key it is reported under.
struct Output {
    key: String,
    expression: String,
    class: TypeClass,
}

impl Output {
    fn column(table: &str, column: &ColumnDescriptor, key: String) -> Self {
        Self {
            key,
            expression: format!("{}.{}", quote_ident(table), quote_ident(&column.name)),
            class: column.type_class,
        }
    }
}

pub struct Repository {
    registry: Arc<SchemaRegistry>,
    database: Database,
    metadata: MetadataResolver,
    retry: RetryPolicy,
}

impl Repository {
    pub fn new(registry: Arc<SchemaRegistry>, database: Database) -> Self {
        let metadata = MetadataResolver::new(Arc::clone(&registry), true);
        Self { registry, database, metadata, retry: RetryPolicy::default() }
    }

    /// Opens the configured database and creates any missing tables.
    pub fn open(registry: Arc<SchemaRegistry>, settings: &Settings) -> Result<Self> {
        let database = match &settings.database {
            Some(path) => Database::open(path, settings.busy_timeout())?,
            None => Database::in_memory(settings.busy_timeout())?,
        };
        database.create_tables(&registry)?;
        Ok(Self::new(registry, database)
            .with_caching(settings.cache_metadata)
            .with_retry(settings.retry_policy()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_caching(mut self, caching: bool) -> Self {
        self.metadata = MetadataResolver::new(Arc::clone(&self.registry), caching);
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }
    pub fn metadata(&self) -> &MetadataResolver {
        &self.metadata
    }
    pub fn database(&self) -> &Database {
        &self.database
    }

    fn run<T>(&self, operation: &str, work: impl FnMut() -> Result<Response<T>>) -> Response<T> {
        match self.retry.run(operation, work) {
            Ok(response) => response,
            Err(e) => crate::translate::translate(&e, operation),
        }
    }

    pub fn table_names(&self) -> Response<Vec<String>> {
        let names = self.registry.table_names();
        let message = format!("Found {} tables", names.len());
        Response::success(names, message, None)
    }

    pub fn describe(&self, table: &str) -> Response<BTreeMap<String, ColumnDescriptor>> {
        self.run("describe", || {
            let metadata = self.metadata.resolve(table)?;
            Ok(Response::success(metadata.to_map(), format!("Columns of '{table}'"), None))
        })
    }

    /// Like [`describe`](Self::describe) but always derives afresh.
    pub fn describe_uncached(&self, table: &str) -> Response<BTreeMap<String, ColumnDescriptor>> {
        self.run("describe", || {
            let metadata = self.metadata.resolve_uncached(table)?;
            Ok(Response::success(metadata.to_map(), format!("Columns of '{table}'"), None))
        })
    }

    pub fn reset_cache(&self) -> Response<Value> {
        self.run("reset_cache", || {
            self.metadata.reset()?;
            Ok(Response::success(Value::Null, "Metadata cache cleared", None))
        })
    }

    pub fn select(&self, query: &SelectQuery) -> Response<Vec<Row>> {
        self.run("select", || {
            let joins = JoinResolver::new(&self.metadata).resolve(&query.table, &query.joins)?;
            let predicates = filter::build(&query.filters, &joins.tables, &query.table)?;

            let outputs = match &query.columns {
                Some(columns) if !columns.is_empty() => columns
                    .iter()
                    .map(|name| {
                        let (table, column) = locate(name, &joins.tables)
                            .map_err(|e| e.with_detail("column", name.as_str()))?;
                        Ok(Output::column(table.table(), column, name.clone()))
                    })
                    .collect::<Result<Vec<_>>>()?,
                _ => joins
                    .tables
                    .iter()
                    .enumerate()
                    .flat_map(|(i, table)| {
                        table.columns().iter().map(move |column| {
                            let key = if i == 0 {
                                column.name.clone()
                            } else {
                                format!("{}.{}", table.table(), column.name)
                            };
                            Output::column(table.table(), column, key)
                        })
                    })
                    .collect(),
            };

            let mut ordering = Vec::new();
            for (name, direction) in &query.order_by.0 {
                let keyword = Direction::parse(direction).ok_or_else(|| {
                    AccessError::invalid_order_by(format!("Direction '{direction}' must be 'asc' or 'desc'"))
                        .with_detail("column", name.as_str())
                        .with_detail("direction", direction.as_str())
                })?;
                let (table, column) = locate(name, &joins.tables).map_err(|_| {
                    AccessError::invalid_order_by(format!("Cannot order by unknown column '{name}'"))
                        .with_detail("column", name.as_str())
                })?;
                ordering.push(format!(
                    "{}.{} {}",
                    quote_ident(table.table()),
                    quote_ident(&column.name),
                    keyword.keyword()
                ));
            }

            let mut sql = format!(
                "select {} from {}",
                outputs.iter().map(|o| o.expression.as_str()).collect::<Vec<_>>().join(", "),
                quote_ident(&query.table)
            );
            for join in &joins.predicates {
                sql.push(' ');
                sql.push_str(&join.to_sql());
            }
            let params = push_where(&mut sql, &predicates);
            if !ordering.is_empty() {
                sql.push_str(&format!(" order by {}", ordering.join(", ")));
            }
            match (query.limit, query.offset) {
                (Some(limit), Some(offset)) => sql.push_str(&format!(" limit {limit} offset {offset}")),
                (Some(limit), None) => sql.push_str(&format!(" limit {limit}")),
                (None, Some(offset)) => sql.push_str(&format!(" limit -1 offset {offset}")),
                (None, None) => (),
            }
            debug!(sql = %sql, params = params.len(), "select");

            let rows = self.database.read(|connection| read_rows(connection, &sql, &params, &outputs))?;
            let count = rows.len();
            if joins.approximated() {
                return Ok(Response::warning(
                    format!(
                        "Found {count} records; right join executed as left join, \
                         rows of the joined table without a match are not included"
                    ),
                    Some(rows),
                ));
            }
            Ok(Response::success(rows, format!("Found {count} records"), None))
        })
    }

    /// Inserts one row. Keys that are not columns of `table` are skipped and
    /// reported back under `ignored`; `inserted` is the stored row.
    pub fn insert(&self, table: &str, values: &Map<String, Value>) -> Response<Value> {
        self.run("insert", || {
            let metadata = self.metadata.resolve(table)?;
            let (known, ignored): (Vec<_>, Vec<_>) = values.iter().partition(|(key, _)| metadata.get(key).is_some());
            let ignored: Vec<String> = ignored.into_iter().map(|(key, _)| key.clone()).collect();
            if known.is_empty() {
                return Err(AccessError::invalid_parameters(format!("No known columns of '{table}' supplied"))
                    .with_detail("ignored", ignored.clone()));
            }
            let missing: Vec<&str> = metadata
                .columns()
                .iter()
                .filter(|c| c.is_required() && values.get(&c.name).is_none_or(Value::is_null))
                .map(|c| c.name.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(AccessError::invalid_parameters(format!(
                    "Missing required fields: {}",
                    missing.join(", ")
                ))
                .with_detail("missing_fields", missing));
            }
            let mut columns = Vec::with_capacity(known.len());
            let mut params = Vec::with_capacity(known.len());
            for (key, value) in &known {
                let column = metadata.column(key)?;
                params.push(store(column, value)?);
                columns.push(quote_ident(key));
            }
            let sql = format!(
                "insert into {} ({}) values ({})",
                quote_ident(table),
                columns.join(", "),
                vec!["?"; params.len()].join(", ")
            );
            debug!(sql = %sql, "insert");
            let outputs: Vec<Output> = metadata
                .columns()
                .iter()
                .map(|c| Output::column(table, c, c.name.clone()))
                .collect();
            let inserted = self.database.write(|connection| {
                connection.execute(&sql, params_from_iter(params.iter()))?;
                let read_back = format!(
                    "select {} from {} where rowid = ?",
                    outputs.iter().map(|o| o.expression.as_str()).collect::<Vec<_>>().join(", "),
                    quote_ident(table)
                );
                let rowid = SqlValue::Integer(connection.last_insert_rowid());
                let mut rows = read_rows(connection, &read_back, &[rowid], &outputs)?;
                Ok(rows.pop().map(Value::Object).unwrap_or(Value::Null))
            })?;
            info!(table, ignored = ignored.len(), "insert complete");
            Ok(Response::success(
                json!({"inserted": inserted, "ignored": ignored}),
                format!("Record added to '{table}'"),
                Some(1),
            ))
        })
    }

    pub fn update(&self, table: &str, values: &Map<String, Value>, filters: &Filters) -> Response<Value> {
        self.run("update", || {
            let metadata = self.metadata.resolve(table)?;
            if values.is_empty() {
                return Err(AccessError::invalid_parameters("No values to update"));
            }
            let mut assignments = Vec::with_capacity(values.len());
            let mut params = Vec::with_capacity(values.len());
            for (key, value) in values {
                let column = metadata.column(key)?;
                params.push(store(column, value)?);
                assignments.push(format!("{} = ?", quote_ident(key)));
            }
            let predicates = filter::build(filters, std::slice::from_ref(&metadata), table)?;
            let mut sql = format!("update {} set {}", quote_ident(table), assignments.join(", "));
            params.extend(push_where(&mut sql, &predicates));
            debug!(sql = %sql, "update");
            let updated = self
                .database
                .write(|connection| Ok(connection.execute(&sql, params_from_iter(params.iter()))?))?;
            info!(table, rows = updated, "update complete");
            Ok(Response::success(
                json!({"updated": updated}),
                format!("Updated {updated} records in '{table}'"),
                Some(updated),
            ))
        })
    }

    /// Deletes the matching rows. An empty filter map is refused rather than
    /// emptying the table.
    pub fn delete(&self, table: &str, filters: &Filters) -> Response<Value> {
        self.run("delete", || {
            let metadata = self.metadata.resolve(table)?;
            if filters.is_empty() {
                return Err(AccessError::invalid_parameters(
                    "Refusing to delete without filters; this would remove every row",
                ));
            }
            let predicates = filter::build(filters, std::slice::from_ref(&metadata), table)?;
            let mut sql = format!("delete from {}", quote_ident(table));
            let params = push_where(&mut sql, &predicates);
            debug!(sql = %sql, "delete");
            let deleted = self
                .database
                .write(|connection| Ok(connection.execute(&sql, params_from_iter(params.iter()))?))?;
            info!(table, rows = deleted, "delete complete");
            Ok(Response::success(
                json!({"deleted": deleted}),
                format!("Deleted {deleted} records from '{table}'"),
                Some(deleted),
            ))
        })
    }

    /// Candidate rows for a foreign key picker: `id_column` and
    /// `display_column` of rows whose display text contains `query`,
    /// ignoring case, ordered by display text.
    pub fn search_foreign_key(
        &self,
        table: &str,
        display_column: &str,
        id_column: &str,
        query: &str,
        limit: u64,
    ) -> Response<Vec<Row>> {
        let mut select = SelectQuery::new(table)
            .columns([id_column, display_column])
            .order_by(display_column, "asc")
            .limit(limit);
        if !query.is_empty() {
            select = select.filter(&format!("{display_column}__ilike"), query);
        }
        self.select(&select)
    }

    /// The display text of the row `id` refers to. Falls back to the id
    /// itself when the row cannot be found.
    pub fn foreign_key_display(&self, table: &str, display_column: &str, id_column: &str, id: &Value) -> Response<String> {
        let fallback = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let select = SelectQuery::new(table)
            .columns([display_column])
            .filter(id_column, id.clone())
            .limit(1);
        let found = self
            .select(&select)
            .into_data()
            .and_then(|mut rows| rows.pop())
            .and_then(|mut row| row.remove(display_column));
        match found {
            Some(Value::String(text)) => Response::success(text, Response::<String>::DEFAULT_SUCCESS_MESSAGE, None),
            Some(value) if !value.is_null() => {
                Response::success(value.to_string(), Response::<String>::DEFAULT_SUCCESS_MESSAGE, None)
            }
            _ => Response::warning(format!("No display value found in '{table}'"), Some(fallback)),
        }
    }
}

/// Finds the table and column a possibly dotted name refers to. Plain names
/// belong to the first (primary) table.
fn locate<'t>(name: &str, tables: &'t [Arc<TableMetadata>]) -> Result<(&'t TableMetadata, &'t ColumnDescriptor)> {
    let (table_name, column) = match name.split_once('.') {
        Some((table, column)) => (table, column),
        None => (tables[0].table(), name),
    };
    let table: &TableMetadata = tables
        .iter()
        .find(|t| t.table() == table_name)
        .map(|t| t.as_ref())
        .ok_or_else(|| AccessError::invalid_parameters(format!("Table '{table_name}' is not part of this query")))?;
    Ok((table, table.column(column)?))
}

/// Coerces an insert or update value for `column`.
fn store(column: &ColumnDescriptor, value: &Value) -> Result<SqlValue> {
    if let (Some(allowed), Some(text)) = (&column.enum_values, value.as_str()) {
        if !allowed.iter().any(|a| a == text) {
            return Err(AccessError::invalid_data_type(format!(
                "'{text}' is not allowed for column '{}'. Allowed values: {}",
                column.name,
                allowed.join(", ")
            ))
            .with_detail("column", column.name.as_str())
            .with_detail("allowed_values", allowed.clone()));
        }
    }
    coerce(column.type_class, value).ok_or_else(|| {
        AccessError::invalid_data_type(format!(
            "Value {value} for column '{}' is not a valid {}",
            column.name,
            expected(column.type_class)
        ))
        .with_detail("column", column.name.as_str())
        .with_detail("expected_type", expected(column.type_class))
    })
}

/// Appends the conjunction of `predicates` and returns their parameters.
fn push_where(sql: &mut String, predicates: &[Predicate]) -> Vec<SqlValue> {
    if predicates.is_empty() {
        return Vec::new();
    }
    let conditions: Vec<&str> = predicates.iter().map(|p| p.sql()).collect();
    sql.push_str(" where ");
    sql.push_str(&conditions.join(" and "));
    predicates.iter().flat_map(|p| p.params().iter().cloned()).collect()
}

fn read_rows(connection: &Connection, sql: &str, params: &[SqlValue], outputs: &[Output]) -> Result<Vec<Row>> {
    let mut statement = connection.prepare(sql)?;
    let rows = statement.query_map(params_from_iter(params.iter()), |row| {
        let mut record = Row::new();
        for (i, output) in outputs.iter().enumerate() {
            record.insert(output.key.clone(), to_json(output.class, row.get_ref(i)?));
        }
        Ok(record)
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
