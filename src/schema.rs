//! Static description of the relational schema.
//!
//! A [`SchemaRegistry`] is assembled once through [`RegistryBuilder`], checked
//! for internal consistency and then shared read-only by every other component.
//! It also knows how to render itself as SQLite table definitions, where enum
//! domains, booleans and text length limits become `CHECK` constraints.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::error::{AccessError, Result};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Declared column types understood by the access layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    Integer,
    Numeric,
    /// Text with an optional maximum length in characters.
    Text(Option<usize>),
    Boolean,
    Date,
    DateTime,
    /// Text restricted to the values of the named enum domain.
    Enum(String),
    /// JSON array stored as text.
    Array,
}

impl ColumnType {
    /// The type name shown to callers.
    pub fn declared_type(&self) -> String {
        match self {
            Self::Integer => "INTEGER".into(),
            Self::Numeric => "NUMERIC".into(),
            Self::Text(Some(max)) => format!("VARCHAR({max})"),
            Self::Text(None) => "TEXT".into(),
            Self::Boolean => "BOOLEAN".into(),
            Self::Date => "DATE".into(),
            Self::DateTime => "TIMESTAMP".into(),
            Self::Enum(domain) => domain.clone(),
            Self::Array => "ARRAY".into(),
        }
    }

    /// The type name used in the generated SQLite table definition.
    fn storage_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Numeric => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::DateTime => "TIMESTAMP",
            Self::Text(_) | Self::Enum(_) | Self::Array => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DefaultValue {
    Literal(Value),
    CurrentTimestamp,
}

impl DefaultValue {
    pub fn as_value(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::CurrentTimestamp => Value::String("CURRENT_TIMESTAMP".into()),
        }
    }
    fn as_sql(&self) -> String {
        match self {
            Self::CurrentTimestamp => "CURRENT_TIMESTAMP".into(),
            Self::Literal(Value::Bool(b)) => if *b { "1".into() } else { "0".into() },
            Self::Literal(Value::Number(n)) => n.to_string(),
            Self::Literal(Value::String(s)) => quote_literal(s),
            Self::Literal(Value::Null) => "NULL".into(),
            Self::Literal(other) => quote_literal(&other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDef {
    name: String,
    column_type: ColumnType,
    nullable: bool,
    primary_key: bool,
    default: Option<DefaultValue>,
    references: Vec<ForeignKey>,
}

impl ColumnDef {
    /// Columns are nullable until told otherwise, as in SQL.
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: true,
            primary_key: false,
            default: None,
            references: Vec::new(),
        }
    }
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
    /// Primary keys are implicitly not null.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Literal(value.into()));
        self
    }
    pub fn default_now(mut self) -> Self {
        self.default = Some(DefaultValue::CurrentTimestamp);
        self
    }
    pub fn references(mut self, table: &str, column: &str) -> Self {
        self.references.push(ForeignKey { table: table.to_string(), column: column.to_string() });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }
    pub fn nullable(&self) -> bool {
        self.nullable
    }
    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }
    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.references
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDef {
    name: String,
    columns: Vec<ColumnDef>,
    checks: Vec<String>,
}

impl TableDef {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), columns: Vec::new(), checks: Vec::new() }
    }
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }
    /// Adds a table level check constraint. The expression is kept verbatim.
    pub fn check(mut self, expression: &str) -> Self {
        self.checks.push(expression.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }
    pub fn checks(&self) -> &[String] {
        &self.checks
    }
    pub fn get(&self, column: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == column)
    }
    pub fn has_column(&self, column: &str) -> bool {
        self.get(column).is_some()
    }
    pub fn primary_key(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumDomain {
    name: String,
    values: Vec<String>,
}

impl EnumDomain {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn values(&self) -> &[String] {
        &self.values
    }
    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    enums: Vec<EnumDomain>,
    tables: Vec<TableDef>,
}

impl RegistryBuilder {
    pub fn enumeration<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enums.push(EnumDomain {
            name: name.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }
    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    /// Validates the collected definitions and freezes them into a registry.
    pub fn build(self) -> Result<SchemaRegistry> {
        let mut enums = HashMap::new();
        for domain in self.enums {
            check_identifier(&domain.name)?;
            if domain.values.is_empty() {
                return Err(AccessError::Schema(format!("Enum domain '{}' has no values", domain.name)));
            }
            if enums.insert(domain.name.clone(), domain).is_some() {
                return Err(AccessError::Schema("Duplicate enum domain".into()));
            }
        }

        let mut index = HashMap::new();
        for (position, table) in self.tables.iter().enumerate() {
            check_identifier(&table.name)?;
            if table.columns.is_empty() {
                return Err(AccessError::Schema(format!("Table '{}' has no columns", table.name)));
            }
            if index.insert(table.name.clone(), position).is_some() {
                return Err(AccessError::Schema(format!("Table '{}' is declared twice", table.name)));
            }
            let mut seen = HashSet::new();
            for column in &table.columns {
                check_identifier(&column.name)?;
                // the filter language reserves the double underscore
                if column.name.contains("__") {
                    return Err(AccessError::Schema(format!(
                        "Column '{}.{}' must not contain '__'",
                        table.name, column.name
                    )));
                }
                if !seen.insert(column.name.as_str()) {
                    return Err(AccessError::Schema(format!(
                        "Column '{}.{}' is declared twice",
                        table.name, column.name
                    )));
                }
                if let ColumnType::Enum(domain) = &column.column_type {
                    if !enums.contains_key(domain) {
                        return Err(AccessError::Schema(format!(
                            "Column '{}.{}' uses unknown enum domain '{}'",
                            table.name, column.name, domain
                        )));
                    }
                }
            }
        }

        // foreign keys may point forward, so they are checked once every table is known
        for table in &self.tables {
            for column in &table.columns {
                for fk in &column.references {
                    let target = index.get(&fk.table).map(|&i| &self.tables[i]);
                    match target {
                        Some(t) if t.has_column(&fk.column) => (),
                        _ => {
                            return Err(AccessError::Schema(format!(
                                "Column '{}.{}' references unknown column '{}.{}'",
                                table.name, column.name, fk.table, fk.column
                            )));
                        }
                    }
                }
            }
        }

        Ok(SchemaRegistry { tables: self.tables, index, enums })
    }
}

fn check_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(AccessError::Schema(format!("'{name}' is not a valid identifier")))
    }
}

/// Read-only description of every table. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct SchemaRegistry {
    tables: Vec<TableDef>,
    index: HashMap<String, usize>,
    enums: HashMap<String, EnumDomain>,
}

impl SchemaRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.index.get(name).map(|&i| &self.tables[i])
    }
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }
    /// Table names in declaration order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }
    pub fn enum_domain(&self, name: &str) -> Option<&EnumDomain> {
        self.enums.get(name)
    }

    /// Renders the `create table if not exists` statement for one table.
    pub fn create_table_sql(&self, table: &TableDef) -> String {
        let primary_key = table.primary_key();
        // a lone integer key becomes the rowid alias so it is generated on insert
        let rowid_key = primary_key.len() == 1 && primary_key[0].column_type == ColumnType::Integer;
        let mut lines: Vec<String> = Vec::new();
        for column in &table.columns {
            let mut line = format!("{} {}", quote_ident(&column.name), column.column_type.storage_type());
            if column.primary_key && rowid_key {
                line.push_str(" PRIMARY KEY");
            } else if !column.nullable {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default {
                line.push_str(&format!(" DEFAULT {}", default.as_sql()));
            }
            lines.push(line);
        }
        if !primary_key.is_empty() && !rowid_key {
            let names: Vec<String> = primary_key.iter().map(|c| quote_ident(&c.name)).collect();
            lines.push(format!("PRIMARY KEY ({})", names.join(", ")));
        }
        for column in &table.columns {
            let ident = quote_ident(&column.name);
            if let Some(check) = self.type_check(column) {
                lines.push(format!("CHECK ({check})"));
            }
            for fk in &column.references {
                lines.push(format!(
                    "FOREIGN KEY ({ident}) REFERENCES {}({})",
                    quote_ident(&fk.table),
                    quote_ident(&fk.column)
                ));
            }
        }
        for check in &table.checks {
            lines.push(format!("CHECK ({check})"));
        }
        format!(
            "create table if not exists {} (\n    {}\n)",
            quote_ident(&table.name),
            lines.join(",\n    ")
        )
    }

    /// The check expression the column's type implies in storage: a length
    /// limit, the enum domain or the 0/1 encoding of booleans.
    pub fn type_check(&self, column: &ColumnDef) -> Option<String> {
        let ident = quote_ident(&column.name);
        match &column.column_type {
            ColumnType::Text(Some(max)) => Some(format!("length({ident}) <= {max}")),
            ColumnType::Boolean => Some(format!("{ident} IN (0, 1)")),
            ColumnType::Enum(domain) => self.enums.get(domain).map(|domain| {
                let values: Vec<String> = domain.values.iter().map(|v| quote_literal(v)).collect();
                format!("{ident} IN ({})", values.join(", "))
            }),
            _ => None,
        }
    }

    /// Statements creating every table, in declaration order.
    pub fn ddl(&self) -> Vec<String> {
        self.tables.iter().map(|t| self.create_table_sql(t)).collect()
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
