//! Column metadata derived from the schema registry.
//!
//! [`MetadataResolver`] turns a [`TableDef`] into a list of
//! [`ColumnDescriptor`]s and keeps the result per table name. The registry is
//! fixed for the lifetime of the resolver, so a cached entry never goes stale;
//! [`MetadataResolver::reset`] exists for tests that want a cold cache.

use core::hash::BuildHasherDefault;
use regex::Regex;
use seahash::SeaHasher;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{AccessError, Result};
use crate::schema::{ColumnType, ForeignKey, SchemaRegistry, TableDef};

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeClass {
    Integer,
    Numeric,
    Text,
    Boolean,
    Date,
    DateTime,
    Enum,
    Array,
}

impl TypeClass {
    pub fn of(column_type: &ColumnType) -> Self {
        match column_type {
            ColumnType::Integer => Self::Integer,
            ColumnType::Numeric => Self::Numeric,
            ColumnType::Text(_) => Self::Text,
            ColumnType::Boolean => Self::Boolean,
            ColumnType::Date => Self::Date,
            ColumnType::DateTime => Self::DateTime,
            ColumnType::Enum(_) => Self::Enum,
            ColumnType::Array => Self::Array,
        }
    }
    /// Types for which `<`, `>` and ranges are meaningful.
    pub fn is_ordinal(&self) -> bool {
        matches!(self, Self::Integer | Self::Numeric | Self::Date | Self::DateTime)
    }
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::DateTime)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub position: usize,
    pub declared_type: String,
    pub type_class: TypeClass,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<Value>,
    pub foreign_keys: Vec<ForeignKey>,
    /// The check implied by the column type, if any, followed by the table
    /// checks whose text mentions this column. Approximate: a constraint over
    /// several columns is listed under each of them.
    pub check_constraints: Vec<String>,
    pub enum_values: Option<Vec<String>>,
    pub max_length: Option<usize>,
}

impl ColumnDescriptor {
    /// A value must be supplied on insert.
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none() && !self.primary_key
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMetadata {
    table: String,
    columns: Vec<ColumnDescriptor>,
}

impl TableMetadata {
    pub fn table(&self) -> &str {
        &self.table
    }
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }
    pub fn get(&self, column: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == column)
    }
    pub fn column(&self, column: &str) -> Result<&ColumnDescriptor> {
        self.get(column).ok_or_else(|| AccessError::ColumnNotFound {
            table: self.table.clone(),
            column: column.to_string(),
        })
    }
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
    pub fn to_map(&self) -> BTreeMap<String, ColumnDescriptor> {
        self.columns.iter().map(|c| (c.name.clone(), c.clone())).collect()
    }
}

/// One table's entry. The mutex is held while the entry is first derived.
type CacheSlot = Arc<Mutex<Option<Arc<TableMetadata>>>>;

#[derive(Debug)]
pub struct MetadataResolver {
    registry: Arc<SchemaRegistry>,
    caching: bool,
    cache: RwLock<HashMap<String, CacheSlot, OtherHasher>>,
    derivations: AtomicUsize,
}

impl MetadataResolver {
    pub fn new(registry: Arc<SchemaRegistry>, caching: bool) -> Self {
        Self { registry, caching, cache: RwLock::new(HashMap::default()), derivations: AtomicUsize::new(0) }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Metadata for `table`, served from the cache when caching is enabled.
    pub fn resolve(&self, table: &str) -> Result<Arc<TableMetadata>> {
        let definition = self.definition(table)?;
        if !self.caching {
            return self.derive(definition);
        }
        let slot = self.slot(table)?;
        let mut entry = slot.lock()?;
        if let Some(kept) = entry.as_ref() {
            return Ok(Arc::clone(kept));
        }
        // a failed derivation leaves the entry empty for the next caller
        let derived = self.derive(definition)?;
        *entry = Some(Arc::clone(&derived));
        Ok(derived)
    }

    /// Metadata for `table`, always derived afresh.
    pub fn resolve_uncached(&self, table: &str) -> Result<Arc<TableMetadata>> {
        let definition = self.definition(table)?;
        self.derive(definition)
    }

    pub fn reset(&self) -> Result<()> {
        self.cache.write()?.clear();
        Ok(())
    }

    /// Number of tables whose metadata is currently cached.
    pub fn cached(&self) -> usize {
        self.cache
            .read()
            .map(|cache| {
                cache
                    .values()
                    .filter(|slot| slot.lock().map(|entry| entry.is_some()).unwrap_or(false))
                    .count()
            })
            .unwrap_or(0)
    }

    /// How many times table metadata has been derived from the registry.
    pub fn derivations(&self) -> usize {
        self.derivations.load(Ordering::Relaxed)
    }

    fn derive(&self, definition: &TableDef) -> Result<Arc<TableMetadata>> {
        self.derivations.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(derive(&self.registry, definition)?))
    }

    fn definition(&self, table: &str) -> Result<&TableDef> {
        self.registry
            .table(table)
            .ok_or_else(|| AccessError::TableNotFound { table: table.to_string() })
    }

    fn slot(&self, table: &str) -> Result<CacheSlot> {
        if let Some(slot) = self.cache.read()?.get(table) {
            return Ok(Arc::clone(slot));
        }
        let mut cache = self.cache.write()?;
        Ok(Arc::clone(cache.entry(table.to_string()).or_default()))
    }
}

fn derive(registry: &SchemaRegistry, table: &TableDef) -> Result<TableMetadata> {
    let mut columns = Vec::with_capacity(table.columns().len());
    for (position, column) in table.columns().iter().enumerate() {
        let mention = Regex::new(&format!(r"\b{}\b", regex::escape(column.name())))
            .map_err(|e| AccessError::Schema(e.to_string()))?;
        let check_constraints = registry
            .type_check(column)
            .into_iter()
            .chain(table.checks().iter().filter(|check| mention.is_match(check)).cloned())
            .collect();
        let enum_values = match column.column_type() {
            ColumnType::Enum(domain) => registry.enum_domain(domain).map(|d| d.values().to_vec()),
            _ => None,
        };
        let max_length = match column.column_type() {
            ColumnType::Text(max) => *max,
            _ => None,
        };
        columns.push(ColumnDescriptor {
            name: column.name().to_string(),
            position,
            declared_type: column.column_type().declared_type(),
            type_class: TypeClass::of(column.column_type()),
            nullable: column.nullable(),
            primary_key: column.is_primary_key(),
            default: column.default_value().map(|d| d.as_value()),
            foreign_keys: column.foreign_keys().to_vec(),
            check_constraints,
            enum_values,
            max_length,
        });
    }
    Ok(TableMetadata { table: table.name().to_string(), columns })
}
