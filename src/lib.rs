//! Rowkeeper – a metadata-driven access layer over a small relational schema.
//!
//! Given nothing but a table name and a declarative [`schema::SchemaRegistry`],
//! rowkeeper can describe the table, validate a dynamic filter expression
//! against its columns, run select/insert/update/delete statements (including
//! foreign-key joins) and report every outcome, good or bad, through one
//! [`response::Response`] envelope.
//!
//! ## Modules
//! * [`schema`] – Tables, columns, keys, check constraints and enum domains,
//!   assembled through a validating builder. Also renders SQLite DDL.
//! * [`catalog`] – The concrete plant schema (equipment, sensors, readings,
//!   maintenance, failure predictions, products, sales).
//! * [`metadata`] – Per-column descriptors derived from the registry, cached
//!   per table.
//! * [`filter`] – The `column__operator` filter language.
//! * [`join`] – Join specifications and their predicates.
//! * [`repository`] – The query executor.
//! * [`translate`] – Maps failures onto the closed error-code taxonomy.
//! * [`response`] – The envelope returned by every public operation.
//! * [`datatype`] – Value coercion and date normalization.
//! * [`persist`] – The SQLite connection and its transaction scopes.
//! * [`config`] and [`server`] – Settings and the HTTP adapter used by the binary.
//!
//! ## Filters
//! A filter is a map from `column`, `column__operator` or
//! `table.column__operator` to a JSON value. Operators are `equals` (the
//! default), `neq`, `gt`, `gte`, `lt`, `lte`, `like`, `ilike`, `startswith`,
//! `endswith`, `in`, `not_in`, `between` and `is_null`. Filters are AND-ed.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use rowkeeper::{catalog, persist::Database, repository::{Repository, SelectQuery}};
//!
//! let registry = Arc::new(catalog::plant().unwrap());
//! let database = Database::in_memory(Duration::from_secs(1)).unwrap();
//! database.create_tables(&registry).unwrap();
//! let repository = Repository::new(registry, database);
//!
//! let added = repository.insert("products", json!({"name": "Bolt", "price": 5}).as_object().unwrap());
//! assert_eq!(added.affected_rows(), Some(1));
//!
//! let found = repository.select(&SelectQuery::new("products").filter("price__gt", 1));
//! assert_eq!(found.data().map(Vec::len), Some(1));
//! ```
//!
//! ## Limitations
//! Right joins are executed as left joins and the select result is then a
//! warning rather than a success. Check constraints are associated with
//! columns by a whole-word match on the constraint text, which is a hint
//! rather than a parse.

pub mod catalog;
pub mod config;
pub mod datatype;
pub mod error;
pub mod filter;
pub mod join;
pub mod metadata;
pub mod persist;
pub mod repository;
pub mod response;
pub mod schema;
pub mod server;
pub mod translate;
