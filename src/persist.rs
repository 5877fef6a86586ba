// used for persistence
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::schema::SchemaRegistry;

/// SQL function lowercasing its argument with full Unicode case folding.
pub const FOLD_CASE: &str = "fold_case";

/// Owns the single SQLite connection. Every operation borrows it for the span
/// of one closure, inside a transaction that ends when the closure returns.
pub struct Database {
    connection: Mutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let connection = Connection::open(path)?;
        Self::configure(connection, busy_timeout)
    }

    pub fn in_memory(busy_timeout: Duration) -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Self::configure(connection, busy_timeout)
    }

    fn configure(connection: Connection, busy_timeout: Duration) -> Result<Self> {
        connection.busy_timeout(busy_timeout)?;
        // SQLite leaves foreign keys unenforced unless asked per connection
        connection.execute_batch("pragma foreign_keys = on;")?;
        // the built-in lower() only folds ASCII
        connection.create_scalar_function(
            FOLD_CASE,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let folded = match ctx.get_raw(0) {
                    ValueRef::Null => None,
                    ValueRef::Integer(i) => Some(i.to_string()),
                    ValueRef::Real(f) => Some(f.to_string()),
                    ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                        Some(String::from_utf8_lossy(bytes).to_lowercase())
                    }
                };
                Ok(folded)
            },
        )?;
        Ok(Self { connection: Mutex::new(connection) })
    }

    /// Creates every table of the registry that does not exist yet.
    pub fn create_tables(&self, registry: &SchemaRegistry) -> Result<()> {
        self.write(|connection| {
            for statement in registry.ddl() {
                debug!(sql = %statement, "create table");
                connection.execute_batch(&statement)?;
            }
            Ok(())
        })
    }

    /// Runs `work` in a deferred transaction that is dropped afterwards.
    pub fn read<T>(&self, work: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut connection = self.connection.lock()?;
        let tx = connection.transaction_with_behavior(TransactionBehavior::Deferred)?;
        work(&tx)
    }

    /// Runs `work` in an immediate transaction. The transaction commits when
    /// `work` returns `Ok` and rolls back on `Err`, including early `?` exits.
    pub fn write<T>(&self, work: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut connection = self.connection.lock()?;
        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = work(&tx)?;
        tx.commit()?;
        Ok(outcome)
    }
}
