//! Tabular dataset synchronization for SQLite.
//!
//! # Intention
//!
//! - Move in-memory [`Dataset`]s to and from relational tables.
//! - Create, append, update, delete and read rows through a single
//!   caller-owned [`Engine`].
//! - Report failures with a small, classified [`SyncError`] taxonomy.
//!
//! # Architectural Boundaries
//!
//! - Only table-level data movement belongs here.
//! - No business rules, no query language, no migrations.
//! - Configuration is passed in explicitly; nothing is read from the
//!   environment.
//!
//! # Example
//!
//! ```no_run
//! use rust_tabular_sync::{
//!     create_or_replace_table, fetch_as_dataset, Dataset, Engine, FetchRequest, IfExists, Value,
//! };
//!
//! # fn main() -> rust_tabular_sync::SyncResult<()> {
//! let engine = Engine::open_in_memory()?;
//! let users = Dataset::from_records(vec![
//!     vec![("id", Value::from(1)), ("name", Value::from("Alice"))],
//!     vec![("id", Value::from(2)), ("name", Value::from("Bob"))],
//! ])?;
//! create_or_replace_table(&engine, &users, "users", IfExists::Replace)?;
//! let back = fetch_as_dataset(&engine, "users", &FetchRequest::new());
//! assert_eq!(back.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod filter;
pub mod schema;
pub mod sql;
pub mod sqlite;
pub mod sync;
pub mod value;

pub use config::{EngineConfig, ServiceConfig};
pub use dataset::{Dataset, Row};
pub use engine::{Engine, PooledConnection};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use filter::RowFilter;
pub use schema::{
    Column, ColumnConstraint, ColumnDefinition, ColumnType, DefaultValue, IndexDefinition, TableDefinition,
    TableSchema,
};
pub use sqlite::{Outcome, SqliteService, TableOperation, TabularStore};
pub use sync::{
    add_column, count_rows, create_or_replace_table, delete_by_keys, delete_rows, drop_table, ensure_table,
    fetch_as_dataset, insert_rows, table_exists, try_fetch_as_dataset, update_cell, upsert_by_key, FetchRequest,
    IfExists,
};
pub use value::{Decimal, Value};
