use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::lock::Mutex;
use tokio::task;
use tracing::info;

use crate::config::ServiceConfig;
use crate::dataset::Dataset;
use crate::engine::Engine;
use crate::error::{SyncError, SyncResult};
use crate::filter::RowFilter;
use crate::schema::ColumnType;
use crate::sync::{self, FetchRequest, IfExists};
use crate::value::Value;

/// A single table operation, as accepted by [`TabularStore::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum TableOperation {
    Create {
        table: String,
        dataset: Dataset,
        mode: IfExists,
    },
    Insert {
        table: String,
        dataset: Dataset,
    },
    /// Update-only; see [`sync::upsert_by_key`].
    Upsert {
        table: String,
        dataset: Dataset,
        match_columns: Vec<String>,
    },
    UpdateCell {
        table: String,
        filter: RowFilter,
        column: String,
        value: Value,
    },
    Delete {
        table: String,
        condition: RowFilter,
    },
    DeleteByKeys {
        table: String,
        key_column: String,
        keys: Vec<Value>,
    },
    AddColumn {
        table: String,
        column: String,
        column_type: ColumnType,
    },
    DropTable {
        table: String,
    },
    Fetch {
        table: String,
        request: FetchRequest,
    },
    Exists {
        table: String,
    },
}

impl TableOperation {
    pub fn table(&self) -> &str {
        match self {
            TableOperation::Create { table, .. }
            | TableOperation::Insert { table, .. }
            | TableOperation::Upsert { table, .. }
            | TableOperation::UpdateCell { table, .. }
            | TableOperation::Delete { table, .. }
            | TableOperation::DeleteByKeys { table, .. }
            | TableOperation::AddColumn { table, .. }
            | TableOperation::DropTable { table }
            | TableOperation::Fetch { table, .. }
            | TableOperation::Exists { table } => table,
        }
    }
}

/// Result of a [`TableOperation`]; `Display` gives a one-line summary.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Written { table: String, rows: usize },
    Inserted { table: String, rows: usize },
    Updated { table: String, rows: usize },
    CellUpdated { table: String, column: String, matched: bool },
    Deleted { table: String, rows: usize },
    ColumnAdded { table: String, column: String },
    Dropped { table: String },
    Fetched { table: String, dataset: Dataset },
    Exists { table: String, exists: bool },
}

impl Outcome {
    /// Rows written, modified or returned, where that applies.
    pub fn rows_affected(&self) -> Option<usize> {
        match self {
            Outcome::Written { rows, .. }
            | Outcome::Inserted { rows, .. }
            | Outcome::Updated { rows, .. }
            | Outcome::Deleted { rows, .. } => Some(*rows),
            Outcome::Fetched { dataset, .. } => Some(dataset.len()),
            _ => None,
        }
    }

    pub fn into_dataset(self) -> Option<Dataset> {
        match self {
            Outcome::Fetched { dataset, .. } => Some(dataset),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Written { table, rows } => write!(f, "table `{}` written with {} row(s)", table, rows),
            Outcome::Inserted { table, rows } => write!(f, "inserted {} row(s) into `{}`", rows, table),
            Outcome::Updated { table, rows } => write!(f, "updated {} row(s) in `{}`", rows, table),
            Outcome::CellUpdated { table, column, matched: true } => {
                write!(f, "updated `{}` in `{}`", column, table)
            }
            Outcome::CellUpdated { table, column, matched: false } => {
                write!(f, "no rows matched for update of `{}` in `{}`", column, table)
            }
            Outcome::Deleted { table, rows } => write!(f, "deleted {} row(s) from `{}`", rows, table),
            Outcome::ColumnAdded { table, column } => write!(f, "added column `{}` to `{}`", column, table),
            Outcome::Dropped { table } => write!(f, "dropped table `{}`", table),
            Outcome::Fetched { table, dataset } => {
                write!(f, "retrieved {} row(s) from `{}`", dataset.len(), table)
            }
            Outcome::Exists { table, exists } => write!(
                f,
                "table `{}` {}",
                table,
                if *exists { "exists" } else { "does not exist" }
            ),
        }
    }
}

/// Asynchronous access to table operations.
#[async_trait]
pub trait TabularStore: Send + Sync {
    async fn execute(&self, operation: TableOperation) -> SyncResult<Outcome>;
}

/// Service wrapper owning an [`Engine`] between `start` and `stop`.
///
/// SQLite work, including waits for a pooled connection, runs on tokio's
/// blocking thread pool; callers must be inside a tokio runtime.
pub struct SqliteService {
    config: ServiceConfig,
    engine: Mutex<Option<Arc<Engine>>>,
}

impl SqliteService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            engine: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Opens the engine and provisions the configured tables.
    pub async fn start(&self) -> SyncResult<()> {
        let mut slot = self.engine.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        info!(db_path = %self.config.engine.db_path, "starting sqlite service");
        let config = self.config.clone();
        let engine = task::spawn_blocking(move || -> SyncResult<Engine> {
            let engine = Engine::open(config.engine)?;
            for table in &config.tables {
                sync::ensure_table(&engine, table)?;
            }
            Ok(engine)
        })
        .await
        .map_err(|e| SyncError::connection(format!("service start task failed: {}", e)))??;
        *slot = Some(Arc::new(engine));
        Ok(())
    }

    /// Releases the engine. Operations fail until the next `start`.
    pub async fn stop(&self) {
        if self.engine.lock().await.take().is_some() {
            info!("sqlite service stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.engine.lock().await.is_some()
    }

    /// The running engine, for direct use of the [`sync`] functions.
    pub async fn engine(&self) -> SyncResult<Arc<Engine>> {
        self.engine
            .lock()
            .await
            .clone()
            .ok_or_else(|| SyncError::connection("sqlite service is not started"))
    }
}

fn apply(engine: &Engine, operation: TableOperation) -> SyncResult<Outcome> {
    Ok(match operation {
        TableOperation::Create { table, dataset, mode } => {
            let rows = sync::create_or_replace_table(engine, &dataset, &table, mode)?;
            Outcome::Written { table, rows }
        }
        TableOperation::Insert { table, dataset } => {
            let rows = sync::insert_rows(engine, &dataset, &table)?;
            Outcome::Inserted { table, rows }
        }
        TableOperation::Upsert {
            table,
            dataset,
            match_columns,
        } => {
            let rows = sync::upsert_by_key(engine, &dataset, &table, &match_columns)?;
            Outcome::Updated { table, rows }
        }
        TableOperation::UpdateCell {
            table,
            filter,
            column,
            value,
        } => {
            let matched = sync::update_cell(engine, &table, &filter, &column, value)?;
            Outcome::CellUpdated { table, column, matched }
        }
        TableOperation::Delete { table, condition } => {
            let rows = sync::delete_rows(engine, &table, &condition)?;
            Outcome::Deleted { table, rows }
        }
        TableOperation::DeleteByKeys {
            table,
            key_column,
            keys,
        } => {
            let rows = sync::delete_by_keys(engine, &table, &key_column, &keys)?;
            Outcome::Deleted { table, rows }
        }
        TableOperation::AddColumn {
            table,
            column,
            column_type,
        } => {
            sync::add_column(engine, &table, &column, &column_type)?;
            Outcome::ColumnAdded { table, column }
        }
        TableOperation::DropTable { table } => {
            sync::drop_table(engine, &table)?;
            Outcome::Dropped { table }
        }
        TableOperation::Fetch { table, request } => {
            let dataset = sync::try_fetch_as_dataset(engine, &table, &request)?;
            Outcome::Fetched { table, dataset }
        }
        TableOperation::Exists { table } => {
            let exists = sync::table_exists(engine, &table)?;
            Outcome::Exists { table, exists }
        }
    })
}

#[async_trait]
impl TabularStore for SqliteService {
    async fn execute(&self, operation: TableOperation) -> SyncResult<Outcome> {
        let engine = self.engine().await?;
        let table = operation.table().to_string();
        let outcome = task::spawn_blocking(move || apply(&engine, operation))
            .await
            .map_err(|e| SyncError::Query {
                table,
                reason: format!("operation task failed: {}", e),
            })??;
        info!("{}", outcome);
        Ok(outcome)
    }
}
