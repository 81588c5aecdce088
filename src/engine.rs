//! Pooled SQLite connection handle with a reflected-schema cache.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{backend, SyncError, SyncResult};
use crate::schema::{ColumnType, ReflectedColumn, TableSchema};

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

/// Shared handle to a SQLite database.
///
/// Owns a small pool of connections and caches each table's reflected
/// schema until this crate's own DDL touches the table. Created once by
/// the caller and passed by reference into every operation.
pub struct Engine {
    config: EngineConfig,
    pool: Mutex<PoolState>,
    available: Condvar,
    schemas: Mutex<HashMap<String, Arc<TableSchema>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("db_path", &self.config.db_path)
            .field("max_connections", &self.config.effective_max_connections())
            .finish()
    }
}

impl Engine {
    /// Opens the database, failing fast if it cannot be reached.
    pub fn open(config: EngineConfig) -> SyncResult<Self> {
        let first = connect(&config)?;
        debug!(db_path = %config.db_path, "engine opened");
        Ok(Self {
            config,
            pool: Mutex::new(PoolState {
                idle: vec![first],
                open: 1,
            }),
            available: Condvar::new(),
            schemas: Mutex::new(HashMap::new()),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> SyncResult<Self> {
        Self::open(EngineConfig::in_memory())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock_pool(&self) -> SyncResult<MutexGuard<'_, PoolState>> {
        self.pool
            .lock()
            .map_err(|_| SyncError::connection("connection pool poisoned"))
    }

    /// Takes a connection from the pool, opening a new one while below the
    /// configured limit and otherwise waiting for one to be returned.
    pub fn acquire(&self) -> SyncResult<PooledConnection<'_>> {
        let deadline = self.config.acquire_timeout().map(|t| Instant::now() + t);
        let mut state = self.lock_pool()?;
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection::new(self, conn));
            }
            if state.open < self.config.effective_max_connections() {
                state.open += 1;
                drop(state);
                return match connect(&self.config) {
                    Ok(conn) => Ok(PooledConnection::new(self, conn)),
                    Err(err) => {
                        if let Ok(mut state) = self.pool.lock() {
                            state.open -= 1;
                        }
                        self.available.notify_one();
                        Err(err)
                    }
                };
            }
            state = match deadline {
                None => self
                    .available
                    .wait(state)
                    .map_err(|_| SyncError::connection("connection pool poisoned"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SyncError::connection(format!(
                            "no connection available within {} ms",
                            self.config.acquire_timeout_ms.unwrap_or_default()
                        )));
                    }
                    self.available
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| SyncError::connection("connection pool poisoned"))?
                        .0
                }
            };
        }
    }

    fn release(&self, conn: Connection) {
        match self.pool.lock() {
            Ok(mut state) => state.idle.push(conn),
            Err(_) => warn!("dropping connection returned to a poisoned pool"),
        }
        self.available.notify_one();
    }

    /// Returns the cached schema of `table`, reflecting it on a miss.
    pub(crate) fn table_schema(&self, conn: &Connection, table: &str) -> SyncResult<Arc<TableSchema>> {
        if let Some(schema) = self.cached_schema(table) {
            return Ok(schema);
        }
        let schema = Arc::new(reflect(conn, table)?.ok_or_else(|| SyncError::table_not_found(table))?);
        if let Ok(mut schemas) = self.schemas.lock() {
            schemas.insert(table.to_string(), Arc::clone(&schema));
        }
        Ok(schema)
    }

    /// Schema of `table` if it is currently cached.
    pub fn cached_schema(&self, table: &str) -> Option<Arc<TableSchema>> {
        self.schemas.lock().ok()?.get(table).cloned()
    }

    /// Drops the cached schema of `table`. Needed after DDL issued outside
    /// this crate.
    pub fn invalidate_schema(&self, table: &str) {
        if let Ok(mut schemas) = self.schemas.lock() {
            if schemas.remove(table).is_some() {
                debug!(table, "schema cache invalidated");
            }
        }
    }

    pub fn clear_schema_cache(&self) {
        if let Ok(mut schemas) = self.schemas.lock() {
            schemas.clear();
        }
    }
}

fn connect(config: &EngineConfig) -> SyncResult<Connection> {
    let conn = if config.is_memory() {
        Connection::open_in_memory()
    } else {
        Connection::open(&config.db_path)
    }
    .map_err(|e| SyncError::connection(format!("cannot open `{}`: {}", config.db_path, e)))?;
    conn.busy_timeout(config.busy_timeout())
        .map_err(|e| SyncError::connection(format!("cannot configure `{}`: {}", config.db_path, e)))?;
    Ok(conn)
}

/// Reads a table's live schema; `None` when the table does not exist.
pub(crate) fn reflect(conn: &Connection, table: &str) -> SyncResult<Option<TableSchema>> {
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(backend(table))?;
    let columns = stmt
        .query_map([table], |row| {
            let declared_type: String = row.get(1)?;
            Ok(ReflectedColumn {
                name: row.get(0)?,
                column_type: ColumnType::from_declared_lossy(&declared_type),
                declared_type,
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? != 0,
            })
        })
        .map_err(backend(table))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(backend(table))?;

    if columns.is_empty() {
        return Ok(None);
    }
    Ok(Some(TableSchema {
        name: table.to_string(),
        columns,
    }))
}

/// Connection checked out of an [`Engine`]; returned to the pool on drop.
pub struct PooledConnection<'a> {
    engine: &'a Engine,
    conn: Option<Connection>,
}

impl<'a> PooledConnection<'a> {
    fn new(engine: &'a Engine, conn: Connection) -> Self {
        Self {
            engine,
            conn: Some(conn),
        }
    }
}

impl std::fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.engine.release(conn);
        }
    }
}
