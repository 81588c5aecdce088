//! Engine and service configuration.
//!
//! Configuration is always passed explicitly; nothing is read from the
//! process environment.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::schema::TableDefinition;

/// Path that selects a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Connection settings for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the SQLite database file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Upper bound on pooled connections. In-memory databases always use a
    /// single connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long SQLite retries a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// How long to wait for a free pooled connection. `None` waits
    /// indefinitely.
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,
}

fn default_db_path() -> String {
    MEMORY_PATH.to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            acquire_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Config for a database file at `db_path`.
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Config for a private in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn is_memory(&self) -> bool {
        self.db_path == MEMORY_PATH
    }

    /// Pool size actually used.
    pub fn effective_max_connections(&self) -> usize {
        if self.is_memory() {
            1
        } else {
            self.max_connections.max(1)
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid engine configuration")
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content)
    }
}

/// Configuration of a [`SqliteService`](crate::SqliteService).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Tables provisioned when the service starts.
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

impl ServiceConfig {
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            tables: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid service configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnConstraint, ColumnType};

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config = EngineConfig::from_toml_str("db_path = \"data.db\"").unwrap();
        assert_eq!(config.db_path, "data.db");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.acquire_timeout(), None);
        assert!(!config.is_memory());
    }

    #[test]
    fn memory_database_uses_one_connection() {
        let config = EngineConfig::in_memory().with_max_connections(8);
        assert_eq!(config.effective_max_connections(), 1);
    }

    #[test]
    fn service_config_declares_tables() {
        let config = ServiceConfig::from_toml_str(
            r#"
            [engine]
            db_path = ":memory:"
            acquire_timeout_ms = 250

            [[tables]]
            name = "users"
            primary_key = ["id"]

            [[tables.columns]]
            name = "id"
            data_type = "INT"

            [[tables.columns]]
            name = "email"
            data_type = "VARCHAR(255)"
            constraints = ["not_null", "unique"]
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.acquire_timeout(), Some(Duration::from_millis(250)));
        let users = &config.tables[0];
        assert_eq!(users.name, "users");
        assert_eq!(users.primary_key, vec!["id".to_string()]);
        assert_eq!(users.columns[1].data_type, ColumnType::Varchar(255));
        assert_eq!(
            users.columns[1].constraints,
            vec![ColumnConstraint::NotNull, ColumnConstraint::Unique]
        );
    }

    #[test]
    fn unknown_column_type_is_rejected() {
        let err = ServiceConfig::from_toml_str(
            r#"
            [[tables]]
            name = "t"
            [[tables.columns]]
            name = "g"
            data_type = "GEOMETRY"
            "#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("GEOMETRY"));
    }
}
