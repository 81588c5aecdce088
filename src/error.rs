//! Error types for the tabular sync layer.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse error taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Backend unreachable, cannot be opened, or no connection available.
    Connection,
    /// Table or column missing, or a value/type does not fit the schema.
    Schema,
    /// The object being created already exists.
    Duplicate,
    /// The backend rejected a row.
    Constraint,
    /// Malformed statement or filter expression.
    Query,
}

/// Errors produced by the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Opening or acquiring a connection failed.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// Table-level schema problem.
    #[error("schema error on `{table}`: {reason}")]
    Schema {
        /// Table the operation targeted.
        table: String,
        /// Description of the problem.
        reason: String,
    },

    /// A dataset column has no matching table column.
    #[error("schema mismatch: table `{table}` has no column `{column}`")]
    SchemaMismatch {
        /// Target table.
        table: String,
        /// Column missing from the table.
        column: String,
    },

    /// A value does not fit its declared column type.
    #[error("type mismatch in column `{column}`: expected {expected}, found {found}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Declared type.
        expected: String,
        /// Kind of value supplied.
        found: String,
    },

    /// A dataset is malformed (duplicate columns, wrong arity, ...).
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    /// A column type declaration could not be parsed.
    #[error("unsupported column type `{0}`")]
    UnsupportedType(String),

    /// Object already exists.
    #[error("duplicate on `{table}`: {reason}")]
    Duplicate {
        /// Target table.
        table: String,
        /// Description from the backend.
        reason: String,
    },

    /// Backend constraint violation.
    #[error("constraint violated on `{table}`: {reason}")]
    Constraint {
        /// Target table.
        table: String,
        /// Description from the backend.
        reason: String,
    },

    /// Statement rejected for any other reason.
    #[error("query error on `{table}`: {reason}")]
    Query {
        /// Target table.
        table: String,
        /// Description from the backend.
        reason: String,
    },
}

impl SyncError {
    pub(crate) fn connection(message: impl Into<String>) -> Self {
        SyncError::Connection {
            message: message.into(),
        }
    }

    pub(crate) fn schema(table: &str, reason: impl Into<String>) -> Self {
        SyncError::Schema {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn table_not_found(table: &str) -> Self {
        Self::schema(table, "no such table")
    }

    pub(crate) fn mismatch(table: &str, column: &str) -> Self {
        SyncError::SchemaMismatch {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Connection { .. } => ErrorKind::Connection,
            SyncError::Schema { .. }
            | SyncError::SchemaMismatch { .. }
            | SyncError::TypeMismatch { .. }
            | SyncError::InvalidDataset(_)
            | SyncError::UnsupportedType(_) => ErrorKind::Schema,
            SyncError::Duplicate { .. } => ErrorKind::Duplicate,
            SyncError::Constraint { .. } => ErrorKind::Constraint,
            SyncError::Query { .. } => ErrorKind::Query,
        }
    }

    /// Classifies a backend error raised while operating on `table`.
    pub fn from_backend(table: &str, err: rusqlite::Error) -> Self {
        let (code, message) = match &err {
            rusqlite::Error::SqliteFailure(failure, message) => (
                Some(failure.code),
                message.clone().unwrap_or_else(|| failure.to_string()),
            ),
            other => (None, other.to_string()),
        };

        match code {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::PermissionDenied
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure,
            ) => {
                return SyncError::connection(format!("`{}`: {}", table, message));
            }
            Some(ErrorCode::ConstraintViolation) => {
                return SyncError::Constraint {
                    table: table.to_string(),
                    reason: message,
                };
            }
            _ => {}
        }

        let lowered = message.to_ascii_lowercase();
        if lowered.contains("duplicate column") || lowered.contains("already exists") {
            SyncError::Duplicate {
                table: table.to_string(),
                reason: message,
            }
        } else if lowered.contains("no such table")
            || lowered.contains("no such column")
            || lowered.contains("has no column named")
        {
            SyncError::Schema {
                table: table.to_string(),
                reason: message,
            }
        } else {
            SyncError::Query {
                table: table.to_string(),
                reason: message,
            }
        }
    }
}

/// Maps backend errors for a given table; used with `map_err`.
pub(crate) fn backend(table: &str) -> impl Fn(rusqlite::Error) -> SyncError + '_ {
    move |err| SyncError::from_backend(table, err)
}
