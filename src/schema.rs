//! Column types, declarative table definitions and reflected table schemas.
//!
//! [`ColumnType`] carries the type mapping between declared SQL types and
//! [`Value`](crate::Value) variants. Declarations are rendered for SQLite and
//! parsed back from `PRAGMA table_info`; MySQL-style spellings are accepted
//! on input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::sql::{quote_ident, quote_literal};

/// Declared type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    /// Bit field; `Bit(1)` maps to a boolean.
    Bit(u32),
    Boolean,
    Char(u32),
    Varchar(u32),
    /// Unbounded text.
    Text,
    Binary(u32),
    Varbinary(u32),
    /// Unbounded binary.
    Blob,
    Date,
    DateTime,
    Timestamp,
    Time,
    Year,
    /// Text constrained to a declared value set. An empty set is
    /// unconstrained (reflected tables do not expose the set).
    Enum(Vec<String>),
    /// Comma-joined members of a declared value set.
    Set(Vec<String>),
    /// Serialized JSON, stored and returned as text.
    Json,
}

impl Default for ColumnType {
    fn default() -> Self {
        ColumnType::Varchar(255)
    }
}

impl ColumnType {
    /// Integer-backed types, including flags.
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            ColumnType::TinyInt
                | ColumnType::SmallInt
                | ColumnType::MediumInt
                | ColumnType::Int
                | ColumnType::BigInt
                | ColumnType::Year
                | ColumnType::Bit(_)
                | ColumnType::Boolean
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::TinyInt
                | ColumnType::SmallInt
                | ColumnType::MediumInt
                | ColumnType::Int
                | ColumnType::BigInt
                | ColumnType::Year
                | ColumnType::Float
                | ColumnType::Double
                | ColumnType::Decimal { .. }
        )
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ColumnType::Char(_)
                | ColumnType::Varchar(_)
                | ColumnType::Text
                | ColumnType::Enum(_)
                | ColumnType::Set(_)
                | ColumnType::Json
        )
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            ColumnType::Binary(_) | ColumnType::Varbinary(_) | ColumnType::Blob
        )
    }

    /// Renders the column clause `"name" TYPE [CHECK (...)]`.
    ///
    /// Enumerated columns get a CHECK constraint restricting them to the
    /// declared value set.
    pub fn column_sql(&self, name: &str) -> String {
        let quoted = quote_ident(name);
        match self {
            ColumnType::Enum(values) if !values.is_empty() => {
                let allowed: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
                format!(
                    "{} {} CHECK ({} IN ({}))",
                    quoted,
                    self,
                    quoted,
                    allowed.join(", ")
                )
            }
            _ => format!("{} {}", quoted, self),
        }
    }

    /// Maps a declaration that is not recognized onto the closest type
    /// using SQLite's affinity rules.
    pub fn from_declared_lossy(declared: &str) -> ColumnType {
        if let Ok(parsed) = declared.parse() {
            return parsed;
        }
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            ColumnType::BigInt
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::Text
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            ColumnType::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ColumnType::Double
        } else {
            ColumnType::Decimal {
                precision: 38,
                scale: 0,
            }
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::TinyInt => write!(f, "TINYINT"),
            ColumnType::SmallInt => write!(f, "SMALLINT"),
            ColumnType::MediumInt => write!(f, "MEDIUMINT"),
            ColumnType::Int => write!(f, "INT"),
            ColumnType::BigInt => write!(f, "BIGINT"),
            ColumnType::Float => write!(f, "FLOAT"),
            ColumnType::Double => write!(f, "DOUBLE"),
            ColumnType::Decimal { precision, scale } => write!(f, "DECIMAL({},{})", precision, scale),
            ColumnType::Bit(n) => write!(f, "BIT({})", n),
            ColumnType::Boolean => write!(f, "BOOLEAN"),
            ColumnType::Char(n) => write!(f, "CHAR({})", n),
            ColumnType::Varchar(n) => write!(f, "VARCHAR({})", n),
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::Binary(n) => write!(f, "BINARY({})", n),
            ColumnType::Varbinary(n) => write!(f, "VARBINARY({})", n),
            ColumnType::Blob => write!(f, "BLOB"),
            ColumnType::Date => write!(f, "DATE"),
            ColumnType::DateTime => write!(f, "DATETIME"),
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
            ColumnType::Time => write!(f, "TIME"),
            ColumnType::Year => write!(f, "YEAR"),
            // SQLite type names cannot carry string arguments, and the
            // TEXT suffix keeps text affinity.
            ColumnType::Enum(_) => write!(f, "ENUM_TEXT"),
            ColumnType::Set(_) => write!(f, "SET_TEXT"),
            // A bare JSON declaration has NUMERIC affinity.
            ColumnType::Json => write!(f, "JSON_TEXT"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || SyncError::UnsupportedType(s.to_string());
        let trimmed = s.trim();
        let (name, args) = match trimmed.find('(') {
            Some(open) => {
                let close = trimmed.rfind(')').ok_or_else(unsupported)?;
                if close < open || !trimmed[close + 1..].trim().is_empty() {
                    return Err(unsupported());
                }
                (trimmed[..open].trim(), Some(&trimmed[open + 1..close]))
            }
            None => (trimmed, None),
        };
        let name = name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        let name = name.trim_end_matches(" UNSIGNED");

        let numbers = |expected: usize| -> SyncResult<Vec<u32>> {
            let parsed: Vec<u32> = match args {
                Some(a) => a
                    .split(',')
                    .map(|p| p.trim().parse::<u32>().map_err(|_| unsupported()))
                    .collect::<SyncResult<_>>()?,
                None => Vec::new(),
            };
            if parsed.len() > expected {
                return Err(unsupported());
            }
            Ok(parsed)
        };
        let length = |default: u32| -> SyncResult<u32> {
            Ok(numbers(1)?.first().copied().unwrap_or(default))
        };

        let column_type = match name {
            "TINYINT" => ColumnType::TinyInt,
            "SMALLINT" => ColumnType::SmallInt,
            "MEDIUMINT" => ColumnType::MediumInt,
            "INT" | "INTEGER" => ColumnType::Int,
            "BIGINT" => ColumnType::BigInt,
            "FLOAT" | "REAL" => ColumnType::Float,
            "DOUBLE" | "DOUBLE PRECISION" => ColumnType::Double,
            "DECIMAL" | "NUMERIC" | "DEC" => {
                let parts = numbers(2)?;
                let precision = parts.first().copied().unwrap_or(10);
                let scale = parts.get(1).copied().unwrap_or(0);
                if precision == 0 || precision > 38 || scale > precision {
                    return Err(unsupported());
                }
                ColumnType::Decimal {
                    precision: precision as u8,
                    scale: scale as u8,
                }
            }
            "BIT" => ColumnType::Bit(length(1)?),
            "BOOL" | "BOOLEAN" => ColumnType::Boolean,
            "CHAR" | "CHARACTER" => ColumnType::Char(length(1)?),
            "VARCHAR" | "CHARACTER VARYING" => ColumnType::Varchar(length(255)?),
            "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "CLOB" => ColumnType::Text,
            "BINARY" => ColumnType::Binary(length(1)?),
            "VARBINARY" => ColumnType::Varbinary(length(255)?),
            "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => ColumnType::Blob,
            "DATE" => ColumnType::Date,
            "DATETIME" => ColumnType::DateTime,
            "TIMESTAMP" => ColumnType::Timestamp,
            "TIME" => ColumnType::Time,
            "YEAR" => ColumnType::Year,
            "ENUM" => ColumnType::Enum(parse_value_list(args.unwrap_or("")).ok_or_else(unsupported)?),
            "ENUM_TEXT" => ColumnType::Enum(Vec::new()),
            "SET" => ColumnType::Set(parse_value_list(args.unwrap_or("")).ok_or_else(unsupported)?),
            "SET_TEXT" => ColumnType::Set(Vec::new()),
            "JSON" | "JSON_TEXT" => ColumnType::Json,
            _ => return Err(unsupported()),
        };

        let takes_args = matches!(
            name,
            "DECIMAL" | "NUMERIC" | "DEC" | "BIT" | "CHAR" | "CHARACTER" | "VARCHAR"
                | "CHARACTER VARYING" | "BINARY" | "VARBINARY" | "ENUM" | "SET"
        );
        // Integer widths such as INT(11) are display hints only.
        let display_width = matches!(
            name,
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT"
        );
        match args {
            None => Ok(column_type),
            Some(_) if takes_args => Ok(column_type),
            Some(a) if display_width && a.trim().parse::<u32>().is_ok() => Ok(column_type),
            Some(_) => Err(unsupported()),
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        match &value {
            ColumnType::Enum(values) if !values.is_empty() => {
                format!("ENUM({})", quote_values(values))
            }
            ColumnType::Set(values) if !values.is_empty() => {
                format!("SET({})", quote_values(values))
            }
            ColumnType::Json => "JSON".to_string(),
            other => other.to_string(),
        }
    }
}

fn quote_values(values: &[String]) -> String {
    values
        .iter()
        .map(|v| quote_literal(v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses `'a','b','it''s'` into its members.
fn parse_value_list(args: &str) -> Option<Vec<String>> {
    let mut values = Vec::new();
    let mut chars = args.trim().chars().peekable();
    while chars.peek().is_some() {
        if chars.next()? != '\'' {
            return None;
        }
        let mut value = String::new();
        loop {
            match chars.next()? {
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    value.push('\'');
                }
                '\'' => break,
                c => value.push(c),
            }
        }
        values.push(value);
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some(',') => {
                while chars.peek().map_or(false, |c| c.is_whitespace()) {
                    chars.next();
                }
            }
            Some(_) => return None,
        }
    }
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// A named, typed column of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Declarative definition of a table, provisioned with
/// [`ensure_table`](crate::sync::ensure_table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    /// Composite primary key; leave empty when a column carries
    /// [`ColumnConstraint::PrimaryKey`].
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this definition.
    pub fn create_sql(&self) -> String {
        let mut clauses: Vec<String> = self.columns.iter().map(ColumnDefinition::sql).collect();
        if !self.primary_key.is_empty() {
            let keys: Vec<String> = self.primary_key.iter().map(|k| quote_ident(k)).collect();
            clauses.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            clauses.join(", ")
        )
    }

    /// `CREATE INDEX IF NOT EXISTS` statements for this definition.
    pub fn index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|index| {
                let columns: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
                format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    quote_ident(&index.name),
                    quote_ident(&self.name),
                    columns.join(", ")
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: ColumnType,
    #[serde(default)]
    pub constraints: Vec<ColumnConstraint>,
    #[serde(default)]
    pub default_value: Option<DefaultValue>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
            default_value: None,
        }
    }

    pub fn with_constraint(mut self, constraint: ColumnConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_default(mut self, default_value: DefaultValue) -> Self {
        self.default_value = Some(default_value);
        self
    }

    fn sql(&self) -> String {
        let mut sql = self.data_type.column_sql(&self.name);
        for constraint in &self.constraints {
            sql.push_str(match constraint {
                ColumnConstraint::PrimaryKey => " PRIMARY KEY",
                ColumnConstraint::NotNull => " NOT NULL",
                ColumnConstraint::Unique => " UNIQUE",
            });
        }
        if let Some(default_value) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default_value.sql());
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnConstraint {
    PrimaryKey,
    NotNull,
    Unique,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
    Real(f64),
    Null,
    CurrentTimestamp,
}

impl DefaultValue {
    fn sql(&self) -> String {
        match self {
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Text(s) => quote_literal(s),
            DefaultValue::Real(f) => format!("({})", f),
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new<S: Into<String>>(name: impl Into<String>, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A column as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedColumn {
    pub name: String,
    /// Declaration text exactly as stored by the backend.
    pub declared_type: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    pub primary_key: bool,
}

/// Live schema of a table, cached per engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ReflectedColumn>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ReflectedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Fails with `SchemaMismatch` on the first name the table lacks.
    pub fn require_columns<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> SyncResult<()> {
        for name in names {
            if !self.contains(name) {
                return Err(SyncError::mismatch(&self.name, name));
            }
        }
        Ok(())
    }
}
