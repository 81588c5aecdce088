//! Tabular dataset operations against relational tables.
//!
//! Every function takes the caller's [`Engine`], checks a connection out for
//! the duration of the call and runs at most one transaction. Outcomes are
//! logged through `tracing`; failures are returned as [`SyncError`].
//!
//! Table and column names are quoted but otherwise trusted: callers decide
//! which objects they touch. Values are always bound as parameters.

use std::fmt;

use rusqlite::{params_from_iter, Connection, Transaction, TransactionBehavior};
use tracing::{debug, error, info, warn};

use crate::dataset::{infer_column_type, Dataset};
use crate::engine::Engine;
use crate::error::{backend, SyncError, SyncResult};
use crate::filter::RowFilter;
use crate::schema::{Column, ColumnType, TableDefinition};
use crate::sql::{quote_ident, SqlQuery};
use crate::value::Value;

/// What [`create_or_replace_table`] does when the table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IfExists {
    /// Drop and recreate the table from the dataset schema.
    #[default]
    Replace,
    /// Append to the existing table, which must already exist.
    Append,
    /// Fail with a duplicate error.
    Fail,
}

impl fmt::Display for IfExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IfExists::Replace => write!(f, "replace"),
            IfExists::Append => write!(f, "append"),
            IfExists::Fail => write!(f, "fail"),
        }
    }
}

/// Projection, filtering and paging for [`fetch_as_dataset`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FetchRequest {
    /// Columns to return; all columns when `None`.
    pub columns: Option<Vec<String>>,
    /// Backend-native filter expression appended verbatim after `WHERE`.
    ///
    /// This text is not parsed, escaped or validated. It must come from a
    /// trusted source; use [`FetchRequest::filter`] for caller-supplied
    /// values.
    pub where_expression: Option<String>,
    /// Parameterized equality filter, AND-ed with `where_expression`.
    pub filter: RowFilter,
    /// `(column, ascending)` pairs.
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl FetchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn where_expression(mut self, expression: impl Into<String>) -> Self {
        self.where_expression = Some(expression.into());
        self
    }

    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by.push((column.into(), ascending));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    fn to_query(&self, table: &str) -> SqlQuery {
        let projection = match &self.columns {
            Some(columns) if !columns.is_empty() => columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_string(),
        };
        let mut statement = format!("SELECT {} FROM {}", projection, quote_ident(table));

        let mut conditions = Vec::new();
        if let Some(expression) = &self.where_expression {
            conditions.push(format!("({})", expression));
        }
        let (clause, params) = self.filter.where_clause(1);
        if !self.filter.is_empty() {
            conditions.push(clause);
        }
        if !conditions.is_empty() {
            statement.push_str(" WHERE ");
            statement.push_str(&conditions.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let order: Vec<String> = self
                .order_by
                .iter()
                .map(|(c, asc)| format!("{} {}", quote_ident(c), if *asc { "ASC" } else { "DESC" }))
                .collect();
            statement.push_str(" ORDER BY ");
            statement.push_str(&order.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => statement.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => statement.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => statement.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
        SqlQuery::new(statement).with_params(params)
    }
}

/// Starts a write transaction holding the database's reserved lock.
fn begin<'c>(conn: &'c mut Connection, table: &str) -> SyncResult<Transaction<'c>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(backend(table))
}

fn exists_in(conn: &Connection, table: &str) -> SyncResult<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get::<_, bool>(0),
    )
    .map_err(backend(table))
}

fn insert_all(conn: &Connection, dataset: &Dataset, table: &str) -> SyncResult<usize> {
    if dataset.is_empty() {
        return Ok(0);
    }
    let names: Vec<&str> = dataset.column_names().collect();
    let query = SqlQuery::insert(table, &names);
    debug!(statement = %query.statement, rows = dataset.len(), "insert");
    let mut stmt = conn.prepare(&query.statement).map_err(backend(table))?;
    let mut written = 0;
    for row in dataset.raw_rows() {
        written += stmt.execute(params_from_iter(row.iter())).map_err(backend(table))?;
    }
    Ok(written)
}

fn run(conn: &Connection, table: &str, query: &SqlQuery) -> SyncResult<usize> {
    debug!(statement = %query.statement, "execute");
    conn.execute(&query.statement, params_from_iter(query.params.iter()))
        .map_err(backend(table))
}

/// Writes `dataset` to `table`, creating or replacing the table as `mode`
/// directs. Returns the number of rows written.
///
/// The schema change and the load share one transaction, so a failure
/// leaves the previous table (or no table) in place.
pub fn create_or_replace_table(
    engine: &Engine,
    dataset: &Dataset,
    table: &str,
    mode: IfExists,
) -> SyncResult<usize> {
    let result = create_or_replace_inner(engine, dataset, table, mode);
    match &result {
        Ok(rows) => info!(table, %mode, rows, "table written"),
        Err(err) => error!(table, %mode, error = %err, "failed to write table"),
    }
    result
}

fn create_or_replace_inner(
    engine: &Engine,
    dataset: &Dataset,
    table: &str,
    mode: IfExists,
) -> SyncResult<usize> {
    if dataset.columns().is_empty() {
        return Err(SyncError::schema(table, "cannot derive a schema from a dataset without columns"));
    }
    let mut conn = engine.acquire()?;
    let tx = begin(&mut conn, table)?;
    let exists = exists_in(&tx, table)?;

    let create = match (mode, exists) {
        (IfExists::Replace, true) => {
            run(&tx, table, &SqlQuery::drop_table(table))?;
            true
        }
        (IfExists::Fail, true) => {
            return Err(SyncError::Duplicate {
                table: table.to_string(),
                reason: "table already exists".to_string(),
            });
        }
        (IfExists::Append, false) => return Err(SyncError::table_not_found(table)),
        (IfExists::Append, true) => {
            let schema = engine.table_schema(&tx, table)?;
            schema.require_columns(dataset.column_names())?;
            false
        }
        (_, false) => true,
    };
    if create {
        engine.invalidate_schema(table);
        run(&tx, table, &SqlQuery::create_table(table, dataset.columns()))?;
    }

    let written = insert_all(&tx, dataset, table)?;
    tx.commit().map_err(backend(table))?;
    if create {
        engine.invalidate_schema(table);
    }
    Ok(written)
}

/// Appends every dataset row to an existing table, matching columns by
/// name. All rows commit together or not at all.
pub fn insert_rows(engine: &Engine, dataset: &Dataset, table: &str) -> SyncResult<usize> {
    let result = insert_inner(engine, dataset, table);
    match &result {
        Ok(rows) => info!(table, rows, "inserted rows"),
        Err(err) => error!(table, error = %err, "failed to insert rows"),
    }
    result
}

fn insert_inner(engine: &Engine, dataset: &Dataset, table: &str) -> SyncResult<usize> {
    let mut conn = engine.acquire()?;
    let schema = engine.table_schema(&conn, table)?;
    schema.require_columns(dataset.column_names())?;
    let tx = begin(&mut conn, table)?;
    let written = insert_all(&tx, dataset, table)?;
    tx.commit().map_err(backend(table))?;
    Ok(written)
}

/// Updates existing rows from `dataset`, matching on `match_columns`.
///
/// This is update-only. Dataset rows that match nothing are skipped and are
/// not inserted. Every non-key dataset column is assigned on each matching
/// row; when key values are not unique, all matching rows receive the same
/// values. Returns the total number of table rows modified, which can
/// differ from the number of dataset rows.
pub fn upsert_by_key<S: AsRef<str>>(
    engine: &Engine,
    dataset: &Dataset,
    table: &str,
    match_columns: &[S],
) -> SyncResult<usize> {
    let result = upsert_inner(engine, dataset, table, match_columns);
    match &result {
        Ok(0) => warn!(table, "no rows matched for update"),
        Ok(rows) => info!(table, rows, "updated rows"),
        Err(err) => error!(table, error = %err, "failed to update rows"),
    }
    result
}

fn upsert_inner<S: AsRef<str>>(
    engine: &Engine,
    dataset: &Dataset,
    table: &str,
    match_columns: &[S],
) -> SyncResult<usize> {
    if match_columns.is_empty() {
        return Err(SyncError::schema(table, "at least one match column is required"));
    }
    let keys: Vec<&str> = match_columns.iter().map(AsRef::as_ref).collect();
    let key_positions = keys
        .iter()
        .map(|k| {
            dataset.column_index(k).ok_or_else(|| {
                SyncError::InvalidDataset(format!("match column `{}` is not in the dataset", k))
            })
        })
        .collect::<SyncResult<Vec<_>>>()?;
    let set_positions: Vec<usize> = (0..dataset.columns().len())
        .filter(|i| !key_positions.contains(i))
        .collect();

    let mut conn = engine.acquire()?;
    let schema = engine.table_schema(&conn, table)?;
    schema.require_columns(dataset.column_names())?;
    if set_positions.is_empty() || dataset.is_empty() {
        return Ok(0);
    }

    let set_names: Vec<&str> = set_positions
        .iter()
        .map(|&i| dataset.columns()[i].name.as_str())
        .collect();
    let query = SqlQuery::update_by_key(table, &set_names, &keys);
    debug!(statement = %query.statement, rows = dataset.len(), "update by key");

    let tx = begin(&mut conn, table)?;
    let mut modified = 0;
    {
        let mut stmt = tx.prepare(&query.statement).map_err(backend(table))?;
        for row in dataset.raw_rows() {
            let params = set_positions
                .iter()
                .chain(key_positions.iter())
                .map(|&i| &row[i]);
            modified += stmt.execute(params_from_iter(params)).map_err(backend(table))?;
        }
    }
    tx.commit().map_err(backend(table))?;
    Ok(modified)
}

/// Sets `column` to `value` on every row matching `row_filter`.
///
/// Returns whether any row was affected. An empty filter matches nothing.
pub fn update_cell(
    engine: &Engine,
    table: &str,
    row_filter: &RowFilter,
    column: &str,
    value: impl Into<Value>,
) -> SyncResult<bool> {
    let value = value.into();
    let result = update_cell_inner(engine, table, row_filter, column, &value);
    match &result {
        Ok(0) => warn!(table, column, "no rows matched for cell update"),
        Ok(rows) => info!(table, column, value = %value, rows, "updated cell"),
        Err(err) => error!(table, column, error = %err, "failed to update cell"),
    }
    result.map(|changed| changed > 0)
}

fn update_cell_inner(
    engine: &Engine,
    table: &str,
    row_filter: &RowFilter,
    column: &str,
    value: &Value,
) -> SyncResult<usize> {
    let mut conn = engine.acquire()?;
    let schema = engine.table_schema(&conn, table)?;
    schema.require_columns(std::iter::once(column).chain(row_filter.columns()))?;
    if row_filter.is_empty() {
        return Ok(0);
    }
    let tx = begin(&mut conn, table)?;
    let changed = run(&tx, table, &SqlQuery::update_where(table, column, value.clone(), row_filter))?;
    tx.commit().map_err(backend(table))?;
    Ok(changed)
}

/// Deletes every row matching `condition` and returns how many went.
///
/// An empty condition matches nothing; clearing a table takes
/// [`drop_table`] or an explicit condition.
pub fn delete_rows(engine: &Engine, table: &str, condition: &RowFilter) -> SyncResult<usize> {
    let result = delete_inner(engine, table, condition);
    match &result {
        Ok(0) if condition.is_empty() => warn!(table, "empty delete condition matches no rows"),
        Ok(rows) => info!(table, rows, "deleted rows"),
        Err(err) => error!(table, error = %err, "failed to delete rows"),
    }
    result
}

fn delete_inner(engine: &Engine, table: &str, condition: &RowFilter) -> SyncResult<usize> {
    let mut conn = engine.acquire()?;
    let schema = engine.table_schema(&conn, table)?;
    schema.require_columns(condition.columns())?;
    if condition.is_empty() {
        return Ok(0);
    }
    let tx = begin(&mut conn, table)?;
    let deleted = run(&tx, table, &SqlQuery::delete_where(table, condition))?;
    tx.commit().map_err(backend(table))?;
    Ok(deleted)
}

/// Deletes the rows whose `key_column` is one of `keys`.
///
/// Keys that match nothing are not an error; the returned count can be
/// lower than `keys.len()`.
pub fn delete_by_keys(engine: &Engine, table: &str, key_column: &str, keys: &[Value]) -> SyncResult<usize> {
    let result = delete_by_keys_inner(engine, table, key_column, keys);
    match &result {
        Ok(rows) => info!(table, rows, requested = keys.len(), "deleted rows by key"),
        Err(err) => error!(table, error = %err, "failed to delete rows by key"),
    }
    result
}

fn delete_by_keys_inner(engine: &Engine, table: &str, key_column: &str, keys: &[Value]) -> SyncResult<usize> {
    let mut conn = engine.acquire()?;
    let schema = engine.table_schema(&conn, table)?;
    schema.require_columns([key_column])?;
    if keys.is_empty() {
        return Ok(0);
    }
    let query = SqlQuery::delete_by_key(table, key_column);
    debug!(statement = %query.statement, keys = keys.len(), "delete by keys");
    let tx = begin(&mut conn, table)?;
    let mut deleted = 0;
    {
        let mut stmt = tx.prepare(&query.statement).map_err(backend(table))?;
        for key in keys {
            deleted += stmt.execute([key]).map_err(backend(table))?;
        }
    }
    tx.commit().map_err(backend(table))?;
    Ok(deleted)
}

/// Adds one nullable column.
///
/// Not idempotent: adding a column that already exists fails with a
/// duplicate error and leaves the table unchanged.
pub fn add_column(engine: &Engine, table: &str, column: &str, column_type: &ColumnType) -> SyncResult<()> {
    let result = engine.acquire().and_then(|conn| {
        run(&conn, table, &SqlQuery::add_column(table, column, column_type)).map(|_| ())
    });
    engine.invalidate_schema(table);
    match &result {
        Ok(()) => info!(table, column, column_type = %column_type, "added column"),
        Err(err) => error!(table, column, error = %err, "failed to add column"),
    }
    result
}

/// Drops `table` if it exists. Dropping a missing table succeeds.
pub fn drop_table(engine: &Engine, table: &str) -> SyncResult<()> {
    let result = engine
        .acquire()
        .and_then(|conn| run(&conn, table, &SqlQuery::drop_table(table)).map(|_| ()));
    engine.invalidate_schema(table);
    match &result {
        Ok(()) => info!(table, "dropped table"),
        Err(err) => error!(table, error = %err, "failed to drop table"),
    }
    result
}

/// Reads rows of `table` into a new dataset.
///
/// Failures are logged and yield an empty dataset; use
/// [`try_fetch_as_dataset`] to receive the error instead.
pub fn fetch_as_dataset(engine: &Engine, table: &str, request: &FetchRequest) -> Dataset {
    try_fetch_as_dataset(engine, table, request).unwrap_or_default()
}

/// Reads rows of `table` into a new dataset, returning any failure.
///
/// Column values are decoded with the table's declared types, so decimals,
/// dates, times and flags come back as the variants they were written as.
pub fn try_fetch_as_dataset(engine: &Engine, table: &str, request: &FetchRequest) -> SyncResult<Dataset> {
    let result = fetch_inner(engine, table, request);
    match &result {
        Ok(dataset) => info!(table, rows = dataset.len(), "retrieved rows"),
        Err(err) => error!(table, error = %err, "failed to fetch rows"),
    }
    result
}

fn fetch_inner(engine: &Engine, table: &str, request: &FetchRequest) -> SyncResult<Dataset> {
    let conn = engine.acquire()?;
    let schema = engine.table_schema(&conn, table)?;
    let query = request.to_query(table);
    debug!(statement = %query.statement, "select");

    let mut stmt = conn.prepare(&query.statement).map_err(backend(table))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let declared: Vec<Option<ColumnType>> = names
        .iter()
        .map(|n| schema.column(n).map(|c| c.column_type.clone()))
        .collect();

    let mut rows = Vec::new();
    let mut raw = stmt
        .query(params_from_iter(query.params.iter()))
        .map_err(backend(table))?;
    while let Some(row) = raw.next().map_err(backend(table))? {
        let mut values = Vec::with_capacity(names.len());
        for (i, column_type) in declared.iter().enumerate() {
            let cell = row.get_ref(i).map_err(backend(table))?;
            values.push(match column_type {
                Some(ty) => Value::from_column(cell, ty),
                None => Value::from(cell),
            });
        }
        rows.push(values);
    }

    let columns = names
        .into_iter()
        .zip(declared)
        .enumerate()
        .map(|(i, (name, declared))| {
            let column_type = declared
                .or_else(|| infer_column_type(rows.iter().map(|r| &r[i])))
                .unwrap_or(ColumnType::Text);
            Column::new(name, column_type)
        })
        .collect();
    Ok(Dataset::from_parts(columns, rows))
}

/// Whether `table` exists.
pub fn table_exists(engine: &Engine, table: &str) -> SyncResult<bool> {
    let conn = engine.acquire()?;
    exists_in(&conn, table)
}

/// Number of rows currently in `table`.
pub fn count_rows(engine: &Engine, table: &str) -> SyncResult<usize> {
    let conn = engine.acquire()?;
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), [], |row| row.get(0))
        .map_err(backend(table))?;
    Ok(count as usize)
}

/// Creates the table and its indexes unless the table already exists.
/// Returns whether the table was created.
pub fn ensure_table(engine: &Engine, definition: &TableDefinition) -> SyncResult<bool> {
    let table = definition.name.as_str();
    if definition.columns.is_empty() {
        return Err(SyncError::schema(table, "table definition has no columns"));
    }
    let result = ensure_inner(engine, definition);
    engine.invalidate_schema(table);
    match &result {
        Ok(true) => info!(table, "created table"),
        Ok(false) => debug!(table, "table already present"),
        Err(err) => error!(table, error = %err, "failed to provision table"),
    }
    result
}

fn ensure_inner(engine: &Engine, definition: &TableDefinition) -> SyncResult<bool> {
    let table = definition.name.as_str();
    let mut conn = engine.acquire()?;
    let tx = begin(&mut conn, table)?;
    let existed = exists_in(&tx, table)?;
    run(&tx, table, &SqlQuery::new(definition.create_sql()))?;
    for index in definition.index_sql() {
        run(&tx, table, &SqlQuery::new(index))?;
    }
    tx.commit().map_err(backend(table))?;
    Ok(!existed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_request_renders_clauses() {
        let request = FetchRequest::new()
            .columns(["id", "name"])
            .where_expression("age > 30")
            .filter(RowFilter::new().with_condition("org", "acme"))
            .order_by("id", false)
            .limit(10)
            .offset(5);
        let query = request.to_query("users");
        assert_eq!(
            query.statement,
            "SELECT \"id\", \"name\" FROM \"users\" WHERE (age > 30) AND \"org\" IS ?1 \
             ORDER BY \"id\" DESC LIMIT 10 OFFSET 5"
        );
        assert_eq!(query.params, vec![Value::from("acme")]);
    }

    #[test]
    fn default_fetch_selects_everything() {
        assert_eq!(FetchRequest::new().to_query("t").statement, "SELECT * FROM \"t\"");
        assert_eq!(
            FetchRequest::new().offset(3).to_query("t").statement,
            "SELECT * FROM \"t\" LIMIT -1 OFFSET 3"
        );
    }
}
