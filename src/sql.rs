//! Statement text builders.
//!
//! Only identifiers are interpolated into statement text; every value is
//! carried in [`SqlQuery::params`] and bound positionally.

use crate::filter::RowFilter;
use crate::schema::{Column, ColumnType};
use crate::value::Value;

/// Quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal for DDL, where parameters cannot be bound.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SQL statement with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Vec<Value>,
}

impl SqlQuery {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// `INSERT INTO t (a, b) VALUES (?1, ?2)`; values are bound per row.
    pub fn insert<S: AsRef<str>>(table: &str, columns: &[S]) -> Self {
        Self::new(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            quote_list(columns),
            placeholders(columns.len(), 1)
        ))
    }

    /// `UPDATE t SET a = ?1 WHERE k IS ?2`; set values first, then keys.
    pub fn update_by_key<S: AsRef<str>, K: AsRef<str>>(table: &str, set: &[S], keys: &[K]) -> Self {
        let assignments: Vec<String> = set
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", quote_ident(c.as_ref()), i + 1))
            .collect();
        let conditions: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| format!("{} IS ?{}", quote_ident(k.as_ref()), set.len() + i + 1))
            .collect();
        Self::new(format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(table),
            assignments.join(", "),
            conditions.join(" AND ")
        ))
    }

    /// Single assignment on every row matching `filter`.
    pub fn update_where(table: &str, column: &str, value: Value, filter: &RowFilter) -> Self {
        let (clause, mut params) = filter.where_clause(2);
        params.insert(0, value);
        Self::new(format!(
            "UPDATE {} SET {} = ?1 WHERE {}",
            quote_ident(table),
            quote_ident(column),
            clause
        ))
        .with_params(params)
    }

    pub fn delete_where(table: &str, filter: &RowFilter) -> Self {
        let (clause, params) = filter.where_clause(1);
        Self::new(format!("DELETE FROM {} WHERE {}", quote_ident(table), clause)).with_params(params)
    }

    /// `DELETE FROM t WHERE k = ?1`; the key is bound per delete.
    pub fn delete_by_key(table: &str, key_column: &str) -> Self {
        Self::new(format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(table),
            quote_ident(key_column)
        ))
    }

    pub fn create_table(table: &str, columns: &[Column]) -> Self {
        let clauses: Vec<String> = columns
            .iter()
            .map(|c| c.column_type.column_sql(&c.name))
            .collect();
        Self::new(format!(
            "CREATE TABLE {} ({})",
            quote_ident(table),
            clauses.join(", ")
        ))
    }

    pub fn drop_table(table: &str) -> Self {
        Self::new(format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
    }

    pub fn add_column(table: &str, column: &str, column_type: &ColumnType) -> Self {
        Self::new(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            column_type.column_sql(column)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers_and_literals() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn builds_insert() {
        let q = SqlQuery::insert("users", &["id", "name"]);
        assert_eq!(q.statement, "INSERT INTO \"users\" (\"id\", \"name\") VALUES (?1, ?2)");
    }

    #[test]
    fn builds_update_by_key() {
        let q = SqlQuery::update_by_key("users", &["name", "email"], &["id"]);
        assert_eq!(
            q.statement,
            "UPDATE \"users\" SET \"name\" = ?1, \"email\" = ?2 WHERE \"id\" IS ?3"
        );
    }

    #[test]
    fn builds_update_where_with_value_first() {
        let filter = RowFilter::new().with_condition("id", 3).with_condition("org", "x");
        let q = SqlQuery::update_where("users", "email", Value::from("c@x"), &filter);
        assert_eq!(
            q.statement,
            "UPDATE \"users\" SET \"email\" = ?1 WHERE \"id\" IS ?2 AND \"org\" IS ?3"
        );
        assert_eq!(
            q.params,
            vec![Value::from("c@x"), Value::Integer(3), Value::from("x")]
        );
    }

    #[test]
    fn builds_delete_where() {
        let filter = RowFilter::new().with_condition("id", 1);
        let q = SqlQuery::delete_where("users", &filter);
        assert_eq!(q.statement, "DELETE FROM \"users\" WHERE \"id\" IS ?1");
        assert_eq!(q.params, vec![Value::Integer(1)]);
    }
}
