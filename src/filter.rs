//! Conjunctive equality filters used to select rows.

use crate::sql::quote_ident;
use crate::value::Value;

/// Column-to-value equality conditions, AND-ed together.
///
/// Comparison is null-safe: a `Value::Null` condition matches NULL cells.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RowFilter {
    conditions: Vec<(String, Value)>,
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition, replacing any earlier one on the same column.
    pub fn with_condition(mut self, column: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.conditions.iter_mut().find(|(c, _)| c == column) {
            Some(existing) => existing.1 = value,
            None => self.conditions.push((column.to_string(), value)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.conditions.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Renders `"a" IS ?n AND "b" IS ?n+1` with placeholders numbered from
    /// `first_param`, returning the values to bind in order.
    pub(crate) fn where_clause(&self, first_param: usize) -> (String, Vec<Value>) {
        let clause = self
            .conditions
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} IS ?{}", quote_ident(column), first_param + i))
            .collect::<Vec<_>>()
            .join(" AND ");
        let params = self.conditions.iter().map(|(_, v)| v.clone()).collect();
        (clause, params)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for RowFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter().fold(RowFilter::new(), |filter, (column, value)| {
            let column: String = column.into();
            filter.with_condition(&column, value)
        })
    }
}
