//! In-memory tabular datasets.
//!
//! A [`Dataset`] is a declared list of typed columns plus row-major values.
//! The schema is fixed when the dataset is created; every row pushed
//! afterwards is checked against it.

use std::collections::HashSet;

use crate::error::{SyncError, SyncResult};
use crate::schema::{Column, ColumnType};
use crate::value::{Value, MAX_DECIMAL_SCALE};

/// Ordered rows of uniformly shaped, named fields.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Creates an empty dataset with a declared schema.
    pub fn new(columns: Vec<Column>) -> SyncResult<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if column.name.is_empty() {
                return Err(SyncError::InvalidDataset("empty column name".to_string()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(SyncError::InvalidDataset(format!(
                    "duplicate column `{}`",
                    column.name
                )));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    /// Shorthand for [`Dataset::new`] from `(name, type)` pairs.
    pub fn with_schema<S: Into<String>>(
        columns: impl IntoIterator<Item = (S, ColumnType)>,
    ) -> SyncResult<Self> {
        Self::new(
            columns
                .into_iter()
                .map(|(name, ty)| Column::new(name, ty))
                .collect(),
        )
    }

    /// Builds a dataset from records of `(column, value)` pairs.
    ///
    /// The first record fixes the column order. Each column's type is taken
    /// from its first non-null value, falling back to `TEXT` when a column
    /// holds only nulls. Decimal columns take the widest scale present. Later records must name exactly the same columns,
    /// in any order.
    pub fn from_records<R, K>(records: impl IntoIterator<Item = R>) -> SyncResult<Self>
    where
        R: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            let pairs: Vec<(String, Value)> =
                record.into_iter().map(|(k, v)| (k.into(), v)).collect();
            if index == 0 {
                names = pairs.iter().map(|(k, _)| k.clone()).collect();
                rows.push(pairs.into_iter().map(|(_, v)| v).collect());
                continue;
            }
            if pairs.len() != names.len() {
                return Err(SyncError::InvalidDataset(format!(
                    "record {} has {} fields, expected {}",
                    index,
                    pairs.len(),
                    names.len()
                )));
            }
            let mut row = vec![Value::Null; names.len()];
            let mut filled = vec![false; names.len()];
            for (key, value) in pairs {
                let position = names.iter().position(|n| *n == key).ok_or_else(|| {
                    SyncError::InvalidDataset(format!("record {} has unknown column `{}`", index, key))
                })?;
                if filled[position] {
                    return Err(SyncError::InvalidDataset(format!(
                        "record {} repeats column `{}`",
                        index, key
                    )));
                }
                filled[position] = true;
                row[position] = value;
            }
            rows.push(row);
        }

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let column_type =
                    infer_column_type(rows.iter().map(|row| &row[i])).unwrap_or(ColumnType::Text);
                Column::new(name, column_type)
            })
            .collect();

        let mut dataset = Self::new(columns)?;
        for row in rows {
            dataset.push_row(row)?;
        }
        Ok(dataset)
    }

    /// Appends a row given in column order.
    pub fn push_row(&mut self, row: Vec<Value>) -> SyncResult<()> {
        if row.len() != self.columns.len() {
            return Err(SyncError::InvalidDataset(format!(
                "row has {} values, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        for (value, column) in row.iter().zip(&self.columns) {
            value.check_fits(&column.name, &column.column_type)?;
        }
        self.rows.push(row);
        Ok(())
    }

    /// Appends a row given as `(column, value)` pairs; missing columns are
    /// filled with NULL.
    pub fn push_record<K: AsRef<str>>(
        &mut self,
        record: impl IntoIterator<Item = (K, Value)>,
    ) -> SyncResult<()> {
        let mut row = vec![Value::Null; self.columns.len()];
        for (key, value) in record {
            let position = self.column_index(key.as_ref()).ok_or_else(|| {
                SyncError::InvalidDataset(format!("unknown column `{}`", key.as_ref()))
            })?;
            row[position] = value;
        }
        self.push_row(row)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// All values of one column, top to bottom.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Rows whose `column` equals `value`.
    pub fn rows_where<'a>(
        &'a self,
        column: &str,
        value: &'a Value,
    ) -> impl Iterator<Item = Row<'a>> + 'a {
        let index = self.column_index(column);
        self.rows().filter(move |row| match index {
            Some(i) => &row.values[i] == value,
            None => false,
        })
    }

    pub(crate) fn raw_rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub(crate) fn from_parts(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }
}

/// Column type implied by a column's values.
///
/// The first non-null value decides the type. When that is an integer or a
/// decimal and the column holds decimals, the result is a decimal wide
/// enough for every value's scale.
pub(crate) fn infer_column_type<'a>(values: impl Iterator<Item = &'a Value> + Clone) -> Option<ColumnType> {
    let first = values.clone().find_map(Value::inferred_type)?;
    if !matches!(first, ColumnType::BigInt | ColumnType::Decimal { .. }) {
        return Some(first);
    }
    let scale = values
        .filter_map(|v| match v {
            Value::Decimal(d) => Some(d.scale()),
            _ => None,
        })
        .max();
    Some(match scale {
        Some(scale) => ColumnType::Decimal {
            precision: MAX_DECIMAL_SCALE,
            scale,
        },
        None => first,
    })
}

/// Borrowed view of one dataset row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [Column],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let values = self.values;
        self.columns
            .iter()
            .position(|c| c.name == column)
            .map(|i| &values[i])
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Value)> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .zip(self.values.iter())
    }
}
