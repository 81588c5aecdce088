//! Scalar values carried by datasets and filters.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{FromSql, ToSqlOutput, ValueRef};
use rusqlite::ToSql;

use crate::error::{SyncError, SyncResult};
use crate::schema::ColumnType;

/// Largest scale a [`Decimal`] can carry without overflowing `i128`.
pub const MAX_DECIMAL_SCALE: u8 = 38;

/// Fixed-point decimal stored as a scaled integer.
///
/// `Decimal { mantissa: 1234567, scale: 2 }` is `12345.67`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    mantissa: i128,
    scale: u8,
}

impl Decimal {
    /// Creates a decimal from a scaled integer.
    pub fn new(mantissa: i128, scale: u8) -> Self {
        Self {
            mantissa,
            scale: scale.min(MAX_DECIMAL_SCALE),
        }
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Number of significant digits, at least `scale + 1`.
    pub fn precision(&self) -> u8 {
        let digits = self.mantissa.unsigned_abs().to_string().len() as u8;
        digits.max(self.scale + 1)
    }

    /// Returns this value at `scale`, rounding half away from zero when
    /// digits are dropped.
    pub fn rescale(&self, scale: u8) -> Option<Decimal> {
        let scale = scale.min(MAX_DECIMAL_SCALE);
        if scale >= self.scale {
            let factor = 10i128.checked_pow(u32::from(scale - self.scale))?;
            return Some(Decimal::new(self.mantissa.checked_mul(factor)?, scale));
        }
        let divisor = 10i128.pow(u32::from(self.scale - scale));
        let quotient = self.mantissa / divisor;
        let remainder = self.mantissa % divisor;
        let rounded = if remainder.unsigned_abs() * 2 >= divisor.unsigned_abs() {
            quotient + self.mantissa.signum()
        } else {
            quotient
        };
        Some(Decimal::new(rounded, scale))
    }

    /// Converts a float at the given scale.
    pub fn from_f64(value: f64, scale: u8) -> Option<Decimal> {
        if !value.is_finite() {
            return None;
        }
        let scale = scale.min(MAX_DECIMAL_SCALE);
        let scaled = (value * 10f64.powi(i32::from(scale))).round();
        if scaled.abs() >= i128::MAX as f64 {
            return None;
        }
        Some(Decimal::new(scaled as i128, scale))
    }

    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10f64.powi(i32::from(self.scale))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let divisor = 10u128.pow(u32::from(self.scale));
        let magnitude = self.mantissa.unsigned_abs();
        let sign = if self.mantissa < 0 { "-" } else { "" };
        write!(
            f,
            "{}{}.{:0>width$}",
            sign,
            magnitude / divisor,
            magnitude % divisor,
            width = self.scale as usize
        )
    }
}

impl FromStr for Decimal {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SyncError::InvalidDataset(format!("`{}` is not a decimal literal", s));
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac_part.len() > MAX_DECIMAL_SCALE as usize {
            return Err(invalid());
        }
        let joined = format!("{}{}", int_part, frac_part);
        let magnitude: i128 = if joined.is_empty() {
            0
        } else {
            joined.parse().map_err(|_| invalid())?
        };
        let mantissa = if negative { -magnitude } else { magnitude };
        Ok(Decimal::new(mantissa, frac_part.len() as u8))
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Decimal(Decimal),
    Boolean(bool),
    /// Text, including enumerated, set and JSON columns.
    Text(String),
    Blob(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Decimal(_) => "decimal",
            Value::Boolean(_) => "boolean",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Time(_) => "time",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            Value::Decimal(d) => Some(d.to_f64()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Decodes a backend value using the declared type of its column.
    ///
    /// Values whose storage class does not fit the declared type are
    /// decoded by storage class instead of failing.
    pub fn from_column(raw: ValueRef<'_>, column_type: &ColumnType) -> Value {
        if let ValueRef::Null = raw {
            return Value::Null;
        }
        let typed = match column_type {
            ColumnType::Boolean | ColumnType::Bit(1) => match raw {
                ValueRef::Integer(i) => Some(Value::Boolean(i != 0)),
                ValueRef::Real(f) => Some(Value::Boolean(f != 0.0)),
                _ => None,
            },
            ColumnType::Decimal { scale, .. } => decode_decimal(raw, *scale).map(Value::Decimal),
            ColumnType::Date => NaiveDate::column_result(raw).ok().map(Value::Date),
            ColumnType::DateTime | ColumnType::Timestamp => {
                NaiveDateTime::column_result(raw).ok().map(Value::DateTime)
            }
            ColumnType::Time => NaiveTime::column_result(raw).ok().map(Value::Time),
            ColumnType::Float | ColumnType::Double => match raw {
                ValueRef::Real(f) => Some(Value::Real(f)),
                ValueRef::Integer(i) => Some(Value::Real(i as f64)),
                _ => None,
            },
            t if t.is_textual() => match raw {
                ValueRef::Integer(i) => Some(Value::Text(i.to_string())),
                ValueRef::Real(f) => Some(Value::Text(f.to_string())),
                _ => None,
            },
            _ => None,
        };
        typed.unwrap_or_else(|| Value::from(raw))
    }

    /// Checks that this value may be stored in a column of `column_type`.
    pub fn check_fits(&self, column: &str, column_type: &ColumnType) -> SyncResult<()> {
        let fits = match (self, column_type) {
            (Value::Null, _) => true,
            (Value::Integer(_), t) => t.is_integral() || t.is_numeric(),
            (Value::Real(_), t) => t.is_numeric(),
            (Value::Decimal(_), t) => t.is_numeric(),
            // Only a single-bit column decodes back to a flag.
            (Value::Boolean(_), ColumnType::Bit(width)) => *width == 1,
            (Value::Boolean(_), t) => t.is_integral(),
            (Value::Text(s), ColumnType::Enum(allowed)) => {
                allowed.is_empty() || allowed.iter().any(|a| a == s)
            }
            (Value::Text(s), ColumnType::Set(allowed)) => {
                allowed.is_empty()
                    || s.is_empty()
                    || s.split(',').all(|part| allowed.iter().any(|a| a == part))
            }
            (Value::Text(_), t) => t.is_textual(),
            (Value::Blob(_), t) => t.is_binary(),
            (Value::Date(_), ColumnType::Date) => true,
            (Value::DateTime(_), ColumnType::DateTime | ColumnType::Timestamp) => true,
            (Value::Time(_), ColumnType::Time) => true,
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(SyncError::TypeMismatch {
                column: column.to_string(),
                expected: column_type.to_string(),
                found: match self {
                    Value::Text(s) => format!("text `{}`", s),
                    other => other.kind_name().to_string(),
                },
            })
        }
    }

    /// Column type used when a dataset's schema is inferred from its values.
    pub fn inferred_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ColumnType::BigInt),
            Value::Real(_) => Some(ColumnType::Double),
            Value::Decimal(d) => Some(ColumnType::Decimal {
                precision: MAX_DECIMAL_SCALE,
                scale: d.scale(),
            }),
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Blob(_) => Some(ColumnType::Blob),
            Value::Date(_) => Some(ColumnType::Date),
            Value::DateTime(_) => Some(ColumnType::DateTime),
            Value::Time(_) => Some(ColumnType::Time),
        }
    }
}

fn decode_decimal(raw: ValueRef<'_>, scale: u8) -> Option<Decimal> {
    match raw {
        ValueRef::Integer(i) => Decimal::new(i128::from(i), 0).rescale(scale),
        ValueRef::Real(f) => Decimal::from_f64(f, scale),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.parse::<Decimal>().ok())
            .and_then(|d| d.rescale(scale)),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(v) => write!(f, "{}", v),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => write!(f, "{}", d),
            Value::DateTime(dt) => write!(f, "{}", dt),
            Value::Time(t) => write!(f, "{}", t),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Null => Ok(ToSqlOutput::from(rusqlite::types::Null)),
            Value::Integer(i) => Ok(ToSqlOutput::from(*i)),
            Value::Real(f) => Ok(ToSqlOutput::from(*f)),
            Value::Decimal(d) => Ok(ToSqlOutput::from(d.to_string())),
            Value::Boolean(b) => Ok(ToSqlOutput::from(i64::from(*b))),
            Value::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
            Value::Blob(b) => Ok(ToSqlOutput::from(b.as_slice())),
            Value::Date(d) => d.to_sql(),
            Value::DateTime(dt) => dt.to_sql(),
            Value::Time(t) => t.to_sql(),
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(raw: ValueRef<'_>) -> Self {
        match raw {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
