//! SQL value types for engine-agnostic row handling.
//!
//! Rows move between drivers, the comparator, and the transform pipeline as
//! [`Row`] maps of column name to [`SqlValue`]. Values are owned: a diff may
//! hold on to source and target rows long after the driver buffer is gone.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    #[default]
    Null,

    Bool(bool),

    /// 16-bit signed integer (smallint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    F32(f32),

    F64(f64),

    /// Exact decimal value.
    Decimal(Decimal),

    Text(String),

    Bytes(Vec<u8>),

    Uuid(Uuid),

    Date(NaiveDate),

    Time(NaiveTime),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),

    /// Structured document value (JSON column, document store sub-object).
    Json(serde_json::Value),

    Array(Vec<SqlValue>),
}

/// One row, keyed by column name.
pub type Row = BTreeMap<String, SqlValue>;

/// Position after the last row returned by a keyed read: the key values of
/// that row, in key-column order.
pub type RowCursor = Vec<SqlValue>;

/// A batch of rows returned by [`stream_rows`](crate::core::DatabaseDriver::stream_rows).
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    /// Rows in ascending key order.
    pub rows: Vec<Row>,

    /// Cursor to pass to the next call. `None` once the table is exhausted.
    pub next_cursor: Option<RowCursor>,
}

impl RowBatch {
    /// Whether this is the final batch.
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::I16(_) => "i16",
            SqlValue::I32(_) => "i32",
            SqlValue::I64(_) => "i64",
            SqlValue::F32(_) => "f32",
            SqlValue::F64(_) => "f64",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::DateTimeOffset(_) => "datetimeoffset",
            SqlValue::Json(_) => "json",
            SqlValue::Array(_) => "array",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the value, if it holds an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(*v as i64),
            SqlValue::I32(v) => Some(*v as i64),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Exact decimal view of any numeric value. Non-finite floats have none.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            SqlValue::I16(v) => Some(Decimal::from(*v)),
            SqlValue::I32(v) => Some(Decimal::from(*v)),
            SqlValue::I64(v) => Some(Decimal::from(*v)),
            SqlValue::F32(v) => Decimal::from_f64_retain(*v as f64),
            SqlValue::F64(v) => Decimal::from_f64_retain(*v),
            SqlValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Floating point view of any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::I16(v) => Some(*v as f64),
            SqlValue::I32(v) => Some(*v as f64),
            SqlValue::I64(v) => Some(*v as f64),
            SqlValue::F32(v) => Some(*v as f64),
            SqlValue::F64(v) => Some(*v),
            SqlValue::Decimal(d) => d.to_string().parse().ok(),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlValue::I16(_)
                | SqlValue::I32(_)
                | SqlValue::I64(_)
                | SqlValue::F32(_)
                | SqlValue::F64(_)
                | SqlValue::Decimal(_)
        )
    }

    /// Convert to a JSON value.
    ///
    /// Decimals, binary data, UUIDs and temporal values become strings
    /// (binary as lowercase hex) so no precision is lost.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::I16(v) => Value::from(*v),
            SqlValue::I32(v) => Value::from(*v),
            SqlValue::I64(v) => Value::from(*v),
            SqlValue::F32(v) => serde_json::Number::from_f64(*v as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::F64(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Decimal(d) => Value::String(d.to_string()),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Bytes(b) => Value::String(hex::encode(b)),
            SqlValue::Uuid(u) => Value::String(u.to_string()),
            SqlValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            SqlValue::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
            SqlValue::DateTime(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            SqlValue::DateTimeOffset(dt) => Value::String(dt.to_rfc3339()),
            SqlValue::Json(v) => v.clone(),
            SqlValue::Array(items) => Value::Array(items.iter().map(SqlValue::to_json).collect()),
        }
    }

    /// Build a value from JSON without type information.
    ///
    /// Strings stay text; callers that know the column type coerce afterwards
    /// (see [`cast_value`](crate::transform::cast_value)).
    pub fn from_json(value: &serde_json::Value) -> SqlValue {
        use serde_json::Value;
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::I64(i)
                } else {
                    n.as_f64().map(SqlValue::F64).unwrap_or(SqlValue::Null)
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(items) => SqlValue::Array(items.iter().map(SqlValue::from_json).collect()),
            Value::Object(_) => SqlValue::Json(value.clone()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SqlValue::Null => 0,
            SqlValue::Bool(_) => 1,
            SqlValue::I16(_)
            | SqlValue::I32(_)
            | SqlValue::I64(_)
            | SqlValue::F32(_)
            | SqlValue::F64(_)
            | SqlValue::Decimal(_) => 2,
            SqlValue::Text(_) => 3,
            SqlValue::Bytes(_) => 4,
            SqlValue::Uuid(_) => 5,
            SqlValue::Date(_) => 6,
            SqlValue::Time(_) => 7,
            SqlValue::DateTime(_) => 8,
            SqlValue::DateTimeOffset(_) => 9,
            SqlValue::Json(_) => 10,
            SqlValue::Array(_) => 11,
        }
    }

    /// Total order used for keyed cursors.
    ///
    /// Values of different kinds order by kind; numeric values compare by
    /// magnitude regardless of width.
    pub fn total_cmp(&self, other: &SqlValue) -> Ordering {
        match (self, other) {
            (SqlValue::Bool(a), SqlValue::Bool(b)) => a.cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_decimal(), b.as_decimal()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => a
                    .as_f64()
                    .unwrap_or(f64::NAN)
                    .total_cmp(&b.as_f64().unwrap_or(f64::NAN)),
            },
            (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
            (SqlValue::Bytes(a), SqlValue::Bytes(b)) => a.cmp(b),
            (SqlValue::Uuid(a), SqlValue::Uuid(b)) => a.cmp(b),
            (SqlValue::Date(a), SqlValue::Date(b)) => a.cmp(b),
            (SqlValue::Time(a), SqlValue::Time(b)) => a.cmp(b),
            (SqlValue::DateTime(a), SqlValue::DateTime(b)) => a.cmp(b),
            (SqlValue::DateTimeOffset(a), SqlValue::DateTimeOffset(b)) => a.cmp(b),
            (SqlValue::Array(a), SqlValue::Array(b)) => compare_tuples(a, b),
            (a, b) if a.rank() == b.rank() => a.to_string().cmp(&b.to_string()),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// Lexicographic comparison of key tuples using [`SqlValue::total_cmp`].
pub fn compare_tuples(a: &[SqlValue], b: &[SqlValue]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.total_cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Json(v) => write!(f, "{}", v),
            other => match other.to_json() {
                serde_json::Value::String(s) => f.write_str(&s),
                v => write!(f, "{}", v),
            },
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SqlValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(SqlValue::from_json(&value))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Build a [`Row`] from `(column, value)` pairs.
///
/// ```rust
/// use upsert_migrate::core::{row, SqlValue};
///
/// let r = row([("id", SqlValue::from(1)), ("name", SqlValue::from("Alice"))]);
/// assert_eq!(r["name"], SqlValue::Text("Alice".into()));
/// ```
pub fn row<I, K>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, SqlValue)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
