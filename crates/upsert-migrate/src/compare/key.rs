//! Composite row keys for matching rows across engines.

use std::fmt;

use rust_decimal::Decimal;

use crate::core::{Row, SqlValue};

/// One normalized key component.
///
/// Numbers compare and sort by value regardless of width, so an `int` key
/// on one engine matches a `bigint` or `NUMBER(10)` key on another and 9
/// sorts before 10. Everything else compares by its normalized text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum KeyPart {
    Number(Decimal),
    Text(String),
}

/// Composite key of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(Vec<KeyPart>);

/// Why a row's key could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// A key column is NULL or absent.
    Null(String),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Null(column) => write!(f, "key column '{}' is null", column),
        }
    }
}

impl RowKey {
    /// Build the key of `row` for `key_columns`.
    pub fn from_row(row: &Row, key_columns: &[String]) -> Result<Self, KeyError> {
        let mut parts = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            match row.get(column) {
                None | Some(SqlValue::Null) => return Err(KeyError::Null(column.clone())),
                Some(value) => parts.push(normalize_part(value)),
            }
        }
        Ok(Self(parts))
    }

    /// Display form used as `row_id`: components joined with `|`.
    pub fn row_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("|")?;
            }
            match part {
                KeyPart::Number(d) => write!(f, "{}", d)?,
                KeyPart::Text(s) => f.write_str(s)?,
            }
        }
        Ok(())
    }
}

fn normalize_part(value: &SqlValue) -> KeyPart {
    if let Some(d) = value.as_decimal() {
        return KeyPart::Number(d.normalize());
    }
    match value {
        SqlValue::Uuid(u) => KeyPart::Text(u.hyphenated().to_string()),
        SqlValue::Bool(b) => KeyPart::Number(if *b { Decimal::ONE } else { Decimal::ZERO }),
        other => KeyPart::Text(other.to_string()),
    }
}

/// Row id for a row whose key could not be built: the raw key values.
pub fn fallback_row_id(row: &Row, key_columns: &[String]) -> String {
    key_columns
        .iter()
        .map(|k| row.get(k).map(|v| v.to_string()).unwrap_or_else(|| "NULL".into()))
        .collect::<Vec<_>>()
        .join("|")
}
