//! Canonical-type-aware value equality.
//!
//! Two engines rarely hand back the same representation for the same data:
//! an `int` arrives as `I32` on one side and `I64` on the other, a
//! `datetime2(7)` carries more fractional digits than a `datetime(3)`, a
//! document store returns decimals as text. Values are first re-encoded
//! into the target column's canonical type, then compared.

use chrono::{DateTime, FixedOffset};
use rust_decimal::prelude::ToPrimitive;

use crate::core::SqlValue;
use crate::dialect::CanonicalType;
use crate::transform::cast_value;

use super::data::DataCompareOptions;

/// Whether `source` and `target` hold the same value for a column of type
/// `canonical` (when known).
pub fn values_equal(
    source: &SqlValue,
    target: &SqlValue,
    canonical: Option<&CanonicalType>,
    options: &DataCompareOptions,
) -> bool {
    if options.null_equals_empty && (is_null_or_empty(source) && is_null_or_empty(target)) {
        return true;
    }
    match (source.is_null(), target.is_null()) {
        (true, true) => return true,
        (true, false) | (false, true) => return false,
        _ => {}
    }

    let (source, target) = match canonical.filter(|c| !c.is_unsupported()) {
        Some(ct) => (coerce(source, ct), coerce(target, ct)),
        None => (source.clone(), target.clone()),
    };
    equal_normalized(&source, &target, options)
}

fn is_null_or_empty(value: &SqlValue) -> bool {
    match value {
        SqlValue::Null => true,
        SqlValue::Text(s) => s.is_empty(),
        _ => false,
    }
}

/// Re-encode into `canonical` ignoring length limits; callers cut source
/// text to the target length first. Values that do not cast are compared
/// as-is.
fn coerce(value: &SqlValue, canonical: &CanonicalType) -> SqlValue {
    let unbounded = match canonical {
        CanonicalType::FixedString(_) | CanonicalType::VarString(_) => CanonicalType::Text,
        CanonicalType::FixedBinary(_) => CanonicalType::VarBinary(0),
        CanonicalType::VarBinary(_) => CanonicalType::VarBinary(0),
        CanonicalType::Decimal { .. } => {
            return value
                .as_decimal()
                .map(SqlValue::Decimal)
                .or_else(|| {
                    value
                        .as_str()
                        .and_then(|s| s.trim().parse().ok())
                        .map(SqlValue::Decimal)
                })
                .unwrap_or_else(|| value.clone());
        }
        other => other.clone(),
    };
    match cast_value(value, &unbounded) {
        Ok(outcome) => outcome.value,
        Err(_) => value.clone(),
    }
}

fn equal_normalized(a: &SqlValue, b: &SqlValue, options: &DataCompareOptions) -> bool {
    match (a, b) {
        (SqlValue::Text(x), SqlValue::Text(y)) => normalize_text(x, options) == normalize_text(y, options),
        (SqlValue::F32(_) | SqlValue::F64(_), _) | (_, SqlValue::F32(_) | SqlValue::F64(_))
            if a.is_numeric() && b.is_numeric() =>
        {
            floats_equal(a, b, options)
        }
        (x, y) if x.is_numeric() && y.is_numeric() => match (x.as_decimal(), y.as_decimal()) {
            (Some(dx), Some(dy)) => match options.numeric_tolerance {
                Some(tol) => (dx - dy).abs().to_f64().map(|d| d <= tol).unwrap_or(false),
                None => dx == dy,
            },
            _ => floats_equal(x, y, options),
        },
        (SqlValue::DateTimeOffset(x), SqlValue::DateTimeOffset(y)) => x == y,
        (SqlValue::DateTime(x), SqlValue::DateTimeOffset(y))
        | (SqlValue::DateTimeOffset(y), SqlValue::DateTime(x)) => *x == y.naive_utc(),
        (SqlValue::Json(x), SqlValue::Json(y)) => x == y,
        (SqlValue::Json(x), SqlValue::Text(s)) | (SqlValue::Text(s), SqlValue::Json(x)) => {
            serde_json::from_str::<serde_json::Value>(s)
                .map(|parsed| &parsed == x)
                .unwrap_or(false)
        }
        (SqlValue::Uuid(u), SqlValue::Text(s)) | (SqlValue::Text(s), SqlValue::Uuid(u)) => {
            s.trim().eq_ignore_ascii_case(&u.hyphenated().to_string())
        }
        (SqlValue::Bool(x), y) | (y, SqlValue::Bool(x)) if y.as_i64().is_some() => {
            y.as_i64() == Some(*x as i64)
        }
        (SqlValue::Array(x), SqlValue::Array(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(p, q)| equal_normalized(p, q, options))
        }
        (x, y) if x == y => true,
        (SqlValue::Text(s), other) | (other, SqlValue::Text(s)) => {
            normalize_text(s, options) == normalize_text(&other.to_string(), options)
        }
        _ => a.to_string() == b.to_string(),
    }
}

fn floats_equal(a: &SqlValue, b: &SqlValue, options: &DataCompareOptions) -> bool {
    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return false;
    };
    if x == y {
        return true;
    }
    let tolerance = options
        .numeric_tolerance
        .unwrap_or_else(|| 1e-9 * x.abs().max(y.abs()).max(1.0));
    // real columns only keep ~7 significant digits
    let tolerance = if matches!(a, SqlValue::F32(_)) || matches!(b, SqlValue::F32(_)) {
        tolerance.max(1e-6 * x.abs().max(y.abs()))
    } else {
        tolerance
    };
    (x - y).abs() <= tolerance
}

fn normalize_text(s: &str, options: &DataCompareOptions) -> String {
    let s = if options.normalize_whitespace {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        s.to_string()
    };
    if options.case_insensitive {
        s.to_lowercase()
    } else {
        s
    }
}

/// Parse an RFC 3339 timestamp, used by NewestWins comparisons on text columns.
pub fn parse_timestamp(value: &SqlValue) -> Option<DateTime<FixedOffset>> {
    let utc = FixedOffset::east_opt(0)?;
    match cast_value(value, &CanonicalType::DateTimeWithOffset).ok()?.value {
        SqlValue::DateTimeOffset(dt) => Some(dt.with_timezone(&utc)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn opts() -> DataCompareOptions {
        DataCompareOptions::default()
    }

    #[test]
    fn test_numeric_widths_are_equal() {
        assert!(values_equal(&SqlValue::I32(5), &SqlValue::I64(5), None, &opts()));
        assert!(values_equal(
            &SqlValue::Decimal(Decimal::from_str("1.50").unwrap()),
            &SqlValue::Decimal(Decimal::from_str("1.5").unwrap()),
            None,
            &opts()
        ));
        assert!(!values_equal(&SqlValue::I32(5), &SqlValue::I32(6), None, &opts()));
    }

    #[test]
    fn test_text_decimal_against_canonical() {
        let ct = CanonicalType::Decimal { precision: 10, scale: 2 };
        assert!(values_equal(
            &SqlValue::from("12.30"),
            &SqlValue::Decimal(Decimal::from_str("12.3").unwrap()),
            Some(&ct),
            &opts()
        ));
    }

    #[test]
    fn test_timestamp_precision_is_normalized() {
        let ct = CanonicalType::DateTime { precision: 3 };
        assert!(values_equal(
            &SqlValue::from("2024-05-01 10:00:00.1234567"),
            &SqlValue::from("2024-05-01T10:00:00.123"),
            Some(&ct),
            &opts()
        ));
    }

    #[test]
    fn test_string_lengths_do_not_hide_differences() {
        let ct = CanonicalType::VarString(3);
        assert!(!values_equal(
            &SqlValue::from("abcd"),
            &SqlValue::from("abc"),
            Some(&ct),
            &opts()
        ));
    }

    #[test]
    fn test_options() {
        let mut o = opts();
        assert!(!values_equal(&SqlValue::from("A  b"), &SqlValue::from("a b"), None, &o));
        o.normalize_whitespace = true;
        o.case_insensitive = true;
        assert!(values_equal(&SqlValue::from("A  b"), &SqlValue::from("a b"), None, &o));

        assert!(!values_equal(&SqlValue::Null, &SqlValue::from(""), None, &o));
        o.null_equals_empty = true;
        assert!(values_equal(&SqlValue::Null, &SqlValue::from(""), None, &o));

        o.numeric_tolerance = Some(0.01);
        assert!(values_equal(&SqlValue::F64(1.001), &SqlValue::F64(1.0), None, &o));
    }

    #[test]
    fn test_bool_and_int() {
        assert!(values_equal(&SqlValue::Bool(true), &SqlValue::I32(1), None, &opts()));
        assert!(values_equal(
            &SqlValue::I16(0),
            &SqlValue::Bool(false),
            Some(&CanonicalType::Boolean),
            &opts()
        ));
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp(&SqlValue::from("2024-01-01T00:00:00+01:00")).unwrap();
        let other = parse_timestamp(&SqlValue::from("2023-12-31 23:00:00")).unwrap();
        assert_eq!(ts, other);
    }
}
