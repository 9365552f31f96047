//! Value re-encoding into a canonical type.
//!
//! Used by `type_cast` rules and by drivers that load untyped data (JSON
//! snapshots). A failed cast is an error, never a silent NULL.

use std::str::FromStr;

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::core::SqlValue;
use crate::dialect::{CanonicalType, Lossiness};

/// Result of a successful cast.
#[derive(Debug, Clone, PartialEq)]
pub struct CastOutcome {
    pub value: SqlValue,
    pub lossiness: Lossiness,
}

impl CastOutcome {
    fn exact(value: SqlValue) -> Self {
        Self {
            value,
            lossiness: Lossiness::Exact,
        }
    }

    fn with(value: SqlValue, lossiness: Lossiness) -> Self {
        Self { value, lossiness }
    }
}

type CastResult = std::result::Result<CastOutcome, String>;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Re-encode `value` as `target`.
///
/// NULL casts to NULL for every type. Out-of-range or unparseable input is
/// an error; lossy but representable input (truncated strings, rounded
/// decimals, dropped offsets) succeeds with `NarrowedRisk`.
pub fn cast_value(value: &SqlValue, target: &CanonicalType) -> CastResult {
    if value.is_null() {
        return Ok(CastOutcome::exact(SqlValue::Null));
    }

    match target {
        CanonicalType::Boolean => cast_bool(value),
        CanonicalType::Int8 => cast_int(value, i8::MIN as i64, i8::MAX as i64)
            .map(|i| CastOutcome::exact(SqlValue::I16(i as i16))),
        CanonicalType::Int16 => cast_int(value, i16::MIN as i64, i16::MAX as i64)
            .map(|i| CastOutcome::exact(SqlValue::I16(i as i16))),
        CanonicalType::Int32 => cast_int(value, i32::MIN as i64, i32::MAX as i64)
            .map(|i| CastOutcome::exact(SqlValue::I32(i as i32))),
        CanonicalType::Int64 => {
            cast_int(value, i64::MIN, i64::MAX).map(|i| CastOutcome::exact(SqlValue::I64(i)))
        }
        CanonicalType::Float32 => cast_float(value).map(|(f, lossiness)| {
            let narrowed = f as f32;
            let lossiness = if (narrowed as f64 - f).abs() > f64::EPSILON * f.abs().max(1.0) {
                lossiness.combine(Lossiness::NarrowedRisk)
            } else {
                lossiness
            };
            CastOutcome::with(SqlValue::F32(narrowed), lossiness)
        }),
        CanonicalType::Float64 => {
            cast_float(value).map(|(f, lossiness)| CastOutcome::with(SqlValue::F64(f), lossiness))
        }
        CanonicalType::Decimal { precision, scale } => cast_decimal(value, *precision, *scale),
        CanonicalType::FixedString(len) | CanonicalType::VarString(len) => {
            Ok(truncate_text(text_of(value), *len as usize))
        }
        CanonicalType::Text => Ok(CastOutcome::exact(SqlValue::Text(text_of(value)))),
        CanonicalType::FixedBinary(len) | CanonicalType::VarBinary(len) => {
            cast_binary(value, *len as usize)
        }
        CanonicalType::Date => cast_date(value),
        CanonicalType::Time => cast_time(value),
        CanonicalType::DateTime { precision } => cast_datetime(value, *precision),
        CanonicalType::DateTimeWithOffset => cast_datetime_offset(value),
        CanonicalType::Uuid => cast_uuid(value),
        CanonicalType::Json => cast_json(value),
        CanonicalType::Enum(variants) => {
            let text = text_of(value);
            if variants.iter().any(|v| v == &text) {
                Ok(CastOutcome::exact(SqlValue::Text(text)))
            } else {
                Err(format!(
                    "'{}' is not one of the enum values [{}]",
                    text,
                    variants.join(", ")
                ))
            }
        }
        CanonicalType::Array(inner) => cast_array(value, inner),
        CanonicalType::Unsupported(name) => Err(format!(
            "cannot cast {} to unsupported type '{}'",
            value.type_name(),
            name
        )),
    }
}

fn text_of(value: &SqlValue) -> String {
    value.to_string()
}

fn truncate_text(text: String, max_chars: usize) -> CastOutcome {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return CastOutcome::exact(SqlValue::Text(text));
    }
    let truncated: String = text.chars().take(max_chars).collect();
    CastOutcome::with(SqlValue::Text(truncated), Lossiness::NarrowedRisk)
}

fn cast_bool(value: &SqlValue) -> CastResult {
    let b = match value {
        SqlValue::Bool(b) => *b,
        v if v.as_i64().is_some() => match v.as_i64() {
            Some(0) => false,
            Some(1) => true,
            _ => return Err(format!("integer {} is not a boolean", v)),
        },
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => true,
            "false" | "f" | "no" | "n" | "0" => false,
            _ => return Err(format!("'{}' is not a boolean", s)),
        },
        other => return Err(format!("cannot cast {} to boolean", other.type_name())),
    };
    Ok(CastOutcome::exact(SqlValue::Bool(b)))
}

fn cast_int(value: &SqlValue, min: i64, max: i64) -> std::result::Result<i64, String> {
    let i = match value {
        SqlValue::Bool(b) => *b as i64,
        SqlValue::I16(_) | SqlValue::I32(_) | SqlValue::I64(_) => value.as_i64().unwrap_or(0),
        SqlValue::F32(_) | SqlValue::F64(_) | SqlValue::Decimal(_) => {
            integral_decimal(value.as_decimal(), value)?
        }
        SqlValue::Text(s) => {
            let trimmed = s.trim();
            match trimmed.parse::<i64>() {
                Ok(i) => i,
                Err(_) => integral_decimal(Decimal::from_str(trimmed).ok(), value)
                    .map_err(|_| format!("'{}' is not an integer", s))?,
            }
        }
        other => return Err(format!("cannot cast {} to integer", other.type_name())),
    };
    if i < min || i > max {
        return Err(format!("{} is out of range [{}, {}]", i, min, max));
    }
    Ok(i)
}

fn integral_decimal(d: Option<Decimal>, original: &SqlValue) -> std::result::Result<i64, String> {
    let d = d.ok_or_else(|| format!("{} is not a finite number", original))?;
    if d.fract() != Decimal::ZERO {
        return Err(format!("{} has a fractional part", original));
    }
    d.to_i64()
        .ok_or_else(|| format!("{} does not fit in a 64-bit integer", original))
}

fn cast_float(value: &SqlValue) -> std::result::Result<(f64, Lossiness), String> {
    match value {
        SqlValue::F32(f) => Ok((*f as f64, Lossiness::Exact)),
        SqlValue::F64(f) => Ok((*f, Lossiness::Exact)),
        SqlValue::I16(_) | SqlValue::I32(_) => Ok((value.as_f64().unwrap_or(0.0), Lossiness::Exact)),
        SqlValue::I64(i) => {
            let lossiness = if i.unsigned_abs() > (1u64 << 53) {
                Lossiness::NarrowedRisk
            } else {
                Lossiness::Exact
            };
            Ok((*i as f64, lossiness))
        }
        SqlValue::Decimal(d) => d
            .to_f64()
            .map(|f| (f, Lossiness::WidenedSafe))
            .ok_or_else(|| format!("{} does not fit in a double", d)),
        SqlValue::Bool(b) => Ok((if *b { 1.0 } else { 0.0 }, Lossiness::Exact)),
        SqlValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| (f, Lossiness::Exact))
            .map_err(|_| format!("'{}' is not a number", s)),
        other => Err(format!("cannot cast {} to float", other.type_name())),
    }
}

fn cast_decimal(value: &SqlValue, precision: u8, scale: u8) -> CastResult {
    let (d, mut lossiness) = match value {
        SqlValue::Text(s) => (
            Decimal::from_str(s.trim())
                .or_else(|_| Decimal::from_scientific(s.trim()))
                .map_err(|_| format!("'{}' is not a decimal", s))?,
            Lossiness::Exact,
        ),
        SqlValue::F32(_) | SqlValue::F64(_) => (
            value
                .as_decimal()
                .ok_or_else(|| format!("{} is not a finite number", value))?,
            Lossiness::WidenedSafe,
        ),
        SqlValue::Bool(b) => (Decimal::from(*b as i32), Lossiness::Exact),
        v => (
            v.as_decimal()
                .ok_or_else(|| format!("cannot cast {} to decimal", v.type_name()))?,
            Lossiness::Exact,
        ),
    };

    let scale = scale.min(28) as u32;
    let rounded = d.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    if rounded != d {
        lossiness = Lossiness::NarrowedRisk;
    }

    let integer_digits = precision.saturating_sub(scale as u8) as usize;
    let whole = rounded.trunc().abs().to_string();
    let whole_digits = if whole == "0" { 0 } else { whole.len() };
    if precision > 0 && whole_digits > integer_digits {
        return Err(format!(
            "{} exceeds decimal({},{})",
            d, precision, scale
        ));
    }
    Ok(CastOutcome::with(SqlValue::Decimal(rounded), lossiness))
}

fn cast_binary(value: &SqlValue, max_len: usize) -> CastResult {
    let bytes = match value {
        SqlValue::Bytes(b) => b.clone(),
        SqlValue::Text(s) => s.as_bytes().to_vec(),
        SqlValue::Uuid(u) => u.as_bytes().to_vec(),
        other => return Err(format!("cannot cast {} to binary", other.type_name())),
    };
    if max_len > 0 && bytes.len() > max_len {
        return Ok(CastOutcome::with(
            SqlValue::Bytes(bytes[..max_len].to_vec()),
            Lossiness::NarrowedRisk,
        ));
    }
    Ok(CastOutcome::exact(SqlValue::Bytes(bytes)))
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn cast_date(value: &SqlValue) -> CastResult {
    match value {
        SqlValue::Date(d) => Ok(CastOutcome::exact(SqlValue::Date(*d))),
        SqlValue::DateTime(dt) => Ok(date_from_datetime(*dt)),
        SqlValue::DateTimeOffset(dt) => Ok(date_from_datetime(dt.naive_local())),
        SqlValue::Text(s) => {
            let s = s.trim();
            if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Ok(CastOutcome::exact(SqlValue::Date(d)));
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(date_from_datetime(dt.naive_local()));
            }
            parse_naive_datetime(s)
                .map(date_from_datetime)
                .ok_or_else(|| format!("'{}' is not a date", s))
        }
        other => Err(format!("cannot cast {} to date", other.type_name())),
    }
}

fn date_from_datetime(dt: NaiveDateTime) -> CastOutcome {
    let lossiness = if dt.time() == NaiveTime::MIN {
        Lossiness::Exact
    } else {
        Lossiness::NarrowedRisk
    };
    CastOutcome::with(SqlValue::Date(dt.date()), lossiness)
}

fn cast_time(value: &SqlValue) -> CastResult {
    match value {
        SqlValue::Time(t) => Ok(CastOutcome::exact(SqlValue::Time(*t))),
        SqlValue::DateTime(dt) => Ok(CastOutcome::with(
            SqlValue::Time(dt.time()),
            Lossiness::NarrowedRisk,
        )),
        SqlValue::Text(s) => ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(s.trim(), fmt).ok())
            .map(|t| CastOutcome::exact(SqlValue::Time(t)))
            .ok_or_else(|| format!("'{}' is not a time of day", s)),
        other => Err(format!("cannot cast {} to time", other.type_name())),
    }
}

/// Drop fractional seconds beyond `precision` digits.
fn truncate_precision(dt: NaiveDateTime, precision: u8) -> (NaiveDateTime, Lossiness) {
    let digits = precision.min(9) as u32;
    let step = 10u32.pow(9 - digits);
    let nanos = dt.nanosecond();
    let kept = nanos - nanos % step;
    if kept == nanos {
        return (dt, Lossiness::Exact);
    }
    match dt.with_nanosecond(kept) {
        Some(truncated) => (truncated, Lossiness::NarrowedRisk),
        None => (dt, Lossiness::Exact),
    }
}

fn cast_datetime(value: &SqlValue, precision: u8) -> CastResult {
    let (dt, lossiness) = match value {
        SqlValue::DateTime(dt) => (*dt, Lossiness::Exact),
        SqlValue::Date(d) => match d.and_hms_opt(0, 0, 0) {
            Some(dt) => (dt, Lossiness::WidenedSafe),
            None => return Err(format!("{} has no midnight", d)),
        },
        SqlValue::DateTimeOffset(dt) => (dt.naive_utc(), Lossiness::NarrowedRisk),
        SqlValue::Text(s) => {
            let s = s.trim();
            if let Some(dt) = parse_naive_datetime(s) {
                (dt, Lossiness::Exact)
            } else if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                (dt.naive_utc(), Lossiness::NarrowedRisk)
            } else {
                return Err(format!("'{}' is not a timestamp", s));
            }
        }
        SqlValue::I64(_) | SqlValue::I32(_) => {
            let millis = value.as_i64().unwrap_or(0);
            match Utc.timestamp_millis_opt(millis).single() {
                Some(dt) => (dt.naive_utc(), Lossiness::Exact),
                None => return Err(format!("{} is not a valid epoch timestamp", millis)),
            }
        }
        other => return Err(format!("cannot cast {} to timestamp", other.type_name())),
    };
    let (dt, truncation) = truncate_precision(dt, precision);
    Ok(CastOutcome::with(
        SqlValue::DateTime(dt),
        lossiness.combine(truncation),
    ))
}

fn cast_datetime_offset(value: &SqlValue) -> CastResult {
    let utc = FixedOffset::east_opt(0);
    match value {
        SqlValue::DateTimeOffset(dt) => Ok(CastOutcome::exact(SqlValue::DateTimeOffset(*dt))),
        SqlValue::DateTime(dt) => utc
            .map(|offset| {
                CastOutcome::with(
                    SqlValue::DateTimeOffset(offset.from_utc_datetime(dt)),
                    Lossiness::WidenedSafe,
                )
            })
            .ok_or_else(|| "invalid UTC offset".to_string()),
        SqlValue::Text(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(CastOutcome::exact(SqlValue::DateTimeOffset(dt)));
            }
            if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f %:z") {
                return Ok(CastOutcome::exact(SqlValue::DateTimeOffset(dt)));
            }
            match (parse_naive_datetime(s), utc) {
                (Some(dt), Some(offset)) => Ok(CastOutcome::with(
                    SqlValue::DateTimeOffset(offset.from_utc_datetime(&dt)),
                    Lossiness::WidenedSafe,
                )),
                _ => Err(format!("'{}' is not a timestamp with offset", s)),
            }
        }
        other => Err(format!(
            "cannot cast {} to timestamp with offset",
            other.type_name()
        )),
    }
}

fn cast_uuid(value: &SqlValue) -> CastResult {
    match value {
        SqlValue::Uuid(u) => Ok(CastOutcome::exact(SqlValue::Uuid(*u))),
        SqlValue::Text(s) => Uuid::parse_str(s.trim())
            .map(|u| CastOutcome::exact(SqlValue::Uuid(u)))
            .map_err(|_| format!("'{}' is not a UUID", s)),
        SqlValue::Bytes(b) => Uuid::from_slice(b)
            .map(|u| CastOutcome::exact(SqlValue::Uuid(u)))
            .map_err(|_| format!("{} bytes cannot form a UUID", b.len())),
        other => Err(format!("cannot cast {} to uuid", other.type_name())),
    }
}

fn cast_json(value: &SqlValue) -> CastResult {
    match value {
        SqlValue::Json(v) => Ok(CastOutcome::exact(SqlValue::Json(v.clone()))),
        SqlValue::Text(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(v) => Ok(CastOutcome::exact(SqlValue::Json(v))),
            Err(_) => Ok(CastOutcome::with(
                SqlValue::Json(serde_json::Value::String(s.clone())),
                Lossiness::WidenedSafe,
            )),
        },
        other => Ok(CastOutcome::exact(SqlValue::Json(other.to_json()))),
    }
}

fn cast_array(value: &SqlValue, inner: &CanonicalType) -> CastResult {
    let items: Vec<SqlValue> = match value {
        SqlValue::Array(items) => items.clone(),
        SqlValue::Json(serde_json::Value::Array(items)) => {
            items.iter().map(SqlValue::from_json).collect()
        }
        SqlValue::Text(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(serde_json::Value::Array(items)) => items.iter().map(SqlValue::from_json).collect(),
            _ => return Err(format!("'{}' is not an array", s)),
        },
        other => return Err(format!("cannot cast {} to array", other.type_name())),
    };

    let mut lossiness = Lossiness::Exact;
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let cast = cast_value(item, inner).map_err(|e| format!("element {}: {}", idx, e))?;
        lossiness = lossiness.combine(cast.lossiness);
        out.push(cast.value);
    }
    Ok(CastOutcome::with(SqlValue::Array(out), lossiness))
}
