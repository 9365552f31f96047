//! SQLite declared types ↔ canonical types.
//!
//! SQLite only has storage classes; declared types are resolved with the
//! usual affinity rules, so most named types widen.

use super::canonical::{CanonicalType, CanonicalTypeInfo, FromCanonical, ToCanonical, TypeMapping};
use super::native::NativeTypeSpec;

const DIALECT: &str = "sqlite";

/// SQLite type converter (both directions).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteTypes;

impl ToCanonical for SqliteTypes {
    fn dialect_name(&self) -> &str {
        DIALECT
    }

    fn to_canonical(&self, spec: &NativeTypeSpec) -> CanonicalTypeInfo {
        if spec.is_array {
            return CanonicalTypeInfo::unsupported(DIALECT, &spec.to_string());
        }
        let name = spec.name.as_str();

        match name {
            "integer" => CanonicalTypeInfo::exact(CanonicalType::Int64),
            "real" => CanonicalTypeInfo::exact(CanonicalType::Float64),
            "text" => CanonicalTypeInfo::exact(CanonicalType::Text),
            // No declared type means BLOB affinity
            "blob" | "" => CanonicalTypeInfo::exact(CanonicalType::VarBinary(0)),
            "boolean" | "bool" => CanonicalTypeInfo::widened(
                CanonicalType::Boolean,
                "SQLite stores booleans as INTEGER 0/1.",
            ),
            "date" => CanonicalTypeInfo::widened(
                CanonicalType::Date,
                "SQLite stores dates as ISO-8601 text.",
            ),
            "datetime" | "timestamp" => CanonicalTypeInfo::widened(
                CanonicalType::DateTime { precision: 3 },
                "SQLite stores timestamps as ISO-8601 text.",
            ),
            "time" => CanonicalTypeInfo::widened(
                CanonicalType::Time,
                "SQLite stores times as ISO-8601 text.",
            ),
            "uuid" | "guid" => {
                CanonicalTypeInfo::widened(CanonicalType::Uuid, "SQLite stores UUIDs as text.")
            }
            "json" => {
                CanonicalTypeInfo::widened(CanonicalType::Json, "SQLite stores JSON as text.")
            }
            "numeric" | "decimal" => {
                let precision = spec.precision().unwrap_or(38).clamp(1, 38) as u8;
                let scale = spec.scale().unwrap_or(10).min(precision as u32) as u8;
                CanonicalTypeInfo::narrowed(
                    CanonicalType::Decimal { precision, scale },
                    "SQLite NUMERIC affinity may store values as REAL.",
                )
            }

            // Affinity rules, in SQLite's own precedence order
            _ if name.contains("int") => CanonicalTypeInfo::widened(
                CanonicalType::Int64,
                "SQLite INTEGER affinity is 64-bit.",
            ),
            _ if name.contains("char") || name.contains("clob") || name.contains("text") => {
                CanonicalTypeInfo::widened(
                    CanonicalType::Text,
                    "SQLite does not enforce declared string lengths.",
                )
            }
            _ if name.contains("real") || name.contains("floa") || name.contains("doub") => {
                CanonicalTypeInfo::widened(CanonicalType::Float64, "SQLite REAL is 64-bit.")
            }

            _ => CanonicalTypeInfo::unsupported(DIALECT, &spec.to_string()),
        }
    }
}

impl FromCanonical for SqliteTypes {
    fn dialect_name(&self) -> &str {
        DIALECT
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        let integer = || NativeTypeSpec::new("integer");
        let text = || NativeTypeSpec::new("text");

        match canonical {
            CanonicalType::Boolean => {
                TypeMapping::widened(integer(), "Boolean stored as INTEGER 0/1.")
            }
            CanonicalType::Int8 | CanonicalType::Int16 | CanonicalType::Int32 => {
                TypeMapping::widened(integer(), "Stored as 64-bit INTEGER.")
            }
            CanonicalType::Int64 => TypeMapping::exact(integer()),
            CanonicalType::Float32 => TypeMapping::widened(
                NativeTypeSpec::new("real"),
                "Float32 stored as 64-bit REAL.",
            ),
            CanonicalType::Float64 => TypeMapping::exact(NativeTypeSpec::new("real")),
            CanonicalType::Decimal { precision, scale } => TypeMapping::narrowed(
                NativeTypeSpec::new("numeric"),
                format!(
                    "Decimal({},{}) may lose precision under SQLite NUMERIC affinity.",
                    precision, scale
                ),
            ),
            CanonicalType::FixedString(_) | CanonicalType::VarString(_) => {
                TypeMapping::widened(text(), "SQLite does not enforce string lengths.")
            }
            CanonicalType::Text => TypeMapping::exact(text()),
            CanonicalType::VarBinary(0) => TypeMapping::exact(NativeTypeSpec::new("blob")),
            CanonicalType::FixedBinary(_) | CanonicalType::VarBinary(_) => TypeMapping::widened(
                NativeTypeSpec::new("blob"),
                "SQLite does not enforce binary lengths.",
            ),
            CanonicalType::Date
            | CanonicalType::Time
            | CanonicalType::DateTime { .. }
            | CanonicalType::DateTimeWithOffset => {
                TypeMapping::widened(text(), "Temporal value stored as ISO-8601 text.")
            }
            CanonicalType::Uuid => TypeMapping::widened(text(), "UUID stored as text."),
            CanonicalType::Json => TypeMapping::widened(text(), "JSON stored as text."),
            CanonicalType::Enum(_) => {
                TypeMapping::widened(text(), "Enum stored as text; values are not enforced.")
            }
            CanonicalType::Array(_) => {
                TypeMapping::widened(text(), "Array stored as JSON text.")
            }
            CanonicalType::Unsupported(_) => TypeMapping::unsupported(DIALECT, canonical),
        }
    }
}
