//! PostgreSQL native types ↔ canonical types.

use super::canonical::{
    CanonicalType, CanonicalTypeInfo, FromCanonical, Lossiness, ToCanonical, TypeMapping,
};
use super::native::NativeTypeSpec;

const DIALECT: &str = "postgres";
const DEFAULT_TIMESTAMP_PRECISION: u8 = 6;

/// PostgreSQL type converter (both directions).
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTypes;

impl PostgresTypes {
    fn element_to_canonical(&self, element: &NativeTypeSpec) -> CanonicalTypeInfo {
        let inner = self.to_canonical(element);
        if inner.lossiness == Lossiness::Unsupported {
            return CanonicalTypeInfo::unsupported(DIALECT, &format!("{}[]", element));
        }
        CanonicalTypeInfo {
            canonical_type: CanonicalType::Array(Box::new(inner.canonical_type)),
            lossiness: inner.lossiness,
            warning: inner.warning,
        }
    }
}

impl ToCanonical for PostgresTypes {
    fn dialect_name(&self) -> &str {
        DIALECT
    }

    fn to_canonical(&self, spec: &NativeTypeSpec) -> CanonicalTypeInfo {
        if spec.is_array {
            return self.element_to_canonical(&spec.element());
        }
        // information_schema reports arrays as _int4, _text, ...
        if let Some(element) = spec.name.strip_prefix('_') {
            return self.element_to_canonical(&NativeTypeSpec::new(element));
        }
        let has_args = !spec.args.is_empty();

        match spec.name.as_str() {
            "boolean" | "bool" => CanonicalTypeInfo::exact(CanonicalType::Boolean),

            "smallint" | "int2" => CanonicalTypeInfo::exact(CanonicalType::Int16),
            "integer" | "int" | "int4" => CanonicalTypeInfo::exact(CanonicalType::Int32),
            "bigint" | "int8" => CanonicalTypeInfo::exact(CanonicalType::Int64),
            "smallserial" | "serial2" => CanonicalTypeInfo::widened(
                CanonicalType::Int16,
                "Sequence default of smallserial is not carried over.",
            ),
            "serial" | "serial4" => CanonicalTypeInfo::widened(
                CanonicalType::Int32,
                "Sequence default of serial is not carried over.",
            ),
            "bigserial" | "serial8" => CanonicalTypeInfo::widened(
                CanonicalType::Int64,
                "Sequence default of bigserial is not carried over.",
            ),

            "real" | "float4" => CanonicalTypeInfo::exact(CanonicalType::Float32),
            "double precision" | "float8" => CanonicalTypeInfo::exact(CanonicalType::Float64),
            "float" => match spec.precision() {
                Some(n) if n <= 24 => CanonicalTypeInfo::exact(CanonicalType::Float32),
                _ => CanonicalTypeInfo::exact(CanonicalType::Float64),
            },

            "numeric" | "decimal" => match spec.precision() {
                Some(p) if p <= u8::MAX as u32 => {
                    let precision = p.max(1) as u8;
                    let scale = spec.scale().unwrap_or(0).min(p) as u8;
                    CanonicalTypeInfo::exact(CanonicalType::Decimal { precision, scale })
                }
                Some(p) => CanonicalTypeInfo::narrowed(
                    CanonicalType::Decimal {
                        precision: u8::MAX,
                        scale: spec.scale().unwrap_or(0).min(u8::MAX as u32) as u8,
                    },
                    format!("numeric({}) exceeds canonical decimal precision.", p),
                ),
                None => CanonicalTypeInfo::narrowed(
                    CanonicalType::Decimal {
                        precision: 38,
                        scale: 10,
                    },
                    "Unconstrained numeric mapped to Decimal(38,10).",
                ),
            },
            "money" => CanonicalTypeInfo::widened(
                CanonicalType::Decimal {
                    precision: 19,
                    scale: 2,
                },
                "PostgreSQL money mapped to Decimal(19,2).",
            ),

            "character" | "char" | "bpchar" => CanonicalTypeInfo::exact(
                CanonicalType::FixedString(spec.length_u32().unwrap_or(1)),
            ),
            "character varying" | "varchar" => match spec.length_u32() {
                Some(n) => CanonicalTypeInfo::exact(CanonicalType::VarString(n)),
                None => CanonicalTypeInfo::widened(
                    CanonicalType::Text,
                    "Unbounded varchar mapped as text.",
                ),
            },
            "text" => CanonicalTypeInfo::exact(CanonicalType::Text),
            "citext" => CanonicalTypeInfo::widened(
                CanonicalType::Text,
                "Case-insensitive comparison of citext is not preserved.",
            ),
            "xml" => CanonicalTypeInfo::widened(CanonicalType::Text, "XML stored as text."),
            "inet" | "cidr" => CanonicalTypeInfo::widened(
                CanonicalType::VarString(43),
                "Network address stored as text.",
            ),
            "macaddr" => CanonicalTypeInfo::widened(
                CanonicalType::VarString(17),
                "MAC address stored as text.",
            ),

            "bytea" => CanonicalTypeInfo::exact(CanonicalType::VarBinary(0)),

            "date" => CanonicalTypeInfo::exact(CanonicalType::Date),
            "time" | "time without time zone" => CanonicalTypeInfo::exact_if(
                !has_args || spec.precision() == Some(6),
                CanonicalType::Time,
                "Fractional-second precision of time normalized to the default.",
            ),
            "timetz" | "time with time zone" => CanonicalTypeInfo::narrowed(
                CanonicalType::Time,
                "Time zone offset of timetz is dropped.",
            ),
            "timestamp" | "timestamp without time zone" => {
                let precision = spec
                    .precision()
                    .map(|p| p.min(6) as u8)
                    .unwrap_or(DEFAULT_TIMESTAMP_PRECISION);
                CanonicalTypeInfo::exact(CanonicalType::DateTime { precision })
            }
            "timestamptz" | "timestamp with time zone" => CanonicalTypeInfo::exact_if(
                !has_args || spec.precision() == Some(6),
                CanonicalType::DateTimeWithOffset,
                "Fractional-second precision of timestamptz normalized to the default.",
            ),

            "uuid" => CanonicalTypeInfo::exact(CanonicalType::Uuid),
            "jsonb" => CanonicalTypeInfo::exact(CanonicalType::Json),
            "json" => CanonicalTypeInfo::widened(
                CanonicalType::Json,
                "json is normalized like jsonb; key order and duplicate keys are not kept.",
            ),

            _ => CanonicalTypeInfo::unsupported(DIALECT, &spec.to_string()),
        }
    }

    fn normalize(&self, spec: &NativeTypeSpec) -> NativeTypeSpec {
        let normalized = match spec.name.as_str() {
            "bool" => spec.renamed("boolean"),
            "int2" => spec.renamed("smallint"),
            "int" | "int4" => spec.renamed("integer"),
            "int8" => spec.renamed("bigint"),
            "float4" => spec.renamed("real"),
            "float8" => spec.renamed("double precision"),
            "float" => match spec.precision() {
                Some(n) if n <= 24 => NativeTypeSpec::new("real"),
                _ => NativeTypeSpec::new("double precision"),
            },
            "decimal" => spec.renamed("numeric"),
            "character" | "bpchar" => spec.renamed("char"),
            "character varying" => spec.renamed("varchar"),
            "time without time zone" => spec.renamed("time"),
            "timestamp without time zone" => spec.renamed("timestamp"),
            "timestamp with time zone" => spec.renamed("timestamptz"),
            _ => spec.clone(),
        };
        match normalized.name.as_str() {
            "numeric" if normalized.args.len() == 1 => {
                normalized.with_args_appended("0")
            }
            "time" | "timestamp" | "timestamptz" if normalized.precision() == Some(6) => {
                normalized.without_args()
            }
            _ => normalized,
        }
    }
}

impl FromCanonical for PostgresTypes {
    fn dialect_name(&self) -> &str {
        DIALECT
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        match canonical {
            CanonicalType::Boolean => TypeMapping::exact(NativeTypeSpec::new("boolean")),

            CanonicalType::Int8 => TypeMapping::widened(
                NativeTypeSpec::new("smallint"),
                "PostgreSQL has no 8-bit integer; using smallint.",
            ),
            CanonicalType::Int16 => TypeMapping::exact(NativeTypeSpec::new("smallint")),
            CanonicalType::Int32 => TypeMapping::exact(NativeTypeSpec::new("integer")),
            CanonicalType::Int64 => TypeMapping::exact(NativeTypeSpec::new("bigint")),

            CanonicalType::Float32 => TypeMapping::exact(NativeTypeSpec::new("real")),
            CanonicalType::Float64 => TypeMapping::exact(NativeTypeSpec::new("double precision")),

            CanonicalType::Decimal { precision, scale } => TypeMapping::exact(
                NativeTypeSpec::decimal("numeric", (*precision).max(1), *scale),
            ),

            CanonicalType::FixedString(n) => TypeMapping::exact(NativeTypeSpec::sized("char", *n)),
            CanonicalType::VarString(n) => {
                TypeMapping::exact(NativeTypeSpec::sized("varchar", *n))
            }
            CanonicalType::Text => TypeMapping::exact(NativeTypeSpec::new("text")),

            CanonicalType::FixedBinary(n) => TypeMapping::widened(
                NativeTypeSpec::new("bytea"),
                format!("bytea does not enforce the fixed length {}.", n),
            ),
            CanonicalType::VarBinary(0) => TypeMapping::exact(NativeTypeSpec::new("bytea")),
            CanonicalType::VarBinary(n) => TypeMapping::widened(
                NativeTypeSpec::new("bytea"),
                format!("bytea does not enforce the maximum length {}.", n),
            ),

            CanonicalType::Date => TypeMapping::exact(NativeTypeSpec::new("date")),
            CanonicalType::Time => TypeMapping::exact(NativeTypeSpec::new("time")),
            CanonicalType::DateTime { precision } if *precision == DEFAULT_TIMESTAMP_PRECISION => {
                TypeMapping::exact(NativeTypeSpec::new("timestamp"))
            }
            CanonicalType::DateTime { precision } if *precision < DEFAULT_TIMESTAMP_PRECISION => {
                TypeMapping::exact(NativeTypeSpec::sized("timestamp", *precision as u32))
            }
            CanonicalType::DateTime { precision } => TypeMapping::narrowed(
                NativeTypeSpec::new("timestamp"),
                format!(
                    "PostgreSQL timestamps keep microseconds; precision {} is truncated.",
                    precision
                ),
            ),
            CanonicalType::DateTimeWithOffset => {
                TypeMapping::exact(NativeTypeSpec::new("timestamptz"))
            }

            CanonicalType::Uuid => TypeMapping::exact(NativeTypeSpec::new("uuid")),
            CanonicalType::Json => TypeMapping::exact(NativeTypeSpec::new("jsonb")),
            CanonicalType::Enum(_) => TypeMapping::widened(
                NativeTypeSpec::sized("varchar", canonical.max_length().unwrap_or(1).max(1)),
                "Enum stored as varchar; allowed values are not enforced.",
            ),
            CanonicalType::Array(inner) => {
                let element = self.from_canonical(inner);
                if element.lossiness == Lossiness::Unsupported {
                    return TypeMapping::unsupported(DIALECT, canonical);
                }
                TypeMapping {
                    target_type: NativeTypeSpec::array_of(element.target_type),
                    lossiness: element.lossiness,
                    warning: element.warning,
                }
            }
            CanonicalType::Unsupported(_) => TypeMapping::unsupported(DIALECT, canonical),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to(s: &str) -> CanonicalTypeInfo {
        PostgresTypes.to_canonical(&NativeTypeSpec::parse(s))
    }

    #[test]
    fn test_aliases() {
        assert_eq!(to("int4").canonical_type, CanonicalType::Int32);
        assert_eq!(to("float8").canonical_type, CanonicalType::Float64);
        assert_eq!(to("character varying(30)").canonical_type, CanonicalType::VarString(30));
        assert_eq!(
            PostgresTypes.normalize(&NativeTypeSpec::parse("int4")),
            NativeTypeSpec::new("integer")
        );
    }

    #[test]
    fn test_arrays() {
        assert_eq!(
            to("integer[]").canonical_type,
            CanonicalType::Array(Box::new(CanonicalType::Int32))
        );
        assert_eq!(
            to("_text").canonical_type,
            CanonicalType::Array(Box::new(CanonicalType::Text))
        );
        let mapping =
            PostgresTypes.from_canonical(&CanonicalType::Array(Box::new(CanonicalType::Uuid)));
        assert_eq!(mapping.target_type.to_string(), "UUID[]");
        assert_eq!(to("tsvector[]").lossiness, Lossiness::Unsupported);
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(
            to("timestamp").canonical_type,
            CanonicalType::DateTime { precision: 6 }
        );
        assert_eq!(
            to("timestamp(3) without time zone").canonical_type,
            CanonicalType::DateTime { precision: 3 }
        );
        assert_eq!(
            to("timestamp with time zone").canonical_type,
            CanonicalType::DateTimeWithOffset
        );
        assert_eq!(to("timetz").lossiness, Lossiness::NarrowedRisk);
    }

    #[test]
    fn test_unconstrained_numeric_is_narrowed() {
        let info = to("numeric");
        assert_eq!(info.lossiness, Lossiness::NarrowedRisk);
        assert!(info.warning.is_some());
    }

    #[test]
    fn test_from_canonical_int8_widens() {
        let mapping = PostgresTypes.from_canonical(&CanonicalType::Int8);
        assert_eq!(mapping.target_type.to_string(), "SMALLINT");
        assert_eq!(mapping.lossiness, Lossiness::WidenedSafe);
    }
}
