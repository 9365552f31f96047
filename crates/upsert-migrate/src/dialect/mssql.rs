//! SQL Server native types ↔ canonical types.

use super::canonical::{CanonicalType, CanonicalTypeInfo, FromCanonical, ToCanonical, TypeMapping};
use super::native::NativeTypeSpec;

const DIALECT: &str = "mssql";
/// Longest NCHAR/NVARCHAR before MAX is required.
const MAX_NVARCHAR: u32 = 4000;
const MAX_VARBINARY: u32 = 8000;
const DEFAULT_DATETIME2_PRECISION: u8 = 7;

/// SQL Server type converter (both directions).
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlTypes;

impl ToCanonical for MssqlTypes {
    fn dialect_name(&self) -> &str {
        DIALECT
    }

    fn to_canonical(&self, spec: &NativeTypeSpec) -> CanonicalTypeInfo {
        if spec.is_array {
            return CanonicalTypeInfo::unsupported(DIALECT, &spec.to_string());
        }
        let has_args = !spec.args.is_empty();

        match spec.name.as_str() {
            // Boolean
            "bit" => CanonicalTypeInfo::exact(CanonicalType::Boolean),

            // Integer types
            "tinyint" => CanonicalTypeInfo::widened(
                CanonicalType::Int16,
                "MSSQL tinyint is unsigned; widened to Int16.",
            ),
            "smallint" => CanonicalTypeInfo::exact(CanonicalType::Int16),
            "int" | "integer" => CanonicalTypeInfo::exact(CanonicalType::Int32),
            "bigint" => CanonicalTypeInfo::exact(CanonicalType::Int64),

            // Floating point
            "real" => CanonicalTypeInfo::exact(CanonicalType::Float32),
            "float" => match spec.precision() {
                None => CanonicalTypeInfo::exact(CanonicalType::Float64),
                Some(n) if n <= 24 => CanonicalTypeInfo::exact(CanonicalType::Float32),
                Some(_) => CanonicalTypeInfo::exact(CanonicalType::Float64),
            },

            // Decimal/numeric
            "decimal" | "numeric" | "dec" => {
                let precision = spec.precision().unwrap_or(18).clamp(1, 38) as u8;
                let scale = spec.scale().unwrap_or(0).min(precision as u32) as u8;
                CanonicalTypeInfo::exact(CanonicalType::Decimal { precision, scale })
            }
            "money" => CanonicalTypeInfo::widened(
                CanonicalType::Decimal {
                    precision: 19,
                    scale: 4,
                },
                "MSSQL money mapped to Decimal(19,4).",
            ),
            "smallmoney" => CanonicalTypeInfo::widened(
                CanonicalType::Decimal {
                    precision: 10,
                    scale: 4,
                },
                "MSSQL smallmoney mapped to Decimal(10,4).",
            ),

            // String types
            "nchar" => CanonicalTypeInfo::exact(CanonicalType::FixedString(
                spec.length_u32().unwrap_or(1),
            )),
            "char" => CanonicalTypeInfo::widened(
                CanonicalType::FixedString(spec.length_u32().unwrap_or(1)),
                "Non-Unicode char widened to Unicode.",
            ),
            "nvarchar" => match spec.length_u32() {
                _ if spec.is_max() => CanonicalTypeInfo::exact(CanonicalType::Text),
                Some(n) => CanonicalTypeInfo::exact(CanonicalType::VarString(n)),
                None => CanonicalTypeInfo::widened(
                    CanonicalType::VarString(255),
                    "nvarchar without length assumed to be nvarchar(255).",
                ),
            },
            "varchar" => {
                let canonical = match spec.length_u32() {
                    _ if spec.is_max() => CanonicalType::Text,
                    Some(n) => CanonicalType::VarString(n),
                    None => CanonicalType::VarString(255),
                };
                CanonicalTypeInfo::widened(canonical, "Non-Unicode varchar widened to Unicode.")
            }
            "ntext" | "text" => CanonicalTypeInfo::widened(
                CanonicalType::Text,
                "Deprecated MSSQL text type mapped as nvarchar(max).",
            ),
            "xml" => CanonicalTypeInfo::widened(CanonicalType::Text, "XML stored as text."),

            // Binary types
            "binary" => CanonicalTypeInfo::exact(CanonicalType::FixedBinary(
                spec.length_u32().unwrap_or(1),
            )),
            "varbinary" => match spec.length_u32() {
                _ if spec.is_max() => CanonicalTypeInfo::exact(CanonicalType::VarBinary(0)),
                Some(n) => CanonicalTypeInfo::exact(CanonicalType::VarBinary(n)),
                None => CanonicalTypeInfo::widened(
                    CanonicalType::VarBinary(255),
                    "varbinary without length assumed to be varbinary(255).",
                ),
            },
            "image" => CanonicalTypeInfo::widened(
                CanonicalType::VarBinary(0),
                "Deprecated MSSQL image mapped as varbinary(max).",
            ),
            "rowversion" | "timestamp" => CanonicalTypeInfo::widened(
                CanonicalType::FixedBinary(8),
                "rowversion is generated by the server; copied as binary(8).",
            ),

            // Date/time types
            "date" => CanonicalTypeInfo::exact(CanonicalType::Date),
            "time" => CanonicalTypeInfo::exact_if(
                !has_args || spec.precision() == Some(7),
                CanonicalType::Time,
                "Fractional-second precision of time normalized to the default.",
            ),
            "datetime" => CanonicalTypeInfo::widened(
                CanonicalType::DateTime { precision: 3 },
                "MSSQL datetime has 1/300s resolution; mapped to DateTime(3).",
            ),
            "smalldatetime" => CanonicalTypeInfo::widened(
                CanonicalType::DateTime { precision: 0 },
                "MSSQL smalldatetime has minute resolution.",
            ),
            "datetime2" => {
                let precision = spec
                    .precision()
                    .map(|p| p.min(7) as u8)
                    .unwrap_or(DEFAULT_DATETIME2_PRECISION);
                CanonicalTypeInfo::exact(CanonicalType::DateTime { precision })
            }
            "datetimeoffset" => CanonicalTypeInfo::exact_if(
                !has_args || spec.precision() == Some(7),
                CanonicalType::DateTimeWithOffset,
                "Fractional-second precision of datetimeoffset normalized to the default.",
            ),

            // GUID
            "uniqueidentifier" => CanonicalTypeInfo::exact(CanonicalType::Uuid),

            _ => CanonicalTypeInfo::unsupported(DIALECT, &spec.to_string()),
        }
    }

    fn normalize(&self, spec: &NativeTypeSpec) -> NativeTypeSpec {
        match spec.name.as_str() {
            "integer" => spec.renamed("int"),
            "numeric" | "dec" | "decimal" => NativeTypeSpec::decimal(
                "decimal",
                spec.precision().unwrap_or(18) as u8,
                spec.scale().unwrap_or(0) as u8,
            ),
            "float" => match spec.precision() {
                Some(n) if n <= 24 => NativeTypeSpec::new("real"),
                _ => NativeTypeSpec::new("float"),
            },
            "datetime2" if spec.precision() == Some(DEFAULT_DATETIME2_PRECISION as u32) => {
                spec.without_args()
            }
            "time" | "datetimeoffset" if spec.precision() == Some(7) => spec.without_args(),
            _ => spec.clone(),
        }
    }
}

impl FromCanonical for MssqlTypes {
    fn dialect_name(&self) -> &str {
        DIALECT
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        match canonical {
            CanonicalType::Boolean => TypeMapping::exact(NativeTypeSpec::new("bit")),

            CanonicalType::Int8 => TypeMapping::widened(
                NativeTypeSpec::new("smallint"),
                "MSSQL tinyint is unsigned; using smallint for Int8.",
            ),
            CanonicalType::Int16 => TypeMapping::exact(NativeTypeSpec::new("smallint")),
            CanonicalType::Int32 => TypeMapping::exact(NativeTypeSpec::new("int")),
            CanonicalType::Int64 => TypeMapping::exact(NativeTypeSpec::new("bigint")),

            CanonicalType::Float32 => TypeMapping::exact(NativeTypeSpec::new("real")),
            CanonicalType::Float64 => TypeMapping::exact(NativeTypeSpec::new("float")),

            CanonicalType::Decimal { precision, scale } => {
                if *precision <= 38 {
                    TypeMapping::exact(NativeTypeSpec::decimal(
                        "decimal",
                        (*precision).max(1),
                        *scale,
                    ))
                } else {
                    TypeMapping::narrowed(
                        NativeTypeSpec::decimal("decimal", 38, (*scale).min(38)),
                        format!(
                            "Decimal precision {} exceeds MSSQL maximum of 38.",
                            precision
                        ),
                    )
                }
            }

            CanonicalType::FixedString(n) if *n <= MAX_NVARCHAR => {
                TypeMapping::exact(NativeTypeSpec::sized("nchar", *n))
            }
            CanonicalType::FixedString(n) => TypeMapping::widened(
                NativeTypeSpec::max("nvarchar"),
                format!("nchar({}) exceeds MSSQL limit; using nvarchar(max).", n),
            ),
            CanonicalType::VarString(n) if *n <= MAX_NVARCHAR => {
                TypeMapping::exact(NativeTypeSpec::sized("nvarchar", *n))
            }
            CanonicalType::VarString(n) => TypeMapping::widened(
                NativeTypeSpec::max("nvarchar"),
                format!("nvarchar({}) exceeds MSSQL limit; using nvarchar(max).", n),
            ),
            CanonicalType::Text => TypeMapping::exact(NativeTypeSpec::max("nvarchar")),

            CanonicalType::FixedBinary(n) if *n <= MAX_VARBINARY => {
                TypeMapping::exact(NativeTypeSpec::sized("binary", *n))
            }
            CanonicalType::FixedBinary(_) => TypeMapping::widened(
                NativeTypeSpec::max("varbinary"),
                "Large fixed binary stored as varbinary(max).",
            ),
            CanonicalType::VarBinary(n) if *n > 0 && *n <= MAX_VARBINARY => {
                TypeMapping::exact(NativeTypeSpec::sized("varbinary", *n))
            }
            CanonicalType::VarBinary(0) => TypeMapping::exact(NativeTypeSpec::max("varbinary")),
            CanonicalType::VarBinary(_) => TypeMapping::widened(
                NativeTypeSpec::max("varbinary"),
                "Large binary stored as varbinary(max).",
            ),

            CanonicalType::Date => TypeMapping::exact(NativeTypeSpec::new("date")),
            CanonicalType::Time => TypeMapping::exact(NativeTypeSpec::new("time")),
            CanonicalType::DateTime { precision } if *precision == DEFAULT_DATETIME2_PRECISION => {
                TypeMapping::exact(NativeTypeSpec::new("datetime2"))
            }
            CanonicalType::DateTime { precision } if *precision < DEFAULT_DATETIME2_PRECISION => {
                TypeMapping::exact(NativeTypeSpec::sized("datetime2", *precision as u32))
            }
            CanonicalType::DateTime { precision } => TypeMapping::narrowed(
                NativeTypeSpec::new("datetime2"),
                format!(
                    "Fractional seconds beyond 7 digits are truncated (source precision {}).",
                    precision
                ),
            ),
            CanonicalType::DateTimeWithOffset => {
                TypeMapping::exact(NativeTypeSpec::new("datetimeoffset"))
            }

            CanonicalType::Uuid => TypeMapping::exact(NativeTypeSpec::new("uniqueidentifier")),
            CanonicalType::Json => TypeMapping::widened(
                NativeTypeSpec::max("nvarchar"),
                "JSON stored as nvarchar(max).",
            ),
            CanonicalType::Enum(values) => {
                let width = canonical.max_length().unwrap_or(1).max(1);
                TypeMapping::widened(
                    NativeTypeSpec::sized("nvarchar", width.min(MAX_NVARCHAR)),
                    format!(
                        "Enum of {} values stored as nvarchar; allowed values are not enforced.",
                        values.len()
                    ),
                )
            }
            CanonicalType::Array(_) => TypeMapping::widened(
                NativeTypeSpec::max("nvarchar"),
                "Array stored as JSON text in nvarchar(max).",
            ),
            CanonicalType::Unsupported(_) => TypeMapping::unsupported(DIALECT, canonical),
        }
    }
}
