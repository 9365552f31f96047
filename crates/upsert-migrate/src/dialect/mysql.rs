//! MySQL / MariaDB native types ↔ canonical types.

use super::canonical::{CanonicalType, CanonicalTypeInfo, FromCanonical, ToCanonical, TypeMapping};
use super::native::NativeTypeSpec;

const DIALECT: &str = "mysql";
/// VARCHAR limit in characters under utf8mb4 (65535 bytes / 4).
const MAX_VARCHAR: u32 = 16383;
const MAX_CHAR: u32 = 255;
const MAX_VARBINARY: u32 = 65535;

/// MySQL type converter (both directions).
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlTypes;

fn is_display_width_only(spec: &NativeTypeSpec) -> bool {
    matches!(
        spec.name.as_str(),
        "smallint" | "mediumint" | "int" | "integer" | "bigint"
    ) || (spec.name == "tinyint" && spec.args.first().map(String::as_str) != Some("1"))
}

impl ToCanonical for MysqlTypes {
    fn dialect_name(&self) -> &str {
        DIALECT
    }

    fn to_canonical(&self, spec: &NativeTypeSpec) -> CanonicalTypeInfo {
        if spec.is_array {
            return CanonicalTypeInfo::unsupported(DIALECT, &spec.to_string());
        }

        match spec.name.as_str() {
            // tinyint(1) is MySQL's boolean convention
            "tinyint" if spec.args.first().map(String::as_str) == Some("1") && !spec.unsigned => {
                CanonicalTypeInfo::exact(CanonicalType::Boolean)
            }
            "bool" | "boolean" => CanonicalTypeInfo::exact(CanonicalType::Boolean),
            "bit" if spec.length_u32().unwrap_or(1) == 1 => CanonicalTypeInfo::widened(
                CanonicalType::Boolean,
                "bit(1) mapped to Boolean.",
            ),
            "bit" => CanonicalTypeInfo::widened(
                CanonicalType::FixedBinary((spec.length_u32().unwrap_or(1) + 7) / 8),
                "bit(n) stored as packed binary.",
            ),

            "tinyint" if spec.unsigned => CanonicalTypeInfo::widened(
                CanonicalType::Int16,
                "Unsigned tinyint widened to Int16.",
            ),
            "tinyint" => CanonicalTypeInfo::exact(CanonicalType::Int8),
            "smallint" if spec.unsigned => CanonicalTypeInfo::widened(
                CanonicalType::Int32,
                "Unsigned smallint widened to Int32.",
            ),
            "smallint" => CanonicalTypeInfo::exact(CanonicalType::Int16),
            "mediumint" => CanonicalTypeInfo::widened(
                CanonicalType::Int32,
                "mediumint widened to Int32.",
            ),
            "int" | "integer" if spec.unsigned => CanonicalTypeInfo::widened(
                CanonicalType::Int64,
                "Unsigned int widened to Int64.",
            ),
            "int" | "integer" => CanonicalTypeInfo::exact(CanonicalType::Int32),
            "bigint" if spec.unsigned => CanonicalTypeInfo::widened(
                CanonicalType::Decimal {
                    precision: 20,
                    scale: 0,
                },
                "Unsigned bigint widened to Decimal(20,0).",
            ),
            "bigint" => CanonicalTypeInfo::exact(CanonicalType::Int64),
            "year" => CanonicalTypeInfo::widened(CanonicalType::Int16, "year stored as Int16."),

            "float" => match spec.precision() {
                Some(p) if p > 24 => CanonicalTypeInfo::exact(CanonicalType::Float64),
                _ => CanonicalTypeInfo::exact(CanonicalType::Float32),
            },
            "double" | "double precision" | "real" => {
                CanonicalTypeInfo::exact(CanonicalType::Float64)
            }

            "decimal" | "numeric" | "dec" | "fixed" => {
                let precision = spec.precision().unwrap_or(10).clamp(1, 65) as u8;
                let scale = spec.scale().unwrap_or(0).min(30) as u8;
                CanonicalTypeInfo::exact(CanonicalType::Decimal { precision, scale })
            }

            "char" => CanonicalTypeInfo::exact(CanonicalType::FixedString(
                spec.length_u32().unwrap_or(1),
            )),
            "varchar" => match spec.length_u32() {
                Some(n) => CanonicalTypeInfo::exact(CanonicalType::VarString(n)),
                None => CanonicalTypeInfo::widened(
                    CanonicalType::VarString(255),
                    "varchar without length assumed to be varchar(255).",
                ),
            },
            "tinytext" => CanonicalTypeInfo::widened(
                CanonicalType::VarString(255),
                "tinytext mapped to VarString(255).",
            ),
            "text" | "mediumtext" => CanonicalTypeInfo::widened(
                CanonicalType::Text,
                format!("{} mapped as longtext.", spec.name),
            ),
            "longtext" => CanonicalTypeInfo::exact(CanonicalType::Text),

            "binary" => CanonicalTypeInfo::exact(CanonicalType::FixedBinary(
                spec.length_u32().unwrap_or(1),
            )),
            "varbinary" => CanonicalTypeInfo::exact(CanonicalType::VarBinary(
                spec.length_u32().unwrap_or(MAX_VARBINARY),
            )),
            "tinyblob" | "blob" | "mediumblob" => CanonicalTypeInfo::widened(
                CanonicalType::VarBinary(0),
                format!("{} mapped as longblob.", spec.name),
            ),
            "longblob" => CanonicalTypeInfo::exact(CanonicalType::VarBinary(0)),

            "date" => CanonicalTypeInfo::exact(CanonicalType::Date),
            "time" => CanonicalTypeInfo::exact_if(
                spec.args.is_empty(),
                CanonicalType::Time,
                "Fractional-second precision of time normalized to the default.",
            ),
            "datetime" => {
                let precision = spec.precision().map(|p| p.min(6) as u8).unwrap_or(0);
                CanonicalTypeInfo::exact(CanonicalType::DateTime { precision })
            }
            "timestamp" => CanonicalTypeInfo::widened(
                CanonicalType::DateTimeWithOffset,
                "MySQL timestamp is stored as UTC and converted to the session time zone.",
            ),

            "json" => CanonicalTypeInfo::exact(CanonicalType::Json),
            "enum" => CanonicalTypeInfo::exact(CanonicalType::Enum(spec.args.clone())),
            "set" => CanonicalTypeInfo::widened(
                CanonicalType::Text,
                "set stored as comma-separated text.",
            ),

            _ => CanonicalTypeInfo::unsupported(DIALECT, &spec.to_string()),
        }
    }

    fn normalize(&self, spec: &NativeTypeSpec) -> NativeTypeSpec {
        let spec = if is_display_width_only(spec) {
            spec.without_args()
        } else {
            spec.clone()
        };
        match spec.name.as_str() {
            "bool" | "boolean" => NativeTypeSpec::new("tinyint").with_args(["1"]),
            "integer" => spec.renamed("int"),
            "double precision" | "real" => spec.renamed("double"),
            "numeric" | "dec" | "fixed" | "decimal" => NativeTypeSpec::decimal(
                "decimal",
                spec.precision().unwrap_or(10) as u8,
                spec.scale().unwrap_or(0) as u8,
            ),
            "datetime" if spec.precision() == Some(0) => spec.without_args(),
            _ => spec,
        }
    }
}

impl FromCanonical for MysqlTypes {
    fn dialect_name(&self) -> &str {
        DIALECT
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        match canonical {
            CanonicalType::Boolean => {
                TypeMapping::exact(NativeTypeSpec::new("tinyint").with_args(["1"]))
            }

            CanonicalType::Int8 => TypeMapping::exact(NativeTypeSpec::new("tinyint")),
            CanonicalType::Int16 => TypeMapping::exact(NativeTypeSpec::new("smallint")),
            CanonicalType::Int32 => TypeMapping::exact(NativeTypeSpec::new("int")),
            CanonicalType::Int64 => TypeMapping::exact(NativeTypeSpec::new("bigint")),

            CanonicalType::Float32 => TypeMapping::exact(NativeTypeSpec::new("float")),
            CanonicalType::Float64 => TypeMapping::exact(NativeTypeSpec::new("double")),

            CanonicalType::Decimal { precision, scale } if *precision <= 65 && *scale <= 30 => {
                TypeMapping::exact(NativeTypeSpec::decimal(
                    "decimal",
                    (*precision).max(1),
                    *scale,
                ))
            }
            CanonicalType::Decimal { precision, scale } => TypeMapping::narrowed(
                NativeTypeSpec::decimal("decimal", (*precision).min(65), (*scale).min(30)),
                format!(
                    "Decimal({},{}) exceeds MySQL limits of precision 65 / scale 30.",
                    precision, scale
                ),
            ),

            CanonicalType::FixedString(n) if *n <= MAX_CHAR => {
                TypeMapping::exact(NativeTypeSpec::sized("char", *n))
            }
            CanonicalType::FixedString(n) | CanonicalType::VarString(n) if *n > MAX_VARCHAR => {
                TypeMapping::widened(
                    NativeTypeSpec::new("longtext"),
                    format!("String length {} exceeds varchar limit; using longtext.", n),
                )
            }
            CanonicalType::FixedString(n) => TypeMapping::widened(
                NativeTypeSpec::sized("varchar", *n),
                format!("char({}) exceeds MySQL limit of 255; using varchar.", n),
            ),
            CanonicalType::VarString(n) => TypeMapping::exact(NativeTypeSpec::sized("varchar", *n)),
            CanonicalType::Text => TypeMapping::exact(NativeTypeSpec::new("longtext")),

            CanonicalType::FixedBinary(n) if *n <= MAX_CHAR => {
                TypeMapping::exact(NativeTypeSpec::sized("binary", *n))
            }
            CanonicalType::FixedBinary(n) | CanonicalType::VarBinary(n) if *n > MAX_VARBINARY => {
                TypeMapping::widened(
                    NativeTypeSpec::new("longblob"),
                    format!("Binary length {} exceeds varbinary limit; using longblob.", n),
                )
            }
            CanonicalType::FixedBinary(n) => TypeMapping::widened(
                NativeTypeSpec::sized("varbinary", *n),
                format!("binary({}) exceeds MySQL limit of 255; using varbinary.", n),
            ),
            CanonicalType::VarBinary(0) => TypeMapping::exact(NativeTypeSpec::new("longblob")),
            CanonicalType::VarBinary(n) => {
                TypeMapping::exact(NativeTypeSpec::sized("varbinary", *n))
            }

            CanonicalType::Date => TypeMapping::exact(NativeTypeSpec::new("date")),
            CanonicalType::Time => TypeMapping::exact(NativeTypeSpec::new("time")),
            CanonicalType::DateTime { precision: 0 } => {
                TypeMapping::exact(NativeTypeSpec::new("datetime"))
            }
            CanonicalType::DateTime { precision } if *precision <= 6 => {
                TypeMapping::exact(NativeTypeSpec::sized("datetime", *precision as u32))
            }
            CanonicalType::DateTime { precision } => TypeMapping::narrowed(
                NativeTypeSpec::sized("datetime", 6),
                format!(
                    "MySQL datetime keeps microseconds; precision {} is truncated.",
                    precision
                ),
            ),
            CanonicalType::DateTimeWithOffset => TypeMapping::narrowed(
                NativeTypeSpec::sized("datetime", 6),
                "MySQL has no offset-aware datetime; values are normalized to UTC and the offset is lost.",
            ),

            CanonicalType::Uuid => TypeMapping::widened(
                NativeTypeSpec::sized("char", 36),
                "UUID stored as char(36).",
            ),
            CanonicalType::Json => TypeMapping::exact(NativeTypeSpec::new("json")),
            CanonicalType::Enum(values) => {
                TypeMapping::exact(NativeTypeSpec::new("enum").with_args(values.clone()))
            }
            CanonicalType::Array(_) => TypeMapping::widened(
                NativeTypeSpec::new("json"),
                "Array stored as a JSON array.",
            ),
            CanonicalType::Unsupported(_) => TypeMapping::unsupported(DIALECT, canonical),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::canonical::Lossiness;

    fn to(s: &str) -> CanonicalTypeInfo {
        MysqlTypes.to_canonical(&NativeTypeSpec::parse(s))
    }

    #[test]
    fn test_tinyint_one_is_boolean() {
        assert_eq!(to("tinyint(1)").canonical_type, CanonicalType::Boolean);
        assert_eq!(to("tinyint(4)").canonical_type, CanonicalType::Int8);
        assert_eq!(to("tinyint unsigned").canonical_type, CanonicalType::Int16);
    }

    #[test]
    fn test_unsigned_widening() {
        let info = to("bigint(20) unsigned");
        assert_eq!(
            info.canonical_type,
            CanonicalType::Decimal {
                precision: 20,
                scale: 0
            }
        );
        assert_eq!(info.lossiness, Lossiness::WidenedSafe);
    }

    #[test]
    fn test_enum_round_trip() {
        let info = to("enum('small','large')");
        assert_eq!(
            info.canonical_type,
            CanonicalType::Enum(vec!["small".into(), "large".into()])
        );
        let mapping = MysqlTypes.from_canonical(&info.canonical_type);
        assert_eq!(mapping.target_type.to_string(), "ENUM('small','large')");
    }

    #[test]
    fn test_uuid_and_offset_targets() {
        let mapping = MysqlTypes.from_canonical(&CanonicalType::Uuid);
        assert_eq!(mapping.target_type.to_string(), "CHAR(36)");
        let mapping = MysqlTypes.from_canonical(&CanonicalType::DateTimeWithOffset);
        assert_eq!(mapping.lossiness, Lossiness::NarrowedRisk);
    }

    #[test]
    fn test_display_width_is_ignored_by_normalize() {
        assert_eq!(
            MysqlTypes.normalize(&NativeTypeSpec::parse("int(11)")),
            NativeTypeSpec::new("int")
        );
        assert_eq!(
            MysqlTypes.normalize(&NativeTypeSpec::parse("boolean")),
            NativeTypeSpec::parse("tinyint(1)")
        );
    }
}
