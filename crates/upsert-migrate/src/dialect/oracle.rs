//! Oracle native types ↔ canonical types.

use super::canonical::{CanonicalType, CanonicalTypeInfo, FromCanonical, ToCanonical, TypeMapping};
use super::native::NativeTypeSpec;

const DIALECT: &str = "oracle";
const MAX_NVARCHAR2: u32 = 2000;
const MAX_RAW: u32 = 2000;
const DEFAULT_TIMESTAMP_PRECISION: u8 = 6;

/// Oracle type converter (both directions).
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleTypes;

fn number_to_canonical(spec: &NativeTypeSpec) -> CanonicalTypeInfo {
    // NUMBER(*,s) leaves precision at the maximum
    let precision = match spec.args.first().map(String::as_str) {
        None => None,
        Some("*") => Some(38),
        Some(_) => spec.precision(),
    };
    let scale = spec.scale().unwrap_or(0);

    match precision {
        None => CanonicalTypeInfo::narrowed(
            CanonicalType::Decimal {
                precision: 38,
                scale: 10,
            },
            "Unconstrained NUMBER mapped to Decimal(38,10).",
        ),
        Some(p) if scale > 0 => CanonicalTypeInfo::exact(CanonicalType::Decimal {
            precision: p.clamp(1, 38) as u8,
            scale: scale.min(p) as u8,
        }),
        Some(1) => CanonicalTypeInfo::narrowed(
            CanonicalType::Boolean,
            "NUMBER(1) assumed to hold 0/1 flags; other digits are not representable.",
        ),
        Some(p) if p <= 2 => CanonicalTypeInfo::widened(
            CanonicalType::Int8,
            format!("NUMBER({}) mapped to Int8.", p),
        ),
        Some(p) if p <= 4 => CanonicalTypeInfo::widened(
            CanonicalType::Int16,
            format!("NUMBER({}) mapped to Int16.", p),
        ),
        Some(p) if p <= 9 => CanonicalTypeInfo::widened(
            CanonicalType::Int32,
            format!("NUMBER({}) mapped to Int32.", p),
        ),
        Some(p) if p <= 18 => CanonicalTypeInfo::widened(
            CanonicalType::Int64,
            format!("NUMBER({}) mapped to Int64.", p),
        ),
        Some(p) => CanonicalTypeInfo::exact(CanonicalType::Decimal {
            precision: p.min(38) as u8,
            scale: 0,
        }),
    }
}

impl ToCanonical for OracleTypes {
    fn dialect_name(&self) -> &str {
        DIALECT
    }

    fn to_canonical(&self, spec: &NativeTypeSpec) -> CanonicalTypeInfo {
        if spec.is_array {
            return CanonicalTypeInfo::unsupported(DIALECT, &spec.to_string());
        }
        let has_args = !spec.args.is_empty();

        match spec.name.as_str() {
            "number" => number_to_canonical(spec),
            "integer" | "int" | "smallint" => CanonicalTypeInfo::widened(
                CanonicalType::Decimal {
                    precision: 38,
                    scale: 0,
                },
                "Oracle INTEGER is NUMBER(38).",
            ),
            "float" => CanonicalTypeInfo::narrowed(
                CanonicalType::Float64,
                "Oracle FLOAT is a decimal float with more precision than a double.",
            ),
            "binary_float" => CanonicalTypeInfo::exact(CanonicalType::Float32),
            "binary_double" => CanonicalTypeInfo::exact(CanonicalType::Float64),

            "nchar" => CanonicalTypeInfo::exact(CanonicalType::FixedString(
                spec.length_u32().unwrap_or(1),
            )),
            "char" => CanonicalTypeInfo::widened(
                CanonicalType::FixedString(spec.length_u32().unwrap_or(1)),
                "Non-Unicode char widened to Unicode.",
            ),
            "nvarchar2" => CanonicalTypeInfo::exact(CanonicalType::VarString(
                spec.length_u32().unwrap_or(MAX_NVARCHAR2),
            )),
            "varchar2" | "varchar" => CanonicalTypeInfo::widened(
                CanonicalType::VarString(spec.length_u32().unwrap_or(4000)),
                "Non-Unicode varchar2 widened to Unicode.",
            ),
            "nclob" => CanonicalTypeInfo::exact(CanonicalType::Text),
            "clob" | "long" => CanonicalTypeInfo::widened(
                CanonicalType::Text,
                format!("{} mapped as nclob.", spec.name),
            ),
            "xmltype" => CanonicalTypeInfo::widened(CanonicalType::Text, "XMLType stored as text."),
            "rowid" | "urowid" => CanonicalTypeInfo::widened(
                CanonicalType::VarString(18),
                "ROWID values are copied as text and lose their meaning on the target.",
            ),

            "raw" => CanonicalTypeInfo::exact(CanonicalType::VarBinary(
                spec.length_u32().unwrap_or(MAX_RAW),
            )),
            "blob" => CanonicalTypeInfo::exact(CanonicalType::VarBinary(0)),
            "long raw" => CanonicalTypeInfo::widened(
                CanonicalType::VarBinary(0),
                "LONG RAW mapped as blob.",
            ),

            // Oracle DATE carries a time component down to seconds
            "date" => CanonicalTypeInfo::exact(CanonicalType::DateTime { precision: 0 }),
            "timestamp" => {
                let precision = spec
                    .precision()
                    .map(|p| p.min(9) as u8)
                    .unwrap_or(DEFAULT_TIMESTAMP_PRECISION);
                CanonicalTypeInfo::exact(CanonicalType::DateTime { precision })
            }
            "timestamp with time zone" => CanonicalTypeInfo::exact_if(
                !has_args || spec.precision() == Some(6),
                CanonicalType::DateTimeWithOffset,
                "Fractional-second precision normalized to the default.",
            ),
            "timestamp with local time zone" => CanonicalTypeInfo::widened(
                CanonicalType::DateTimeWithOffset,
                "Session-relative timestamp mapped to an explicit offset.",
            ),

            "json" => CanonicalTypeInfo::exact(CanonicalType::Json),

            _ => CanonicalTypeInfo::unsupported(DIALECT, &spec.to_string()),
        }
    }

    fn normalize(&self, spec: &NativeTypeSpec) -> NativeTypeSpec {
        match spec.name.as_str() {
            "number" if spec.scale() == Some(0) => {
                NativeTypeSpec::new("number").with_args([spec.args[0].clone()])
            }
            "varchar" => spec.renamed("varchar2"),
            "timestamp" | "timestamp with time zone" if spec.precision() == Some(6) => {
                spec.without_args()
            }
            _ => spec.clone(),
        }
    }
}

impl FromCanonical for OracleTypes {
    fn dialect_name(&self) -> &str {
        DIALECT
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        let number = |p: u8| NativeTypeSpec::sized("number", p as u32);

        match canonical {
            CanonicalType::Boolean => TypeMapping::exact(number(1)),
            CanonicalType::Int8 => TypeMapping::exact(number(3)),
            CanonicalType::Int16 => TypeMapping::exact(number(5)),
            CanonicalType::Int32 => TypeMapping::exact(number(10)),
            CanonicalType::Int64 => TypeMapping::exact(number(19)),

            CanonicalType::Float32 => TypeMapping::exact(NativeTypeSpec::new("binary_float")),
            CanonicalType::Float64 => TypeMapping::exact(NativeTypeSpec::new("binary_double")),

            CanonicalType::Decimal { precision, scale: 0 } if *precision <= 38 => {
                TypeMapping::exact(number((*precision).max(1)))
            }
            CanonicalType::Decimal { precision, scale } if *precision <= 38 => {
                TypeMapping::exact(NativeTypeSpec::decimal("number", *precision, *scale))
            }
            CanonicalType::Decimal { precision, scale } => TypeMapping::narrowed(
                NativeTypeSpec::decimal("number", 38, (*scale).min(38)),
                format!(
                    "Decimal precision {} exceeds Oracle maximum of 38.",
                    precision
                ),
            ),

            CanonicalType::FixedString(n) if *n <= MAX_NVARCHAR2 / 2 => {
                TypeMapping::exact(NativeTypeSpec::sized("nchar", *n))
            }
            CanonicalType::VarString(n) if *n <= MAX_NVARCHAR2 => {
                TypeMapping::exact(NativeTypeSpec::sized("nvarchar2", *n))
            }
            CanonicalType::FixedString(n) | CanonicalType::VarString(n) => TypeMapping::widened(
                NativeTypeSpec::new("nclob"),
                format!("String length {} exceeds Oracle limits; using nclob.", n),
            ),
            CanonicalType::Text => TypeMapping::exact(NativeTypeSpec::new("nclob")),

            CanonicalType::VarBinary(0) => TypeMapping::exact(NativeTypeSpec::new("blob")),
            CanonicalType::VarBinary(n) if *n <= MAX_RAW => {
                TypeMapping::exact(NativeTypeSpec::sized("raw", *n))
            }
            CanonicalType::FixedBinary(n) if *n <= MAX_RAW => TypeMapping::widened(
                NativeTypeSpec::sized("raw", *n),
                "RAW does not enforce a fixed length.",
            ),
            CanonicalType::FixedBinary(_) | CanonicalType::VarBinary(_) => TypeMapping::widened(
                NativeTypeSpec::new("blob"),
                "Binary length exceeds RAW limit; using blob.",
            ),

            CanonicalType::Date => TypeMapping::widened(
                NativeTypeSpec::new("date"),
                "Oracle DATE carries a time component set to midnight.",
            ),
            CanonicalType::Time => TypeMapping::widened(
                NativeTypeSpec::new("timestamp"),
                "Oracle has no time-of-day type; stored as timestamp on a fixed date.",
            ),
            CanonicalType::DateTime { precision: 0 } => {
                TypeMapping::exact(NativeTypeSpec::new("date"))
            }
            CanonicalType::DateTime { precision } if *precision == DEFAULT_TIMESTAMP_PRECISION => {
                TypeMapping::exact(NativeTypeSpec::new("timestamp"))
            }
            CanonicalType::DateTime { precision } if *precision <= 9 => {
                TypeMapping::exact(NativeTypeSpec::sized("timestamp", *precision as u32))
            }
            CanonicalType::DateTime { precision } => TypeMapping::narrowed(
                NativeTypeSpec::sized("timestamp", 9),
                format!("Precision {} exceeds Oracle maximum of 9.", precision),
            ),
            CanonicalType::DateTimeWithOffset => {
                TypeMapping::exact(NativeTypeSpec::new("timestamp with time zone"))
            }

            CanonicalType::Uuid => TypeMapping::widened(
                NativeTypeSpec::sized("raw", 16),
                "UUID stored as raw(16).",
            ),
            CanonicalType::Json => TypeMapping::exact(NativeTypeSpec::new("json")),
            CanonicalType::Enum(_) => TypeMapping::widened(
                NativeTypeSpec::sized(
                    "nvarchar2",
                    canonical.max_length().unwrap_or(1).clamp(1, MAX_NVARCHAR2),
                ),
                "Enum stored as nvarchar2; allowed values are not enforced.",
            ),
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
        OracleTypes.to_canonical(&NativeTypeSpec::parse(s))
    }

    #[test]
    fn test_number_shapes() {
        assert_eq!(to("number(1)").canonical_type, CanonicalType::Boolean);
        assert_eq!(to("number(1)").lossiness, Lossiness::NarrowedRisk);
        assert_eq!(to("number(9)").canonical_type, CanonicalType::Int32);
        assert_eq!(to("number(19)").canonical_type, CanonicalType::Decimal {
            precision: 19,
            scale: 0
        });
        assert_eq!(to("number(10,2)").canonical_type, CanonicalType::Decimal {
            precision: 10,
            scale: 2
        });
        assert_eq!(to("number").lossiness, Lossiness::NarrowedRisk);
    }

    #[test]
    fn test_date_has_time() {
        assert_eq!(
            to("DATE").canonical_type,
            CanonicalType::DateTime { precision: 0 }
        );
        assert_eq!(
            to("timestamp(3) with time zone").lossiness,
            Lossiness::WidenedSafe
        );
    }

    #[test]
    fn test_int64_target_holds_all_values() {
        let mapping = OracleTypes.from_canonical(&CanonicalType::Int64);
        assert_eq!(mapping.target_type.to_string(), "NUMBER(19)");
        assert_eq!(mapping.lossiness, Lossiness::Exact);
    }

    #[test]
    fn test_uuid_stored_as_raw() {
        let mapping = OracleTypes.from_canonical(&CanonicalType::Uuid);
        assert_eq!(mapping.target_type.to_string(), "RAW(16)");
        assert_eq!(to("raw(16)").canonical_type, CanonicalType::VarBinary(16));
    }
}
