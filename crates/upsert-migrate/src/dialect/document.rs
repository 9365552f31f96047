//! Document store value types ↔ canonical types.
//!
//! MongoDB reports BSON type aliases (`int`, `long`, `objectId`, ...) and
//! Cosmos DB reports plain JSON types (`number`, `string`, ...). Neither
//! enforces a schema, so lengths are never preserved on the way in.

use super::canonical::{CanonicalType, CanonicalTypeInfo, FromCanonical, ToCanonical, TypeMapping};
use super::native::NativeTypeSpec;

/// MongoDB BSON type converter (both directions).
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoTypes;

/// Cosmos DB JSON type converter (both directions).
#[derive(Debug, Clone, Copy, Default)]
pub struct CosmosTypes;

const MONGO: &str = "mongodb";
const COSMOS: &str = "cosmosdb";

fn array_of_json() -> CanonicalType {
    CanonicalType::Array(Box::new(CanonicalType::Json))
}

impl ToCanonical for MongoTypes {
    fn dialect_name(&self) -> &str {
        MONGO
    }

    fn to_canonical(&self, spec: &NativeTypeSpec) -> CanonicalTypeInfo {
        match spec.name.as_str() {
            "bool" | "boolean" => CanonicalTypeInfo::exact(CanonicalType::Boolean),
            "int" | "int32" => CanonicalTypeInfo::exact(CanonicalType::Int32),
            "long" | "int64" => CanonicalTypeInfo::exact(CanonicalType::Int64),
            "double" => CanonicalTypeInfo::exact(CanonicalType::Float64),
            "decimal" | "decimal128" => CanonicalTypeInfo::narrowed(
                CanonicalType::Decimal {
                    precision: 34,
                    scale: 6,
                },
                "Decimal128 has a floating scale; mapped to Decimal(34,6).",
            ),
            "string" => CanonicalTypeInfo::exact(CanonicalType::Text),
            "objectid" => CanonicalTypeInfo::widened(
                CanonicalType::FixedString(24),
                "ObjectId stored as its 24-character hex form.",
            ),
            "bindata" | "binary" => CanonicalTypeInfo::exact(CanonicalType::VarBinary(0)),
            "uuid" => CanonicalTypeInfo::exact(CanonicalType::Uuid),
            // BSON dates are UTC milliseconds
            "date" => CanonicalTypeInfo::exact(CanonicalType::DateTime { precision: 3 }),
            "timestamp" => CanonicalTypeInfo::widened(
                CanonicalType::DateTime { precision: 0 },
                "BSON timestamp is an internal replication type; copied as seconds.",
            ),
            "object" => CanonicalTypeInfo::exact(CanonicalType::Json),
            "array" => CanonicalTypeInfo::exact(array_of_json()),
            _ => CanonicalTypeInfo::unsupported(MONGO, &spec.to_string()),
        }
    }

    fn normalize(&self, spec: &NativeTypeSpec) -> NativeTypeSpec {
        match spec.name.as_str() {
            "boolean" => spec.renamed("bool"),
            "int32" => spec.renamed("int"),
            "int64" => spec.renamed("long"),
            "decimal128" => spec.renamed("decimal"),
            "binary" => spec.renamed("bindata"),
            _ => spec.clone(),
        }
    }
}

impl FromCanonical for MongoTypes {
    fn dialect_name(&self) -> &str {
        MONGO
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        let named = |name: &str| NativeTypeSpec::new(name);

        match canonical {
            CanonicalType::Boolean => TypeMapping::exact(named("bool")),
            CanonicalType::Int8 | CanonicalType::Int16 => {
                TypeMapping::widened(named("int"), "Stored as 32-bit int.")
            }
            CanonicalType::Int32 => TypeMapping::exact(named("int")),
            CanonicalType::Int64 => TypeMapping::exact(named("long")),
            CanonicalType::Float32 => TypeMapping::widened(named("double"), "Stored as double."),
            CanonicalType::Float64 => TypeMapping::exact(named("double")),
            CanonicalType::Decimal { precision, .. } if *precision <= 34 => {
                TypeMapping::exact(named("decimal"))
            }
            CanonicalType::Decimal { precision, .. } => TypeMapping::narrowed(
                named("decimal"),
                format!("Decimal128 keeps 34 digits; precision {} may round.", precision),
            ),
            CanonicalType::FixedString(_) | CanonicalType::VarString(_) => {
                TypeMapping::widened(named("string"), "String length is not enforced.")
            }
            CanonicalType::Text => TypeMapping::exact(named("string")),
            CanonicalType::VarBinary(0) => TypeMapping::exact(named("bindata")),
            CanonicalType::FixedBinary(_) | CanonicalType::VarBinary(_) => {
                TypeMapping::widened(named("bindata"), "Binary length is not enforced.")
            }
            CanonicalType::Date => TypeMapping::widened(named("date"), "Stored as midnight UTC."),
            CanonicalType::Time => {
                TypeMapping::widened(named("string"), "Time of day stored as text.")
            }
            CanonicalType::DateTime { precision } if *precision <= 3 => {
                TypeMapping::exact(named("date"))
            }
            CanonicalType::DateTime { precision } => TypeMapping::narrowed(
                named("date"),
                format!(
                    "BSON dates keep milliseconds; precision {} is truncated.",
                    precision
                ),
            ),
            CanonicalType::DateTimeWithOffset => TypeMapping::narrowed(
                named("date"),
                "BSON dates are UTC; the original offset is lost.",
            ),
            CanonicalType::Uuid => TypeMapping::exact(named("uuid")),
            CanonicalType::Json => TypeMapping::exact(named("object")),
            CanonicalType::Enum(_) => {
                TypeMapping::widened(named("string"), "Enum values are not enforced.")
            }
            CanonicalType::Array(inner) if **inner == CanonicalType::Json => {
                TypeMapping::exact(named("array"))
            }
            CanonicalType::Array(_) => {
                TypeMapping::widened(named("array"), "Array element type is not enforced.")
            }
            CanonicalType::Unsupported(_) => TypeMapping::unsupported(MONGO, canonical),
        }
    }
}

impl ToCanonical for CosmosTypes {
    fn dialect_name(&self) -> &str {
        COSMOS
    }

    fn to_canonical(&self, spec: &NativeTypeSpec) -> CanonicalTypeInfo {
        match spec.name.as_str() {
            "boolean" | "bool" => CanonicalTypeInfo::exact(CanonicalType::Boolean),
            "number" => CanonicalTypeInfo::exact(CanonicalType::Float64),
            "string" => CanonicalTypeInfo::exact(CanonicalType::Text),
            "object" => CanonicalTypeInfo::exact(CanonicalType::Json),
            "array" => CanonicalTypeInfo::exact(array_of_json()),
            _ => CanonicalTypeInfo::unsupported(COSMOS, &spec.to_string()),
        }
    }

    fn normalize(&self, spec: &NativeTypeSpec) -> NativeTypeSpec {
        match spec.name.as_str() {
            "bool" => spec.renamed("boolean"),
            _ => spec.clone(),
        }
    }
}

impl FromCanonical for CosmosTypes {
    fn dialect_name(&self) -> &str {
        COSMOS
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        let number = || NativeTypeSpec::new("number");
        let string = || NativeTypeSpec::new("string");

        match canonical {
            CanonicalType::Boolean => TypeMapping::exact(NativeTypeSpec::new("boolean")),
            CanonicalType::Int8 | CanonicalType::Int16 | CanonicalType::Int32 => {
                TypeMapping::widened(number(), "Stored as an IEEE-754 double.")
            }
            CanonicalType::Int64 => TypeMapping::narrowed(
                number(),
                "Cosmos DB numbers are doubles; integers beyond 2^53 lose precision.",
            ),
            CanonicalType::Float32 => {
                TypeMapping::widened(number(), "Stored as an IEEE-754 double.")
            }
            CanonicalType::Float64 => TypeMapping::exact(number()),
            CanonicalType::Decimal { precision, scale } => TypeMapping::narrowed(
                number(),
                format!(
                    "Decimal({},{}) stored as a double; exact decimal digits may be lost.",
                    precision, scale
                ),
            ),
            CanonicalType::Text => TypeMapping::exact(string()),
            CanonicalType::FixedString(_) | CanonicalType::VarString(_) => {
                TypeMapping::widened(string(), "String length is not enforced.")
            }
            CanonicalType::Enum(_) => {
                TypeMapping::widened(string(), "Enum values are not enforced.")
            }
            CanonicalType::FixedBinary(_) | CanonicalType::VarBinary(_) => {
                TypeMapping::widened(string(), "Binary data stored base64-encoded.")
            }
            CanonicalType::Date
            | CanonicalType::Time
            | CanonicalType::DateTime { .. }
            | CanonicalType::DateTimeWithOffset => {
                TypeMapping::widened(string(), "Temporal value stored as ISO-8601 string.")
            }
            CanonicalType::Uuid => TypeMapping::widened(string(), "UUID stored as string."),
            CanonicalType::Json => TypeMapping::exact(NativeTypeSpec::new("object")),
            CanonicalType::Array(inner) if **inner == CanonicalType::Json => {
                TypeMapping::exact(NativeTypeSpec::new("array"))
            }
            CanonicalType::Array(_) => TypeMapping::widened(
                NativeTypeSpec::new("array"),
                "Array element type is not enforced.",
            ),
            CanonicalType::Unsupported(_) => TypeMapping::unsupported(COSMOS, canonical),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::canonical::Lossiness;

    #[test]
    fn test_mongo_bson_aliases() {
        let info = MongoTypes.to_canonical(&NativeTypeSpec::parse("objectId"));
        assert_eq!(info.canonical_type, CanonicalType::FixedString(24));
        let info = MongoTypes.to_canonical(&NativeTypeSpec::parse("decimal128"));
        assert_eq!(info.lossiness, Lossiness::NarrowedRisk);
        let info = MongoTypes.to_canonical(&NativeTypeSpec::parse("regex"));
        assert_eq!(info.lossiness, Lossiness::Unsupported);
    }

    #[test]
    fn test_cosmos_int64_is_narrowed() {
        let mapping = CosmosTypes.from_canonical(&CanonicalType::Int64);
        assert_eq!(mapping.target_type.name, "number");
        assert_eq!(mapping.lossiness, Lossiness::NarrowedRisk);
        assert!(mapping.warning.unwrap().contains("2^53"));
    }

    #[test]
    fn test_cosmos_number_is_double() {
        let info = CosmosTypes.to_canonical(&NativeTypeSpec::parse("number"));
        assert_eq!(info.canonical_type, CanonicalType::Float64);
        assert_eq!(info.lossiness, Lossiness::Exact);
    }
}
