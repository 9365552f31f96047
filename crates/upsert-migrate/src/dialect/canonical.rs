//! Hub-and-spoke canonical type system for database type mapping.
//!
//! Every native column type is translated into a [`CanonicalType`], and every
//! target column type is chosen from one. With seven engines this needs 14
//! conversions instead of 42 direct ones:
//! - `ToCanonical`: native type → canonical type
//! - `FromCanonical`: canonical type → native type
//!
//! ```text
//! Source DB  →  CanonicalType  →  Target DB
//!   MSSQL    →     Int32       →   MySQL
//!   Oracle   →  Decimal(10,2)  →   CosmosDB
//! ```
//!
//! Each step carries a [`Lossiness`] tag. A composed mapping is as lossy as
//! its worst step.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::native::NativeTypeSpec;

/// Canonical type representation for cross-database type mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalType {
    // ===== Boolean =====
    Boolean,

    // ===== Integer Types =====
    /// 8-bit signed integer.
    Int8,
    Int16,
    Int32,
    Int64,

    // ===== Floating Point =====
    Float32,
    Float64,

    /// Exact decimal. Precision is total digits, scale is digits after the point.
    Decimal { precision: u8, scale: u8 },

    // ===== String Types =====
    /// Fixed-length Unicode string.
    FixedString(u32),
    /// Variable-length Unicode string with a maximum length in characters.
    VarString(u32),
    /// Unbounded Unicode text.
    Text,

    // ===== Binary Types =====
    FixedBinary(u32),
    /// Variable-length binary data. 0 means unbounded.
    VarBinary(u32),

    // ===== Date/Time Types =====
    Date,
    /// Time of day without date or zone.
    Time,
    /// Date and time without zone, with fractional-second digits.
    DateTime { precision: u8 },
    /// Date and time with a UTC offset.
    DateTimeWithOffset,

    // ===== Special Types =====
    Uuid,
    Json,
    /// Closed set of string values.
    Enum(Vec<String>),
    Array(Box<CanonicalType>),

    /// Type that has no canonical representation.
    /// Contains the original type name for messages.
    Unsupported(String),
}

impl Default for CanonicalType {
    fn default() -> Self {
        CanonicalType::Unsupported(String::new())
    }
}

impl CanonicalType {
    /// Type family name without parameters, used to separate "different type"
    /// from "same type, different length/precision" in schema diffs.
    pub fn family(&self) -> &'static str {
        match self {
            CanonicalType::Boolean => "Boolean",
            CanonicalType::Int8 => "Int8",
            CanonicalType::Int16 => "Int16",
            CanonicalType::Int32 => "Int32",
            CanonicalType::Int64 => "Int64",
            CanonicalType::Float32 => "Float32",
            CanonicalType::Float64 => "Float64",
            CanonicalType::Decimal { .. } => "Decimal",
            CanonicalType::FixedString(_) => "FixedString",
            CanonicalType::VarString(_) => "VarString",
            CanonicalType::Text => "Text",
            CanonicalType::FixedBinary(_) => "FixedBinary",
            CanonicalType::VarBinary(_) => "VarBinary",
            CanonicalType::Date => "Date",
            CanonicalType::Time => "Time",
            CanonicalType::DateTime { .. } => "DateTime",
            CanonicalType::DateTimeWithOffset => "DateTimeWithOffset",
            CanonicalType::Uuid => "Uuid",
            CanonicalType::Json => "Json",
            CanonicalType::Enum(_) => "Enum",
            CanonicalType::Array(_) => "Array",
            CanonicalType::Unsupported(_) => "Unsupported",
        }
    }

    /// Maximum length in characters/bytes, if the type is length-bounded.
    pub fn max_length(&self) -> Option<u32> {
        match self {
            CanonicalType::FixedString(n)
            | CanonicalType::VarString(n)
            | CanonicalType::FixedBinary(n) => Some(*n),
            CanonicalType::VarBinary(n) if *n > 0 => Some(*n),
            CanonicalType::Enum(values) => values.iter().map(|v| v.chars().count() as u32).max(),
            _ => None,
        }
    }

    /// Numeric precision (decimal digits) or fractional-second digits.
    pub fn precision(&self) -> Option<u8> {
        match self {
            CanonicalType::Decimal { precision, .. } => Some(*precision),
            CanonicalType::DateTime { precision } => Some(*precision),
            _ => None,
        }
    }

    pub fn scale(&self) -> Option<u8> {
        match self {
            CanonicalType::Decimal { scale, .. } => Some(*scale),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            CanonicalType::Int8 | CanonicalType::Int16 | CanonicalType::Int32 | CanonicalType::Int64
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self,
            CanonicalType::FixedString(_)
                | CanonicalType::VarString(_)
                | CanonicalType::Text
                | CanonicalType::Enum(_)
        )
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, CanonicalType::Unsupported(_))
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalType::Decimal { precision, scale } => {
                write!(f, "Decimal({},{})", precision, scale)
            }
            CanonicalType::FixedString(n) => write!(f, "FixedString({})", n),
            CanonicalType::VarString(n) => write!(f, "VarString({})", n),
            CanonicalType::FixedBinary(n) => write!(f, "FixedBinary({})", n),
            CanonicalType::VarBinary(0) => write!(f, "VarBinary(max)"),
            CanonicalType::VarBinary(n) => write!(f, "VarBinary({})", n),
            CanonicalType::DateTime { precision } => write!(f, "DateTime({})", precision),
            CanonicalType::Enum(vals) => write!(f, "Enum({})", vals.join("|")),
            CanonicalType::Array(inner) => write!(f, "Array({})", inner),
            CanonicalType::Unsupported(name) => write!(f, "Unsupported({})", name),
            other => f.write_str(other.family()),
        }
    }
}

/// How faithfully a type conversion preserves precision, range and length.
///
/// Ordered from best to worst, so the lossiness of a chain of conversions is
/// the maximum of its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lossiness {
    /// Values and the type itself survive unchanged.
    Exact,
    /// Every value survives, but the type is wider or differently named.
    WidenedSafe,
    /// Some values may be truncated, rounded or out of range.
    NarrowedRisk,
    /// No representation exists.
    Unsupported,
}

impl Lossiness {
    /// Lossiness of two conversions applied in sequence.
    pub fn combine(self, other: Lossiness) -> Lossiness {
        self.max(other)
    }

    /// Whether values may be altered by the conversion.
    pub fn is_lossy(&self) -> bool {
        matches!(self, Lossiness::NarrowedRisk | Lossiness::Unsupported)
    }
}

impl fmt::Display for Lossiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lossiness::Exact => "exact",
            Lossiness::WidenedSafe => "widened_safe",
            Lossiness::NarrowedRisk => "narrowed_risk",
            Lossiness::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// Result of converting a native type to canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTypeInfo {
    pub canonical_type: CanonicalType,
    pub lossiness: Lossiness,
    /// Warning message when the conversion is not exact.
    pub warning: Option<String>,
}

impl CanonicalTypeInfo {
    /// Create an exact conversion.
    pub fn exact(canonical_type: CanonicalType) -> Self {
        Self {
            canonical_type,
            lossiness: Lossiness::Exact,
            warning: None,
        }
    }

    /// Create a widening conversion with an explanatory note.
    pub fn widened(canonical_type: CanonicalType, note: impl Into<String>) -> Self {
        Self {
            canonical_type,
            lossiness: Lossiness::WidenedSafe,
            warning: Some(note.into()),
        }
    }

    /// Create a conversion that may lose data, with a warning.
    pub fn narrowed(canonical_type: CanonicalType, warning: impl Into<String>) -> Self {
        Self {
            canonical_type,
            lossiness: Lossiness::NarrowedRisk,
            warning: Some(warning.into()),
        }
    }

    /// Exact when `condition` holds, otherwise widened with `note`.
    pub fn exact_if(condition: bool, canonical_type: CanonicalType, note: &str) -> Self {
        if condition {
            Self::exact(canonical_type)
        } else {
            Self::widened(canonical_type, note)
        }
    }

    /// Unknown native type. Never an error; callers decide what to do.
    pub fn unsupported(dialect: &str, native: &str) -> Self {
        Self {
            canonical_type: CanonicalType::Unsupported(native.to_string()),
            lossiness: Lossiness::Unsupported,
            warning: Some(format!("Unknown {} type '{}'.", dialect, native)),
        }
    }
}

/// Result of converting a canonical type to a native type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMapping {
    pub target_type: NativeTypeSpec,
    pub lossiness: Lossiness,
    pub warning: Option<String>,
}

impl TypeMapping {
    pub fn exact(target_type: NativeTypeSpec) -> Self {
        Self {
            target_type,
            lossiness: Lossiness::Exact,
            warning: None,
        }
    }

    pub fn widened(target_type: NativeTypeSpec, note: impl Into<String>) -> Self {
        Self {
            target_type,
            lossiness: Lossiness::WidenedSafe,
            warning: Some(note.into()),
        }
    }

    pub fn narrowed(target_type: NativeTypeSpec, warning: impl Into<String>) -> Self {
        Self {
            target_type,
            lossiness: Lossiness::NarrowedRisk,
            warning: Some(warning.into()),
        }
    }

    pub fn unsupported(dialect: &str, canonical: &CanonicalType) -> Self {
        let name = match canonical {
            CanonicalType::Unsupported(native) if !native.is_empty() => native.clone(),
            other => other.to_string(),
        };
        Self {
            target_type: NativeTypeSpec::new(name),
            lossiness: Lossiness::Unsupported,
            warning: Some(format!("{} has no {} representation.", canonical, dialect)),
        }
    }

    /// Fold the lossiness and warning of an earlier conversion step into this one.
    pub fn absorb(&mut self, lossiness: Lossiness, warning: Option<&str>) {
        self.lossiness = self.lossiness.combine(lossiness);
        self.warning = match (warning, self.warning.take()) {
            (Some(first), Some(second)) => Some(format!("{} {}", first, second)),
            (Some(first), None) => Some(first.to_string()),
            (None, second) => second,
        };
    }
}

/// Convert native database types to canonical types.
pub trait ToCanonical: Send + Sync {
    /// Get the dialect name (e.g., "mssql", "postgres", "mysql").
    fn dialect_name(&self) -> &str;

    /// Convert a native type to canonical form. Unknown types map to
    /// [`CanonicalType::Unsupported`] instead of failing.
    fn to_canonical(&self, spec: &NativeTypeSpec) -> CanonicalTypeInfo;

    /// Resolve aliases and default arguments (`int4` → `integer`,
    /// `datetime2` → `datetime2(7)`) so that two spellings of the same native
    /// type compare equal.
    fn normalize(&self, spec: &NativeTypeSpec) -> NativeTypeSpec {
        spec.clone()
    }
}

/// Convert canonical types to native database types.
#[allow(clippy::wrong_self_convention)]
pub trait FromCanonical: Send + Sync {
    /// Get the dialect name (e.g., "mssql", "postgres", "mysql").
    fn dialect_name(&self) -> &str;

    /// Pick the native type that best preserves the canonical type.
    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping;
}

/// Composed type mapper that chains ToCanonical and FromCanonical conversions.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use upsert_migrate::dialect::{ComposedMapper, Lossiness, MssqlTypes, MysqlTypes};
///
/// let mapper = ComposedMapper::new(Arc::new(MssqlTypes), Arc::new(MysqlTypes));
/// let mapping = mapper.map_type_str("uniqueidentifier");
/// assert_eq!(mapping.target_type.to_string(), "CHAR(36)");
/// assert_eq!(mapping.lossiness, Lossiness::WidenedSafe);
/// ```
pub struct ComposedMapper {
    source_converter: Arc<dyn ToCanonical>,
    target_converter: Arc<dyn FromCanonical>,
}

impl ComposedMapper {
    pub fn new(
        source_converter: Arc<dyn ToCanonical>,
        target_converter: Arc<dyn FromCanonical>,
    ) -> Self {
        Self {
            source_converter,
            target_converter,
        }
    }

    /// Get the source dialect name.
    pub fn source_dialect(&self) -> &str {
        self.source_converter.dialect_name()
    }

    /// Get the target dialect name.
    pub fn target_dialect(&self) -> &str {
        self.target_converter.dialect_name()
    }

    /// Map a native source type to a native target type.
    pub fn map_type(&self, spec: &NativeTypeSpec) -> TypeMapping {
        let canonical_info = self.source_converter.to_canonical(spec);
        let mut target_mapping = self
            .target_converter
            .from_canonical(&canonical_info.canonical_type);
        target_mapping.absorb(canonical_info.lossiness, canonical_info.warning.as_deref());
        target_mapping
    }

    /// Parse and map a native type string such as `"decimal(10,2)"`.
    pub fn map_type_str(&self, native: &str) -> TypeMapping {
        self.map_type(&NativeTypeSpec::parse(native))
    }
}

impl fmt::Debug for ComposedMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedMapper")
            .field("source", &self.source_converter.dialect_name())
            .field("target", &self.target_converter.dialect_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_type_display() {
        assert_eq!(format!("{}", CanonicalType::Int32), "Int32");
        assert_eq!(
            format!(
                "{}",
                CanonicalType::Decimal {
                    precision: 10,
                    scale: 2
                }
            ),
            "Decimal(10,2)"
        );
        assert_eq!(format!("{}", CanonicalType::VarString(255)), "VarString(255)");
        assert_eq!(format!("{}", CanonicalType::VarBinary(0)), "VarBinary(max)");
        assert_eq!(
            format!("{}", CanonicalType::Array(Box::new(CanonicalType::Int32))),
            "Array(Int32)"
        );
    }

    #[test]
    fn test_lossiness_combine_takes_worst() {
        assert_eq!(
            Lossiness::Exact.combine(Lossiness::WidenedSafe),
            Lossiness::WidenedSafe
        );
        assert_eq!(
            Lossiness::NarrowedRisk.combine(Lossiness::WidenedSafe),
            Lossiness::NarrowedRisk
        );
        assert_eq!(
            Lossiness::Exact.combine(Lossiness::Exact),
            Lossiness::Exact
        );
        assert!(Lossiness::NarrowedRisk.is_lossy());
        assert!(!Lossiness::WidenedSafe.is_lossy());
    }

    #[test]
    fn test_type_params() {
        let dec = CanonicalType::Decimal {
            precision: 12,
            scale: 4,
        };
        assert_eq!(dec.precision(), Some(12));
        assert_eq!(dec.scale(), Some(4));
        assert_eq!(CanonicalType::VarString(50).max_length(), Some(50));
        assert_eq!(CanonicalType::VarBinary(0).max_length(), None);
        assert_eq!(
            CanonicalType::Enum(vec!["small".into(), "medium".into()]).max_length(),
            Some(6)
        );
    }

    // Mock converters for testing ComposedMapper
    struct MockToCanonical;
    impl ToCanonical for MockToCanonical {
        fn dialect_name(&self) -> &str {
            "mock_source"
        }

        fn to_canonical(&self, spec: &NativeTypeSpec) -> CanonicalTypeInfo {
            match spec.name.as_str() {
                "int" => CanonicalTypeInfo::exact(CanonicalType::Int32),
                "jsonb" => CanonicalTypeInfo::widened(
                    CanonicalType::Json,
                    "JSONB binary features unavailable.",
                ),
                other => CanonicalTypeInfo::unsupported("mock", other),
            }
        }
    }

    struct MockFromCanonical;
    impl FromCanonical for MockFromCanonical {
        fn dialect_name(&self) -> &str {
            "mock_target"
        }

        fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
            match canonical {
                CanonicalType::Int32 => TypeMapping::exact(NativeTypeSpec::new("integer")),
                CanonicalType::Json => {
                    TypeMapping::narrowed(NativeTypeSpec::new("text"), "JSON stored as text.")
                }
                other => TypeMapping::unsupported("mock", other),
            }
        }
    }

    #[test]
    fn test_composed_mapper_exact() {
        let mapper = ComposedMapper::new(Arc::new(MockToCanonical), Arc::new(MockFromCanonical));
        assert_eq!(mapper.source_dialect(), "mock_source");
        assert_eq!(mapper.target_dialect(), "mock_target");

        let mapping = mapper.map_type_str("int");
        assert_eq!(mapping.target_type.to_string(), "INTEGER");
        assert_eq!(mapping.lossiness, Lossiness::Exact);
        assert!(mapping.warning.is_none());
    }

    #[test]
    fn test_composed_mapper_merges_warnings() {
        let mapper = ComposedMapper::new(Arc::new(MockToCanonical), Arc::new(MockFromCanonical));
        let mapping = mapper.map_type_str("jsonb");
        assert_eq!(mapping.lossiness, Lossiness::NarrowedRisk);
        assert_eq!(
            mapping.warning.as_deref(),
            Some("JSONB binary features unavailable. JSON stored as text.")
        );
    }

    #[test]
    fn test_composed_mapper_unknown_is_tagged_not_failed() {
        let mapper = ComposedMapper::new(Arc::new(MockToCanonical), Arc::new(MockFromCanonical));
        let mapping = mapper.map_type_str("geography");
        assert_eq!(mapping.lossiness, Lossiness::Unsupported);
        assert_eq!(mapping.target_type.name, "geography");
    }
}
