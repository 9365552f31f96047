//! Schema and metadata types for tables, columns, indexes, and constraints.
//!
//! These are read-only snapshots produced by the driver boundary. A
//! comparison pass fetches them once; later changes to the live database do
//! not affect an in-flight diff.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::engine::DatabaseEngine;
use crate::dialect::{self, CanonicalType, Lossiness, NativeTypeSpec};
use crate::error::{MigrateError, Result};

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Native type string as reported by the engine (e.g., "nvarchar(50)").
    pub data_type: String,

    /// Engine-neutral type, filled in by [`TableInfo::resolve_canonical_types`].
    #[serde(default)]
    pub canonical_type: CanonicalType,

    /// Lossiness of the native → canonical conversion.
    #[serde(default = "default_lossiness")]
    pub lossiness: Lossiness,

    /// Whether the column allows NULL values.
    #[serde(default = "default_true")]
    pub is_nullable: bool,

    /// Whether the column is part of the primary key.
    #[serde(default)]
    pub is_primary_key: bool,

    /// Maximum length in characters for strings, bytes for binaries.
    #[serde(default)]
    pub max_length: Option<i32>,

    #[serde(default)]
    pub precision: Option<i32>,

    #[serde(default)]
    pub scale: Option<i32>,

    /// Default value expression, as the engine reports it.
    #[serde(default)]
    pub default_value: Option<String>,

    /// Ordinal position in the table (1-based).
    #[serde(default)]
    pub ordinal_position: i32,
}

fn default_true() -> bool {
    true
}

fn default_lossiness() -> Lossiness {
    Lossiness::Unsupported
}

impl ColumnInfo {
    /// Create a nullable, non-key column. Length, precision and scale are
    /// taken from the type string when present.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let data_type = data_type.into();
        let spec = NativeTypeSpec::parse(&data_type);
        let max_length = match spec.length() {
            Some(n) if spec.args.len() == 1 => Some(n.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
            _ => None,
        };
        let (precision, scale) = if spec.args.len() == 2 {
            (
                spec.precision().map(|p| p as i32),
                spec.scale().map(|s| s as i32),
            )
        } else {
            (None, None)
        };

        Self {
            name: name.into(),
            data_type,
            canonical_type: CanonicalType::default(),
            lossiness: Lossiness::Unsupported,
            is_nullable: true,
            is_primary_key: false,
            max_length,
            precision,
            scale,
            default_value: None,
            ordinal_position: 0,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Mark the column as (part of) the primary key. Implies NOT NULL.
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default_value = Some(default.into());
        self
    }

    /// Parsed native type.
    pub fn native_type(&self) -> NativeTypeSpec {
        NativeTypeSpec::parse(&self.data_type)
    }

    /// Whether a row must supply a value for this column.
    pub fn is_required(&self) -> bool {
        !self.is_nullable && self.default_value.is_none()
    }

    /// Effective maximum length in characters, if bounded.
    ///
    /// `-1` (MAX) and non-positive lengths are treated as unbounded; the
    /// canonical type is consulted when the driver did not report a length.
    pub fn effective_max_length(&self) -> Option<usize> {
        match self.max_length {
            Some(n) if n > 0 => Some(n as usize),
            Some(_) => None,
            None => self.canonical_type.max_length().map(|n| n as usize),
        }
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,

    /// Indexed columns, in key order.
    pub columns: Vec<String>,

    #[serde(default)]
    pub is_unique: bool,

    #[serde(default)]
    pub is_clustered: bool,

    /// Engine-reported index kind (btree, hash, gin, ...).
    #[serde(default)]
    pub index_type: Option<String>,
}

/// Kind of table constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
    Default,
}

impl std::fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConstraintType::PrimaryKey => "PRIMARY KEY",
            ConstraintType::ForeignKey => "FOREIGN KEY",
            ConstraintType::Unique => "UNIQUE",
            ConstraintType::Check => "CHECK",
            ConstraintType::Default => "DEFAULT",
        };
        f.write_str(s)
    }
}

/// Constraint metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    /// Constraint name.
    pub name: String,

    pub constraint_type: ConstraintType,

    /// Constrained columns.
    #[serde(default)]
    pub columns: Vec<String>,

    /// Referenced table (foreign keys only).
    #[serde(default)]
    pub referenced_table: Option<String>,

    /// Referenced columns (foreign keys only).
    #[serde(default)]
    pub referenced_columns: Option<Vec<String>>,
}

impl ConstraintInfo {
    /// Build a foreign key constraint.
    pub fn foreign_key(
        name: impl Into<String>,
        columns: Vec<String>,
        referenced_table: impl Into<String>,
        referenced_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            constraint_type: ConstraintType::ForeignKey,
            columns,
            referenced_table: Some(referenced_table.into()),
            referenced_columns: Some(referenced_columns),
        }
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Schema name (e.g., "dbo", "public"). Empty for engines without schemas.
    #[serde(default)]
    pub schema_name: String,

    /// Table (or collection/container) name.
    pub table_name: String,

    /// Columns in ordinal order. Names are unique.
    pub columns: Vec<ColumnInfo>,

    #[serde(default)]
    pub indexes: Vec<IndexInfo>,

    #[serde(default)]
    pub constraints: Vec<ConstraintInfo>,

    /// Row count estimate, when the driver provides one.
    #[serde(default)]
    pub row_count: Option<i64>,
}

impl TableInfo {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        let mut table = Self {
            schema_name: String::new(),
            table_name: table_name.into(),
            columns,
            indexes: Vec::new(),
            constraints: Vec::new(),
            row_count: None,
        };
        for (idx, column) in table.columns.iter_mut().enumerate() {
            if column.ordinal_position == 0 {
                column.ordinal_position = idx as i32 + 1;
            }
        }
        table
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        if self.schema_name.is_empty() {
            self.table_name.clone()
        } else {
            format!("{}.{}", self.schema_name, self.table_name)
        }
    }

    /// Look up a column by exact name.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Primary key columns in ordinal order.
    pub fn primary_key_columns(&self) -> Vec<String> {
        let mut pk: Vec<&ColumnInfo> = self.columns.iter().filter(|c| c.is_primary_key).collect();
        pk.sort_by_key(|c| c.ordinal_position);
        if !pk.is_empty() {
            return pk.into_iter().map(|c| c.name.clone()).collect();
        }
        self.constraints
            .iter()
            .find(|c| c.constraint_type == ConstraintType::PrimaryKey)
            .map(|c| c.columns.clone())
            .unwrap_or_default()
    }

    /// Tables this table references through foreign keys, excluding itself.
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut parents: Vec<String> = self
            .constraints
            .iter()
            .filter(|c| c.constraint_type == ConstraintType::ForeignKey)
            .filter_map(|c| c.referenced_table.clone())
            .filter(|t| t != &self.table_name && t != &self.full_name())
            .collect();
        parents.sort();
        parents.dedup();
        parents
    }

    /// Check structural invariants: non-empty name, unique column names.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(MigrateError::Config("Table name cannot be empty".into()));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(MigrateError::Config(format!(
                    "Table {} has duplicate column '{}'",
                    self.full_name(),
                    column.name
                )));
            }
        }
        Ok(())
    }

    /// Fill in canonical types from the native type strings of `engine`.
    ///
    /// Returns the warnings produced by non-exact conversions, prefixed with
    /// the column name.
    pub fn resolve_canonical_types(&mut self, engine: DatabaseEngine) -> Vec<String> {
        let mut warnings = Vec::new();
        for column in &mut self.columns {
            let info = dialect::to_canonical(engine, &column.native_type());
            column.canonical_type = info.canonical_type;
            column.lossiness = info.lossiness;
            if let Some(warning) = info.warning {
                warnings.push(format!("{}.{}: {}", self.table_name, column.name, warning));
            }
        }
        warnings
    }
}

/// Pairing of a source table with a target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    pub source_table: String,

    pub target_table: String,

    /// Columns that identify a row on both sides. Named as they appear in
    /// the target, after transforms.
    pub key_columns: Vec<String>,

    /// Excluded mappings are ignored by dry runs and migrations.
    #[serde(default = "default_true")]
    pub included: bool,

    /// Column used by NewestWins conflict resolution for this table.
    #[serde(default)]
    pub timestamp_column: Option<String>,
}

impl TableMapping {
    pub fn new(
        source_table: impl Into<String>,
        target_table: impl Into<String>,
        key_columns: Vec<String>,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            key_columns,
            included: true,
            timestamp_column: None,
        }
    }

    /// Same table name on both sides.
    pub fn same_name(table: impl Into<String>, key_columns: &[&str]) -> Self {
        let table = table.into();
        Self::new(
            table.clone(),
            table,
            key_columns.iter().map(|k| k.to_string()).collect(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_table.is_empty() || self.target_table.is_empty() {
            return Err(MigrateError::Config(
                "Table mapping requires both source_table and target_table".into(),
            ));
        }
        if self.key_columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "Table mapping {} -> {} must have at least one key column",
                self.source_table, self.target_table
            )));
        }
        let mut seen = HashSet::new();
        for key in &self.key_columns {
            if !seen.insert(key.as_str()) {
                return Err(MigrateError::Config(format!(
                    "Table mapping {} -> {} lists key column '{}' twice",
                    self.source_table, self.target_table, key
                )));
            }
        }
        Ok(())
    }
}
