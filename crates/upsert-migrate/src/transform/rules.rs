//! Column transform rule definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::SqlValue;

/// One column-level transform, applied in ascending `order` within a table.
///
/// Rules act on `source_column`. When `target_column` is set the result is
/// written there and `source_column` is removed from the working row; a
/// `rename` requires it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRule {
    /// Source table the rule belongs to.
    pub table_id: String,

    pub source_column: String,

    #[serde(default)]
    pub target_column: Option<String>,

    /// Application order. Unique within a table.
    pub order: i32,

    #[serde(flatten)]
    pub kind: RuleKind,
}

impl TransformRule {
    /// Column the rule writes to.
    pub fn output_column(&self) -> &str {
        self.target_column.as_deref().unwrap_or(&self.source_column)
    }

    pub fn rule_type(&self) -> &'static str {
        self.kind.name()
    }
}

/// What to do with a `value_map` input that has no entry in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedPolicy {
    /// Keep the original value.
    #[default]
    PassThrough,

    /// Fail the row with a transform error.
    Error,
}

/// Closed set of rule types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum RuleKind {
    /// Change the output column name only.
    Rename,

    /// Re-encode the value as a native type of the target engine.
    TypeCast { target_type: String },

    /// Substitute values through an explicit lookup table. Keys are the
    /// display form of the input value.
    ValueMap {
        mappings: BTreeMap<String, SqlValue>,
        #[serde(default)]
        unmapped: UnmappedPolicy,
    },

    /// Replace NULL (or a missing column) with a literal.
    DefaultForNull { value: SqlValue },

    /// Remove the column from the working row.
    DropColumn,
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Rename => "rename",
            RuleKind::TypeCast { .. } => "type_cast",
            RuleKind::ValueMap { .. } => "value_map",
            RuleKind::DefaultForNull { .. } => "default_for_null",
            RuleKind::DropColumn => "drop_column",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_yaml_shape() {
        let yaml = r#"
- table_id: users
  source_column: name
  target_column: full_name
  order: 1
  rule_type: rename
- table_id: users
  source_column: status
  order: 2
  rule_type: value_map
  mappings:
    A: active
    I: inactive
- table_id: users
  source_column: age
  order: 3
  rule_type: type_cast
  target_type: int
"#;
        let rules: Vec<TransformRule> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].kind, RuleKind::Rename);
        assert_eq!(rules[0].output_column(), "full_name");
        match &rules[1].kind {
            RuleKind::ValueMap { mappings, unmapped } => {
                assert_eq!(mappings["A"], SqlValue::Text("active".into()));
                assert_eq!(*unmapped, UnmappedPolicy::PassThrough);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rules[2].rule_type(), "type_cast");
        assert_eq!(rules[2].output_column(), "age");
    }
}
