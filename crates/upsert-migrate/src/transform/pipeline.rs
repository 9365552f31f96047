//! Compiled per-table rule lists.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::core::{DatabaseEngine, Row, SqlValue};
use crate::dialect::{self, CanonicalType, Lossiness, NativeTypeSpec};
use crate::error::{MigrateError, Result};

use super::cast::cast_value;
use super::rules::{RuleKind, TransformRule, UnmappedPolicy};

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: TransformRule,
    cast_to: Option<CanonicalType>,
}

/// A transformed row plus the worst lossiness recorded per output column.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    pub row: Row,
    pub lossiness: BTreeMap<String, Lossiness>,
}

impl TransformOutcome {
    /// Columns whose value may have lost information.
    pub fn lossy_columns(&self) -> Vec<&str> {
        self.lossiness
            .iter()
            .filter(|(_, l)| l.is_lossy())
            .map(|(c, _)| c.as_str())
            .collect()
    }
}

/// Ordered rules for one table.
#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    table_id: String,
    rules: Vec<CompiledRule>,
}

impl TransformPipeline {
    /// A pipeline that passes rows through unchanged.
    pub fn empty(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            rules: Vec::new(),
        }
    }

    /// Validate and order the rules of one table.
    ///
    /// `type_cast` targets are resolved as native types of `target_engine`.
    pub fn compile(
        table_id: impl Into<String>,
        rules: Vec<TransformRule>,
        target_engine: DatabaseEngine,
    ) -> Result<Self> {
        let table_id = table_id.into();
        let mut orders = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());

        for rule in rules {
            if rule.table_id != table_id {
                return Err(MigrateError::Config(format!(
                    "Rule for table '{}' compiled into pipeline for '{}'",
                    rule.table_id, table_id
                )));
            }
            if !orders.insert(rule.order) {
                return Err(MigrateError::Config(format!(
                    "Table '{}' has more than one transform with order {}",
                    table_id, rule.order
                )));
            }
            if rule.source_column.is_empty() {
                return Err(MigrateError::Config(format!(
                    "Transform {} on table '{}' has no source_column",
                    rule.order, table_id
                )));
            }

            let cast_to = match &rule.kind {
                RuleKind::Rename => {
                    if rule.target_column.as_deref().unwrap_or("").is_empty() {
                        return Err(MigrateError::Config(format!(
                            "Rename of {}.{} requires target_column",
                            table_id, rule.source_column
                        )));
                    }
                    None
                }
                RuleKind::TypeCast { target_type } => {
                    let info = dialect::to_canonical(target_engine, &NativeTypeSpec::parse(target_type));
                    if info.canonical_type.is_unsupported() {
                        return Err(MigrateError::Config(format!(
                            "Cast of {}.{}: '{}' is not a {} type",
                            table_id, rule.source_column, target_type, target_engine
                        )));
                    }
                    Some(info.canonical_type)
                }
                RuleKind::ValueMap { mappings, .. } => {
                    check_no_chains(&table_id, &rule.source_column, mappings)?;
                    None
                }
                RuleKind::DefaultForNull { .. } | RuleKind::DropColumn => None,
            };

            compiled.push(CompiledRule { rule, cast_to });
        }

        compiled.sort_by_key(|c| c.rule.order);
        debug!(
            "Compiled {} transform rule(s) for table {}",
            compiled.len(),
            table_id
        );
        Ok(Self {
            table_id,
            rules: compiled,
        })
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Rules in application order.
    pub fn rules(&self) -> impl Iterator<Item = &TransformRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    /// Name a source column ends up under, or `None` if a rule drops it.
    pub fn output_column(&self, source_column: &str) -> Option<String> {
        let mut name = source_column.to_string();
        for compiled in &self.rules {
            let rule = &compiled.rule;
            if rule.source_column != name {
                continue;
            }
            match rule.kind {
                RuleKind::DropColumn => return None,
                _ => name = rule.output_column().to_string(),
            }
        }
        Some(name)
    }

    /// Source column that feeds an output column, when one does.
    pub fn input_column(&self, output_column: &str) -> Option<String> {
        let mut name = output_column.to_string();
        for compiled in self.rules.iter().rev() {
            let rule = &compiled.rule;
            if rule.output_column() == name {
                if matches!(rule.kind, RuleKind::DropColumn) {
                    return None;
                }
                name = rule.source_column.clone();
            }
        }
        Some(name)
    }

    /// Apply every rule to `row`, left to right.
    ///
    /// Applying the pipeline to its own output returns the same row.
    pub fn apply(&self, row: &Row) -> Result<TransformOutcome> {
        let mut working = row.clone();
        let mut lossiness: BTreeMap<String, Lossiness> = BTreeMap::new();

        for compiled in &self.rules {
            let rule = &compiled.rule;
            let output = rule.output_column().to_string();

            match &rule.kind {
                RuleKind::Rename => {
                    if let Some(value) = working.remove(&rule.source_column) {
                        working.insert(output, value);
                    }
                }
                RuleKind::TypeCast { target_type } => {
                    let Some(value) = working.remove(&rule.source_column) else {
                        continue;
                    };
                    let target = compiled
                        .cast_to
                        .as_ref()
                        .ok_or_else(|| MigrateError::transform(&rule.source_column, "uncompiled cast"))?;
                    let cast = cast_value(&value, target).map_err(|e| {
                        MigrateError::transform(
                            &rule.source_column,
                            format!("cannot cast to {}: {}", target_type, e),
                        )
                    })?;
                    let entry = lossiness.entry(output.clone()).or_insert(Lossiness::Exact);
                    *entry = entry.combine(cast.lossiness);
                    working.insert(output, cast.value);
                }
                RuleKind::ValueMap { mappings, unmapped } => {
                    let Some(value) = working.remove(&rule.source_column) else {
                        continue;
                    };
                    let mapped = if value.is_null() {
                        value
                    } else {
                        match mappings.get(&value.to_string()) {
                            Some(replacement) => replacement.clone(),
                            None if mappings.values().any(|v| v == &value) => value,
                            None => match unmapped {
                                UnmappedPolicy::PassThrough => value,
                                UnmappedPolicy::Error => {
                                    return Err(MigrateError::transform(
                                        &rule.source_column,
                                        format!("value '{}' has no mapping", value),
                                    ))
                                }
                            },
                        }
                    };
                    working.insert(output, mapped);
                }
                RuleKind::DefaultForNull { value: default } => {
                    let current = match working.remove(&rule.source_column) {
                        Some(value) => value,
                        None if output != rule.source_column && working.contains_key(&output) => {
                            continue
                        }
                        None => SqlValue::Null,
                    };
                    let value = if current.is_null() {
                        default.clone()
                    } else {
                        current
                    };
                    working.insert(output, value);
                }
                RuleKind::DropColumn => {
                    working.remove(&rule.source_column);
                }
            }
        }

        Ok(TransformOutcome {
            row: working,
            lossiness,
        })
    }
}

/// A mapping whose output is itself a key mapping elsewhere would change
/// the value again on a retry.
fn check_no_chains(
    table_id: &str,
    column: &str,
    mappings: &BTreeMap<String, SqlValue>,
) -> Result<()> {
    for (from, to) in mappings {
        if let Some(next) = mappings.get(&to.to_string()) {
            if next != to {
                return Err(MigrateError::Config(format!(
                    "value_map on {}.{} chains '{}' -> '{}' -> '{}'",
                    table_id, column, from, to, next
                )));
            }
        }
    }
    Ok(())
}

/// Pipelines for every table, keyed by source table name.
#[derive(Debug, Clone, Default)]
pub struct TransformSet {
    pipelines: HashMap<String, TransformPipeline>,
}

impl TransformSet {
    /// Group rules by table and compile each group.
    pub fn compile(rules: &[TransformRule], target_engine: DatabaseEngine) -> Result<Self> {
        let mut grouped: HashMap<String, Vec<TransformRule>> = HashMap::new();
        for rule in rules {
            grouped
                .entry(rule.table_id.clone())
                .or_default()
                .push(rule.clone());
        }

        let mut pipelines = HashMap::with_capacity(grouped.len());
        for (table, rules) in grouped {
            let pipeline = TransformPipeline::compile(table.clone(), rules, target_engine)?;
            pipelines.insert(table, pipeline);
        }
        Ok(Self { pipelines })
    }

    /// Pipeline for `table`; empty when the table has no rules.
    pub fn for_table(&self, table: &str) -> TransformPipeline {
        self.pipelines
            .get(table)
            .cloned()
            .unwrap_or_else(|| TransformPipeline::empty(table))
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::row;
    use crate::transform::rules::RuleKind;

    fn rule(order: i32, source: &str, target: Option<&str>, kind: RuleKind) -> TransformRule {
        TransformRule {
            table_id: "users".into(),
            source_column: source.into(),
            target_column: target.map(String::from),
            order,
            kind,
        }
    }

    fn status_map(unmapped: UnmappedPolicy) -> RuleKind {
        let mut mappings = BTreeMap::new();
        mappings.insert("A".to_string(), SqlValue::from("active"));
        mappings.insert("I".to_string(), SqlValue::from("inactive"));
        RuleKind::ValueMap { mappings, unmapped }
    }

    fn pipeline(rules: Vec<TransformRule>) -> TransformPipeline {
        TransformPipeline::compile("users", rules, DatabaseEngine::PostgreSql).unwrap()
    }

    #[test]
    fn test_rules_apply_in_order() {
        // Declared out of order on purpose; the cast must see the renamed column.
        let p = pipeline(vec![
            rule(2, "age_text", None, RuleKind::TypeCast { target_type: "integer".into() }),
            rule(1, "age", Some("age_text"), RuleKind::Rename),
        ]);
        let out = p.apply(&row([("age", SqlValue::from("41"))])).unwrap();
        assert_eq!(out.row, row([("age_text", SqlValue::I32(41))]));
        assert_eq!(out.lossiness["age_text"], Lossiness::Exact);
    }

    #[test]
    fn test_cast_failure_is_transform_error() {
        let p = pipeline(vec![rule(
            1,
            "age",
            None,
            RuleKind::TypeCast { target_type: "integer".into() },
        )]);
        let err = p.apply(&row([("age", SqlValue::from("abc"))])).unwrap_err();
        assert!(matches!(err, MigrateError::Transform { ref column, .. } if column == "age"));
    }

    #[test]
    fn test_value_map_pass_through_and_strict() {
        let p = pipeline(vec![rule(1, "status", None, status_map(UnmappedPolicy::PassThrough))]);
        let out = p.apply(&row([("status", SqlValue::from("X"))])).unwrap();
        assert_eq!(out.row["status"], SqlValue::from("X"));
        let out = p.apply(&row([("status", SqlValue::from("A"))])).unwrap();
        assert_eq!(out.row["status"], SqlValue::from("active"));

        let strict = pipeline(vec![rule(1, "status", None, status_map(UnmappedPolicy::Error))]);
        assert!(strict.apply(&row([("status", SqlValue::from("X"))])).is_err());
        // already-mapped output is accepted on a retry
        assert!(strict
            .apply(&row([("status", SqlValue::from("active"))]))
            .is_ok());
    }

    #[test]
    fn test_default_for_null_and_drop() {
        let p = pipeline(vec![
            rule(1, "nickname", None, RuleKind::DefaultForNull { value: SqlValue::from("n/a") }),
            rule(2, "secret", None, RuleKind::DropColumn),
        ]);
        let out = p
            .apply(&row([
                ("nickname", SqlValue::Null),
                ("secret", SqlValue::from("x")),
            ]))
            .unwrap();
        assert_eq!(out.row, row([("nickname", SqlValue::from("n/a"))]));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let p = pipeline(vec![
            rule(1, "name", Some("full_name"), RuleKind::Rename),
            rule(2, "status", None, status_map(UnmappedPolicy::PassThrough)),
            rule(3, "age", None, RuleKind::TypeCast { target_type: "varchar(2)".into() }),
            rule(4, "tmp", None, RuleKind::DropColumn),
            rule(5, "score", None, RuleKind::DefaultForNull { value: SqlValue::I64(0) }),
        ]);
        let input = row([
            ("name", SqlValue::from("Alice")),
            ("status", SqlValue::from("A")),
            ("age", SqlValue::from("123")),
            ("tmp", SqlValue::I32(1)),
            ("score", SqlValue::Null),
        ]);
        let once = p.apply(&input).unwrap();
        let twice = p.apply(&once.row).unwrap();
        assert_eq!(once.row, twice.row);
        assert_eq!(once.row["age"], SqlValue::from("12"));
        assert_eq!(once.lossiness["age"], Lossiness::NarrowedRisk);
    }

    #[test]
    fn test_compile_rejects_bad_rules() {
        let dup = TransformPipeline::compile(
            "users",
            vec![
                rule(1, "a", Some("b"), RuleKind::Rename),
                rule(1, "c", None, RuleKind::DropColumn),
            ],
            DatabaseEngine::MySql,
        );
        assert!(dup.is_err());

        let no_target = TransformPipeline::compile(
            "users",
            vec![rule(1, "a", None, RuleKind::Rename)],
            DatabaseEngine::MySql,
        );
        assert!(no_target.is_err());

        let bad_type = TransformPipeline::compile(
            "users",
            vec![rule(1, "a", None, RuleKind::TypeCast { target_type: "wibble".into() })],
            DatabaseEngine::MySql,
        );
        assert!(bad_type.is_err());

        let mut mappings = BTreeMap::new();
        mappings.insert("a".to_string(), SqlValue::from("b"));
        mappings.insert("b".to_string(), SqlValue::from("c"));
        let chain = TransformPipeline::compile(
            "users",
            vec![rule(
                1,
                "a",
                None,
                RuleKind::ValueMap {
                    mappings,
                    unmapped: UnmappedPolicy::PassThrough,
                },
            )],
            DatabaseEngine::MySql,
        );
        assert!(chain.is_err());
    }

    #[test]
    fn test_column_lineage() {
        let p = pipeline(vec![
            rule(1, "name", Some("full_name"), RuleKind::Rename),
            rule(2, "tmp", None, RuleKind::DropColumn),
        ]);
        assert_eq!(p.output_column("name").as_deref(), Some("full_name"));
        assert_eq!(p.output_column("tmp"), None);
        assert_eq!(p.output_column("id").as_deref(), Some("id"));
        assert_eq!(p.input_column("full_name").as_deref(), Some("name"));
        assert_eq!(p.input_column("id").as_deref(), Some("id"));
    }

    #[test]
    fn test_transform_set_groups_by_table() {
        let mut orders = rule(1, "x", None, RuleKind::DropColumn);
        orders.table_id = "orders".into();
        let set = TransformSet::compile(
            &[rule(1, "a", Some("b"), RuleKind::Rename), orders],
            DatabaseEngine::Sqlite,
        )
        .unwrap();
        assert_eq!(set.for_table("users").len(), 1);
        assert_eq!(set.for_table("orders").len(), 1);
        assert!(set.for_table("missing").is_empty());
    }
}
