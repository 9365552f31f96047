//! Schema comparison between source and target table definitions.
//!
//! Columns are compared through their canonical types, so `nvarchar(50)` on
//! SQL Server and `varchar(50)` on PostgreSQL are the same column. Direction
//! is always source → target: an object only the target has is `Added`, an
//! object only the source has is `Removed`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{
    ColumnInfo, ConstraintInfo, DatabaseDriver, DatabaseEngine, IndexInfo, TableInfo, TableMapping,
};
use crate::dialect::{map_type, CanonicalType, Lossiness};
use crate::error::Result;

/// Kind of schema object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Table,
    Column,
    Index,
    Constraint,
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectType::Table => "table",
            ObjectType::Column => "column",
            ObjectType::Index => "index",
            ObjectType::Constraint => "constraint",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
    Unchanged,
}

/// One differing property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDetail {
    pub property: String,
    pub source_value: Option<String>,
    pub target_value: Option<String>,
}

impl ChangeDetail {
    fn new(property: &str, source_value: Option<String>, target_value: Option<String>) -> Self {
        Self {
            property: property.to_string(),
            source_value,
            target_value,
        }
    }
}

/// A difference (or explicit sameness) for one schema object.
///
/// `Modified` always carries at least one detail; `Unchanged` carries none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChange {
    pub object_type: ObjectType,

    /// Qualified name: `table` or `table.object`.
    pub object_name: String,

    pub change_type: ChangeType,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ChangeDetail>,

    /// Target type a source-only column would be created with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_type: Option<ProposedType>,
}

/// Mapping of a source column type onto the target engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedType {
    pub native_type: String,
    pub lossiness: Lossiness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SchemaChange {
    fn new(object_type: ObjectType, object_name: String, details: Vec<ChangeDetail>) -> Self {
        let change_type = if details.is_empty() {
            ChangeType::Unchanged
        } else {
            ChangeType::Modified
        };
        Self {
            object_type,
            object_name,
            change_type,
            details,
            proposed_type: None,
        }
    }

    fn presence(object_type: ObjectType, object_name: String, change_type: ChangeType) -> Self {
        Self {
            object_type,
            object_name,
            change_type,
            details: Vec::new(),
            proposed_type: None,
        }
    }
}

/// Change counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub additions: usize,
    pub removals: usize,
    pub modifications: usize,
    pub unchanged: usize,
}

impl DiffSummary {
    fn from_changes(changes: &[SchemaChange]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.change_type {
                ChangeType::Added => summary.additions += 1,
                ChangeType::Removed => summary.removals += 1,
                ChangeType::Modified => summary.modifications += 1,
                ChangeType::Unchanged => summary.unchanged += 1,
            }
        }
        summary
    }
}

/// Every schema change between two databases (or two tables).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiffResult {
    pub source_database: String,
    pub target_database: String,
    pub changes: Vec<SchemaChange>,
    pub summary: DiffSummary,
}

impl SchemaDiffResult {
    fn new(source_database: String, target_database: String, changes: Vec<SchemaChange>) -> Self {
        let summary = DiffSummary::from_changes(&changes);
        Self {
            source_database,
            target_database,
            changes,
            summary,
        }
    }

    pub fn has_differences(&self) -> bool {
        self.summary.additions + self.summary.removals + self.summary.modifications > 0
    }

    /// Changes other than `Unchanged`.
    pub fn differences(&self) -> impl Iterator<Item = &SchemaChange> {
        self.changes
            .iter()
            .filter(|c| c.change_type != ChangeType::Unchanged)
    }
}

/// Compares table definitions across engines.
#[derive(Debug, Clone)]
pub struct SchemaComparator {
    source_engine: DatabaseEngine,
    target_engine: DatabaseEngine,
    case_sensitive: bool,
}

impl SchemaComparator {
    pub fn new(source_engine: DatabaseEngine, target_engine: DatabaseEngine) -> Self {
        Self {
            source_engine,
            target_engine,
            case_sensitive: true,
        }
    }

    /// Match object names ignoring case.
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    fn name_key(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    /// Diff two snapshots of what should be the same logical table.
    ///
    /// The first change is the table-level change; it is `Modified` when
    /// any child object differs, with one detail per differing child.
    pub fn compare_tables(&self, source: &TableInfo, target: &TableInfo) -> Vec<SchemaChange> {
        let source = self.resolved(source, self.source_engine);
        let target = self.resolved(target, self.target_engine);
        let table_name = target.full_name();

        let mut children = Vec::new();
        children.extend(self.diff_objects(
            &table_name,
            ObjectType::Column,
            &source.columns,
            &target.columns,
            |c| c.name.as_str(),
            |s, t| self.column_details(s, t),
        ));
        children.extend(self.diff_objects(
            &table_name,
            ObjectType::Index,
            &source.indexes,
            &target.indexes,
            |i| i.name.as_str(),
            |s, t| self.index_details(s, t),
        ));
        children.extend(self.diff_objects(
            &table_name,
            ObjectType::Constraint,
            &source.constraints,
            &target.constraints,
            |c| c.name.as_str(),
            |s, t| self.constraint_details(s, t),
        ));

        for change in children.iter_mut().filter(|c| {
            c.object_type == ObjectType::Column && c.change_type == ChangeType::Removed
        }) {
            let column_name = change
                .object_name
                .strip_prefix(&format!("{}.", table_name))
                .unwrap_or(&change.object_name);
            if let Some(column) = source.columns.iter().find(|c| c.name == column_name) {
                change.proposed_type = Some(self.propose_type(column));
            }
        }

        let table_details: Vec<ChangeDetail> = children
            .iter()
            .filter(|c| c.change_type != ChangeType::Unchanged)
            .map(|c| {
                let name = c
                    .object_name
                    .strip_prefix(&format!("{}.", table_name))
                    .unwrap_or(&c.object_name);
                let change = format!("{:?}", c.change_type).to_lowercase();
                ChangeDetail::new(&format!("{}:{}", c.object_type, name), None, Some(change))
            })
            .collect();

        let mut changes = Vec::with_capacity(children.len() + 1);
        changes.push(SchemaChange::new(ObjectType::Table, table_name, table_details));
        changes.extend(children);
        changes
    }

    /// Diff a set of tables.
    ///
    /// `pairs` holds `(source, target)` snapshots; a missing side makes the
    /// table `Added` (target only) or `Removed` (source only).
    pub fn compare_table_sets(
        &self,
        source_database: impl Into<String>,
        target_database: impl Into<String>,
        pairs: &[(Option<TableInfo>, Option<TableInfo>)],
    ) -> SchemaDiffResult {
        let mut changes = Vec::new();
        for pair in pairs {
            match pair {
                (Some(s), Some(t)) => changes.extend(self.compare_tables(s, t)),
                (Some(s), None) => {
                    let mut change =
                        SchemaChange::presence(ObjectType::Table, s.full_name(), ChangeType::Removed);
                    change.details = s
                        .columns
                        .iter()
                        .map(|c| {
                            let proposed = self.propose_type(c);
                            ChangeDetail::new(
                                &format!("column:{}", c.name),
                                Some(c.data_type.clone()),
                                Some(proposed.native_type),
                            )
                        })
                        .collect();
                    changes.push(change);
                }
                (None, Some(t)) => changes.push(SchemaChange::presence(
                    ObjectType::Table,
                    t.full_name(),
                    ChangeType::Added,
                )),
                (None, None) => {}
            }
        }
        SchemaDiffResult::new(source_database.into(), target_database.into(), changes)
    }

    fn propose_type(&self, column: &ColumnInfo) -> ProposedType {
        let mapping = map_type(self.source_engine, self.target_engine, &column.data_type);
        ProposedType {
            native_type: mapping.target_type.to_string(),
            lossiness: mapping.lossiness,
            warning: mapping.warning,
        }
    }

    fn resolved(&self, table: &TableInfo, engine: DatabaseEngine) -> TableInfo {
        let mut table = table.clone();
        let unresolved = table
            .columns
            .iter()
            .any(|c| c.canonical_type == CanonicalType::default());
        if unresolved {
            table.resolve_canonical_types(engine);
        }
        table
    }

    fn diff_objects<T>(
        &self,
        table_name: &str,
        object_type: ObjectType,
        source: &[T],
        target: &[T],
        name_of: impl Fn(&T) -> &str,
        details_of: impl Fn(&T, &T) -> Vec<ChangeDetail>,
    ) -> Vec<SchemaChange> {
        let source_by_name: BTreeMap<String, &T> =
            source.iter().map(|o| (self.name_key(name_of(o)), o)).collect();
        let target_by_name: BTreeMap<String, &T> =
            target.iter().map(|o| (self.name_key(name_of(o)), o)).collect();

        let mut changes = Vec::new();
        // source order first, then target-only objects in target order
        for object in source {
            let key = self.name_key(name_of(object));
            let name = format!("{}.{}", table_name, name_of(object));
            match target_by_name.get(&key) {
                Some(other) => {
                    changes.push(SchemaChange::new(object_type, name, details_of(object, other)))
                }
                None => changes.push(SchemaChange::presence(object_type, name, ChangeType::Removed)),
            }
        }
        for object in target {
            let key = self.name_key(name_of(object));
            if !source_by_name.contains_key(&key) {
                let name = format!("{}.{}", table_name, name_of(object));
                changes.push(SchemaChange::presence(object_type, name, ChangeType::Added));
            }
        }
        changes
    }

    fn column_details(&self, source: &ColumnInfo, target: &ColumnInfo) -> Vec<ChangeDetail> {
        let mut details = Vec::new();
        let s_ct = &source.canonical_type;
        let t_ct = &target.canonical_type;

        if s_ct.is_unsupported() || t_ct.is_unsupported() {
            let s = source.data_type.to_lowercase();
            let t = target.data_type.to_lowercase();
            if s != t {
                details.push(ChangeDetail::new("type", Some(s), Some(t)));
            }
        } else {
            push_if_different(&mut details, "type", Some(type_kind(s_ct)), Some(type_kind(t_ct)));
            push_if_different(
                &mut details,
                "max_length",
                length_of(source),
                length_of(target),
            );
            push_if_different(
                &mut details,
                "precision",
                s_ct.precision().map(|p| p.to_string()),
                t_ct.precision().map(|p| p.to_string()),
            );
            push_if_different(
                &mut details,
                "scale",
                s_ct.scale().map(|s| s.to_string()),
                t_ct.scale().map(|s| s.to_string()),
            );
        }

        push_if_different(
            &mut details,
            "nullable",
            Some(source.is_nullable.to_string()),
            Some(target.is_nullable.to_string()),
        );

        let s_default = source.default_value.as_deref().map(normalize_default);
        let t_default = target.default_value.as_deref().map(normalize_default);
        if s_default != t_default {
            details.push(ChangeDetail::new(
                "default",
                source.default_value.clone(),
                target.default_value.clone(),
            ));
        }
        details
    }

    fn index_details(&self, source: &IndexInfo, target: &IndexInfo) -> Vec<ChangeDetail> {
        let mut details = Vec::new();
        push_if_different(
            &mut details,
            "columns",
            Some(self.name_list(&source.columns)),
            Some(self.name_list(&target.columns)),
        );
        push_if_different(
            &mut details,
            "unique",
            Some(source.is_unique.to_string()),
            Some(target.is_unique.to_string()),
        );
        details
    }

    fn constraint_details(
        &self,
        source: &ConstraintInfo,
        target: &ConstraintInfo,
    ) -> Vec<ChangeDetail> {
        let mut details = Vec::new();
        push_if_different(
            &mut details,
            "constraint_type",
            Some(source.constraint_type.to_string()),
            Some(target.constraint_type.to_string()),
        );
        push_if_different(
            &mut details,
            "columns",
            Some(self.name_list(&source.columns)),
            Some(self.name_list(&target.columns)),
        );
        push_if_different(
            &mut details,
            "referenced_table",
            source.referenced_table.as_deref().map(|t| self.name_key(t)),
            target.referenced_table.as_deref().map(|t| self.name_key(t)),
        );
        push_if_different(
            &mut details,
            "referenced_columns",
            source.referenced_columns.as_deref().map(|c| self.name_list(c)),
            target.referenced_columns.as_deref().map(|c| self.name_list(c)),
        );
        details
    }

    fn name_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.name_key(n))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn push_if_different(
    details: &mut Vec<ChangeDetail>,
    property: &str,
    source: Option<String>,
    target: Option<String>,
) {
    if source != target {
        details.push(ChangeDetail::new(property, source, target));
    }
}

/// Canonical type without its size parameters.
fn type_kind(ct: &CanonicalType) -> String {
    match ct {
        CanonicalType::Array(inner) => format!("Array<{}>", type_kind(inner)),
        other => other.family().to_string(),
    }
}

fn length_of(column: &ColumnInfo) -> Option<String> {
    let ct = &column.canonical_type;
    if !(ct.is_string() || matches!(ct, CanonicalType::FixedBinary(_) | CanonicalType::VarBinary(_)))
    {
        return None;
    }
    match ct.max_length() {
        Some(0) | None => Some("max".to_string()),
        Some(n) => Some(n.to_string()),
    }
}

/// Normalize a default expression so engine spellings of the same default
/// compare equal.
pub fn normalize_default(expr: &str) -> String {
    let mut s = expr.trim().to_string();
    loop {
        let stripped = s
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .map(|inner| inner.trim().to_string());
        match stripped {
            Some(inner) if balanced(&inner) => s = inner,
            _ => break,
        }
    }

    // PostgreSQL casts: 'abc'::character varying
    if let Some(pos) = s.find("::") {
        s.truncate(pos);
    }
    let s = s.trim();
    let s = s
        .strip_prefix("N'")
        .or_else(|| s.strip_prefix('\''))
        .and_then(|rest| rest.strip_suffix('\''))
        .unwrap_or(s);

    let lower = s.to_lowercase();
    match lower.as_str() {
        "getdate()" | "sysdatetime()" | "now()" | "current_timestamp"
        | "current_timestamp()" | "localtimestamp" | "sysdate" | "systimestamp" => {
            "current_timestamp".to_string()
        }
        "getutcdate()" | "sysutcdatetime()" | "utc_timestamp()" => "current_timestamp_utc".to_string(),
        "newid()" | "gen_random_uuid()" | "uuid_generate_v4()" | "uuid()" | "sys_guid()" => {
            "new_uuid".to_string()
        }
        "true" => "1".to_string(),
        "false" => "0".to_string(),
        _ => s.to_string(),
    }
}

fn balanced(s: &str) -> bool {
    let mut depth = 0i32;
    for ch in s.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Compare the schemas of two databases.
///
/// With `mappings`, each mapped pair is compared (unmapped tables are
/// ignored). Without, tables are paired by name and tables present on only
/// one side are reported.
pub async fn compare_schema(
    source: &dyn DatabaseDriver,
    target: &dyn DatabaseDriver,
    mappings: &[TableMapping],
    case_sensitive: bool,
) -> Result<SchemaDiffResult> {
    let comparator =
        SchemaComparator::new(source.engine(), target.engine()).case_sensitive(case_sensitive);
    let key = |name: &str| {
        if case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    };

    let source_tables = source.list_tables().await?;
    let target_tables = target.list_tables().await?;
    let mut pairs: Vec<(Option<String>, Option<String>)> = Vec::new();

    if mappings.is_empty() {
        let target_by_key: BTreeMap<String, &String> =
            target_tables.iter().map(|t| (key(t), t)).collect();
        let source_keys: Vec<String> = source_tables.iter().map(|t| key(t)).collect();
        for table in &source_tables {
            pairs.push((Some(table.clone()), target_by_key.get(&key(table)).map(|t| (*t).clone())));
        }
        for table in &target_tables {
            if !source_keys.contains(&key(table)) {
                pairs.push((None, Some(table.clone())));
            }
        }
    } else {
        for mapping in mappings {
            let s = source_tables
                .iter()
                .find(|t| key(t) == key(&mapping.source_table))
                .cloned();
            let t = target_tables
                .iter()
                .find(|t| key(t) == key(&mapping.target_table))
                .cloned();
            pairs.push((s, t));
        }
    }

    let mut snapshots = Vec::with_capacity(pairs.len());
    for (s, t) in pairs {
        let s_info = match s {
            Some(name) => Some(source.get_table_info(&name).await?),
            None => None,
        };
        let t_info = match t {
            Some(name) => Some(target.get_table_info(&name).await?),
            None => None,
        };
        snapshots.push((s_info, t_info));
    }
    debug!("Comparing {} table pair(s)", snapshots.len());

    let result = comparator.compare_table_sets(source.identity(), target.identity(), &snapshots);
    info!(
        "Schema diff: {} added, {} removed, {} modified, {} unchanged",
        result.summary.additions,
        result.summary.removals,
        result.summary.modifications,
        result.summary.unchanged
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConstraintType;

    fn mssql_users() -> TableInfo {
        let mut t = TableInfo::new(
            "users",
            vec![
                ColumnInfo::new("id", "int").primary_key(),
                ColumnInfo::new("name", "nvarchar(50)").not_null(),
                ColumnInfo::new("created", "datetime2(6)").with_default("(getdate())"),
                ColumnInfo::new("legacy", "nvarchar(10)"),
            ],
        );
        t.indexes.push(IndexInfo {
            name: "ix_users_name".into(),
            columns: vec!["name".into()],
            is_unique: false,
            is_clustered: false,
            index_type: None,
        });
        t
    }

    fn pg_users() -> TableInfo {
        let mut t = TableInfo::new(
            "users",
            vec![
                ColumnInfo::new("id", "integer").primary_key(),
                ColumnInfo::new("name", "varchar(100)").not_null(),
                ColumnInfo::new("created", "timestamp(6)").with_default("now()"),
                ColumnInfo::new("email", "text"),
            ],
        );
        t.indexes.push(IndexInfo {
            name: "ix_users_name".into(),
            columns: vec!["name".into()],
            is_unique: true,
            is_clustered: false,
            index_type: Some("btree".into()),
        });
        t
    }

    fn find<'a>(changes: &'a [SchemaChange], name: &str) -> &'a SchemaChange {
        changes
            .iter()
            .find(|c| c.object_name == name)
            .unwrap_or_else(|| panic!("no change for {}", name))
    }

    #[test]
    fn test_cross_engine_column_diff() {
        let comparator = SchemaComparator::new(DatabaseEngine::SqlServer, DatabaseEngine::PostgreSql);
        let changes = comparator.compare_tables(&mssql_users(), &pg_users());

        assert_eq!(find(&changes, "users.id").change_type, ChangeType::Unchanged);
        assert!(find(&changes, "users.id").details.is_empty());

        let name = find(&changes, "users.name");
        assert_eq!(name.change_type, ChangeType::Modified);
        assert_eq!(name.details.len(), 1);
        assert_eq!(name.details[0].property, "max_length");
        assert_eq!(name.details[0].source_value.as_deref(), Some("50"));
        assert_eq!(name.details[0].target_value.as_deref(), Some("100"));

        assert_eq!(find(&changes, "users.created").change_type, ChangeType::Unchanged);
        assert_eq!(find(&changes, "users.legacy").change_type, ChangeType::Removed);
        assert_eq!(find(&changes, "users.email").change_type, ChangeType::Added);

        let index = find(&changes, "users.ix_users_name");
        assert_eq!(index.object_type, ObjectType::Index);
        assert_eq!(index.details[0].property, "unique");

        let table = &changes[0];
        assert_eq!(table.object_type, ObjectType::Table);
        assert_eq!(table.change_type, ChangeType::Modified);
        assert_eq!(table.details.len(), 4);
    }

    #[test]
    fn test_identical_tables_are_unchanged() {
        let comparator = SchemaComparator::new(DatabaseEngine::SqlServer, DatabaseEngine::SqlServer);
        let changes = comparator.compare_tables(&mssql_users(), &mssql_users());
        assert!(changes
            .iter()
            .all(|c| c.change_type == ChangeType::Unchanged && c.details.is_empty()));
    }

    #[test]
    fn test_case_sensitivity_policy() {
        let mut upper = mssql_users();
        for c in &mut upper.columns {
            c.name = c.name.to_uppercase();
        }
        let strict = SchemaComparator::new(DatabaseEngine::SqlServer, DatabaseEngine::SqlServer);
        let result = strict.compare_table_sets("a", "b", &[(Some(mssql_users()), Some(upper.clone()))]);
        assert!(result.summary.additions >= 4);

        let relaxed = strict.case_sensitive(false);
        let result = relaxed.compare_table_sets("a", "b", &[(Some(mssql_users()), Some(upper))]);
        assert_eq!(result.summary.additions, 0);
        assert!(!result.has_differences());
    }

    #[test]
    fn test_table_presence_and_summary() {
        let comparator = SchemaComparator::new(DatabaseEngine::PostgreSql, DatabaseEngine::PostgreSql);
        let orders = TableInfo::new("orders", vec![ColumnInfo::new("id", "bigint")]);
        let audit = TableInfo::new("audit", vec![ColumnInfo::new("id", "bigint")]);
        let result = comparator.compare_table_sets(
            "src",
            "tgt",
            &[(Some(orders), None), (None, Some(audit))],
        );
        assert_eq!(result.summary.removals, 1);
        assert_eq!(result.summary.additions, 1);
        assert_eq!(result.changes[0].object_name, "orders");
        assert_eq!(result.changes[0].change_type, ChangeType::Removed);
    }

    #[test]
    fn test_source_only_columns_get_target_types() {
        let comparator = SchemaComparator::new(DatabaseEngine::SqlServer, DatabaseEngine::PostgreSql);
        let changes = comparator.compare_tables(&mssql_users(), &pg_users());

        let legacy = find(&changes, "users.legacy");
        let proposed = legacy.proposed_type.as_ref().unwrap();
        assert_eq!(proposed.native_type, "VARCHAR(10)");
        assert_eq!(proposed.lossiness, Lossiness::Exact);
        assert!(find(&changes, "users.email").proposed_type.is_none());
        assert!(find(&changes, "users.name").proposed_type.is_none());

        let orders = TableInfo::new(
            "orders",
            vec![ColumnInfo::new("id", "int"), ColumnInfo::new("code", "nvarchar(10)")],
        );
        let result = comparator.compare_table_sets("src", "tgt", &[(Some(orders), None)]);
        let table = &result.changes[0];
        assert_eq!(table.change_type, ChangeType::Removed);
        assert_eq!(table.details.len(), 2);
        assert_eq!(table.details[1].property, "column:code");
        assert_eq!(table.details[1].source_value.as_deref(), Some("nvarchar(10)"));
        assert_eq!(table.details[1].target_value.as_deref(), Some("VARCHAR(10)"));
    }

    #[test]
    fn test_constraint_diff() {
        let comparator = SchemaComparator::new(DatabaseEngine::PostgreSql, DatabaseEngine::PostgreSql);
        let mut a = TableInfo::new("orders", vec![ColumnInfo::new("user_id", "int")]);
        let mut b = a.clone();
        a.constraints.push(ConstraintInfo::foreign_key(
            "fk_user",
            vec!["user_id".into()],
            "users",
            vec!["id".into()],
        ));
        b.constraints.push(ConstraintInfo::foreign_key(
            "fk_user",
            vec!["user_id".into()],
            "accounts",
            vec!["id".into()],
        ));
        let changes = comparator.compare_tables(&a, &b);
        let fk = find(&changes, "orders.fk_user");
        assert_eq!(fk.change_type, ChangeType::Modified);
        assert_eq!(fk.details[0].property, "referenced_table");
        assert_eq!(a.constraints[0].constraint_type, ConstraintType::ForeignKey);
    }

    #[test]
    fn test_normalize_default() {
        assert_eq!(normalize_default("((getdate()))"), "current_timestamp");
        assert_eq!(normalize_default("now()"), "current_timestamp");
        assert_eq!(normalize_default("CURRENT_TIMESTAMP"), "current_timestamp");
        assert_eq!(normalize_default("('active')"), "active");
        assert_eq!(normalize_default("'active'::character varying"), "active");
        assert_eq!(normalize_default("((0))"), "0");
        assert_eq!(normalize_default("false"), "0");
        assert_eq!(normalize_default("(1) + (2)"), "(1) + (2)");
    }
}
