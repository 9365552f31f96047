//! Foreign-key ordering of table mappings.

use std::collections::HashMap;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::core::{TableInfo, TableMapping};
use crate::error::{MigrateError, Result};

/// Mappings grouped into dependency levels.
///
/// Every parent of a mapping sits in an earlier level. Mappings in the same
/// level have no foreign keys between them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePlan {
    /// Indices into the mapping slice, level by level.
    pub levels: Vec<Vec<usize>>,
}

impl TablePlan {
    /// All mapping indices in processing order.
    pub fn order(&self) -> Vec<usize> {
        self.levels.iter().flatten().copied().collect()
    }
}

/// Order `mappings` so that referenced tables come before referencing ones.
///
/// Edges come from the foreign keys of both sides: source constraints are
/// matched against source table names and target constraints against target
/// table names. Self references are ignored. A cycle is an error naming the
/// tables involved.
pub fn order_tables(
    mappings: &[TableMapping],
    source_info: &HashMap<String, TableInfo>,
    target_info: &HashMap<String, TableInfo>,
) -> Result<TablePlan> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..mappings.len()).map(|i| graph.add_node(i)).collect();

    let by_source = name_index(mappings.iter().map(|m| m.source_table.as_str()));
    let by_target = name_index(mappings.iter().map(|m| m.target_table.as_str()));

    for (child, mapping) in mappings.iter().enumerate() {
        let mut parents = Vec::new();
        if let Some(info) = source_info.get(&mapping.source_table) {
            parents.extend(
                info.referenced_tables()
                    .iter()
                    .filter_map(|t| lookup(&by_source, t)),
            );
        }
        if let Some(info) = target_info.get(&mapping.target_table) {
            parents.extend(
                info.referenced_tables()
                    .iter()
                    .filter_map(|t| lookup(&by_target, t)),
            );
        }
        parents.sort_unstable();
        parents.dedup();
        for parent in parents {
            if parent == child {
                continue;
            }
            debug!(
                "{} depends on {}",
                mapping.target_table, mappings[parent].target_table
            );
            graph.add_edge(nodes[parent], nodes[child], ());
        }
    }

    let sorted = match toposort(&graph, None) {
        Ok(sorted) => sorted,
        Err(_) => return Err(MigrateError::DependencyCycle(cycle_names(&graph, mappings))),
    };

    let mut level = vec![0usize; mappings.len()];
    for node in &sorted {
        let idx = graph[*node];
        for parent in graph.neighbors_directed(*node, petgraph::Direction::Incoming) {
            level[idx] = level[idx].max(level[graph[parent]] + 1);
        }
    }

    let depth = level.iter().copied().max().map(|d| d + 1).unwrap_or(0);
    let mut levels = vec![Vec::new(); depth];
    // Configuration order within a level keeps runs reproducible.
    for (idx, lvl) in level.iter().enumerate() {
        levels[*lvl].push(idx);
    }
    Ok(TablePlan { levels })
}

fn name_index<'a>(names: impl Iterator<Item = &'a str>) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (i, name) in names.enumerate() {
        index.entry(name.to_string()).or_insert(i);
    }
    index
}

/// Match a referenced name, with or without schema prefix.
fn lookup(index: &HashMap<String, usize>, referenced: &str) -> Option<usize> {
    if let Some(i) = index.get(referenced) {
        return Some(*i);
    }
    let bare = referenced.rsplit('.').next().unwrap_or(referenced);
    index
        .iter()
        .find(|(name, _)| name.rsplit('.').next() == Some(bare))
        .map(|(_, i)| *i)
}

fn cycle_names(graph: &DiGraph<usize, ()>, mappings: &[TableMapping]) -> Vec<String> {
    for scc in tarjan_scc(graph) {
        if scc.len() > 1 {
            let mut names: Vec<String> = scc
                .iter()
                .map(|n| mappings[graph[*n]].target_table.clone())
                .collect();
            names.sort();
            if let Some(first) = names.first().cloned() {
                names.push(first);
            }
            return names;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnInfo, ConstraintInfo};

    fn table(name: &str, parents: &[&str]) -> TableInfo {
        let mut info = TableInfo::new(name, vec![ColumnInfo::new("id", "int").primary_key()]);
        for parent in parents {
            info.constraints.push(ConstraintInfo::foreign_key(
                format!("fk_{}_{}", name, parent),
                vec!["parent_id".into()],
                *parent,
                vec!["id".into()],
            ));
        }
        info
    }

    fn infos(tables: Vec<TableInfo>) -> HashMap<String, TableInfo> {
        tables.into_iter().map(|t| (t.table_name.clone(), t)).collect()
    }

    #[test]
    fn test_parents_first() {
        let mappings = vec![
            TableMapping::same_name("order_items", &["id"]),
            TableMapping::same_name("orders", &["id"]),
            TableMapping::same_name("customers", &["id"]),
        ];
        let source = infos(vec![
            table("order_items", &["orders"]),
            table("orders", &["customers"]),
            table("customers", &[]),
        ]);
        let plan = order_tables(&mappings, &source, &HashMap::new()).unwrap();
        assert_eq!(plan.order(), vec![2, 1, 0]);
        assert_eq!(plan.levels.len(), 3);
    }

    #[test]
    fn test_independent_tables_share_a_level() {
        let mappings = vec![
            TableMapping::same_name("a", &["id"]),
            TableMapping::same_name("b", &["id"]),
            TableMapping::same_name("c", &["id"]),
        ];
        let target = infos(vec![table("a", &[]), table("b", &[]), table("c", &["a"])]);
        let plan = order_tables(&mappings, &HashMap::new(), &target).unwrap();
        assert_eq!(plan.levels, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_schema_qualified_reference() {
        let mappings = vec![
            TableMapping::same_name("dbo.child", &["id"]),
            TableMapping::same_name("dbo.parent", &["id"]),
        ];
        let source = HashMap::from([
            ("dbo.child".to_string(), table("child", &["parent"])),
            ("dbo.parent".to_string(), table("parent", &[])),
        ]);
        let plan = order_tables(&mappings, &source, &HashMap::new()).unwrap();
        assert_eq!(plan.order(), vec![1, 0]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mappings = vec![
            TableMapping::same_name("a", &["id"]),
            TableMapping::same_name("b", &["id"]),
        ];
        let source = infos(vec![table("a", &["b"]), table("b", &["a"])]);
        let err = order_tables(&mappings, &source, &HashMap::new()).unwrap_err();
        match err {
            MigrateError::DependencyCycle(names) => {
                assert_eq!(names, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_reference_ignored() {
        let mappings = vec![TableMapping::same_name("employees", &["id"])];
        let mut info = table("employees", &[]);
        info.constraints.push(ConstraintInfo::foreign_key(
            "fk_manager",
            vec!["manager_id".into()],
            "employees",
            vec!["id".into()],
        ));
        let plan = order_tables(&mappings, &infos(vec![info]), &HashMap::new()).unwrap();
        assert_eq!(plan.order(), vec![0]);
    }
}
