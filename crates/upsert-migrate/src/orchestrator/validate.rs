//! Row checks against the target table definition before writing.

use std::collections::BTreeSet;

use crate::core::{Row, SqlValue, TableInfo};

/// Outcome of checking one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowCheck {
    /// The row can be written. Strings listed in `truncated` were cut to
    /// the column length.
    Valid { row: Row, truncated: Vec<String> },

    /// The row cannot be written; not an error.
    Skip { reason: String },
}

/// Validates rows for one target table.
#[derive(Debug, Clone)]
pub struct RowValidator {
    info: TableInfo,
    /// Columns present in source rows but not in the target.
    dropped: BTreeSet<String>,
}

impl RowValidator {
    pub fn new(info: TableInfo) -> Self {
        Self {
            info,
            dropped: BTreeSet::new(),
        }
    }

    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    /// Source columns discarded so far because the target lacks them.
    pub fn dropped_columns(&self) -> &BTreeSet<String> {
        &self.dropped
    }

    /// Check a full row about to be inserted.
    pub fn check_insert(&mut self, row: Row) -> RowCheck {
        let (row, truncated) = self.conform(row);
        for column in &self.info.columns {
            if !column.is_required() {
                continue;
            }
            if row.get(&column.name).map_or(true, SqlValue::is_null) {
                return RowCheck::Skip {
                    reason: format!("missing value for required column '{}'", column.name),
                };
            }
        }
        RowCheck::Valid { row, truncated }
    }

    /// Check the columns of an update. Only the columns present are
    /// written, so only those are checked for NULL.
    pub fn check_update(&mut self, row: Row) -> RowCheck {
        let (row, truncated) = self.conform(row);
        for (name, value) in &row {
            if !value.is_null() {
                continue;
            }
            if let Some(column) = self.info.column(name) {
                if !column.is_nullable {
                    return RowCheck::Skip {
                        reason: format!("NULL for NOT NULL column '{}'", name),
                    };
                }
            }
        }
        RowCheck::Valid { row, truncated }
    }

    /// Drop unknown columns and truncate long strings.
    fn conform(&mut self, row: Row) -> (Row, Vec<String>) {
        let mut out = Row::new();
        let mut truncated = Vec::new();
        for (name, value) in row {
            let Some(column) = self.info.column(&name) else {
                self.dropped.insert(name);
                continue;
            };
            let value = match (value, column.effective_max_length()) {
                (SqlValue::Text(s), Some(max)) if s.chars().count() > max => {
                    truncated.push(name.clone());
                    SqlValue::Text(s.chars().take(max).collect())
                }
                (value, _) => value,
            };
            out.insert(name, value);
        }
        (out, truncated)
    }
}
