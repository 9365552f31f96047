//! Pre-image backups of rows a migration updates or deletes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::Row;
use crate::error::Result;

/// Target rows of one table as they were before the run touched them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableBackup {
    pub table: String,
    pub key_columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl TableBackup {
    pub fn new(table: impl Into<String>, key_columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            key_columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Write each table backup to `<dir>/<migration_id>/<table>.json`.
///
/// Returns the directory holding the files.
pub fn write_backups(dir: &Path, migration_id: &str, backups: &[TableBackup]) -> Result<PathBuf> {
    let run_dir = dir.join(file_safe(migration_id));
    std::fs::create_dir_all(&run_dir)?;
    for backup in backups {
        let path = run_dir.join(format!("{}.json", file_safe(&backup.table)));
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, serde_json::to_string_pretty(backup)?)?;
        std::fs::rename(&temp_path, &path)?;
        info!(
            "Backed up {} rows of {} to {}",
            backup.rows.len(),
            backup.table,
            path.display()
        );
    }
    Ok(run_dir)
}

/// Load a backup file written by [`write_backups`].
pub fn read_backup(path: &Path) -> Result<TableBackup> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
