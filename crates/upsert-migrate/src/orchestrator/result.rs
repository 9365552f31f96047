//! Migration results.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compare::{DataDiffResult, SchemaDiffResult};
use crate::core::Row;
use crate::error::Result;
use crate::state::RunStatus;

use super::backup::TableBackup;
use super::progress::{MigrationError, RowCounters, TableStatus};

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// A whole-migration transaction was rolled back.
    RolledBack,
}

impl MigrationStatus {
    pub fn as_run_status(&self) -> RunStatus {
        match self {
            MigrationStatus::Pending | MigrationStatus::Running => RunStatus::Running,
            MigrationStatus::Completed => RunStatus::Completed,
            MigrationStatus::Failed => RunStatus::Failed,
            MigrationStatus::Cancelled => RunStatus::Cancelled,
            MigrationStatus::RolledBack => RunStatus::RolledBack,
        }
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Running => "running",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::Cancelled => "cancelled",
            MigrationStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Outcome for one table mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    pub source_table: String,
    pub target_table: String,
    pub status: TableStatus,
    pub counters: RowCounters,
    pub batches: u64,

    /// Comparator counts, once the table was compared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<DataDiffResult>,

    /// Skipped rows by reason.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skip_reasons: BTreeMap<String, u64>,

    /// Source columns not present in the target.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_columns: Vec<String>,

    /// Target columns that had values truncated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub truncated_columns: Vec<String>,

    pub duration_ms: u64,

    /// Table-level failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableResult {
    pub fn new(source_table: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            status: TableStatus::Pending,
            counters: RowCounters::default(),
            batches: 0,
            diff: None,
            skip_reasons: BTreeMap::new(),
            dropped_columns: Vec::new(),
            truncated_columns: Vec::new(),
            duration_ms: 0,
            error: None,
        }
    }
}

/// A row held back by manual-review conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub table: String,
    pub row_id: String,
    /// `update` or `delete`.
    pub operation: String,
    pub key: Row,
    /// Source values after transforms.
    pub source_values: Row,
    /// Target row as classified.
    pub target_snapshot: Option<Row>,
    /// Target row when the conflict was detected; `None` if it is gone.
    pub target_current: Option<Row>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    pub migration_id: String,

    pub status: MigrationStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub duration_ms: u64,

    /// Sum over all tables.
    pub totals: RowCounters,

    /// Tables in processing order.
    pub tables: Vec<TableResult>,

    pub errors: Vec<MigrationError>,

    pub warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_queue: Vec<ReviewItem>,

    /// Pre-images of rows the run updated or deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup: Vec<TableBackup>,

    /// Directory the backup was written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,

    /// Whether a whole-migration transaction was rolled back.
    pub rolled_back: bool,

    /// Schema differences (schema-only mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_diff: Option<SchemaDiffResult>,
}

impl MigrationResult {
    pub fn is_success(&self) -> bool {
        self.status == MigrationStatus::Completed
    }

    pub fn table(&self, target_table: &str) -> Option<&TableResult> {
        self.tables.iter().find(|t| t.target_table == target_table)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
