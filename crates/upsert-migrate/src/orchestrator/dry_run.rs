//! Dry runs: classify everything, write nothing.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::compare::{DataComparator, DataDiffRow, RowStatus};
use crate::config::{MigrationConfig, MigrationMode, TransactionMode};
use crate::core::{DatabaseDriver, TableInfo, TableMapping, WriteOperation};
use crate::dialect::map_type;
use crate::error::Result;
use crate::transform::TransformPipeline;

use super::table::{dispose, Disposition, SkipReason};
use super::validate::RowValidator;

/// Above this many tables a dry run warns about run length.
pub const LARGE_TABLE_COUNT: usize = 50;

/// Above this many estimated rows a dry run warns about run length.
pub const LARGE_ROW_COUNT: u64 = 1_000_000;

/// Rough cost of one batch, used for the duration estimate.
pub const PER_BATCH_COST_MS: u64 = 50;

/// Estimate for one table mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableEstimate {
    pub source_table: String,
    pub target_table: String,
    pub source_rows: u64,
    pub target_rows: u64,
    pub estimated_inserts: u64,
    pub estimated_updates: u64,
    pub estimated_deletes: u64,
    pub estimated_skips: u64,
    /// Every classified row: inserts, updates, deletes, and skips.
    pub total_estimated_rows: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skip_reasons: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl TableEstimate {
    fn new(mapping: &TableMapping) -> Self {
        Self {
            source_table: mapping.source_table.clone(),
            target_table: mapping.target_table.clone(),
            ..Default::default()
        }
    }

    fn skip(&mut self, reason: &SkipReason) {
        self.estimated_skips += 1;
        *self
            .skip_reasons
            .entry(reason.label().to_string())
            .or_default() += 1;
    }

    fn writes(&self) -> u64 {
        self.estimated_inserts + self.estimated_updates + self.estimated_deletes
    }
}

/// Result of a dry run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunResult {
    pub mode: MigrationMode,
    pub tables: Vec<TableEstimate>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub total_estimated_rows: u64,
    pub estimated_batches: u64,
    pub estimated_duration_ms: u64,
}

impl DryRunResult {
    pub fn table(&self, target_table: &str) -> Option<&TableEstimate> {
        self.tables.iter().find(|t| t.target_table == target_table)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Inputs for one dry run, already loaded and ordered by the orchestrator.
pub(crate) struct DryRunPlan<'a> {
    pub source: &'a dyn DatabaseDriver,
    pub target: &'a dyn DatabaseDriver,
    pub settings: &'a MigrationConfig,
    pub comparator: &'a DataComparator,
    /// Mappings in processing order with their pipelines and metadata.
    pub tables: Vec<PlannedTable<'a>>,
}

pub(crate) struct PlannedTable<'a> {
    pub mapping: &'a TableMapping,
    pub pipeline: TransformPipeline,
    pub source_info: &'a TableInfo,
    pub target_info: &'a TableInfo,
}

pub(crate) async fn run_dry_run(plan: DryRunPlan<'_>) -> DryRunResult {
    let settings = plan.settings;
    let mut result = DryRunResult {
        mode: settings.mode,
        tables: Vec::with_capacity(plan.tables.len()),
        warnings: Vec::new(),
        errors: Vec::new(),
        total_estimated_rows: 0,
        estimated_batches: 0,
        estimated_duration_ms: 0,
    };

    if plan.source.identity() == plan.target.identity() {
        result.warnings.push(format!(
            "Source and target are the same database ({})",
            plan.source.identity()
        ));
    }
    if settings.transaction_mode == TransactionMode::None {
        result.warnings.push(
            "transaction_mode is none: a failure part way leaves the target partially migrated"
                .to_string(),
        );
    }
    if plan.tables.len() > LARGE_TABLE_COUNT {
        result.warnings.push(format!(
            "{} tables selected; consider splitting the migration",
            plan.tables.len()
        ));
    }
    if settings.mode == MigrationMode::SchemaOnly {
        result
            .warnings
            .push("schema_only mode: no rows will be written".to_string());
    }

    let batch_size = settings.batch_size.max(1) as u64;
    for table in &plan.tables {
        let mut estimate = TableEstimate::new(table.mapping);
        estimate.warnings = schema_warnings(
            plan.source,
            plan.target,
            table.mapping,
            &table.pipeline,
            table.source_info,
            table.target_info,
        );

        if settings.mode != MigrationMode::SchemaOnly {
            if let Err(e) = estimate_rows(&plan, table, &mut estimate).await {
                estimate.errors.push(e.to_string());
            }
        }

        result.total_estimated_rows += estimate.total_estimated_rows;
        result.estimated_batches += estimate.writes().div_ceil(batch_size);
        result.warnings.extend(estimate.warnings.iter().cloned());
        result.errors.extend(
            estimate
                .errors
                .iter()
                .map(|e| format!("{}: {}", estimate.target_table, e)),
        );
        debug!(
            "Dry run {}: {} inserts, {} updates, {} deletes, {} skips",
            estimate.target_table,
            estimate.estimated_inserts,
            estimate.estimated_updates,
            estimate.estimated_deletes,
            estimate.estimated_skips
        );
        result.tables.push(estimate);
    }

    if result.total_estimated_rows > LARGE_ROW_COUNT {
        result.warnings.push(format!(
            "{} rows to process; expect a long run",
            result.total_estimated_rows
        ));
    }
    result.estimated_duration_ms = result.estimated_batches * PER_BATCH_COST_MS;

    info!(
        "Dry run: {} tables, {} rows, {} batches, {} warnings",
        result.tables.len(),
        result.total_estimated_rows,
        result.estimated_batches,
        result.warnings.len()
    );
    result
}

/// Stream the comparator and tally what the mode would do with each row.
async fn estimate_rows(
    plan: &DryRunPlan<'_>,
    table: &PlannedTable<'_>,
    estimate: &mut TableEstimate,
) -> Result<()> {
    let mode = plan.settings.mode;
    let keys = &table.mapping.key_columns;
    let mut validator = RowValidator::new(table.target_info.clone());
    let (tx, rx) = mpsc::channel::<DataDiffRow>(plan.settings.batch_size.max(1));

    let compare = async move {
        plan.comparator
            .compare_streaming(
                plan.source,
                plan.target,
                table.mapping,
                &table.pipeline,
                Some(table.target_info),
                &tx,
            )
            .await
    };
    let tally = async {
        let mut rx = rx;
        while let Some(diff) = rx.recv().await {
            let mut truncated = Vec::new();
            match dispose(mode, keys, &diff, &mut validator, &mut truncated) {
                Disposition::Write(WriteOperation::Insert { .. }) => estimate.estimated_inserts += 1,
                Disposition::Write(WriteOperation::Update { .. }) => estimate.estimated_updates += 1,
                Disposition::Write(WriteOperation::Delete { .. }) => estimate.estimated_deletes += 1,
                Disposition::Skip(reason) => estimate.skip(&reason),
                Disposition::Error { message, .. } => {
                    let reason = SkipReason::InvalidRow(message);
                    estimate.skip(&reason);
                }
            }
            if diff.status == RowStatus::Error {
                debug!("Row {} would be rejected: {:?}", diff.row_id, diff.error);
            }
        }
    };

    let (diff, ()) = tokio::join!(compare, tally);
    // Rows tallied before a failure stay counted.
    estimate.total_estimated_rows = estimate.writes() + estimate.estimated_skips;
    let diff = diff?;
    estimate.source_rows = diff.source_row_count;
    estimate.target_rows = diff.target_row_count;

    let dropped: Vec<String> = validator.dropped_columns().iter().cloned().collect();
    if !dropped.is_empty() {
        estimate.warnings.push(format!(
            "Source columns not present in {} would be dropped: {}",
            table.mapping.target_table,
            dropped.join(", ")
        ));
    }
    Ok(())
}

/// Type-mapping and required-column warnings for one mapping.
fn schema_warnings(
    source: &dyn DatabaseDriver,
    target: &dyn DatabaseDriver,
    mapping: &TableMapping,
    pipeline: &TransformPipeline,
    source_info: &TableInfo,
    target_info: &TableInfo,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut produced: HashSet<String> = HashSet::new();

    for column in &source_info.columns {
        let Some(output) = pipeline.output_column(&column.name) else {
            continue;
        };
        if target_info.column(&output).is_none() {
            continue;
        }
        let mapped = map_type(source.engine(), target.engine(), &column.data_type);
        if mapped.lossiness.is_lossy() {
            let detail = mapped
                .warning
                .unwrap_or_else(|| format!("maps to {}", mapped.target_type));
            warnings.push(format!(
                "{}.{} ({}): {} [{}]",
                mapping.source_table, column.name, column.data_type, detail, mapped.lossiness
            ));
        }
        produced.insert(output);
    }

    for column in &target_info.columns {
        if column.is_required() && !produced.contains(&column.name) {
            warnings.push(format!(
                "{}.{} is NOT NULL without a default and no source column feeds it; inserts will be skipped",
                mapping.target_table, column.name
            ));
        }
    }
    warnings
}
