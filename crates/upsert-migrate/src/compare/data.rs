//! Row-level data comparison between a source and a target table.
//!
//! The target table is streamed into a keyed index first, then the source
//! is streamed in key order and each row is looked up in that index.
//! Every source and target row resolves to exactly one [`DataDiffRow`].

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{key_values, DatabaseDriver, Row, RowCursor, SqlValue, TableInfo, TableMapping};
use crate::dialect::{CanonicalType, Lossiness};
use crate::error::{MigrateError, Result};
use crate::transform::TransformPipeline;

use super::key::{fallback_row_id, RowKey};
use super::normalize::values_equal;

/// Options for row comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCompareOptions {
    /// Target-side columns excluded from comparison.
    #[serde(default)]
    pub ignore_columns: Vec<String>,

    /// Collapse runs of whitespace and trim before comparing text.
    #[serde(default)]
    pub normalize_whitespace: bool,

    #[serde(default)]
    pub case_insensitive: bool,

    /// Absolute tolerance for numeric comparisons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_tolerance: Option<f64>,

    /// Treat NULL and empty string as equal.
    #[serde(default)]
    pub null_equals_empty: bool,

    /// Rows per read from either side (default: 1000).
    #[serde(default = "default_compare_batch_size")]
    pub batch_size: usize,
}

fn default_compare_batch_size() -> usize {
    1000
}

impl Default for DataCompareOptions {
    fn default() -> Self {
        Self {
            ignore_columns: Vec::new(),
            normalize_whitespace: false,
            case_insensitive: false,
            numeric_tolerance: None,
            null_equals_empty: false,
            batch_size: default_compare_batch_size(),
        }
    }
}

/// Classification of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Matched,
    Inserted,
    Updated,
    Deleted,
    Error,
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RowStatus::Matched => "matched",
            RowStatus::Inserted => "inserted",
            RowStatus::Updated => "updated",
            RowStatus::Deleted => "deleted",
            RowStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One classified row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDiffRow {
    /// Key values joined with `|`.
    pub row_id: String,

    pub status: RowStatus,

    /// Non-key columns that differ. Only set for `updated`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_columns: Vec<String>,

    /// Source values after transforms; target values for `deleted`.
    pub values: Row,

    /// Target values when the key exists in the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_values: Option<Row>,

    /// Key values in key-column order.
    #[serde(default)]
    pub key: Vec<SqlValue>,

    /// Reason for an `error` classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Worst transform lossiness per output column.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lossiness: BTreeMap<String, Lossiness>,

    /// Zero-based position of the row in the source stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_index: Option<usize>,

    /// The `error` came from a transform rule rather than the key.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transform_failed: bool,
}

impl DataDiffRow {
    fn new(row_id: String, status: RowStatus, values: Row) -> Self {
        Self {
            row_id,
            status,
            changed_columns: Vec::new(),
            values,
            target_values: None,
            key: Vec::new(),
            error: None,
            lossiness: BTreeMap::new(),
            source_index: None,
            transform_failed: false,
        }
    }

    fn error(row_id: String, values: Row, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(row_id, RowStatus::Error, values)
        }
    }
}

/// Counts for one table comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataDiffResult {
    pub source_table: String,
    pub target_table: String,
    pub source_row_count: u64,
    pub target_row_count: u64,
    pub matched_count: u64,
    pub inserted_count: u64,
    pub updated_count: u64,
    pub deleted_count: u64,
    pub error_count: u64,
}

impl DataDiffResult {
    fn record(&mut self, status: RowStatus) {
        match status {
            RowStatus::Matched => self.matched_count += 1,
            RowStatus::Inserted => self.inserted_count += 1,
            RowStatus::Updated => self.updated_count += 1,
            RowStatus::Deleted => self.deleted_count += 1,
            RowStatus::Error => self.error_count += 1,
        }
    }

    /// Whether source and target hold the same rows.
    pub fn is_identical(&self) -> bool {
        self.inserted_count == 0
            && self.updated_count == 0
            && self.deleted_count == 0
            && self.error_count == 0
    }

    /// Rows classified in total.
    pub fn total(&self) -> u64 {
        self.matched_count
            + self.inserted_count
            + self.updated_count
            + self.deleted_count
            + self.error_count
    }
}

/// Counts plus every classified row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataDiff {
    pub result: DataDiffResult,
    pub rows: Vec<DataDiffRow>,
}

enum TargetEntry {
    Row(Row),
    /// Two or more target rows share the key.
    Duplicate(Vec<Row>),
}

/// Compares the rows of mapped tables.
#[derive(Debug, Clone, Default)]
pub struct DataComparator {
    options: DataCompareOptions,
}

impl DataComparator {
    pub fn new(options: DataCompareOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DataCompareOptions {
        &self.options
    }

    /// Compare one mapped table and collect every classified row.
    pub async fn compare(
        &self,
        source: &dyn DatabaseDriver,
        target: &dyn DatabaseDriver,
        mapping: &TableMapping,
        pipeline: &TransformPipeline,
        target_info: Option<&TableInfo>,
    ) -> Result<DataDiff> {
        let (tx, mut rx) = mpsc::channel(self.options.batch_size.max(1));
        let compare = async move {
            self.compare_streaming(source, target, mapping, pipeline, target_info, &tx)
                .await
        };
        let collect = async move {
            let mut rows = Vec::new();
            while let Some(row) = rx.recv().await {
                rows.push(row);
            }
            rows
        };
        let (result, rows) = tokio::join!(compare, collect);
        Ok(DataDiff {
            result: result?,
            rows,
        })
    }

    /// Compare one mapped table, sending each classified row to `tx` as
    /// soon as it is known.
    ///
    /// Source rows are emitted in source key order; `deleted` rows follow
    /// once the source is exhausted. If the receiver is dropped the
    /// comparison stops early and returns the counts so far.
    pub async fn compare_streaming(
        &self,
        source: &dyn DatabaseDriver,
        target: &dyn DatabaseDriver,
        mapping: &TableMapping,
        pipeline: &TransformPipeline,
        target_info: Option<&TableInfo>,
        tx: &mpsc::Sender<DataDiffRow>,
    ) -> Result<DataDiffResult> {
        let keys = &mapping.key_columns;
        let batch_size = self.options.batch_size.max(1);
        let mut result = DataDiffResult {
            source_table: mapping.source_table.clone(),
            target_table: mapping.target_table.clone(),
            ..Default::default()
        };

        if let Some(info) = target_info {
            for key in keys {
                if !info.has_column(key) {
                    return Err(MigrateError::Config(format!(
                        "Key column '{}' does not exist in target table {}",
                        key, mapping.target_table
                    )));
                }
            }
        }

        // Target keys are target-side names; read them as-is.
        let (mut index, target_errors) = self
            .index_target(target, &mapping.target_table, keys, batch_size, &mut result)
            .await?;
        debug!(
            "Indexed {} target rows of {}",
            result.target_row_count, mapping.target_table
        );

        for row in target_errors {
            result.record(row.status);
            if tx.send(row).await.is_err() {
                return Ok(result);
            }
        }

        // Source keys are read under their source names.
        let source_keys: Vec<String> = keys
            .iter()
            .map(|k| pipeline.input_column(k).unwrap_or_else(|| k.clone()))
            .collect();

        let canonical = |column: &str| -> Option<CanonicalType> {
            target_info
                .and_then(|info| info.column(column))
                .map(|c| c.canonical_type.clone())
        };

        let duplicates = self
            .duplicate_source_keys(
                source,
                &mapping.source_table,
                &source_keys,
                keys,
                pipeline,
                batch_size,
            )
            .await?;
        if !duplicates.is_empty() {
            warn!(
                "{} source keys of {} occur more than once",
                duplicates.len(),
                mapping.source_table
            );
        }

        let mut cursor: Option<RowCursor> = None;
        let mut source_index = 0usize;

        loop {
            let batch = source
                .stream_rows(&mapping.source_table, &source_keys, cursor.as_ref(), batch_size)
                .await?;

            for raw in batch.rows {
                let idx = source_index;
                source_index += 1;
                result.source_row_count += 1;

                let diff = match self.classify_source_row(
                    raw, idx, keys, pipeline, &mut index, &canonical, target_info,
                ) {
                    Classified::Keyed(key, diff) if duplicates.contains(&key) => {
                        duplicate_source_error(diff)
                    }
                    Classified::Keyed(_, diff) | Classified::Unkeyed(diff) => diff,
                };
                result.record(diff.status);
                if tx.send(diff).await.is_err() {
                    return Ok(result);
                }
            }

            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        // Whatever is left in the index has no source counterpart.
        let mut remaining: Vec<(RowKey, TargetEntry)> = index.drain().collect();
        remaining.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, entry) in remaining {
            let row = match entry {
                TargetEntry::Row(row) => row,
                TargetEntry::Duplicate(_) => continue,
            };
            let mut diff = DataDiffRow::new(key.row_id(), RowStatus::Deleted, row.clone());
            diff.key = key_values(&row, keys);
            diff.target_values = Some(row);
            result.record(diff.status);
            if tx.send(diff).await.is_err() {
                return Ok(result);
            }
        }

        info!(
            "{} -> {}: {} matched, {} inserted, {} updated, {} deleted, {} errors",
            mapping.source_table,
            mapping.target_table,
            result.matched_count,
            result.inserted_count,
            result.updated_count,
            result.deleted_count,
            result.error_count
        );
        Ok(result)
    }

    /// Keys shared by two or more source rows, after transforms.
    ///
    /// Transforms may map distinct raw keys onto one key (`"01"` and `"1"`
    /// cast to integer), so source key order says nothing about where
    /// duplicates sit. Only keys are kept in memory.
    async fn duplicate_source_keys(
        &self,
        source: &dyn DatabaseDriver,
        table: &str,
        source_keys: &[String],
        keys: &[String],
        pipeline: &TransformPipeline,
        batch_size: usize,
    ) -> Result<HashSet<RowKey>> {
        let mut seen: HashSet<RowKey> = HashSet::new();
        let mut duplicates: HashSet<RowKey> = HashSet::new();
        let mut cursor: Option<RowCursor> = None;

        loop {
            let batch = source
                .stream_rows(table, source_keys, cursor.as_ref(), batch_size)
                .await?;
            for raw in &batch.rows {
                let key = if pipeline.is_empty() {
                    RowKey::from_row(raw, keys)
                } else {
                    match pipeline.apply(raw) {
                        Ok(outcome) => RowKey::from_row(&outcome.row, keys),
                        Err(_) => continue,
                    }
                };
                if let Ok(key) = key {
                    if !seen.insert(key.clone()) {
                        duplicates.insert(key);
                    }
                }
            }
            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(duplicates)
    }

    async fn index_target(
        &self,
        target: &dyn DatabaseDriver,
        table: &str,
        keys: &[String],
        batch_size: usize,
        result: &mut DataDiffResult,
    ) -> Result<(HashMap<RowKey, TargetEntry>, Vec<DataDiffRow>)> {
        let mut index: HashMap<RowKey, TargetEntry> = HashMap::new();
        let mut errors = Vec::new();
        let mut cursor: Option<RowCursor> = None;

        loop {
            let batch = target
                .stream_rows(table, keys, cursor.as_ref(), batch_size)
                .await?;
            for row in batch.rows {
                result.target_row_count += 1;
                match RowKey::from_row(&row, keys) {
                    Err(e) => {
                        let mut diff = DataDiffRow::error(
                            fallback_row_id(&row, keys),
                            row.clone(),
                            format!("target row: {}", e),
                        );
                        diff.target_values = Some(row);
                        errors.push(diff);
                    }
                    Ok(key) => match index.remove(&key) {
                        None => {
                            index.insert(key, TargetEntry::Row(row));
                        }
                        Some(TargetEntry::Row(first)) => {
                            index.insert(key, TargetEntry::Duplicate(vec![first, row]));
                        }
                        Some(TargetEntry::Duplicate(mut rows)) => {
                            rows.push(row);
                            index.insert(key, TargetEntry::Duplicate(rows));
                        }
                    },
                }
            }
            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        for (key, entry) in &index {
            if let TargetEntry::Duplicate(rows) = entry {
                for row in rows {
                    let mut diff = DataDiffRow::error(
                        key.row_id(),
                        row.clone(),
                        format!("duplicate key {} in target", key),
                    );
                    diff.key = key_values(row, keys);
                    diff.target_values = Some(row.clone());
                    errors.push(diff);
                }
            }
        }
        errors.sort_by(|a, b| a.row_id.cmp(&b.row_id));
        Ok((index, errors))
    }

    #[allow(clippy::too_many_arguments)]
    fn classify_source_row(
        &self,
        raw: Row,
        source_index: usize,
        keys: &[String],
        pipeline: &TransformPipeline,
        index: &mut HashMap<RowKey, TargetEntry>,
        canonical: &dyn Fn(&str) -> Option<CanonicalType>,
        target_info: Option<&TableInfo>,
    ) -> Classified {
        let transformed = match pipeline.apply(&raw) {
            Ok(outcome) => outcome,
            Err(e) => {
                let source_keys: Vec<String> = keys
                    .iter()
                    .map(|k| pipeline.input_column(k).unwrap_or_else(|| k.clone()))
                    .collect();
                let mut diff = DataDiffRow::error(
                    fallback_row_id(&raw, &source_keys),
                    raw,
                    e.to_string(),
                );
                diff.source_index = Some(source_index);
                diff.transform_failed = true;
                return Classified::Unkeyed(diff);
            }
        };
        let values = transformed.row;

        let key = match RowKey::from_row(&values, keys) {
            Ok(key) => key,
            Err(e) => {
                let mut diff =
                    DataDiffRow::error(fallback_row_id(&values, keys), values, e.to_string());
                diff.source_index = Some(source_index);
                return Classified::Unkeyed(diff);
            }
        };

        let mut diff = DataDiffRow::new(key.row_id(), RowStatus::Inserted, values);
        diff.key = key_values(&diff.values, keys);
        diff.lossiness = transformed.lossiness;
        diff.source_index = Some(source_index);

        match index.get(&key) {
            None => {}
            Some(TargetEntry::Duplicate(_)) => {
                diff.status = RowStatus::Error;
                diff.error = Some(format!("duplicate key {} in target", key));
            }
            Some(TargetEntry::Row(_)) => {
                if let Some(TargetEntry::Row(target_row)) = index.remove(&key) {
                    let changed = self.changed_columns(
                        &diff.values,
                        &target_row,
                        keys,
                        canonical,
                        target_info,
                    );
                    diff.status = if changed.is_empty() {
                        RowStatus::Matched
                    } else {
                        RowStatus::Updated
                    };
                    diff.changed_columns = changed;
                    diff.target_values = Some(target_row);
                }
            }
        }
        Classified::Keyed(key, diff)
    }

    fn changed_columns(
        &self,
        source: &Row,
        target: &Row,
        keys: &[String],
        canonical: &dyn Fn(&str) -> Option<CanonicalType>,
        target_info: Option<&TableInfo>,
    ) -> Vec<String> {
        let mut changed = Vec::new();
        for (column, value) in source {
            if keys.contains(column) || self.options.ignore_columns.contains(column) {
                continue;
            }
            let exists = match target_info {
                Some(info) => info.has_column(column),
                None => target.contains_key(column),
            };
            if !exists {
                continue;
            }
            let target_value = target.get(column).unwrap_or(&SqlValue::Null);
            let ct = canonical(column);
            let max_length = target_info
                .and_then(|info| info.column(column))
                .and_then(|c| c.effective_max_length());
            let value = conform_length(value, max_length);
            if !values_equal(&value, target_value, ct.as_ref(), &self.options) {
                changed.push(column.clone());
            }
        }
        changed
    }
}

enum Classified {
    Keyed(RowKey, DataDiffRow),
    Unkeyed(DataDiffRow),
}

/// The value as the target column stores it: text longer than the column
/// compares on the prefix a write would keep.
fn conform_length(value: &SqlValue, max_length: Option<usize>) -> Cow<'_, SqlValue> {
    match (value, max_length) {
        (SqlValue::Text(s), Some(max)) if s.chars().count() > max => {
            Cow::Owned(SqlValue::Text(s.chars().take(max).collect()))
        }
        _ => Cow::Borrowed(value),
    }
}

fn duplicate_source_error(mut diff: DataDiffRow) -> DataDiffRow {
    // The target match, if any, stays claimed so it is not reported deleted.
    diff.status = RowStatus::Error;
    diff.changed_columns.clear();
    diff.error = Some(format!("duplicate key {} in source", diff.row_id));
    diff
}
