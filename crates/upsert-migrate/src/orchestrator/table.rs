//! Migration of one table mapping.
//!
//! The comparator streams classified rows into a bounded channel while this
//! worker groups them into batches. Each batch goes through four steps:
//! disposition by mode, target validation, conflict re-check against the
//! live target, and the write under the configured transaction mode.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compare::{parse_timestamp, DataComparator, DataDiffRow, RowKey, RowStatus};
use crate::config::{ConflictResolution, MigrationConfig, MigrationMode, TransactionMode};
use crate::core::{DatabaseDriver, Row, SqlValue, TableInfo, TableMapping, WriteOperation, WriteReport};
use crate::error::{MigrateError, Result};
use crate::transform::TransformPipeline;

use super::backup::TableBackup;
use super::progress::{
    ErrorKind, MigrationError, ProgressEvent, ProgressReporter, RowCounters, TableStatus,
};
use super::result::{ReviewItem, TableResult};
use super::retry::RetryPolicy;
use super::validate::{RowCheck, RowValidator};

/// Why a row was not written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SkipReason {
    Unchanged,
    IgnoredByMode,
    /// Failed target validation.
    MissingRequired(String),
    /// Classified as an error; dry runs count these as skips.
    InvalidRow(String),
    TargetWins,
    TargetNewer,
    ManualReview,
}

impl SkipReason {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            SkipReason::Unchanged => "unchanged",
            SkipReason::IgnoredByMode => "ignored_by_mode",
            SkipReason::MissingRequired(_) => "missing_required",
            SkipReason::InvalidRow(_) => "invalid_row",
            SkipReason::TargetWins => "conflict_target_wins",
            SkipReason::TargetNewer => "conflict_target_newer",
            SkipReason::ManualReview => "manual_review",
        }
    }
}

/// What to do with one classified row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Disposition {
    Write(WriteOperation),
    Skip(SkipReason),
    Error { kind: ErrorKind, message: String },
}

/// Key columns and their values as a row.
pub(crate) fn key_row(key_columns: &[String], key: &[SqlValue]) -> Row {
    key_columns
        .iter()
        .cloned()
        .zip(key.iter().cloned())
        .collect()
}

/// Map a classified row to a write, a skip, or an error for `mode`.
///
/// Columns unknown to the target are dropped and long strings truncated by
/// `validator`; truncated column names are appended to `truncated`.
pub(crate) fn dispose(
    mode: MigrationMode,
    key_columns: &[String],
    diff: &DataDiffRow,
    validator: &mut RowValidator,
    truncated: &mut Vec<String>,
) -> Disposition {
    match diff.status {
        RowStatus::Error => {
            let message = diff
                .error
                .clone()
                .unwrap_or_else(|| "row could not be classified".to_string());
            let kind = if diff.transform_failed {
                ErrorKind::RowWrite
            } else {
                ErrorKind::Classification
            };
            Disposition::Error { kind, message }
        }
        RowStatus::Matched => Disposition::Skip(SkipReason::Unchanged),
        RowStatus::Inserted => match mode {
            MigrationMode::SchemaOnly => Disposition::Skip(SkipReason::IgnoredByMode),
            MigrationMode::Upsert
            | MigrationMode::Merge
            | MigrationMode::Mirror
            | MigrationMode::AppendOnly => insert_or_skip(diff.values.clone(), validator, truncated),
        },
        RowStatus::Updated => match mode {
            MigrationMode::AppendOnly | MigrationMode::SchemaOnly => {
                Disposition::Skip(SkipReason::IgnoredByMode)
            }
            MigrationMode::Upsert | MigrationMode::Merge | MigrationMode::Mirror => {
                let changed: Row = diff
                    .changed_columns
                    .iter()
                    .filter_map(|c| diff.values.get(c).map(|v| (c.clone(), v.clone())))
                    .collect();
                update_or_skip(key_row(key_columns, &diff.key), changed, validator, truncated)
            }
        },
        RowStatus::Deleted => match mode {
            MigrationMode::Mirror => Disposition::Write(WriteOperation::Delete {
                key: key_row(key_columns, &diff.key),
            }),
            MigrationMode::Upsert
            | MigrationMode::Merge
            | MigrationMode::AppendOnly
            | MigrationMode::SchemaOnly => Disposition::Skip(SkipReason::IgnoredByMode),
        },
    }
}

fn insert_or_skip(row: Row, validator: &mut RowValidator, truncated: &mut Vec<String>) -> Disposition {
    match validator.check_insert(row) {
        RowCheck::Valid { row, truncated: cut } => {
            truncated.extend(cut);
            Disposition::Write(WriteOperation::Insert { row })
        }
        RowCheck::Skip { reason } => Disposition::Skip(SkipReason::MissingRequired(reason)),
    }
}

fn update_or_skip(
    key: Row,
    values: Row,
    validator: &mut RowValidator,
    truncated: &mut Vec<String>,
) -> Disposition {
    match validator.check_update(values) {
        RowCheck::Valid { row, .. } if row.is_empty() => Disposition::Skip(SkipReason::Unchanged),
        RowCheck::Valid { row, truncated: cut } => {
            truncated.extend(cut);
            Disposition::Write(WriteOperation::Update { key, row })
        }
        RowCheck::Skip { reason } => Disposition::Skip(SkipReason::MissingRequired(reason)),
    }
}

/// Everything a table worker needs, borrowed from the run.
pub(crate) struct TableJob<'a> {
    pub mapping: &'a TableMapping,
    pub source: &'a dyn DatabaseDriver,
    pub target: &'a dyn DatabaseDriver,
    pub pipeline: &'a TransformPipeline,
    pub target_info: &'a TableInfo,
    pub comparator: &'a DataComparator,
    pub settings: &'a MigrationConfig,
    pub policy: &'a RetryPolicy,
    pub reporter: &'a ProgressReporter,
    pub cancel: &'a CancellationToken,
}

/// What a table worker hands back to the run.
#[derive(Debug)]
pub(crate) struct TableOutcome {
    pub result: TableResult,
    pub errors: Vec<MigrationError>,
    pub review: Vec<ReviewItem>,
    pub backup: TableBackup,
    pub warnings: Vec<String>,
    /// Set when the run must stop: a fatal error, or a failure that
    /// aborts a whole-migration transaction.
    pub abort: Option<MigrateError>,
    pub cancelled: bool,
}

enum Flow {
    Continue,
    Stop,
}

/// A write waiting for its batch.
struct PendingWrite {
    op: WriteOperation,
    diff: DataDiffRow,
    pre_image: Option<Row>,
}

struct TableWorker<'a> {
    job: TableJob<'a>,
    validator: RowValidator,
    outcome: TableOutcome,
    truncated: BTreeSet<String>,
}

/// Migrate one table. Never returns an error: failures are recorded in the
/// outcome, and run-level consequences are signalled through `abort`.
pub(crate) async fn migrate_table(job: TableJob<'_>) -> TableOutcome {
    let started = Instant::now();
    let mapping = job.mapping;
    let table = mapping.target_table.clone();
    info!("Migrating {} -> {}", mapping.source_table, table);

    let mut worker = TableWorker {
        validator: RowValidator::new(job.target_info.clone()),
        outcome: TableOutcome {
            result: TableResult::new(&mapping.source_table, &table),
            errors: Vec::new(),
            review: Vec::new(),
            backup: TableBackup::new(&table, mapping.key_columns.clone()),
            warnings: Vec::new(),
            abort: None,
            cancelled: false,
        },
        truncated: BTreeSet::new(),
        job,
    };

    let total_rows = match worker.job.source.get_row_count(&mapping.source_table).await {
        Ok(n) => n,
        Err(e) => {
            worker.fail_table(e);
            return worker.finish(started);
        }
    };
    worker.job.reporter.send(ProgressEvent::TableStarted {
        table: table.clone(),
        total_rows,
    });

    let batch_size = worker.job.settings.batch_size.max(1);
    let (tx, rx) = mpsc::channel::<DataDiffRow>(batch_size);

    let comparator = worker.job.comparator;
    let source = worker.job.source;
    let target = worker.job.target;
    let pipeline = worker.job.pipeline;
    let target_info = worker.job.target_info;
    let compare = async move {
        comparator
            .compare_streaming(source, target, mapping, pipeline, Some(target_info), &tx)
            .await
    };

    let consume = async {
        // Owned here so the comparator stops as soon as this returns.
        let mut rx = rx;
        let mut pending = Vec::with_capacity(batch_size);
        let mut batch_index = 0usize;
        while let Some(diff) = rx.recv().await {
            pending.push(diff);
            if pending.len() < batch_size {
                continue;
            }
            if let Flow::Stop = worker.next_batch(std::mem::take(&mut pending), batch_index).await {
                return;
            }
            batch_index += 1;
        }
        if !pending.is_empty() {
            worker.next_batch(pending, batch_index).await;
        }
    };

    let (diff_result, ()) = tokio::join!(compare, consume);
    match diff_result {
        Ok(diff) => worker.outcome.result.diff = Some(diff),
        Err(e) => worker.fail_table(e),
    }
    worker.finish(started)
}

impl<'a> TableWorker<'a> {
    fn table(&self) -> &str {
        &self.job.mapping.target_table
    }

    fn fail_table(&mut self, e: MigrateError) {
        warn!("Table {} failed: {}", self.table(), e);
        self.outcome.result.error = Some(e.to_string());
        let error = MigrationError::new(self.table(), ErrorKind::Table, e.to_string())
            .retryable(e.is_transient());
        self.record_error(error);
        if e.is_fatal() && self.outcome.abort.is_none() {
            self.outcome.abort = Some(e);
        }
        self.outcome.result.status = TableStatus::Failed;
    }

    fn record_error(&mut self, error: MigrationError) {
        self.job.reporter.error(error.clone());
        self.outcome.errors.push(error);
    }

    fn skip(&mut self, reason: &SkipReason, delta: &mut RowCounters) {
        delta.skipped += 1;
        if *reason == SkipReason::Unchanged {
            delta.unchanged += 1;
        }
        if let SkipReason::MissingRequired(detail) = reason {
            debug!("Skipping row of {}: {}", self.table(), detail);
        }
        *self
            .outcome
            .result
            .skip_reasons
            .entry(reason.label().to_string())
            .or_default() += 1;
    }

    fn row_error(&mut self, diff: &DataDiffRow, kind: ErrorKind, message: String, batch_index: usize) {
        let error = MigrationError::new(self.table(), kind, message)
            .with_row(diff.source_index, diff.row_id.clone())
            .with_batch(batch_index);
        self.record_error(error);
    }

    fn note_truncations(&mut self, columns: Vec<String>) {
        for column in columns {
            if self.truncated.insert(column.clone()) {
                let max = self
                    .job
                    .target_info
                    .column(&column)
                    .and_then(|c| c.effective_max_length())
                    .unwrap_or_default();
                let message = format!(
                    "Values of {}.{} truncated to {} characters",
                    self.table(),
                    column,
                    max
                );
                warn!("{}", message);
                self.outcome.warnings.push(message);
            }
        }
    }

    /// Process one batch and decide whether the table continues.
    async fn next_batch(&mut self, rows: Vec<DataDiffRow>, batch_index: usize) -> Flow {
        if self.job.cancel.is_cancelled() {
            info!("Cancellation requested, stopping {} before batch {}", self.table(), batch_index);
            self.outcome.cancelled = true;
            return Flow::Stop;
        }
        let mut delta = RowCounters::default();
        let flow = self.process_batch(rows, batch_index, &mut delta).await;

        self.outcome.result.counters.add(&delta);
        self.outcome.result.batches += 1;
        self.job.reporter.batch(self.table(), delta);
        debug!(
            "{} batch {}: {} inserted, {} updated, {} deleted, {} skipped, {} errors",
            self.table(),
            batch_index,
            delta.inserted,
            delta.updated,
            delta.deleted,
            delta.skipped,
            delta.errors
        );
        flow
    }

    async fn process_batch(
        &mut self,
        rows: Vec<DataDiffRow>,
        batch_index: usize,
        delta: &mut RowCounters,
    ) -> Flow {
        let mode = self.job.settings.mode;
        let mapping = self.job.mapping;
        let keys = &mapping.key_columns;

        let mut writes = Vec::new();
        for diff in rows {
            delta.processed += 1;
            let mut cut = Vec::new();
            let disposition = dispose(mode, keys, &diff, &mut self.validator, &mut cut);
            self.note_truncations(cut);
            match disposition {
                Disposition::Write(op) => writes.push(PendingWrite {
                    op,
                    diff,
                    pre_image: None,
                }),
                Disposition::Skip(reason) => self.skip(&reason, delta),
                Disposition::Error { kind, message } => {
                    delta.errors += 1;
                    self.row_error(&diff, kind, message, batch_index);
                }
            }
        }

        let has_existing = writes
            .iter()
            .any(|w| !matches!(w.op, WriteOperation::Insert { .. }));
        if has_existing {
            writes = match self.resolve_conflicts(writes, batch_index, delta).await {
                Ok(writes) => writes,
                Err((e, writes)) => return self.fail_batch(e, writes, batch_index, delta),
            };
        }

        if self.job.settings.backup_before_migrate {
            for write in &writes {
                if let Some(pre) = &write.pre_image {
                    self.outcome.backup.rows.push(pre.clone());
                }
            }
        }

        if writes.is_empty() {
            return Flow::Continue;
        }

        let operations: Vec<WriteOperation> = writes.iter().map(|w| w.op.clone()).collect();
        match self.write_with_retry(&operations).await {
            Ok(report) => self.apply_report(report, &writes, batch_index, delta),
            Err(e) => self.fail_batch(e, writes, batch_index, delta),
        }
    }

    /// Re-read the target rows about to be updated or deleted and apply the
    /// conflict policy to any that changed since classification.
    async fn resolve_conflicts(
        &mut self,
        writes: Vec<PendingWrite>,
        batch_index: usize,
        delta: &mut RowCounters,
    ) -> std::result::Result<Vec<PendingWrite>, (MigrateError, Vec<PendingWrite>)> {
        let keys = self.job.mapping.key_columns.clone();
        let lookup: Vec<Vec<SqlValue>> = writes
            .iter()
            .filter(|w| !matches!(w.op, WriteOperation::Insert { .. }))
            .map(|w| w.diff.key.clone())
            .collect();

        let current_rows = match self
            .job
            .target
            .fetch_rows(&self.job.mapping.target_table, &keys, &lookup)
            .await
        {
            Ok(rows) => rows,
            Err(e) => return Err((e, writes)),
        };
        let current: HashMap<RowKey, Row> = current_rows
            .into_iter()
            .filter_map(|row| RowKey::from_row(&row, &keys).ok().map(|k| (k, row)))
            .collect();

        let mut kept = Vec::with_capacity(writes.len());
        for mut write in writes {
            if matches!(write.op, WriteOperation::Insert { .. }) {
                kept.push(write);
                continue;
            }
            let now = RowKey::from_row(&key_row(&keys, &write.diff.key), &keys)
                .ok()
                .and_then(|k| current.get(&k).cloned());
            let unchanged = match (&now, &write.diff.target_values) {
                (Some(now), Some(snapshot)) => now == snapshot,
                _ => false,
            };
            if unchanged {
                write.pre_image = now;
                kept.push(write);
                continue;
            }

            let is_delete = matches!(write.op, WriteOperation::Delete { .. });
            if is_delete && now.is_none() {
                // already gone
                delta.deleted += 1;
                continue;
            }

            delta.conflicts += 1;
            debug!(
                "Conflict on {} row {}: target changed since classification",
                self.table(),
                write.diff.row_id
            );
            match self.job.settings.conflict_resolution {
                ConflictResolution::SourceWins => {
                    if let Some(write) = self.rewrite(write, now, delta) {
                        kept.push(write);
                    }
                }
                ConflictResolution::TargetWins => self.skip(&SkipReason::TargetWins, delta),
                ConflictResolution::NewestWins => {
                    if is_delete {
                        self.skip(&SkipReason::TargetNewer, delta);
                        continue;
                    }
                    let Some(current_row) = &now else {
                        if let Some(write) = self.rewrite(write, None, delta) {
                            kept.push(write);
                        }
                        continue;
                    };
                    match self.source_is_newer(&write.diff.values, current_row) {
                        Ok(true) => {
                            if let Some(write) = self.rewrite(write, now, delta) {
                                kept.push(write);
                            }
                        }
                        Ok(false) => self.skip(&SkipReason::TargetNewer, delta),
                        Err(message) => {
                            delta.errors += 1;
                            self.row_error(&write.diff, ErrorKind::Conflict, message, batch_index);
                        }
                    }
                }
                ConflictResolution::ManualReview => {
                    delta.deferred += 1;
                    self.skip(&SkipReason::ManualReview, delta);
                    let (operation, key) = match &write.op {
                        WriteOperation::Update { key, .. } => ("update", key.clone()),
                        WriteOperation::Delete { key } => ("delete", key.clone()),
                        WriteOperation::Insert { row } => ("insert", row.clone()),
                    };
                    let item = ReviewItem {
                        table: self.table().to_string(),
                        row_id: write.diff.row_id.clone(),
                        operation: operation.to_string(),
                        key,
                        source_values: write.diff.values.clone(),
                        target_snapshot: write.diff.target_values.clone(),
                        target_current: now,
                    };
                    self.outcome.review.push(item);
                }
            }
        }
        Ok(kept)
    }

    /// Rebuild a conflicting write so the source row wins: the full row is
    /// written, as an insert if the target row is gone.
    fn rewrite(
        &mut self,
        mut write: PendingWrite,
        now: Option<Row>,
        delta: &mut RowCounters,
    ) -> Option<PendingWrite> {
        let mut cut = Vec::new();
        let disposition = match (&write.op, &now) {
            (WriteOperation::Delete { .. }, _) => {
                write.pre_image = now;
                return Some(write);
            }
            (_, None) => insert_or_skip(write.diff.values.clone(), &mut self.validator, &mut cut),
            (_, Some(_)) => {
                let mapping = self.job.mapping;
                let keys = &mapping.key_columns;
                let values: Row = write
                    .diff
                    .values
                    .iter()
                    .filter(|(c, _)| !keys.contains(c))
                    .map(|(c, v)| (c.clone(), v.clone()))
                    .collect();
                update_or_skip(
                    key_row(keys, &write.diff.key),
                    values,
                    &mut self.validator,
                    &mut cut,
                )
            }
        };
        self.note_truncations(cut);
        match disposition {
            Disposition::Write(op) => {
                write.op = op;
                write.pre_image = now;
                Some(write)
            }
            Disposition::Skip(reason) => {
                self.skip(&reason, delta);
                None
            }
            Disposition::Error { .. } => None,
        }
    }

    fn source_is_newer(&self, source: &Row, target: &Row) -> std::result::Result<bool, String> {
        let column = self
            .job
            .mapping
            .timestamp_column
            .as_ref()
            .or(self.job.settings.newest_wins_column.as_ref())
            .ok_or_else(|| "newest_wins needs a timestamp column".to_string())?;
        let read = |row: &Row| row.get(column).and_then(parse_timestamp);
        match (read(source), read(target)) {
            (Some(s), Some(t)) => Ok(s > t),
            _ => Err(format!(
                "cannot resolve conflict: timestamp column '{}' is missing or unreadable",
                column
            )),
        }
    }

    /// Write a batch, retrying transient failures.
    async fn write_with_retry(&self, operations: &[WriteOperation]) -> Result<WriteReport> {
        let retries = self.job.policy.retry_count();
        let mut attempt = 0;
        loop {
            let outcome = match self.job.settings.transaction_mode {
                TransactionMode::PerBatch => self.write_in_transaction(operations).await,
                TransactionMode::WholeMigration | TransactionMode::None => {
                    self.job
                        .target
                        .write_batch(self.table(), operations)
                        .await
                }
            };
            match outcome {
                Ok(report) => return Ok(report),
                Err(e) if e.is_transient() && attempt < retries => {
                    attempt += 1;
                    let delay = self.job.policy.backoff(attempt);
                    warn!(
                        "Batch write to {} failed ({}), retry {}/{} in {:?}",
                        self.table(),
                        e,
                        attempt,
                        retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_in_transaction(&self, operations: &[WriteOperation]) -> Result<WriteReport> {
        let target = self.job.target;
        target.begin_tx().await?;
        let report = match target.write_batch(self.table(), operations).await {
            Ok(report) => report,
            Err(e) => {
                if let Err(rb) = target.rollback_tx().await {
                    warn!("Rollback after failed batch on {} failed: {}", self.table(), rb);
                }
                return Err(e);
            }
        };
        if let Err(e) = target.commit_tx().await {
            if let Err(rb) = target.rollback_tx().await {
                debug!("Rollback after failed commit on {}: {}", self.table(), rb);
            }
            return Err(e);
        }
        Ok(report)
    }

    fn apply_report(
        &mut self,
        report: WriteReport,
        writes: &[PendingWrite],
        batch_index: usize,
        delta: &mut RowCounters,
    ) -> Flow {
        let failed: HashMap<usize, &str> = report
            .failures
            .iter()
            .map(|f| (f.index, f.message.as_str()))
            .collect();

        let mut first_failure = None;
        for (index, write) in writes.iter().enumerate() {
            if let Some(message) = failed.get(&index) {
                delta.errors += 1;
                let message = format!("{} rejected: {}", write.op.kind(), message);
                if first_failure.is_none() {
                    first_failure = Some(MigrateError::row_write(
                        self.table(),
                        write.diff.source_index,
                        message.clone(),
                    ));
                }
                self.row_error(&write.diff, ErrorKind::RowWrite, message, batch_index);
                continue;
            }
            match write.op {
                WriteOperation::Insert { .. } => delta.inserted += 1,
                WriteOperation::Update { .. } => delta.updated += 1,
                WriteOperation::Delete { .. } => delta.deleted += 1,
            }
        }

        let promote = self.job.settings.transaction_mode == TransactionMode::WholeMigration
            && self.job.settings.auto_rollback;
        match first_failure {
            Some(e) if promote => {
                warn!("Row error in {} aborts the whole migration: {}", self.table(), e);
                self.outcome.abort = Some(e);
                Flow::Stop
            }
            _ => Flow::Continue,
        }
    }

    /// Every row of a failed batch becomes an error.
    fn fail_batch(
        &mut self,
        e: MigrateError,
        writes: Vec<PendingWrite>,
        batch_index: usize,
        delta: &mut RowCounters,
    ) -> Flow {
        warn!("Batch {} of {} failed: {}", batch_index, self.table(), e);
        for write in &writes {
            delta.errors += 1;
            let error = MigrationError::new(self.table(), ErrorKind::Batch, e.to_string())
                .with_row(write.diff.source_index, write.diff.row_id.clone())
                .with_batch(batch_index)
                .retryable(e.is_transient());
            self.record_error(error);
        }
        let whole = self.job.settings.transaction_mode == TransactionMode::WholeMigration;
        if e.is_fatal() || whole {
            self.outcome.result.error = Some(e.to_string());
            self.outcome.abort = Some(e);
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn finish(mut self, started: Instant) -> TableOutcome {
        let dropped: Vec<String> = self.validator.dropped_columns().iter().cloned().collect();
        if !dropped.is_empty() {
            let message = format!(
                "Source columns not present in {} were not written: {}",
                self.table(),
                dropped.join(", ")
            );
            warn!("{}", message);
            self.outcome.warnings.push(message);
        }

        let status = if self.outcome.abort.is_some() || self.outcome.result.error.is_some() {
            TableStatus::Failed
        } else if self.outcome.cancelled {
            TableStatus::Cancelled
        } else {
            TableStatus::Completed
        };

        let result = &mut self.outcome.result;
        result.dropped_columns = dropped;
        result.truncated_columns = self.truncated.iter().cloned().collect();
        result.status = status;
        result.duration_ms = started.elapsed().as_millis() as u64;

        self.job.reporter.send(ProgressEvent::TableFinished {
            table: result.target_table.clone(),
            status,
        });
        info!(
            "{} {}: {} inserted, {} updated, {} deleted, {} skipped, {} errors",
            result.target_table,
            status,
            result.counters.inserted,
            result.counters.updated,
            result.counters.deleted,
            result.counters.skipped,
            result.counters.errors
        );
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{row, ColumnInfo, DatabaseEngine};

    fn validator() -> RowValidator {
        let mut info = TableInfo::new(
            "users",
            vec![
                ColumnInfo::new("id", "int").primary_key(),
                ColumnInfo::new("name", "varchar(20)").not_null(),
            ],
        );
        info.resolve_canonical_types(DatabaseEngine::MySql);
        RowValidator::new(info)
    }

    fn diff(status: RowStatus, values: Row) -> DataDiffRow {
        let mut diff: DataDiffRow = serde_json::from_value(serde_json::json!({
            "row_id": "1",
            "status": status,
            "values": {},
        }))
        .unwrap();
        diff.key = vec![SqlValue::I32(1)];
        diff.values = values;
        diff
    }

    fn keys() -> Vec<String> {
        vec!["id".to_string()]
    }

    #[test]
    fn test_mode_table() {
        let alice = row([("id", SqlValue::I32(1)), ("name", SqlValue::from("Alice"))]);
        let mut updated = diff(RowStatus::Updated, alice.clone());
        updated.changed_columns = vec!["name".into()];
        let inserted = diff(RowStatus::Inserted, alice.clone());
        let deleted = diff(RowStatus::Deleted, alice);

        let mut v = validator();
        let mut cut = Vec::new();
        let mut run = |mode, d: &DataDiffRow| dispose(mode, &keys(), d, &mut v, &mut cut);

        assert!(matches!(
            run(MigrationMode::Upsert, &updated),
            Disposition::Write(WriteOperation::Update { .. })
        ));
        assert!(matches!(
            run(MigrationMode::Merge, &updated),
            Disposition::Write(WriteOperation::Update { .. })
        ));
        assert_eq!(
            run(MigrationMode::AppendOnly, &updated),
            Disposition::Skip(SkipReason::IgnoredByMode)
        );
        assert!(matches!(
            run(MigrationMode::AppendOnly, &inserted),
            Disposition::Write(WriteOperation::Insert { .. })
        ));
        assert_eq!(
            run(MigrationMode::Upsert, &deleted),
            Disposition::Skip(SkipReason::IgnoredByMode)
        );
        assert!(matches!(
            run(MigrationMode::Mirror, &deleted),
            Disposition::Write(WriteOperation::Delete { .. })
        ));
    }

    #[test]
    fn test_update_writes_changed_columns_only() {
        let mut d = diff(
            RowStatus::Updated,
            row([
                ("id", SqlValue::I32(1)),
                ("name", SqlValue::from("Alice")),
                ("email", SqlValue::from("a@example.com")),
            ]),
        );
        d.changed_columns = vec!["name".into()];
        let mut v = validator();
        let mut cut = Vec::new();
        match dispose(MigrationMode::Upsert, &keys(), &d, &mut v, &mut cut) {
            Disposition::Write(WriteOperation::Update { key, row }) => {
                assert_eq!(key, row_of("id", SqlValue::I32(1)));
                assert_eq!(row, row_of("name", SqlValue::from("Alice")));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    fn row_of(column: &str, value: SqlValue) -> Row {
        row([(column, value)])
    }

    #[test]
    fn test_error_rows() {
        let mut d = diff(RowStatus::Error, Row::new());
        d.error = Some("Transform failed for column 'age': invalid digit".into());
        d.transform_failed = true;
        let mut v = validator();
        let mut cut = Vec::new();
        assert!(matches!(
            dispose(MigrationMode::Upsert, &keys(), &d, &mut v, &mut cut),
            Disposition::Error { kind: ErrorKind::RowWrite, .. }
        ));

        d.transform_failed = false;
        assert!(matches!(
            dispose(MigrationMode::Upsert, &keys(), &d, &mut v, &mut cut),
            Disposition::Error { kind: ErrorKind::Classification, .. }
        ));
    }

    #[test]
    fn test_insert_missing_required_skipped() {
        let d = diff(RowStatus::Inserted, row([("id", SqlValue::I32(1))]));
        let mut v = validator();
        let mut cut = Vec::new();
        let disposition = dispose(MigrationMode::Upsert, &keys(), &d, &mut v, &mut cut);
        assert!(matches!(
            disposition,
            Disposition::Skip(SkipReason::MissingRequired(_))
        ));
    }
}
