//! Migration orchestrator - main workflow coordinator.
//!
//! A run moves through `configuring -> running -> {completed, failed,
//! cancelled}`; a dry run goes through `configuring` and classifies rows
//! without writing. Both share the same preparation:
//!
//! 1. load table metadata from both sides and resolve canonical types
//! 2. order the mappings by foreign-key dependencies
//! 3. compile the transform rules
//!
//! Tables are then migrated level by level. Runs are registered by
//! migration id and config hash so two runs of the same config never
//! overlap.

mod backup;
mod dry_run;
mod ordering;
mod progress;
mod result;
mod retry;
mod table;
mod validate;

pub use backup::{read_backup, write_backups, TableBackup};
pub use dry_run::{DryRunResult, TableEstimate, LARGE_ROW_COUNT, LARGE_TABLE_COUNT, PER_BATCH_COST_MS};
pub use ordering::{order_tables, TablePlan};
pub use progress::{
    ErrorKind, MigrationError, MigrationPhase, MigrationProgress, ProgressEvent, ProgressReporter,
    ProgressTracker, RowCounters, TableProgress, TableStatus,
};
pub use result::{MigrationResult, MigrationStatus, ReviewItem, TableResult};
pub use retry::{GuardedDriver, RetryPolicy};
pub use validate::{RowCheck, RowValidator};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::compare::{self, DataComparator, DataDiff, DataDiffResult, DataDiffRow, SchemaDiffResult};
use crate::config::{Config, MigrationMode, TransactionMode};
use crate::core::{DatabaseDriver, DriverCatalog, TableInfo, TableMapping};
use crate::dialect::{map_type, Lossiness};
use crate::error::{MigrateError, Result};
use crate::state::{NoOpStateBackend, RunRecord, RunStatus, StateBackend, TableRecord};
use crate::transform::{TransformPipeline, TransformSet};

use dry_run::{run_dry_run, DryRunPlan, PlannedTable};
use table::{migrate_table, TableJob, TableOutcome};

/// Connected source and target.
#[derive(Clone)]
pub struct Endpoints {
    pub source: Arc<dyn DatabaseDriver>,
    pub target: Arc<dyn DatabaseDriver>,
}

impl Endpoints {
    pub fn new(source: Arc<dyn DatabaseDriver>, target: Arc<dyn DatabaseDriver>) -> Self {
        Self { source, target }
    }

    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}

struct RunHandle {
    cancel: CancellationToken,
    progress: Option<watch::Receiver<MigrationProgress>>,
}

type Registry = Arc<Mutex<HashMap<String, RunHandle>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<String, RunHandle>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a run's registry entries when dropped.
struct RunGuard {
    registry: Registry,
    keys: Vec<String>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut runs = lock(&self.registry);
        for key in &self.keys {
            runs.remove(key);
        }
    }
}

/// Metadata and plan shared by dry runs and migrations.
struct Prepared {
    mappings: Vec<TableMapping>,
    source_infos: Vec<TableInfo>,
    target_infos: Vec<TableInfo>,
    pipelines: Vec<TransformPipeline>,
    plan: TablePlan,
    warnings: Vec<String>,
}

/// Migration orchestrator.
///
/// Cheap to clone; clones share the run registry, so a clone can cancel a
/// run started by another.
#[derive(Clone)]
pub struct Orchestrator {
    catalog: Arc<DriverCatalog>,
    state: Arc<dyn StateBackend>,
    runs: Registry,
}

impl Orchestrator {
    /// Create an orchestrator that opens endpoints through `catalog`.
    pub fn new(catalog: DriverCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            state: Arc::new(NoOpStateBackend::new()),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist run history through `state`.
    pub fn with_state_backend(mut self, state: Arc<dyn StateBackend>) -> Self {
        self.state = state;
        self
    }

    pub fn catalog(&self) -> &DriverCatalog {
        &self.catalog
    }

    /// Open both endpoints of `config`.
    pub async fn connect(&self, config: &Config) -> Result<Endpoints> {
        let source = self.catalog.connect(&config.source).await?;
        let target = self.catalog.connect(&config.target).await?;
        Ok(Endpoints { source, target })
    }

    /// Whether a dry run or migration is registered under `migration_id`.
    pub fn is_running(&self, migration_id: &str) -> bool {
        lock(&self.runs).contains_key(migration_id)
    }

    /// Request cooperative cancellation. Returns `false` if no run with
    /// that id is active.
    pub fn cancel_migration(&self, migration_id: &str) -> bool {
        match lock(&self.runs).get(migration_id) {
            Some(handle) => {
                info!("Cancellation requested for {}", migration_id);
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Live progress snapshots of an active migration.
    pub fn subscribe(&self, migration_id: &str) -> Option<watch::Receiver<MigrationProgress>> {
        lock(&self.runs)
            .get(migration_id)
            .and_then(|handle| handle.progress.clone())
    }

    /// Recorded runs, oldest first.
    pub async fn history(&self) -> Result<Vec<RunRecord>> {
        self.state.list().await
    }

    fn register(
        &self,
        migration_id: Option<&str>,
        config_hash: &str,
        cancel: CancellationToken,
        progress: Option<watch::Receiver<MigrationProgress>>,
    ) -> Result<RunGuard> {
        let config_key = format!("config:{}", config_hash);
        let mut keys = vec![config_key.clone()];
        if let Some(id) = migration_id {
            keys.insert(0, id.to_string());
        }

        let mut runs = lock(&self.runs);
        for key in &keys {
            if runs.contains_key(key) {
                let who = if key == &config_key {
                    format!("a run of this configuration ({})", &config_hash[..12.min(config_hash.len())])
                } else {
                    key.clone()
                };
                return Err(MigrateError::MigrationInProgress(who));
            }
        }
        for key in &keys {
            runs.insert(
                key.clone(),
                RunHandle {
                    cancel: cancel.clone(),
                    progress: progress.clone(),
                },
            );
        }
        drop(runs);

        Ok(RunGuard {
            registry: self.runs.clone(),
            keys,
        })
    }

    /// Classify every row of the selected mappings without writing.
    ///
    /// An empty `mappings` slice selects the included mappings of `config`.
    pub async fn dry_run(&self, config: &Config, mappings: &[TableMapping]) -> Result<DryRunResult> {
        let endpoints = self.connect(config).await?;
        let result = self.dry_run_on(&endpoints, config, mappings).await;
        endpoints.close().await;
        result
    }

    /// [`dry_run`](Self::dry_run) against already-open endpoints.
    pub async fn dry_run_on(
        &self,
        endpoints: &Endpoints,
        config: &Config,
        mappings: &[TableMapping],
    ) -> Result<DryRunResult> {
        config.validate()?;
        let mappings = select_mappings(config, mappings)?;
        let _guard = self.register(None, &config.hash(), CancellationToken::new(), None)?;

        info!("Dry run: {} table(s), mode {}", mappings.len(), config.migration.mode);
        let policy = RetryPolicy::new(&config.migration);
        let source = GuardedDriver::new(endpoints.source.clone(), policy.clone());
        let target = GuardedDriver::new(endpoints.target.clone(), policy);

        let prepared = prepare(&source, &target, config, mappings).await?;
        let comparator = DataComparator::new(config.compare.clone());
        let plan = DryRunPlan {
            source: &source,
            target: &target,
            settings: &config.migration,
            comparator: &comparator,
            tables: prepared
                .plan
                .order()
                .into_iter()
                .map(|i| PlannedTable {
                    mapping: &prepared.mappings[i],
                    pipeline: prepared.pipelines[i].clone(),
                    source_info: &prepared.source_infos[i],
                    target_info: &prepared.target_infos[i],
                })
                .collect(),
        };

        let mut result = run_dry_run(plan).await;
        let mut warnings = prepared.warnings.clone();
        warnings.append(&mut result.warnings);
        result.warnings = dedup(warnings);
        Ok(result)
    }

    /// Connect, run a migration, and close the endpoints.
    pub async fn execute_migration(
        &self,
        config: &Config,
        mappings: &[TableMapping],
        migration_id: &str,
    ) -> Result<MigrationResult> {
        let endpoints = self.connect(config).await?;
        let result = self
            .execute_migration_on(&endpoints, config, mappings, migration_id, None)
            .await;
        endpoints.close().await;
        result
    }

    /// Run a migration against already-open endpoints.
    ///
    /// Progress events are forwarded to `observer` when given; snapshots are
    /// available through [`subscribe`](Self::subscribe) while the run is
    /// active. Errors before the first write (connection, metadata, FK
    /// cycle) are returned as `Err`; everything after is reported in the
    /// result.
    pub async fn execute_migration_on(
        &self,
        endpoints: &Endpoints,
        config: &Config,
        mappings: &[TableMapping],
        migration_id: &str,
        observer: Option<mpsc::UnboundedSender<ProgressEvent>>,
    ) -> Result<MigrationResult> {
        if config.migration.dry_run {
            return Err(MigrateError::Config(
                "migration.dry_run is set; use a dry run instead".into(),
            ));
        }
        config.validate()?;
        let mappings = select_mappings(config, mappings)?;

        let cancel = CancellationToken::new();
        let (watch_tx, watch_rx) = watch::channel(MigrationProgress::new(migration_id));
        let _guard = self.register(
            Some(migration_id),
            &config.hash(),
            cancel.clone(),
            Some(watch_rx),
        )?;

        let tracker = ProgressTracker::spawn(migration_id, watch_tx, observer);
        let reporter = tracker.reporter();
        reporter.phase(MigrationPhase::Configuring);

        let mut record = RunRecord::new(migration_id, config);
        self.persist(&mut record).await;

        let run = Run {
            id: migration_id,
            config,
            started_at: Utc::now(),
            clock: Instant::now(),
            policy: RetryPolicy::new(&config.migration),
            reporter,
            cancel,
        };
        let outcome = run.execute(endpoints, mappings).await;

        let (status, finished) = match &outcome {
            Ok(result) => (result.status.as_run_status(), Some(result)),
            Err(MigrateError::Cancelled) => (RunStatus::Cancelled, None),
            Err(_) => (RunStatus::Failed, None),
        };
        if let Some(result) = finished {
            fill_record(&mut record, result);
        }
        record.finish(status);
        self.persist(&mut record).await;

        if let Some(progress) = tracker.finish().await {
            debug!(
                "Final progress for {}: {} rows processed",
                migration_id, progress.totals.processed
            );
        }
        outcome
    }

    async fn persist(&self, record: &mut RunRecord) {
        if let Err(e) = self.state.save(record).await {
            warn!("Failed to record run {}: {}", record.run_id, e);
        }
    }

    /// Compare the schemas of the mapped tables, or of every table when
    /// `config` has no mappings.
    pub async fn compare_schema(
        &self,
        endpoints: &Endpoints,
        config: &Config,
    ) -> Result<SchemaDiffResult> {
        compare::compare_schema(
            endpoints.source.as_ref(),
            endpoints.target.as_ref(),
            &config.included_tables(),
            config.migration.case_sensitive_names,
        )
        .await
    }

    /// Diff the rows of one mapping, with its transforms applied.
    pub async fn compare_data(
        &self,
        endpoints: &Endpoints,
        config: &Config,
        mapping: &TableMapping,
    ) -> Result<DataDiff> {
        mapping.validate()?;
        let pipeline = TransformSet::compile(&config.transforms, endpoints.target.engine())?
            .for_table(&mapping.source_table);
        let target_info = endpoints.target.get_table_info(&mapping.target_table).await?;
        DataComparator::new(config.compare.clone())
            .compare(
                endpoints.source.as_ref(),
                endpoints.target.as_ref(),
                mapping,
                &pipeline,
                Some(&target_info),
            )
            .await
    }

    /// Like [`compare_data`](Self::compare_data), streaming classified rows
    /// into `tx` instead of collecting them.
    pub async fn compare_data_streaming(
        &self,
        endpoints: &Endpoints,
        config: &Config,
        mapping: &TableMapping,
        tx: &mpsc::Sender<DataDiffRow>,
    ) -> Result<DataDiffResult> {
        mapping.validate()?;
        let pipeline = TransformSet::compile(&config.transforms, endpoints.target.engine())?
            .for_table(&mapping.source_table);
        let target_info = endpoints.target.get_table_info(&mapping.target_table).await?;
        DataComparator::new(config.compare.clone())
            .compare_streaming(
                endpoints.source.as_ref(),
                endpoints.target.as_ref(),
                mapping,
                &pipeline,
                Some(&target_info),
                tx,
            )
            .await
    }
}

/// State of one migration run.
struct Run<'a> {
    id: &'a str,
    config: &'a Config,
    started_at: chrono::DateTime<Utc>,
    clock: Instant,
    policy: RetryPolicy,
    reporter: ProgressReporter,
    cancel: CancellationToken,
}

impl Run<'_> {
    async fn execute(self, endpoints: &Endpoints, mappings: Vec<TableMapping>) -> Result<MigrationResult> {
        let settings = &self.config.migration;
        info!(
            "Starting migration {}: {} table(s), mode {}, {} transactions",
            self.id,
            mappings.len(),
            settings.mode,
            settings.transaction_mode
        );
        let source = GuardedDriver::new(endpoints.source.clone(), self.policy.clone());
        let target = GuardedDriver::new(endpoints.target.clone(), self.policy.clone());

        info!("Phase 1: Loading table metadata");
        let prepared = match prepare(&source, &target, self.config, mappings).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Migration {} failed before any writes: {}", self.id, e);
                self.reporter.phase(MigrationPhase::Failed);
                return Err(e);
            }
        };
        for i in prepared.plan.order() {
            self.reporter.send(ProgressEvent::TablePlanned {
                source_table: prepared.mappings[i].source_table.clone(),
                target_table: prepared.mappings[i].target_table.clone(),
            });
        }

        if settings.mode == MigrationMode::SchemaOnly {
            return self.schema_only(&source, &target, prepared).await;
        }

        info!("Phase 2: Transferring data");
        self.reporter.phase(MigrationPhase::Running);
        let whole = settings.transaction_mode == TransactionMode::WholeMigration;
        if whole {
            if let Err(e) = target.begin_tx().await {
                error!("Could not open the migration transaction: {}", e);
                self.reporter.phase(MigrationPhase::Failed);
                return Err(e);
            }
        }

        let mut outcomes = self.transfer(&source, &target, &prepared).await;

        info!("Phase 3: Finalizing");
        let mut abort = outcomes.iter_mut().find_map(|o| o.as_mut().and_then(|o| o.abort.take()));
        let cancelled = self.cancel.is_cancelled()
            || outcomes.iter().flatten().any(|o| o.cancelled);

        let mut rolled_back = false;
        if whole {
            if abort.is_some() || cancelled {
                warn!("Rolling back migration {}", self.id);
                if let Err(e) = target.rollback_tx().await {
                    error!("Rollback of migration {} failed: {}", self.id, e);
                }
                rolled_back = true;
            } else if let Err(e) = target.commit_tx().await {
                error!("Commit of migration {} failed: {}", self.id, e);
                if let Err(rb) = target.rollback_tx().await {
                    debug!("Rollback after failed commit: {}", rb);
                }
                rolled_back = true;
                abort = Some(e);
            }
        }

        let mut result = self.assemble(&prepared, outcomes, rolled_back);
        if let Some(e) = &abort {
            result.warnings.push(format!("Migration aborted: {}", e));
        }
        result.status = if abort.is_some() {
            if rolled_back {
                MigrationStatus::RolledBack
            } else {
                MigrationStatus::Failed
            }
        } else if cancelled {
            MigrationStatus::Cancelled
        } else if result.tables.iter().any(|t| t.status == TableStatus::Failed) {
            MigrationStatus::Failed
        } else {
            MigrationStatus::Completed
        };

        if settings.backup_before_migrate {
            if let Some(dir) = &settings.backup_dir {
                let non_empty: Vec<TableBackup> =
                    result.backup.iter().filter(|b| !b.is_empty()).cloned().collect();
                if !non_empty.is_empty() {
                    match write_backups(dir, self.id, &non_empty) {
                        Ok(path) => result.backup_path = Some(path),
                        Err(e) => {
                            warn!("Failed to write backup: {}", e);
                            result.warnings.push(format!("Backup not written: {}", e));
                        }
                    }
                }
            }
        }

        self.reporter.phase(match result.status {
            MigrationStatus::Completed => MigrationPhase::Completed,
            MigrationStatus::Cancelled => MigrationPhase::Cancelled,
            _ => MigrationPhase::Failed,
        });
        info!(
            "Migration {} {} in {:.1}s: {} inserted, {} updated, {} deleted, {} skipped, {} errors",
            self.id,
            result.status,
            result.duration_ms as f64 / 1000.0,
            result.totals.inserted,
            result.totals.updated,
            result.totals.deleted,
            result.totals.skipped,
            result.totals.errors
        );
        Ok(result)
    }

    /// Migrate every table level by level. Returns one slot per mapping;
    /// `None` for tables never started.
    async fn transfer(
        &self,
        source: &GuardedDriver,
        target: &GuardedDriver,
        prepared: &Prepared,
    ) -> Vec<Option<TableOutcome>> {
        let settings = &self.config.migration;
        let comparator = DataComparator::new(self.config.compare.clone());
        let mut outcomes: Vec<Option<TableOutcome>> =
            (0..prepared.mappings.len()).map(|_| None).collect();

        let parallel =
            settings.transaction_mode == TransactionMode::None && settings.max_parallel_tables > 1;
        let workers = settings
            .max_parallel_tables
            .min(target.max_connections())
            .max(1);
        let semaphore = Semaphore::new(workers);
        if parallel {
            info!("Processing independent tables with {} workers", workers);
        }

        let comparator = &comparator;
        let job = move |i: usize| TableJob {
            mapping: &prepared.mappings[i],
            source,
            target,
            pipeline: &prepared.pipelines[i],
            target_info: &prepared.target_infos[i],
            comparator,
            settings,
            policy: &self.policy,
            reporter: &self.reporter,
            cancel: &self.cancel,
        };
        let must_stop = |outcomes: &[Option<TableOutcome>]| {
            self.cancel.is_cancelled()
                || outcomes
                    .iter()
                    .flatten()
                    .any(|o| o.abort.is_some() || o.cancelled)
        };

        for (depth, level) in prepared.plan.levels.iter().enumerate() {
            if must_stop(&outcomes) {
                break;
            }
            debug!("Level {}: {} table(s)", depth, level.len());
            if parallel && level.len() > 1 {
                let semaphore = &semaphore;
                let runs = level.iter().map(|&i| {
                    let job = job(i);
                    async move {
                        let _permit = semaphore.acquire().await.ok();
                        (i, migrate_table(job).await)
                    }
                });
                for (i, outcome) in join_all(runs).await {
                    outcomes[i] = Some(outcome);
                }
            } else {
                for &i in level {
                    if must_stop(&outcomes) {
                        break;
                    }
                    outcomes[i] = Some(migrate_table(job(i)).await);
                }
            }
        }
        outcomes
    }

    /// Build the result in processing order; unstarted tables are skipped.
    fn assemble(
        &self,
        prepared: &Prepared,
        outcomes: Vec<Option<TableOutcome>>,
        rolled_back: bool,
    ) -> MigrationResult {
        let mut slots: Vec<Option<TableOutcome>> = outcomes;
        let mut result = self.empty_result(prepared);
        result.rolled_back = rolled_back;

        for i in prepared.plan.order() {
            let mapping = &prepared.mappings[i];
            match slots[i].take() {
                Some(outcome) => {
                    let mut table = outcome.result;
                    if rolled_back && table.status != TableStatus::Skipped {
                        table.status = TableStatus::RolledBack;
                    }
                    result.totals.add(&table.counters);
                    result.tables.push(table);
                    result.errors.extend(outcome.errors);
                    result.review_queue.extend(outcome.review);
                    result.warnings.extend(outcome.warnings);
                    if !outcome.backup.is_empty() {
                        result.backup.push(outcome.backup);
                    }
                }
                None => {
                    let mut table = TableResult::new(&mapping.source_table, &mapping.target_table);
                    table.status = TableStatus::Skipped;
                    self.reporter.send(ProgressEvent::TableFinished {
                        table: mapping.target_table.clone(),
                        status: TableStatus::Skipped,
                    });
                    result.tables.push(table);
                }
            }
        }
        result.warnings = dedup(std::mem::take(&mut result.warnings));
        result.completed_at = Utc::now();
        result.duration_ms = self.clock.elapsed().as_millis() as u64;
        result
    }

    fn empty_result(&self, prepared: &Prepared) -> MigrationResult {
        MigrationResult {
            migration_id: self.id.to_string(),
            status: MigrationStatus::Running,
            started_at: self.started_at,
            completed_at: Utc::now(),
            duration_ms: 0,
            totals: RowCounters::default(),
            tables: Vec::with_capacity(prepared.mappings.len()),
            errors: Vec::new(),
            warnings: prepared.warnings.clone(),
            review_queue: Vec::new(),
            backup: Vec::new(),
            backup_path: None,
            rolled_back: false,
            schema_diff: None,
        }
    }

    /// SchemaOnly: report the schema diff and representability problems,
    /// write no rows.
    async fn schema_only(
        &self,
        source: &GuardedDriver,
        target: &GuardedDriver,
        prepared: Prepared,
    ) -> Result<MigrationResult> {
        info!("Phase 2: Comparing schemas (schema_only)");
        self.reporter.phase(MigrationPhase::Running);
        let comparator = compare::SchemaComparator::new(source.engine(), target.engine())
            .case_sensitive(self.config.migration.case_sensitive_names);

        let mut result = self.empty_result(&prepared);
        let mut pairs = Vec::with_capacity(prepared.mappings.len());
        for i in prepared.plan.order() {
            let mapping = &prepared.mappings[i];
            let target_info = &prepared.target_infos[i];
            let target_side = if target_info.columns.is_empty() {
                None
            } else {
                Some(target_info.clone())
            };
            pairs.push((Some(prepared.source_infos[i].clone()), target_side));

            for column in &prepared.source_infos[i].columns {
                let mapped = map_type(source.engine(), target.engine(), &column.data_type);
                if mapped.lossiness == Lossiness::Unsupported {
                    let issue = MigrateError::SchemaIncompatibility {
                        table: mapping.source_table.clone(),
                        column: column.name.clone(),
                        message: mapped
                            .warning
                            .unwrap_or_else(|| format!("no {} equivalent", target.engine())),
                    };
                    warn!("{}", issue);
                    result.warnings.push(issue.to_string());
                }
            }

            let mut table = TableResult::new(&mapping.source_table, &mapping.target_table);
            table.status = TableStatus::Completed;
            self.reporter.send(ProgressEvent::TableFinished {
                table: mapping.target_table.clone(),
                status: TableStatus::Completed,
            });
            result.tables.push(table);
        }

        let diff = comparator.compare_table_sets(source.identity(), target.identity(), &pairs);
        info!(
            "Schema diff: {} added, {} removed, {} modified, {} unchanged",
            diff.summary.additions,
            diff.summary.removals,
            diff.summary.modifications,
            diff.summary.unchanged
        );
        result.schema_diff = Some(diff);
        result.warnings = dedup(std::mem::take(&mut result.warnings));
        result.status = MigrationStatus::Completed;
        result.completed_at = Utc::now();
        result.duration_ms = self.clock.elapsed().as_millis() as u64;
        self.reporter.phase(MigrationPhase::Completed);
        Ok(result)
    }
}

/// The mappings a run works on: `requested` if given, else the included
/// mappings of `config`. Excluded mappings are dropped either way.
fn select_mappings(config: &Config, requested: &[TableMapping]) -> Result<Vec<TableMapping>> {
    let mappings: Vec<TableMapping> = if requested.is_empty() {
        config.included_tables()
    } else {
        requested.iter().filter(|m| m.included).cloned().collect()
    };
    if mappings.is_empty() {
        return Err(MigrateError::Config("No tables selected for migration".into()));
    }
    for mapping in &mappings {
        mapping.validate()?;
    }
    Ok(mappings)
}

/// Load metadata, resolve canonical types, order the mappings, and compile
/// transforms.
async fn prepare(
    source: &dyn DatabaseDriver,
    target: &dyn DatabaseDriver,
    config: &Config,
    mappings: Vec<TableMapping>,
) -> Result<Prepared> {
    let schema_only = config.migration.mode == MigrationMode::SchemaOnly;
    let mut warnings = Vec::new();
    let mut source_infos = Vec::with_capacity(mappings.len());
    let mut target_infos = Vec::with_capacity(mappings.len());

    for mapping in &mappings {
        let mut source_info = source.get_table_info(&mapping.source_table).await?;
        warnings.extend(source_info.resolve_canonical_types(source.engine()));

        let mut target_info = match target.get_table_info(&mapping.target_table).await {
            Ok(info) => info,
            Err(e) if schema_only && !e.is_transient() => {
                warnings.push(format!(
                    "Target table {} does not exist",
                    mapping.target_table
                ));
                TableInfo::new(mapping.target_table.clone(), Vec::new())
            }
            Err(e) => return Err(e),
        };
        warnings.extend(target_info.resolve_canonical_types(target.engine()));

        if !schema_only {
            for key in &mapping.key_columns {
                if !target_info.has_column(key) {
                    return Err(MigrateError::Config(format!(
                        "Key column '{}' not found in target table {}",
                        key, mapping.target_table
                    )));
                }
            }
        }
        source_infos.push(source_info);
        target_infos.push(target_info);
    }

    let source_by_name: HashMap<String, TableInfo> = mappings
        .iter()
        .zip(&source_infos)
        .map(|(m, info)| (m.source_table.clone(), info.clone()))
        .collect();
    let target_by_name: HashMap<String, TableInfo> = mappings
        .iter()
        .zip(&target_infos)
        .map(|(m, info)| (m.target_table.clone(), info.clone()))
        .collect();
    let plan = order_tables(&mappings, &source_by_name, &target_by_name)?;
    debug!("Table order: {} level(s)", plan.levels.len());

    let transforms = TransformSet::compile(&config.transforms, target.engine())?;
    let pipelines = mappings
        .iter()
        .map(|m| transforms.for_table(&m.source_table))
        .collect();

    Ok(Prepared {
        mappings,
        source_infos,
        target_infos,
        pipelines,
        plan,
        warnings: dedup(warnings),
    })
}

fn fill_record(record: &mut RunRecord, result: &MigrationResult) {
    record.rows_inserted = result.totals.inserted;
    record.rows_updated = result.totals.updated;
    record.rows_deleted = result.totals.deleted;
    record.rows_skipped = result.totals.skipped;
    record.error_count = result.totals.errors;
    for table in &result.tables {
        record.tables.insert(
            table.target_table.clone(),
            TableRecord {
                status: table.status.to_string(),
                rows_inserted: table.counters.inserted,
                rows_updated: table.counters.updated,
                rows_deleted: table.counters.deleted,
                rows_skipped: table.counters.skipped,
                error_count: table.counters.errors,
                error: table.error.clone(),
            },
        );
    }
    match serde_json::to_value(result) {
        Ok(snapshot) => record.result_snapshot = Some(snapshot),
        Err(e) => warn!("Could not snapshot result of {}: {}", result.migration_id, e),
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_mappings_drops_excluded() {
        let mut skipped = TableMapping::same_name("audit", &["id"]);
        skipped.included = false;
        let config = Config::new(
            crate::config::ConnectionConfig::file(crate::core::DatabaseEngine::Sqlite, "a.json"),
            crate::config::ConnectionConfig::file(crate::core::DatabaseEngine::Sqlite, "b.json"),
        );
        let selected =
            select_mappings(&config, &[TableMapping::same_name("users", &["id"]), skipped]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].source_table, "users");

        assert!(matches!(
            select_mappings(&config, &[]),
            Err(MigrateError::Config(_))
        ));
    }

    #[test]
    fn test_registry_rejects_overlap() {
        let orchestrator = Orchestrator::new(DriverCatalog::new());
        let guard = orchestrator
            .register(Some("m1"), "abcdef0123456789", CancellationToken::new(), None)
            .unwrap();
        assert!(orchestrator.is_running("m1"));

        let same_id = orchestrator.register(Some("m1"), "other", CancellationToken::new(), None);
        assert!(matches!(same_id, Err(MigrateError::MigrationInProgress(_))));
        let same_config =
            orchestrator.register(None, "abcdef0123456789", CancellationToken::new(), None);
        assert!(matches!(same_config, Err(MigrateError::MigrationInProgress(_))));

        assert!(orchestrator.cancel_migration("m1"));
        drop(guard);
        assert!(!orchestrator.is_running("m1"));
        assert!(!orchestrator.cancel_migration("m1"));
    }

    #[test]
    fn test_dedup_keeps_order() {
        let items = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup(items), vec!["b".to_string(), "a".to_string()]);
    }
}
