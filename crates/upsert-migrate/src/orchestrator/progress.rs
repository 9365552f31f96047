//! Live migration progress.
//!
//! Table workers never touch [`MigrationProgress`] directly. They send
//! [`ProgressEvent`]s through a [`ProgressReporter`]; a single tracker task
//! owns the state, applies each event, and publishes a snapshot on a `watch`
//! channel that any number of observers can read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Row counters for a table or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounters {
    /// Rows taken from the comparator, whatever their outcome.
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Rows intentionally not written: unchanged, ignored by the mode,
    /// failed validation, or lost a conflict.
    pub skipped: u64,
    pub errors: u64,
    /// Subset of `skipped`: rows identical on both sides.
    pub unchanged: u64,
    /// Rows whose target changed after classification.
    pub conflicts: u64,
    /// Rows sent to the manual review queue.
    pub deferred: u64,
}

impl RowCounters {
    pub fn add(&mut self, other: &RowCounters) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.unchanged += other.unchanged;
        self.conflicts += other.conflicts;
        self.deferred += other.deferred;
    }

    /// Rows written to the target.
    pub fn written(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

/// Per-table status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Not processed because the run was cancelled or aborted first.
    Skipped,
    Cancelled,
    RolledBack,
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TableStatus::Pending => "pending",
            TableStatus::Running => "running",
            TableStatus::Completed => "completed",
            TableStatus::Failed => "failed",
            TableStatus::Skipped => "skipped",
            TableStatus::Cancelled => "cancelled",
            TableStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Idle,
    Configuring,
    DryRun,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationPhase::Completed | MigrationPhase::Failed | MigrationPhase::Cancelled
        )
    }
}

/// What went wrong with a row or batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected by the target, or failed a transform on the way there.
    RowWrite,
    /// Could not be classified (duplicate or null key).
    Classification,
    /// NewestWins could not decide.
    Conflict,
    /// A whole batch failed after retries.
    Batch,
    /// Table-level failure (metadata, streaming).
    Table,
}

/// One recorded error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationError {
    /// Target table.
    pub table: String,

    /// Zero-based position of the row in the source stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,

    /// Batch number within the table, starting at 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,

    pub message: String,

    pub kind: ErrorKind,

    pub is_retryable: bool,
}

impl MigrationError {
    pub fn new(table: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            row_index: None,
            row_id: None,
            batch_index: None,
            message: message.into(),
            kind,
            is_retryable: false,
        }
    }

    pub fn with_row(mut self, row_index: Option<usize>, row_id: impl Into<String>) -> Self {
        self.row_index = row_index;
        self.row_id = Some(row_id.into());
        self
    }

    pub fn with_batch(mut self, batch_index: usize) -> Self {
        self.batch_index = Some(batch_index);
        self
    }

    pub fn retryable(mut self, is_retryable: bool) -> Self {
        self.is_retryable = is_retryable;
        self
    }
}

/// Progress of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProgress {
    pub source_table: String,
    pub target_table: String,
    pub status: TableStatus,
    /// Source row count when the table started.
    pub total_rows: u64,
    pub batches: u64,
    pub counters: RowCounters,
}

impl TableProgress {
    pub fn percent(&self) -> f64 {
        if self.total_rows == 0 {
            return if self.status == TableStatus::Completed { 100.0 } else { 0.0 };
        }
        (self.counters.processed as f64 / self.total_rows as f64 * 100.0).min(100.0)
    }
}

/// Snapshot of a run, as seen by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub migration_id: String,
    pub phase: MigrationPhase,
    pub totals: RowCounters,
    pub tables: Vec<TableProgress>,
    pub errors: Vec<MigrationError>,
    pub current_table: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationProgress {
    pub fn new(migration_id: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            phase: MigrationPhase::Idle,
            totals: RowCounters::default(),
            tables: Vec::new(),
            errors: Vec::new(),
            current_table: None,
            updated_at: Utc::now(),
        }
    }

    pub fn table(&self, target_table: &str) -> Option<&TableProgress> {
        self.tables.iter().find(|t| t.target_table == target_table)
    }

    fn table_mut(&mut self, target_table: &str) -> Option<&mut TableProgress> {
        self.tables.iter_mut().find(|t| t.target_table == target_table)
    }

    /// Apply one event. Only the tracker task calls this.
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Phase(phase) => self.phase = *phase,
            ProgressEvent::TablePlanned {
                source_table,
                target_table,
            } => {
                if self.table(target_table).is_none() {
                    self.tables.push(TableProgress {
                        source_table: source_table.clone(),
                        target_table: target_table.clone(),
                        status: TableStatus::Pending,
                        total_rows: 0,
                        batches: 0,
                        counters: RowCounters::default(),
                    });
                }
            }
            ProgressEvent::TableStarted { table, total_rows } => {
                if let Some(t) = self.table_mut(table) {
                    t.status = TableStatus::Running;
                    t.total_rows = *total_rows;
                }
                self.current_table = Some(table.clone());
            }
            ProgressEvent::Batch { table, delta } => {
                if let Some(t) = self.table_mut(table) {
                    t.batches += 1;
                    t.counters.add(delta);
                }
                self.totals.add(delta);
            }
            ProgressEvent::RowError(error) => self.errors.push(error.clone()),
            ProgressEvent::TableFinished { table, status } => {
                if let Some(t) = self.table_mut(table) {
                    t.status = *status;
                }
                if self.current_table.as_deref() == Some(table.as_str()) {
                    self.current_table = None;
                }
            }
        }
        self.updated_at = Utc::now();
    }
}

/// A change to the run's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Phase(MigrationPhase),
    TablePlanned {
        source_table: String,
        target_table: String,
    },
    TableStarted {
        table: String,
        total_rows: u64,
    },
    /// Counters of one completed batch.
    Batch {
        table: String,
        delta: RowCounters,
    },
    RowError(MigrationError),
    TableFinished {
        table: String,
        status: TableStatus,
    },
}

/// Sending side used by table workers.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    /// Reporter whose events go nowhere.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn send(&self, event: ProgressEvent) {
        // The tracker outlives every worker; a closed channel only happens
        // for disabled reporters.
        let _ = self.tx.send(event);
    }

    pub fn phase(&self, phase: MigrationPhase) {
        self.send(ProgressEvent::Phase(phase));
    }

    pub fn batch(&self, table: &str, delta: RowCounters) {
        self.send(ProgressEvent::Batch {
            table: table.to_string(),
            delta,
        });
    }

    pub fn error(&self, error: MigrationError) {
        self.send(ProgressEvent::RowError(error));
    }
}

/// Handle on a running tracker task.
pub struct ProgressTracker {
    reporter: ProgressReporter,
    handle: JoinHandle<MigrationProgress>,
}

impl ProgressTracker {
    /// Start the tracker. Snapshots go to `watch_tx`; raw events are also
    /// forwarded to `observer` if given.
    pub fn spawn(
        migration_id: &str,
        watch_tx: watch::Sender<MigrationProgress>,
        observer: Option<mpsc::UnboundedSender<ProgressEvent>>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let mut progress = MigrationProgress::new(migration_id);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                progress.apply(&event);
                watch_tx.send_replace(progress.clone());
                if let Some(observer) = &observer {
                    let _ = observer.send(event);
                }
            }
            progress
        });
        Self {
            reporter: ProgressReporter { tx },
            handle,
        }
    }

    pub fn reporter(&self) -> ProgressReporter {
        self.reporter.clone()
    }

    /// Close the channel and wait for the final state.
    ///
    /// Every reporter clone must have been dropped first.
    pub async fn finish(self) -> Option<MigrationProgress> {
        drop(self.reporter);
        self.handle.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(inserted: u64, skipped: u64) -> RowCounters {
        RowCounters {
            processed: inserted + skipped,
            inserted,
            skipped,
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_batches() {
        let mut progress = MigrationProgress::new("m1");
        progress.apply(&ProgressEvent::TablePlanned {
            source_table: "src_users".into(),
            target_table: "users".into(),
        });
        progress.apply(&ProgressEvent::TableStarted {
            table: "users".into(),
            total_rows: 4,
        });
        progress.apply(&ProgressEvent::Batch {
            table: "users".into(),
            delta: delta(2, 0),
        });
        progress.apply(&ProgressEvent::Batch {
            table: "users".into(),
            delta: delta(1, 1),
        });

        let users = progress.table("users").unwrap();
        assert_eq!(users.status, TableStatus::Running);
        assert_eq!(users.batches, 2);
        assert_eq!(users.counters.inserted, 3);
        assert_eq!(users.percent(), 100.0);
        assert_eq!(progress.totals.skipped, 1);
        assert_eq!(progress.current_table.as_deref(), Some("users"));

        progress.apply(&ProgressEvent::TableFinished {
            table: "users".into(),
            status: TableStatus::Completed,
        });
        assert!(progress.current_table.is_none());
    }

    #[tokio::test]
    async fn test_tracker_publishes_snapshots() {
        let (watch_tx, watch_rx) = watch::channel(MigrationProgress::new("m2"));
        let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
        let tracker = ProgressTracker::spawn("m2", watch_tx, Some(observer_tx));

        let reporter = tracker.reporter();
        reporter.phase(MigrationPhase::Running);
        reporter.send(ProgressEvent::TablePlanned {
            source_table: "a".into(),
            target_table: "a".into(),
        });
        reporter.batch("a", delta(5, 0));
        drop(reporter);

        let final_state = tracker.finish().await.unwrap();
        assert_eq!(final_state.phase, MigrationPhase::Running);
        assert_eq!(final_state.totals.inserted, 5);
        assert_eq!(watch_rx.borrow().totals.inserted, 5);

        let mut events = Vec::new();
        while let Ok(event) = observer_rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_counters_add() {
        let mut total = RowCounters::default();
        total.add(&delta(2, 1));
        total.add(&RowCounters {
            deleted: 4,
            processed: 4,
            ..Default::default()
        });
        assert_eq!(total.processed, 7);
        assert_eq!(total.written(), 6);
    }
}
