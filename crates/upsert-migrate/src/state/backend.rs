//! Run history storage.
//!
//! The orchestrator works with `Arc<dyn StateBackend>` and never sees where
//! records end up:
//!
//! - [`FileStateBackend`]: one signed JSON file per run in a directory
//! - [`NoOpStateBackend`](super::NoOpStateBackend): records are discarded

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{RunRecord, RunStatus};
use crate::error::{MigrateError, Result};

/// Trait for run history persistence backends.
///
/// Implementations must be `Send + Sync` to allow sharing across async tasks.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Prepare the storage location. Safe to call more than once.
    async fn init(&self) -> Result<()>;

    /// Insert or replace the record for `record.run_id`.
    async fn save(&self, record: &RunRecord) -> Result<()>;

    /// Load one run by id.
    async fn load(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// All stored runs, oldest first.
    async fn list(&self) -> Result<Vec<RunRecord>>;

    /// Most recent completed run for a config hash.
    async fn last_completed(&self, config_hash: &str) -> Result<Option<RunRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .rev()
            .find(|r| r.config_hash == config_hash && r.status == RunStatus::Completed))
    }

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}

/// Stores each run as `<dir>/<run_id>.json`, signed with HMAC-SHA256.
#[derive(Debug, Clone)]
pub struct FileStateBackend {
    dir: PathBuf,
}

impl FileStateBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, run_id: &str) -> Result<PathBuf> {
        if run_id.is_empty()
            || !run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            || run_id.starts_with('.')
        {
            return Err(MigrateError::State(format!(
                "Run id '{}' cannot be used as a file name",
                run_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", run_id)))
    }
}

#[async_trait]
impl StateBackend for FileStateBackend {
    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn save(&self, record: &RunRecord) -> Result<()> {
        let path = self.record_path(&record.run_id)?;
        let mut record = record.clone();
        tokio::task::spawn_blocking(move || record.save(path))
            .await
            .map_err(|e| MigrateError::State(format!("Run record writer panicked: {}", e)))??;
        debug!("Saved run record to {}", self.dir.display());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let path = self.record_path(run_id)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(RunRecord::load(path)?))
    }

    async fn list(&self) -> Result<Vec<RunRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match RunRecord::load(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping run record {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(records)
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
