//! Migration run history.
//!
//! Each run is summarized in a [`RunRecord`]: status, a snapshot of the
//! configuration (credentials removed), per-table counters and timestamps.
//! Storage is pluggable through [`StateBackend`]; the bundled backends keep
//! records as signed JSON files or discard them.

mod backend;
mod noop;

pub use backend::{FileStateBackend, StateBackend};
pub use noop::NoOpStateBackend;

use crate::config::Config;
use crate::error::{MigrateError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// One migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Migration identifier supplied by the caller.
    pub run_id: String,

    /// SHA256 hash of the configuration.
    pub config_hash: String,

    /// Configuration with passwords removed.
    pub config_snapshot: serde_json::Value,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub rows_inserted: u64,

    #[serde(default)]
    pub rows_updated: u64,

    #[serde(default)]
    pub rows_deleted: u64,

    #[serde(default)]
    pub rows_skipped: u64,

    #[serde(default)]
    pub error_count: u64,

    /// Per-table outcome, keyed by target table.
    #[serde(default)]
    pub tables: BTreeMap<String, TableRecord>,

    /// Full result, as serialized by the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_snapshot: Option<serde_json::Value>,

    /// HMAC-SHA256 over the record (excluding this field), keyed by
    /// `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Per-table counters of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub status: String,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,
    pub rows_skipped: u64,
    pub error_count: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunRecord {
    /// Start a record for `config`.
    pub fn new(run_id: impl Into<String>, config: &Config) -> Self {
        Self {
            run_id: run_id.into(),
            config_hash: config.hash(),
            config_snapshot: redacted_snapshot(config),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            rows_inserted: 0,
            rows_updated: 0,
            rows_deleted: 0,
            rows_skipped: 0,
            error_count: 0,
            tables: BTreeMap::new(),
            result_snapshot: None,
            hmac: None,
        }
    }

    /// Mark the run finished with `status`.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned)
            .map_err(|e| MigrateError::State(format!("Failed to serialize run record: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load a record from a file, rejecting it if its signature does not match.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let record: Self = serde_json::from_str(&content)?;

        match &record.hmac {
            Some(stored) => {
                if stored != &record.compute_hmac()? {
                    return Err(MigrateError::State(format!(
                        "Run record {} failed integrity check: HMAC mismatch",
                        record.run_id
                    )));
                }
            }
            None => {
                tracing::warn!(
                    "Run record {} has no HMAC signature, integrity cannot be verified",
                    record.run_id
                );
            }
        }
        Ok(record)
    }

    /// Sign and write the record (atomic: temp file, then rename).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

fn redacted_snapshot(config: &Config) -> serde_json::Value {
    let mut config = config.clone();
    config.source.password.clear();
    config.target.password.clear();
    serde_json::to_value(&config).unwrap_or(serde_json::Value::Null)
}
