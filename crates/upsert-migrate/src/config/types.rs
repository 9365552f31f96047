//! Configuration type definitions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compare::DataCompareOptions;
use crate::core::{DatabaseEngine, TableMapping};
use crate::transform::TransformRule;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database connection.
    pub source: ConnectionConfig,

    /// Target database connection.
    pub target: ConnectionConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Source → target table pairs.
    #[serde(default)]
    pub tables: Vec<TableMapping>,

    /// Column transform rules, grouped by `table_id` (the source table).
    #[serde(default)]
    pub transforms: Vec<TransformRule>,

    /// Row comparison options shared by compare-data and migrations.
    #[serde(default)]
    pub compare: DataCompareOptions,
}

impl Config {
    /// Minimal config for two connections with default migration settings.
    pub fn new(source: ConnectionConfig, target: ConnectionConfig) -> Self {
        Self {
            source,
            target,
            migration: MigrationConfig::default(),
            tables: Vec::new(),
            transforms: Vec::new(),
            compare: DataCompareOptions::default(),
        }
    }

    /// Mappings that take part in dry runs and migrations.
    pub fn included_tables(&self) -> Vec<TableMapping> {
        self.tables.iter().filter(|t| t.included).cloned().collect()
    }
}

/// Connection settings for one endpoint.
///
/// Network engines use `host`/`port`/`database`; snapshot-backed
/// endpoints set `file_path` instead.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub engine: DatabaseEngine,

    #[serde(default)]
    pub host: String,

    /// Port (default: the engine's standard port).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Data file for file-backed endpoints (JSON snapshots, SQLite).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// Connection timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout")]
    pub timeout_secs: u64,

    /// Connection pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl ConnectionConfig {
    /// Empty connection settings for an engine.
    pub fn new(engine: DatabaseEngine) -> Self {
        Self {
            engine,
            host: String::new(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            file_path: None,
            timeout_secs: default_connect_timeout(),
            max_connections: default_max_connections(),
        }
    }

    /// File-backed connection settings.
    pub fn file(engine: DatabaseEngine, path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::new(engine)
        }
    }

    /// Port to use, falling back to the engine default.
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or(match self.engine {
            DatabaseEngine::SqlServer => Some(1433),
            DatabaseEngine::PostgreSql => Some(5432),
            DatabaseEngine::MySql => Some(3306),
            DatabaseEngine::Oracle => Some(1521),
            DatabaseEngine::MongoDb => Some(27017),
            DatabaseEngine::CosmosDb => Some(443),
            DatabaseEngine::Sqlite => None,
        })
    }

    /// Endpoint identity without credentials, e.g. `postgres://db1:5432/sales`.
    pub fn identity(&self) -> String {
        if let Some(path) = &self.file_path {
            return format!("{}://{}", self.engine, path.display());
        }
        match self.effective_port() {
            Some(port) => format!("{}://{}:{}/{}", self.engine, self.host, port, self.database),
            None => format!("{}://{}/{}", self.engine, self.host, self.database),
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("file_path", &self.file_path)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// How classified rows are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Insert new rows, update changed rows.
    #[default]
    Upsert,

    /// Upsert plus delete target rows missing from the source.
    Mirror,

    /// Insert new rows only.
    AppendOnly,

    /// Same row disposition as `Upsert`.
    Merge,

    /// No row writes; report schema differences only.
    SchemaOnly,
}

/// Resolution when the target row changed after it was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    #[default]
    SourceWins,
    TargetWins,
    NewestWins,
    ManualReview,
}

/// Transaction scope for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// One transaction per batch.
    #[default]
    PerBatch,

    /// One transaction for the whole run.
    WholeMigration,

    /// No transactions; best effort.
    None,
}

impl std::fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationMode::Upsert => "upsert",
            MigrationMode::Mirror => "mirror",
            MigrationMode::AppendOnly => "append_only",
            MigrationMode::Merge => "merge",
            MigrationMode::SchemaOnly => "schema_only",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictResolution::SourceWins => "source_wins",
            ConflictResolution::TargetWins => "target_wins",
            ConflictResolution::NewestWins => "newest_wins",
            ConflictResolution::ManualReview => "manual_review",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionMode::PerBatch => "per_batch",
            TransactionMode::WholeMigration => "whole_migration",
            TransactionMode::None => "none",
        };
        f.write_str(s)
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default)]
    pub mode: MigrationMode,

    #[serde(default)]
    pub conflict_resolution: ConflictResolution,

    /// Rows per write batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub transaction_mode: TransactionMode,

    /// Retries for transient failures (default: 3).
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Initial retry backoff in milliseconds, doubled per attempt (default: 1000).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound for the retry backoff (default: 30000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Roll back the whole run on row errors under `whole_migration` (default: true).
    #[serde(default = "default_true")]
    pub auto_rollback: bool,

    /// Capture target pre-images before writing (default: true).
    #[serde(default = "default_true")]
    pub backup_before_migrate: bool,

    /// Directory for backup JSON files. Backups stay in memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    /// Run as a dry run even when `run` is requested (default: false).
    #[serde(default)]
    pub dry_run: bool,

    /// Timeout for each driver call in seconds (default: 30).
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Independent tables processed at once (default: 1).
    #[serde(default = "default_max_parallel_tables")]
    pub max_parallel_tables: usize,

    /// Timestamp column for `newest_wins` when a mapping does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_wins_column: Option<String>,

    /// Match table, column, and index names case-sensitively (default: true).
    #[serde(default = "default_true")]
    pub case_sensitive_names: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            mode: MigrationMode::default(),
            conflict_resolution: ConflictResolution::default(),
            batch_size: default_batch_size(),
            transaction_mode: TransactionMode::default(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            auto_rollback: true,
            backup_before_migrate: true,
            backup_dir: None,
            dry_run: false,
            operation_timeout_secs: default_operation_timeout(),
            max_parallel_tables: default_max_parallel_tables(),
            newest_wins_column: None,
            case_sensitive_names: true,
        }
    }
}

impl MigrationConfig {
    /// Backoff before retry `attempt` (1-based): exponential, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs.max(1))
    }
}

// Default value functions for serde
fn default_connect_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    4
}

fn default_batch_size() -> usize {
    1000
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_operation_timeout() -> u64 {
    30
}

fn default_max_parallel_tables() -> usize {
    1
}

fn default_true() -> bool {
    true
}
