//! JSON snapshot files as databases.
//!
//! A snapshot file holds table definitions and rows:
//!
//! ```json
//! {
//!   "tables": [
//!     {
//!       "info": { "table_name": "users", "columns": [
//!         { "name": "id", "data_type": "int", "is_nullable": false, "is_primary_key": true },
//!         { "name": "name", "data_type": "varchar(50)" }
//!       ] },
//!       "rows": [ { "id": 1, "name": "Alice" } ]
//!     }
//!   ]
//! }
//! ```
//!
//! The file is loaded into a [`MemoryDriver`] on connect and written back
//! on [`close`](DatabaseDriver::close) if anything was written.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::core::{
    DatabaseDriver, DatabaseEngine, DriverConnector, Row, RowBatch, RowCursor, SqlValue,
    TableInfo, WriteOperation, WriteReport,
};
use crate::error::{MigrateError, Result};

use super::memory::MemoryDriver;

/// On-disk snapshot layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotFile {
    #[serde(default)]
    pub tables: Vec<SnapshotTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTable {
    pub info: TableInfo,

    #[serde(default)]
    pub rows: Vec<Row>,
}

impl SnapshotFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write atomically: temp file, then rename.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// Connector that opens snapshot files for any engine.
///
/// The engine of the [`ConnectionConfig`] decides how native type names in
/// the file are interpreted.
#[derive(Debug, Default)]
pub struct SnapshotConnector;

impl SnapshotConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DriverConnector for SnapshotConnector {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseDriver>> {
        let path = config.file_path.clone().ok_or_else(|| {
            MigrateError::Config(format!(
                "{} endpoint has no file_path; the snapshot driver needs one",
                config.engine
            ))
        })?;
        let driver = SnapshotDriver::open(config.engine, path, config.max_connections).await?;
        Ok(Arc::new(driver))
    }
}

/// A [`MemoryDriver`] loaded from, and saved back to, a snapshot file.
#[derive(Debug)]
pub struct SnapshotDriver {
    path: PathBuf,
    inner: MemoryDriver,
    dirty: AtomicBool,
}

impl SnapshotDriver {
    pub async fn open(engine: DatabaseEngine, path: PathBuf, max_connections: usize) -> Result<Self> {
        if !path.exists() {
            return Err(MigrateError::connection(format!(
                "snapshot file {} does not exist",
                path.display()
            )));
        }
        let file = SnapshotFile::load(&path)?;
        let inner = MemoryDriver::new(engine, path.display().to_string())
            .with_max_connections(max_connections);
        for table in file.tables {
            let name = table.info.full_name();
            inner.create_table(table.info).await?;
            inner.insert_rows(&name, table.rows).await?;
        }
        info!("Opened {} snapshot {}", engine, path.display());
        Ok(Self {
            path,
            inner,
            dirty: AtomicBool::new(false),
        })
    }

    /// Write the current contents back to the file.
    pub async fn save(&self) -> Result<()> {
        let tables = self
            .inner
            .dump()
            .await
            .into_iter()
            .map(|(info, rows)| SnapshotTable { info, rows })
            .collect();
        SnapshotFile { tables }.save(&self.path)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DatabaseDriver for SnapshotDriver {
    fn engine(&self) -> DatabaseEngine {
        self.inner.engine()
    }

    fn identity(&self) -> String {
        format!("{}://{}", self.inner.engine(), self.path.display())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn get_table_info(&self, table: &str) -> Result<TableInfo> {
        self.inner.get_table_info(table).await
    }

    async fn get_row_count(&self, table: &str) -> Result<u64> {
        self.inner.get_row_count(table).await
    }

    async fn stream_rows(
        &self,
        table: &str,
        key_columns: &[String],
        cursor: Option<&RowCursor>,
        batch_size: usize,
    ) -> Result<RowBatch> {
        self.inner
            .stream_rows(table, key_columns, cursor, batch_size)
            .await
    }

    async fn fetch_rows(
        &self,
        table: &str,
        key_columns: &[String],
        keys: &[Vec<SqlValue>],
    ) -> Result<Vec<Row>> {
        self.inner.fetch_rows(table, key_columns, keys).await
    }

    async fn write_batch(&self, table: &str, operations: &[WriteOperation]) -> Result<WriteReport> {
        let report = self.inner.write_batch(table, operations).await?;
        if report.applied > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(report)
    }

    async fn begin_tx(&self) -> Result<()> {
        self.inner.begin_tx().await
    }

    async fn commit_tx(&self) -> Result<()> {
        self.inner.commit_tx().await
    }

    async fn rollback_tx(&self) -> Result<()> {
        self.inner.rollback_tx().await
    }

    fn max_connections(&self) -> usize {
        self.inner.max_connections()
    }

    async fn close(&self) {
        if !self.dirty.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.save().await {
            warn!("Failed to save snapshot {}: {}", self.path.display(), e);
        }
    }
}
