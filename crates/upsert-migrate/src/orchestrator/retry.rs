//! Per-call timeouts and transient-failure retries for driver calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::MigrationConfig;
use crate::core::{
    DatabaseDriver, DatabaseEngine, Row, RowBatch, RowCursor, SqlValue, TableInfo, WriteOperation,
    WriteReport,
};
use crate::error::{MigrateError, Result};

/// Timeout and retry settings taken from [`MigrationConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    settings: MigrationConfig,
}

impl RetryPolicy {
    pub fn new(settings: &MigrationConfig) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.settings.retry_count
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.settings.backoff(attempt)
    }

    /// Run one driver call under the operation timeout. Timing out yields
    /// a transient [`MigrateError::Timeout`].
    pub async fn timed<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.settings.operation_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(MigrateError::Timeout {
                operation: operation.to_string(),
                seconds: limit.as_secs(),
            }),
        }
    }

    /// Run `call` under the timeout, retrying transient failures with
    /// exponential backoff.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match self.timed(operation, call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.settings.retry_count => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        operation, e, attempt, self.settings.retry_count, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A driver whose read calls go through a [`RetryPolicy`].
///
/// Writes and transaction control pass straight through under the timeout
/// only; the orchestrator retries them itself so it can roll back between
/// attempts.
pub struct GuardedDriver {
    inner: Arc<dyn DatabaseDriver>,
    policy: RetryPolicy,
}

impl GuardedDriver {
    pub fn new(inner: Arc<dyn DatabaseDriver>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl DatabaseDriver for GuardedDriver {
    fn engine(&self) -> DatabaseEngine {
        self.inner.engine()
    }

    fn identity(&self) -> String {
        self.inner.identity()
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.policy
            .run("list_tables", || self.inner.list_tables())
            .await
    }

    async fn get_table_info(&self, table: &str) -> Result<TableInfo> {
        self.policy
            .run("get_table_info", || self.inner.get_table_info(table))
            .await
    }

    async fn get_row_count(&self, table: &str) -> Result<u64> {
        self.policy
            .run("get_row_count", || self.inner.get_row_count(table))
            .await
    }

    async fn stream_rows(
        &self,
        table: &str,
        key_columns: &[String],
        cursor: Option<&RowCursor>,
        batch_size: usize,
    ) -> Result<RowBatch> {
        self.policy
            .run("stream_rows", || {
                self.inner.stream_rows(table, key_columns, cursor, batch_size)
            })
            .await
    }

    async fn fetch_rows(
        &self,
        table: &str,
        key_columns: &[String],
        keys: &[Vec<SqlValue>],
    ) -> Result<Vec<Row>> {
        self.policy
            .run("fetch_rows", || self.inner.fetch_rows(table, key_columns, keys))
            .await
    }

    async fn write_batch(&self, table: &str, operations: &[WriteOperation]) -> Result<WriteReport> {
        self.policy
            .timed("write_batch", self.inner.write_batch(table, operations))
            .await
    }

    async fn begin_tx(&self) -> Result<()> {
        self.policy.timed("begin_tx", self.inner.begin_tx()).await
    }

    async fn commit_tx(&self) -> Result<()> {
        self.policy.timed("commit_tx", self.inner.commit_tx()).await
    }

    async fn rollback_tx(&self) -> Result<()> {
        self.policy.timed("rollback_tx", self.inner.rollback_tx()).await
    }

    fn max_connections(&self) -> usize {
        self.inner.max_connections()
    }

    async fn ping(&self) -> Result<()> {
        self.policy.timed("ping", self.inner.ping()).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}
