//! Core traits for the driver capability boundary.
//!
//! The engine never speaks a wire protocol. Each database engine is reached
//! through two abstractions:
//!
//! - [`DriverConnector`]: turns a [`ConnectionConfig`] into a live handle
//! - [`DatabaseDriver`]: the handle; schema introspection, keyed row
//!   streaming, batch writes, and transaction control
//!
//! Per-row write failures are reported in [`WriteReport`]; an `Err` from
//! [`DatabaseDriver::write_batch`] means the whole batch failed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;
use crate::error::Result;

use super::engine::DatabaseEngine;
use super::schema::TableInfo;
use super::value::{compare_tuples, Row, RowBatch, RowCursor, SqlValue};

/// One row-level write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOperation {
    /// Insert a new row.
    Insert { row: Row },

    /// Replace the non-key values of the row identified by `key`.
    Update { key: Row, row: Row },

    /// Delete the row identified by `key`.
    Delete { key: Row },
}

impl WriteOperation {
    /// Short verb for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteOperation::Insert { .. } => "insert",
            WriteOperation::Update { .. } => "update",
            WriteOperation::Delete { .. } => "delete",
        }
    }
}

/// A row the target rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFailure {
    /// Index of the operation within the submitted batch.
    pub index: usize,
    pub message: String,
}

/// Outcome of a batch write that reached the target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteReport {
    /// Number of operations applied.
    pub applied: usize,

    /// Operations rejected by the target (constraint violations, coercion).
    pub failures: Vec<RowFailure>,
}

impl WriteReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Extract the key tuple of `row` for `key_columns`. Missing columns read as NULL.
pub fn key_values(row: &Row, key_columns: &[String]) -> Vec<SqlValue> {
    key_columns
        .iter()
        .map(|k| row.get(k).cloned().unwrap_or(SqlValue::Null))
        .collect()
}

/// A live connection to one database.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Engine behind this handle.
    fn engine(&self) -> DatabaseEngine;

    /// Stable identity of the endpoint (engine, host, database). Two
    /// handles with the same identity point at the same database.
    fn identity(&self) -> String;

    /// List table names, schema-qualified where the engine has schemas.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Fetch the metadata snapshot for one table.
    async fn get_table_info(&self, table: &str) -> Result<TableInfo>;

    async fn get_row_count(&self, table: &str) -> Result<u64>;

    /// Read up to `batch_size` rows in ascending key order, starting after
    /// `cursor` (from the beginning when `None`).
    async fn stream_rows(
        &self,
        table: &str,
        key_columns: &[String],
        cursor: Option<&RowCursor>,
        batch_size: usize,
    ) -> Result<RowBatch>;

    /// Fetch the current rows for specific keys.
    ///
    /// The default walks the whole table through [`stream_rows`](Self::stream_rows);
    /// drivers with indexed lookups should override it.
    async fn fetch_rows(
        &self,
        table: &str,
        key_columns: &[String],
        keys: &[Vec<SqlValue>],
    ) -> Result<Vec<Row>> {
        let mut found = Vec::new();
        if keys.is_empty() {
            return Ok(found);
        }
        let mut cursor: Option<RowCursor> = None;
        loop {
            let batch = self
                .stream_rows(table, key_columns, cursor.as_ref(), 1000)
                .await?;
            for row in batch.rows {
                let key = key_values(&row, key_columns);
                if keys
                    .iter()
                    .any(|k| compare_tuples(k, &key) == std::cmp::Ordering::Equal)
                {
                    found.push(row);
                }
            }
            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(found)
    }

    /// Apply a batch of writes to `table`.
    async fn write_batch(&self, table: &str, operations: &[WriteOperation])
        -> Result<WriteReport>;

    async fn begin_tx(&self) -> Result<()>;

    async fn commit_tx(&self) -> Result<()>;

    async fn rollback_tx(&self) -> Result<()>;

    /// Size of the underlying connection pool. Bounds table parallelism.
    fn max_connections(&self) -> usize {
        1
    }

    /// Cheap round trip used by health checks.
    async fn ping(&self) -> Result<()> {
        self.list_tables().await.map(|_| ())
    }

    /// Release connections. Further calls may fail.
    async fn close(&self) {}
}

/// Opens [`DatabaseDriver`] handles for one or more engines.
#[async_trait]
pub trait DriverConnector: Send + Sync {
    /// Human-readable connector name for logs.
    fn name(&self) -> &str;

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseDriver>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::row;

    #[test]
    fn test_key_values() {
        let r = row([("id", SqlValue::I32(1)), ("name", SqlValue::from("a"))]);
        let keys = key_values(&r, &["id".to_string(), "missing".to_string()]);
        assert_eq!(keys, vec![SqlValue::I32(1), SqlValue::Null]);
    }

    #[test]
    fn test_write_operation_serde() {
        let op = WriteOperation::Delete {
            key: row([("id", SqlValue::I64(5))]),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, r#"{"op":"delete","key":{"id":5}}"#);
        assert_eq!(op.kind(), "delete");
    }

    #[test]
    fn test_write_report_clean() {
        let mut report = WriteReport::default();
        assert!(report.is_clean());
        report.failures.push(RowFailure {
            index: 0,
            message: "duplicate".into(),
        });
        assert!(!report.is_clean());
    }
}
