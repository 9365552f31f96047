//! In-memory database driver.
//!
//! Holds tables as vectors of rows behind a lock. Writes are validated the
//! way a relational target would validate them: unknown columns, NOT NULL
//! columns and primary key uniqueness are enforced per row, and values are
//! coerced into the column's canonical type. Transactions copy the tables on
//! `begin_tx` and restore the copy on `rollback_tx`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::compare::normalize_default;
use crate::core::{
    compare_tuples, key_values, DatabaseDriver, DatabaseEngine, Row, RowBatch, RowCursor,
    RowFailure, SqlValue, TableInfo, WriteOperation, WriteReport,
};
use crate::dialect::{CanonicalType, Lossiness};
use crate::error::{MigrateError, Result};
use crate::transform::cast_value;

#[derive(Debug, Clone)]
struct MemoryTable {
    info: TableInfo,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    /// Pre-transaction copy of `tables`.
    saved: Option<BTreeMap<String, MemoryTable>>,
}

/// Injected failures, for exercising retry and rollback paths.
#[derive(Debug, Default)]
struct Faults {
    transient_writes: usize,
    failing_tables: BTreeMap<String, String>,
    write_delay: Option<Duration>,
    write_calls: usize,
    writes_in_flight: usize,
    peak_writes_in_flight: usize,
}

/// Database held entirely in memory.
#[derive(Debug)]
pub struct MemoryDriver {
    engine: DatabaseEngine,
    name: String,
    max_connections: usize,
    state: RwLock<MemoryState>,
    faults: Mutex<Faults>,
}

impl MemoryDriver {
    pub fn new(engine: DatabaseEngine, name: impl Into<String>) -> Self {
        Self {
            engine,
            name: name.into(),
            max_connections: 4,
            state: RwLock::new(MemoryState::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Report a different pool size (bounds table parallelism).
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Create an empty table. Canonical types are resolved from the native
    /// type names when the snapshot does not carry them.
    pub async fn create_table(&self, mut info: TableInfo) -> Result<()> {
        info.validate()?;
        if info
            .columns
            .iter()
            .any(|c| c.canonical_type == CanonicalType::default())
        {
            info.resolve_canonical_types(self.engine);
        }
        let name = info.full_name();
        let mut state = self.state.write().await;
        if state.tables.contains_key(&name) {
            return Err(MigrateError::Driver(format!(
                "table {} already exists in {}",
                name, self.name
            )));
        }
        state.tables.insert(
            name,
            MemoryTable {
                info,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Load rows, with the same validation as inserts. Fails on the first
    /// rejected row.
    pub async fn insert_rows(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        let mut state = self.state.write().await;
        let name = resolve_name(&state.tables, table)?;
        let Some(entry) = state.tables.get_mut(&name) else {
            return Err(missing_table(table));
        };
        for (idx, row) in rows.into_iter().enumerate() {
            insert_row(entry, row)
                .map_err(|message| MigrateError::row_write(table, Some(idx), message))?;
        }
        Ok(())
    }

    /// Current rows of `table`, in insertion order.
    pub async fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let state = self.state.read().await;
        let name = resolve_name(&state.tables, table)?;
        Ok(state
            .tables
            .get(&name)
            .map(|t| t.rows.clone())
            .unwrap_or_default())
    }

    /// Export every table with its rows.
    pub async fn dump(&self) -> Vec<(TableInfo, Vec<Row>)> {
        let state = self.state.read().await;
        state
            .tables
            .values()
            .map(|t| (t.info.clone(), t.rows.clone()))
            .collect()
    }

    /// Whether a transaction is open.
    pub async fn in_transaction(&self) -> bool {
        self.state.read().await.saved.is_some()
    }

    /// Fail the next `count` `write_batch` calls with a transient error.
    pub async fn fail_next_writes(&self, count: usize) {
        self.faults.lock().await.transient_writes = count;
    }

    /// Fail every `write_batch` call on `table` with a non-transient error.
    pub async fn fail_writes_on(&self, table: &str, message: impl Into<String>) {
        self.faults
            .lock()
            .await
            .failing_tables
            .insert(table.to_string(), message.into());
    }

    /// Sleep before each `write_batch` call.
    pub async fn set_write_delay(&self, delay: Duration) {
        self.faults.lock().await.write_delay = Some(delay);
    }

    /// Number of `write_batch` calls received, including failed ones.
    pub async fn write_calls(&self) -> usize {
        self.faults.lock().await.write_calls
    }

    /// Most `write_batch` calls that were in progress at the same time.
    pub async fn peak_concurrent_writes(&self) -> usize {
        self.faults.lock().await.peak_writes_in_flight
    }

    async fn apply_writes(
        &self,
        table: &str,
        operations: &[WriteOperation],
        delay: Option<Duration>,
    ) -> Result<WriteReport> {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        let name = resolve_name(&state.tables, table)?;
        let entry = state
            .tables
            .get_mut(&name)
            .ok_or_else(|| missing_table(table))?;

        let mut report = WriteReport::default();
        for (index, op) in operations.iter().enumerate() {
            let outcome = match op {
                WriteOperation::Insert { row } => insert_row(entry, row.clone()),
                WriteOperation::Update { key, row } => update_row(entry, key, row.clone()),
                WriteOperation::Delete { key } => delete_row(entry, key),
            };
            match outcome {
                Ok(()) => report.applied += 1,
                Err(message) => report.failures.push(RowFailure { index, message }),
            }
        }
        debug!(
            "{}: {} applied, {} rejected on {}",
            self.name,
            report.applied,
            report.failures.len(),
            table
        );
        Ok(report)
    }
}

fn missing_table(table: &str) -> MigrateError {
    MigrateError::Config(format!("table {} does not exist", table))
}

/// Find a table by full name, then by bare table name.
fn resolve_name(tables: &BTreeMap<String, MemoryTable>, table: &str) -> Result<String> {
    if tables.contains_key(table) {
        return Ok(table.to_string());
    }
    tables
        .iter()
        .find(|(_, t)| t.info.table_name == table)
        .map(|(name, _)| name.clone())
        .ok_or_else(|| missing_table(table))
}

/// Coerce and check one row against the table definition.
fn conform(info: &TableInfo, row: Row) -> std::result::Result<Row, String> {
    let mut out = Row::new();
    for (column, value) in row {
        let Some(col) = info.column(&column) else {
            return Err(format!("column '{}' does not exist", column));
        };
        let value = if value.is_null() || col.canonical_type.is_unsupported() {
            value
        } else {
            let outcome = cast_value(&value, &col.canonical_type)
                .map_err(|e| format!("column '{}': {}", column, e))?;
            if outcome.lossiness >= Lossiness::NarrowedRisk && col.canonical_type.is_string() {
                return Err(format!(
                    "value too long for column '{}' ({})",
                    column, col.data_type
                ));
            }
            outcome.value
        };
        out.insert(column, value);
    }
    Ok(out)
}

fn check_not_null(info: &TableInfo, row: &Row) -> std::result::Result<(), String> {
    for col in &info.columns {
        if !col.is_nullable && row.get(&col.name).map_or(true, SqlValue::is_null) {
            return Err(format!("null value in column '{}' violates NOT NULL", col.name));
        }
    }
    Ok(())
}

fn same_key(row: &Row, key: &Row) -> bool {
    key.iter().all(|(column, value)| {
        row.get(column)
            .map_or(false, |v| v.total_cmp(value) == Ordering::Equal)
    })
}

fn insert_row(table: &mut MemoryTable, row: Row) -> std::result::Result<(), String> {
    let mut row = conform(&table.info, row)?;
    for col in &table.info.columns {
        if !row.contains_key(&col.name) {
            let value = match &col.default_value {
                Some(default) => SqlValue::Text(normalize_default(default)),
                None => SqlValue::Null,
            };
            row.insert(col.name.clone(), value);
        }
    }
    check_not_null(&table.info, &row)?;

    let pk = table.info.primary_key_columns();
    if !pk.is_empty() {
        let key: Row = pk
            .iter()
            .map(|k| (k.clone(), row.get(k).cloned().unwrap_or(SqlValue::Null)))
            .collect();
        if table.rows.iter().any(|r| same_key(r, &key)) {
            return Err(format!(
                "duplicate key ({}) violates primary key",
                key_values(&row, &pk)
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }
    table.rows.push(row);
    Ok(())
}

fn update_row(table: &mut MemoryTable, key: &Row, values: Row) -> std::result::Result<(), String> {
    let values = conform(&table.info, values)?;
    let Some(pos) = table.rows.iter().position(|r| same_key(r, key)) else {
        return Err("row not found".to_string());
    };
    let mut updated = table.rows[pos].clone();
    updated.extend(values);
    check_not_null(&table.info, &updated)?;
    table.rows[pos] = updated;
    Ok(())
}

fn delete_row(table: &mut MemoryTable, key: &Row) -> std::result::Result<(), String> {
    match table.rows.iter().position(|r| same_key(r, key)) {
        Some(pos) => {
            table.rows.remove(pos);
            Ok(())
        }
        None => Err("row not found".to_string()),
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    fn engine(&self) -> DatabaseEngine {
        self.engine
    }

    fn identity(&self) -> String {
        format!("{}://memory/{}", self.engine, self.name)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.tables.keys().cloned().collect())
    }

    async fn get_table_info(&self, table: &str) -> Result<TableInfo> {
        let state = self.state.read().await;
        let name = resolve_name(&state.tables, table)?;
        let entry = state.tables.get(&name).ok_or_else(|| missing_table(table))?;
        let mut info = entry.info.clone();
        info.row_count = Some(entry.rows.len() as i64);
        Ok(info)
    }

    async fn get_row_count(&self, table: &str) -> Result<u64> {
        let state = self.state.read().await;
        let name = resolve_name(&state.tables, table)?;
        Ok(state.tables.get(&name).map_or(0, |t| t.rows.len() as u64))
    }

    async fn stream_rows(
        &self,
        table: &str,
        key_columns: &[String],
        cursor: Option<&RowCursor>,
        batch_size: usize,
    ) -> Result<RowBatch> {
        let state = self.state.read().await;
        let name = resolve_name(&state.tables, table)?;
        let entry = state.tables.get(&name).ok_or_else(|| missing_table(table))?;

        let mut keyed: Vec<(Vec<SqlValue>, &Row)> = entry
            .rows
            .iter()
            .map(|r| (key_values(r, key_columns), r))
            .filter(|(key, _)| match cursor {
                Some(after) => compare_tuples(key, after) == Ordering::Greater,
                None => true,
            })
            .collect();
        // stable: rows sharing a key keep insertion order
        keyed.sort_by(|a, b| compare_tuples(&a.0, &b.0));

        let mut take = batch_size.max(1).min(keyed.len());
        // never split rows sharing a key across batches
        while take > 0
            && take < keyed.len()
            && compare_tuples(&keyed[take - 1].0, &keyed[take].0) == Ordering::Equal
        {
            take += 1;
        }

        let next_cursor = if take < keyed.len() {
            Some(keyed[take - 1].0.clone())
        } else {
            None
        };
        let rows = keyed.into_iter().take(take).map(|(_, r)| r.clone()).collect();
        Ok(RowBatch { rows, next_cursor })
    }

    async fn write_batch(&self, table: &str, operations: &[WriteOperation]) -> Result<WriteReport> {
        let delay = {
            let mut faults = self.faults.lock().await;
            faults.write_calls += 1;
            if faults.transient_writes > 0 {
                faults.transient_writes -= 1;
                return Err(MigrateError::transient(format!(
                    "connection reset while writing {}",
                    table
                )));
            }
            if let Some(message) = faults.failing_tables.get(table) {
                return Err(MigrateError::connection(message.clone()));
            }
            faults.writes_in_flight += 1;
            faults.peak_writes_in_flight =
                faults.peak_writes_in_flight.max(faults.writes_in_flight);
            faults.write_delay
        };
        let result = self.apply_writes(table, operations, delay).await;
        self.faults.lock().await.writes_in_flight -= 1;
        result
    }

    async fn begin_tx(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.saved.is_some() {
            return Err(MigrateError::Driver(format!(
                "transaction already open on {}",
                self.name
            )));
        }
        state.saved = Some(state.tables.clone());
        Ok(())
    }

    async fn commit_tx(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.saved.take().is_none() {
            return Err(MigrateError::Driver(format!(
                "no open transaction on {}",
                self.name
            )));
        }
        Ok(())
    }

    async fn rollback_tx(&self) -> Result<()> {
        let mut state = self.state.write().await;
        match state.saved.take() {
            Some(saved) => {
                state.tables = saved;
                Ok(())
            }
            None => Err(MigrateError::Driver(format!(
                "no open transaction on {}",
                self.name
            ))),
        }
    }

    fn max_connections(&self) -> usize {
        self.max_connections
    }
}
