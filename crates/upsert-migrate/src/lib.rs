//! # upsert-migrate
//!
//! Comparison and migration engine for heterogeneous databases.
//!
//! This library provides:
//!
//! - **Canonical type mapping** between seven engines, with every conversion
//!   tagged by how much it loses
//! - **Schema comparison** of tables, columns, indexes, and constraints
//! - **Row-level data comparison** keyed on configurable columns
//! - **Column transforms** applied to rows in flight
//! - **Migrations** in upsert, mirror, append-only, merge, and schema-only
//!   modes, with conflict resolution, batching, transactions, retries,
//!   cancellation, dry runs, and run history
//!
//! Database access goes through the [`DatabaseDriver`] trait. The bundled
//! [`drivers::MemoryDriver`] and JSON snapshot connector make the engine usable
//! without network drivers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use upsert_migrate::{Config, DriverCatalog, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> upsert_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(DriverCatalog::with_builtins());
//!
//!     let estimate = orchestrator.dry_run(&config, &[]).await?;
//!     println!("{} rows to process", estimate.total_estimated_rows);
//!
//!     let result = orchestrator.execute_migration(&config, &[], "nightly-sync").await?;
//!     println!("{}: {} rows written", result.status, result.totals.written());
//!     Ok(())
//! }
//! ```

pub mod compare;
pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod state;
pub mod transform;

// Re-exports for convenient access
pub use compare::{DataComparator, DataDiffResult, DataDiffRow, RowStatus, SchemaDiffResult};
pub use config::{
    Config, ConflictResolution, ConnectionConfig, MigrationConfig, MigrationMode, TransactionMode,
};
pub use core::{
    DatabaseDriver, DatabaseEngine, DriverCatalog, Row, SqlValue, TableInfo, TableMapping,
};
pub use dialect::{CanonicalType, Lossiness};
pub use error::{MigrateError, Result};
pub use orchestrator::{
    DryRunResult, Endpoints, MigrationProgress, MigrationResult, MigrationStatus, Orchestrator,
    ProgressEvent,
};
pub use state::{FileStateBackend, RunRecord, RunStatus, StateBackend};
pub use transform::{TransformRule, TransformSet};
