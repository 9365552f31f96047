//! Core abstractions for engine-agnostic comparison and migration.
//!
//! - [`engine`]: the seven supported database engines
//! - [`schema`]: table, column, index, and constraint metadata snapshots
//! - [`value`]: owned SQL values, rows, and keyed batches
//! - [`traits`]: the driver capability boundary
//! - [`catalog`]: connector registry for dependency injection
//!
//! Everything above the driver boundary works against these types only.
//! Drivers translate engine wire formats into them and back.

pub mod catalog;
pub mod engine;
pub mod schema;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use catalog::DriverCatalog;
pub use engine::DatabaseEngine;
pub use schema::{ColumnInfo, ConstraintInfo, ConstraintType, IndexInfo, TableInfo, TableMapping};
pub use traits::{
    key_values, DatabaseDriver, DriverConnector, RowFailure, WriteOperation, WriteReport,
};
pub use value::{compare_tuples, row, Row, RowBatch, RowCursor, SqlValue};
