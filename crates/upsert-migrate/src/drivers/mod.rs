//! Bundled database driver implementations.
//!
//! - [`memory`]: tables held in memory, with constraint checks and transactions
//! - [`snapshot`]: JSON snapshot files loaded into a [`MemoryDriver`]
//!
//! # Adding New Databases
//!
//! Network engines live outside this crate. To add one:
//!
//! 1. Implement [`DatabaseDriver`](crate::core::DatabaseDriver) for a handle
//!    type (schema introspection, keyed streaming, batch writes, transactions)
//! 2. Implement [`DriverConnector`](crate::core::DriverConnector) to open it
//!    from a [`ConnectionConfig`](crate::config::ConnectionConfig)
//! 3. Register the connector in a [`DriverCatalog`](crate::core::DriverCatalog)

pub mod memory;
pub mod snapshot;

pub use memory::MemoryDriver;
pub use snapshot::{SnapshotConnector, SnapshotDriver, SnapshotFile, SnapshotTable};
