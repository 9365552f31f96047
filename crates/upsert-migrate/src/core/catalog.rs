//! Driver catalog for explicit dependency injection.
//!
//! The [`DriverCatalog`] maps each [`DatabaseEngine`] to the connector that
//! opens handles for it. It is constructed by the caller and passed to the
//! orchestrator; there is no global registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::ConnectionConfig;
use crate::drivers::SnapshotConnector;
use crate::error::{MigrateError, Result};

use super::engine::DatabaseEngine;
use super::traits::{DatabaseDriver, DriverConnector};

/// Registry of driver connectors keyed by engine.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use upsert_migrate::core::{DatabaseEngine, DriverCatalog};
/// use upsert_migrate::drivers::SnapshotConnector;
///
/// let mut catalog = DriverCatalog::new();
/// catalog.register(DatabaseEngine::PostgreSql, Arc::new(SnapshotConnector::new()));
/// assert!(catalog.supports(DatabaseEngine::PostgreSql));
/// assert!(!catalog.supports(DatabaseEngine::Oracle));
/// ```
#[derive(Default, Clone)]
pub struct DriverCatalog {
    connectors: HashMap<DatabaseEngine, Arc<dyn DriverConnector>>,
}

impl DriverCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the bundled snapshot connector registered for every
    /// engine. Network drivers are registered by the embedding application.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        let snapshot: Arc<dyn DriverConnector> = Arc::new(SnapshotConnector::new());
        for engine in DatabaseEngine::ALL {
            catalog.register(engine, snapshot.clone());
        }
        catalog
    }

    /// Register (or replace) the connector for an engine.
    pub fn register(&mut self, engine: DatabaseEngine, connector: Arc<dyn DriverConnector>) {
        self.connectors.insert(engine, connector);
    }

    pub fn supports(&self, engine: DatabaseEngine) -> bool {
        self.connectors.contains_key(&engine)
    }

    /// Registered engines in declaration order.
    pub fn engines(&self) -> Vec<DatabaseEngine> {
        DatabaseEngine::ALL
            .into_iter()
            .filter(|e| self.supports(*e))
            .collect()
    }

    /// Open a handle for `config` through the connector of its engine.
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseDriver>> {
        let connector = self.connectors.get(&config.engine).ok_or_else(|| {
            MigrateError::Config(format!(
                "No driver registered for engine '{}'",
                config.engine
            ))
        })?;
        debug!(
            "Connecting to {} via {} connector",
            config.engine,
            connector.name()
        );
        let driver = connector.connect(config).await?;
        if driver.engine() != config.engine {
            return Err(MigrateError::Config(format!(
                "Connector '{}' returned a {} handle for a {} connection",
                connector.name(),
                driver.engine(),
                config.engine
            )));
        }
        Ok(driver)
    }
}

impl std::fmt::Debug for DriverCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverCatalog")
            .field("engines", &self.engines())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_cover_all_engines() {
        let catalog = DriverCatalog::with_builtins();
        assert_eq!(catalog.engines().len(), DatabaseEngine::ALL.len());
    }

    #[tokio::test]
    async fn test_connect_unregistered_engine() {
        let catalog = DriverCatalog::new();
        let config = ConnectionConfig::new(DatabaseEngine::MySql);
        let err = catalog.connect(&config).await.err().unwrap();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}
