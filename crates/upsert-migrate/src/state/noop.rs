//! No-op state backend for runs without history.

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::state::backend::StateBackend;
use crate::state::RunRecord;

/// State backend that doesn't persist anything.
///
/// Logs a warning on first use.
pub struct NoOpStateBackend {
    warned: std::sync::atomic::AtomicBool,
}

impl NoOpStateBackend {
    pub fn new() -> Self {
        Self {
            warned: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn warn_once(&self) {
        if !self
            .warned
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            warn!("Using no-op state backend: run history will not be persisted");
        }
    }
}

impl Default for NoOpStateBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for NoOpStateBackend {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn save(&self, _record: &RunRecord) -> Result<()> {
        self.warn_once();
        Ok(())
    }

    async fn load(&self, _run_id: &str) -> Result<Option<RunRecord>> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<RunRecord>> {
        Ok(Vec::new())
    }

    fn backend_type(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConnectionConfig};
    use crate::core::DatabaseEngine;

    #[tokio::test]
    async fn test_noop_discards_records() {
        let backend = NoOpStateBackend::new();
        let config = Config::new(
            ConnectionConfig::new(DatabaseEngine::Oracle),
            ConnectionConfig::new(DatabaseEngine::PostgreSql),
        );
        backend.save(&RunRecord::new("r", &config)).await.unwrap();
        assert!(backend.load("r").await.unwrap().is_none());
        assert!(backend.list().await.unwrap().is_empty());
        assert_eq!(backend.backend_type(), "noop");
    }
}
