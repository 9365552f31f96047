//! Configuration validation.

use std::collections::HashSet;

use super::{Config, ConflictResolution, ConnectionConfig};
use crate::error::{MigrateError, Result};
use crate::transform::TransformSet;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("source", &config.source)?;
    validate_connection("target", &config.target)?;

    let migration = &config.migration;
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if migration.max_parallel_tables == 0 {
        return Err(MigrateError::Config(
            "migration.max_parallel_tables must be at least 1".into(),
        ));
    }
    if migration.operation_timeout_secs == 0 {
        return Err(MigrateError::Config(
            "migration.operation_timeout_secs must be at least 1".into(),
        ));
    }

    let mut sources = HashSet::new();
    let mut targets = HashSet::new();
    for mapping in &config.tables {
        mapping.validate()?;
        if !sources.insert(mapping.source_table.as_str()) {
            return Err(MigrateError::Config(format!(
                "Source table '{}' is mapped more than once",
                mapping.source_table
            )));
        }
        if !targets.insert(mapping.target_table.as_str()) {
            return Err(MigrateError::Config(format!(
                "Target table '{}' is mapped more than once",
                mapping.target_table
            )));
        }
        if migration.conflict_resolution == ConflictResolution::NewestWins
            && mapping.included
            && mapping.timestamp_column.is_none()
            && migration.newest_wins_column.is_none()
        {
            return Err(MigrateError::Config(format!(
                "newest_wins needs a timestamp column: set timestamp_column on {} \
                 or migration.newest_wins_column",
                mapping.source_table
            )));
        }
    }

    for rule in &config.transforms {
        if !sources.contains(rule.table_id.as_str()) {
            return Err(MigrateError::Config(format!(
                "Transform {} references unmapped table '{}'",
                rule.order, rule.table_id
            )));
        }
    }
    TransformSet::compile(&config.transforms, config.target.engine)?;

    Ok(())
}

fn validate_connection(side: &str, conn: &ConnectionConfig) -> Result<()> {
    if conn.file_path.is_some() {
        return Ok(());
    }
    if conn.host.is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.host or {}.file_path is required",
            side, side
        )));
    }
    if conn.database.is_empty() {
        return Err(MigrateError::Config(format!("{}.database is required", side)));
    }
    if conn.max_connections == 0 {
        return Err(MigrateError::Config(format!(
            "{}.max_connections must be at least 1",
            side
        )));
    }
    Ok(())
}
