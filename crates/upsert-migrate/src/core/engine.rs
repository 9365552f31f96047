//! Supported database engines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

/// The seven backends the engine can compare and migrate between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DatabaseEngine {
    #[serde(rename = "sqlserver", alias = "mssql", alias = "sql_server")]
    SqlServer,
    #[serde(rename = "postgres", alias = "postgresql")]
    PostgreSql,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "oracle")]
    Oracle,
    #[serde(rename = "mongodb", alias = "mongo")]
    MongoDb,
    #[serde(rename = "cosmosdb", alias = "cosmos")]
    CosmosDb,
}

impl DatabaseEngine {
    /// All engines, in a stable order.
    pub const ALL: [DatabaseEngine; 7] = [
        DatabaseEngine::SqlServer,
        DatabaseEngine::PostgreSql,
        DatabaseEngine::MySql,
        DatabaseEngine::Sqlite,
        DatabaseEngine::Oracle,
        DatabaseEngine::MongoDb,
        DatabaseEngine::CosmosDb,
    ];

    /// Short dialect name used in logs and type mapping warnings.
    pub fn dialect_name(&self) -> &'static str {
        match self {
            DatabaseEngine::SqlServer => "mssql",
            DatabaseEngine::PostgreSql => "postgres",
            DatabaseEngine::MySql => "mysql",
            DatabaseEngine::Sqlite => "sqlite",
            DatabaseEngine::Oracle => "oracle",
            DatabaseEngine::MongoDb => "mongodb",
            DatabaseEngine::CosmosDb => "cosmosdb",
        }
    }

    /// Document stores have no enforced column schema.
    pub fn is_document_store(&self) -> bool {
        matches!(self, DatabaseEngine::MongoDb | DatabaseEngine::CosmosDb)
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect_name())
    }
}

impl FromStr for DatabaseEngine {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql_server" => Ok(DatabaseEngine::SqlServer),
            "postgres" | "postgresql" | "pg" => Ok(DatabaseEngine::PostgreSql),
            "mysql" | "mariadb" => Ok(DatabaseEngine::MySql),
            "sqlite" => Ok(DatabaseEngine::Sqlite),
            "oracle" => Ok(DatabaseEngine::Oracle),
            "mongodb" | "mongo" => Ok(DatabaseEngine::MongoDb),
            "cosmosdb" | "cosmos" => Ok(DatabaseEngine::CosmosDb),
            other => Err(MigrateError::Config(format!(
                "Unknown database engine '{}'. Expected one of: {}",
                other,
                DatabaseEngine::ALL
                    .iter()
                    .map(|e| e.dialect_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(
            "MSSQL".parse::<DatabaseEngine>().unwrap(),
            DatabaseEngine::SqlServer
        );
        assert_eq!(
            "pg".parse::<DatabaseEngine>().unwrap(),
            DatabaseEngine::PostgreSql
        );
        assert_eq!(
            "cosmos".parse::<DatabaseEngine>().unwrap(),
            DatabaseEngine::CosmosDb
        );
        assert!("db2".parse::<DatabaseEngine>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let engine: DatabaseEngine = serde_yaml::from_str("postgres").unwrap();
        assert_eq!(engine, DatabaseEngine::PostgreSql);
        let engine: DatabaseEngine = serde_yaml::from_str("sql_server").unwrap();
        assert_eq!(engine, DatabaseEngine::SqlServer);
        assert_eq!(
            serde_json::to_string(&DatabaseEngine::MongoDb).unwrap(),
            "\"mongodb\""
        );
    }
}
