//! Error types for the comparison and migration engine.

use thiserror::Error;

/// Main error type for comparison and migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad mappings, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection-level failure reported by a driver.
    ///
    /// `transient` marks network hiccups that may succeed on retry.
    #[error("Connection error: {message}")]
    Connection { message: String, transient: bool },

    /// Authentication or authorization failure. Never retried.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A driver call exceeded the configured per-operation timeout.
    #[error("Operation '{operation}' timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// A column cannot be represented on the target engine.
    #[error("Column {table}.{column} cannot be represented on the target: {message}")]
    SchemaIncompatibility {
        table: String,
        column: String,
        message: String,
    },

    /// A row was rejected by the target at write time.
    #[error("Write failed for table {table}{}: {message}", row_suffix(.row_index))]
    RowWrite {
        table: String,
        row_index: Option<usize>,
        message: String,
    },

    /// A transform rule could not be applied to a value.
    #[error("Transform failed for column '{column}': {message}")]
    Transform { column: String, message: String },

    /// Foreign-key dependencies among the included tables form a cycle.
    #[error("Foreign key cycle detected between tables: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Another dry run or migration is already active for this identifier.
    #[error("Migration '{0}' is already running")]
    MigrationInProgress(String),

    /// Generic driver failure that is not otherwise classified.
    #[error("Driver error: {0}")]
    Driver(String),

    /// Run history / state persistence error
    #[error("State error: {0}")]
    State(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, cancel_migration, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

fn row_suffix(row_index: &Option<usize>) -> String {
    match row_index {
        Some(idx) => format!(" (row {})", idx),
        None => String::new(),
    }
}

impl MigrateError {
    /// Create a transient connection error.
    pub fn transient(message: impl Into<String>) -> Self {
        MigrateError::Connection {
            message: message.into(),
            transient: true,
        }
    }

    /// Create a non-transient connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        MigrateError::Connection {
            message: message.into(),
            transient: false,
        }
    }

    /// Create a RowWrite error
    pub fn row_write(
        table: impl Into<String>,
        row_index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::RowWrite {
            table: table.into(),
            row_index,
            message: message.into(),
        }
    }

    /// Create a Transform error
    pub fn transform(column: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transform {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Whether the operation that produced this error may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            MigrateError::Connection { transient, .. } => *transient,
            MigrateError::Timeout { .. } | MigrateError::Driver(_) => true,
            _ => false,
        }
    }

    /// Whether this error must abort the whole run instead of being recorded.
    pub fn is_fatal(&self) -> bool {
        match self {
            MigrateError::Connection { transient, .. } => !*transient,
            MigrateError::Authentication(_)
            | MigrateError::Config(_)
            | MigrateError::DependencyCycle(_)
            | MigrateError::MigrationInProgress(_)
            | MigrateError::Cancelled => true,
            _ => false,
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::DependencyCycle(_)
            | MigrateError::MigrationInProgress(_) => 1,
            MigrateError::Connection { .. } | MigrateError::Authentication(_) => 2,
            MigrateError::Timeout { .. } => 3,
            MigrateError::SchemaIncompatibility { .. }
            | MigrateError::RowWrite { .. }
            | MigrateError::Transform { .. } => 4,
            MigrateError::Cancelled => 5,
            MigrateError::State(_) => 6,
            MigrateError::Io(_) => 7,
            MigrateError::Driver(_) | MigrateError::Json(_) => 8,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
