//! upsert-migrate CLI - compare and migrate data between heterogeneous databases.

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::format::FmtSpan;
use upsert_migrate::compare::ChangeType;
use upsert_migrate::dialect::{self, NativeTypeSpec};
use upsert_migrate::{
    Config, DatabaseEngine, DriverCatalog, FileStateBackend, MigrateError, MigrationStatus,
    Orchestrator, RowStatus, StateBackend,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "upsert-migrate")]
#[command(about = "Compare and migrate data between heterogeneous databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Directory for signed run history records
    #[arg(long, env = "UPSERT_MIGRATE_HISTORY_DIR")]
    history_dir: Option<PathBuf>,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the configuration file without connecting
    Validate,

    /// Classify every row and estimate the migration without writing
    DryRun,

    /// Run a migration
    Run {
        /// Identifier for this run (default: random)
        #[arg(long)]
        migration_id: Option<String>,

        /// Only estimate; same as the dry-run command
        #[arg(long)]
        dry_run: bool,
    },

    /// Compare table, column, index, and constraint definitions
    CompareSchema,

    /// Compare the rows of one mapped table
    CompareData {
        /// Source table of the mapping to compare
        #[arg(long)]
        table: String,

        /// Print every differing row, not just counts
        #[arg(long)]
        rows: bool,
    },

    /// Show how a native type maps between two engines
    MapType {
        /// Source engine (mssql, postgres, mysql, sqlite, oracle, mongodb, cosmosdb)
        #[arg(long)]
        from: String,

        /// Target engine
        #[arg(long)]
        to: String,

        /// Native type on the source engine, e.g. "nvarchar(50)"
        #[arg(value_name = "TYPE")]
        native_type: String,
    },

    /// Test database connections
    HealthCheck,

    /// List recorded runs (requires --history-dir)
    History,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    // map-type works without a configuration file
    if let Commands::MapType { from, to, native_type } = &cli.command {
        return map_type(from, to, native_type, cli.output_json);
    }

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let mut orchestrator = Orchestrator::new(DriverCatalog::with_builtins());
    if let Some(dir) = &cli.history_dir {
        let backend = FileStateBackend::new(dir);
        backend.init().await?;
        orchestrator = orchestrator.with_state_backend(Arc::new(backend));
    }

    match cli.command {
        Commands::MapType { .. } => unreachable!(), // Handled above

        Commands::Validate => {
            config.validate()?;
            if cli.output_json {
                println!("{}", json!({ "valid": true, "tables": config.included_tables().len() }));
            } else {
                println!("Configuration is valid");
                println!("  Source: {}", config.source.identity());
                println!("  Target: {}", config.target.identity());
                println!("  Mode: {}", config.migration.mode);
                println!("  Tables: {}", config.included_tables().len());
            }
        }

        Commands::DryRun => dry_run(&orchestrator, &config, cli.output_json).await?,

        Commands::Run { migration_id, dry_run: flag } => {
            if flag || config.migration.dry_run {
                dry_run(&orchestrator, &config, cli.output_json).await?;
                return Ok(ExitCode::SUCCESS);
            }

            let migration_id = migration_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let cancel_token = setup_signal_handler();
            forward_cancellation(cancel_token, orchestrator.clone(), migration_id.clone());
            if cli.progress {
                spawn_progress_printer(orchestrator.clone(), migration_id.clone());
            }

            let result = orchestrator
                .execute_migration(&config, &[], &migration_id)
                .await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nMigration {}: {}", result.migration_id, result.status);
                println!("  Duration: {:.2}s", result.duration_ms as f64 / 1000.0);
                println!("  Tables: {}", result.tables.len());
                println!(
                    "  Rows: {} inserted, {} updated, {} deleted, {} skipped, {} errors",
                    result.totals.inserted,
                    result.totals.updated,
                    result.totals.deleted,
                    result.totals.skipped,
                    result.totals.errors
                );
                if result.totals.conflicts > 0 {
                    println!(
                        "  Conflicts: {} ({} awaiting review)",
                        result.totals.conflicts,
                        result.review_queue.len()
                    );
                }
                if let Some(path) = &result.backup_path {
                    println!("  Backup: {}", path.display());
                }
                for warning in &result.warnings {
                    println!("  Warning: {}", warning);
                }
                for table in result.tables.iter().filter(|t| t.error.is_some()) {
                    println!(
                        "  Failed table {}: {}",
                        table.target_table,
                        table.error.as_deref().unwrap_or_default()
                    );
                }
            }

            return Ok(match result.status {
                MigrationStatus::Completed => ExitCode::SUCCESS,
                MigrationStatus::Cancelled => ExitCode::from(MigrateError::Cancelled.exit_code()),
                _ => ExitCode::from(4),
            });
        }

        Commands::CompareSchema => {
            config.validate()?;
            let endpoints = orchestrator.connect(&config).await?;
            let diff = orchestrator.compare_schema(&endpoints, &config).await;
            endpoints.close().await;
            let diff = diff?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&diff)?);
            } else {
                println!("Schema: {} -> {}", diff.source_database, diff.target_database);
                for change in diff
                    .changes
                    .iter()
                    .filter(|c| c.change_type != ChangeType::Unchanged)
                {
                    println!(
                        "  {} {} {}",
                        change_marker(change.change_type),
                        change.object_type,
                        change.object_name
                    );
                    if let Some(proposed) = &change.proposed_type {
                        println!("      proposed: {} ({:?})", proposed.native_type, proposed.lossiness);
                    }
                    for detail in &change.details {
                        println!(
                            "      {}: {} -> {}",
                            detail.property,
                            detail.source_value.as_deref().unwrap_or("-"),
                            detail.target_value.as_deref().unwrap_or("-")
                        );
                    }
                }
                println!(
                    "\n  {} added, {} removed, {} modified, {} unchanged",
                    diff.summary.additions,
                    diff.summary.removals,
                    diff.summary.modifications,
                    diff.summary.unchanged
                );
            }
        }

        Commands::CompareData { table, rows } => {
            config.validate()?;
            let mapping = config
                .tables
                .iter()
                .find(|m| m.source_table == table || m.target_table == table)
                .cloned()
                .ok_or_else(|| {
                    MigrateError::Config(format!("No table mapping for '{}' in the config", table))
                })?;

            let endpoints = orchestrator.connect(&config).await?;
            let diff = orchestrator.compare_data(&endpoints, &config, &mapping).await;
            endpoints.close().await;
            let diff = diff?;

            if cli.output_json {
                if rows {
                    println!("{}", serde_json::to_string_pretty(&diff)?);
                } else {
                    println!("{}", serde_json::to_string_pretty(&diff.result)?);
                }
            } else {
                let r = &diff.result;
                println!("{} -> {}", mapping.source_table, mapping.target_table);
                println!("  Matched:  {}", r.matched_count);
                println!("  Inserted: {}", r.inserted_count);
                println!("  Updated:  {}", r.updated_count);
                println!("  Deleted:  {}", r.deleted_count);
                println!("  Errors:   {}", r.error_count);
                if rows {
                    for row in diff.rows.iter().filter(|r| r.status != RowStatus::Matched) {
                        match &row.error {
                            Some(error) => println!("  {} {}: {}", row.status, row.row_id, error),
                            None if row.changed_columns.is_empty() => {
                                println!("  {} {}", row.status, row.row_id)
                            }
                            None => println!(
                                "  {} {} [{}]",
                                row.status,
                                row.row_id,
                                row.changed_columns.join(", ")
                            ),
                        }
                    }
                }
            }
        }

        Commands::HealthCheck => {
            config.validate()?;
            let source = check_endpoint(&orchestrator, &config.source).await;
            let target = check_endpoint(&orchestrator, &config.target).await;
            let healthy = source.is_none() && target.is_none();

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "healthy": healthy,
                        "source": { "identity": config.source.identity(), "error": source },
                        "target": { "identity": config.target.identity(), "error": target },
                    }))?
                );
            } else {
                println!("Health Check Results:");
                for (label, identity, error) in [
                    ("Source", config.source.identity(), &source),
                    ("Target", config.target.identity(), &target),
                ] {
                    println!(
                        "  {} ({}): {}",
                        label,
                        identity,
                        if error.is_none() { "OK" } else { "FAILED" }
                    );
                    if let Some(err) = error {
                        println!("    Error: {}", err);
                    }
                }
                println!("\n  Overall: {}", if healthy { "HEALTHY" } else { "UNHEALTHY" });
            }

            if !healthy {
                return Err(MigrateError::connection("Health check failed"));
            }
        }

        Commands::History => {
            if cli.history_dir.is_none() {
                return Err(MigrateError::Config(
                    "--history-dir is required for history".to_string(),
                ));
            }
            let records = orchestrator.history().await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No recorded runs");
            } else {
                for record in &records {
                    println!(
                        "{}  {}  {}  +{} ~{} -{} ({} errors)",
                        record.started_at.format("%Y-%m-%d %H:%M:%S"),
                        record.run_id,
                        record.status,
                        record.rows_inserted,
                        record.rows_updated,
                        record.rows_deleted,
                        record.error_count
                    );
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn dry_run(
    orchestrator: &Orchestrator,
    config: &Config,
    output_json: bool,
) -> Result<(), MigrateError> {
    let result = orchestrator.dry_run(config, &[]).await?;
    if output_json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    println!("Dry run ({} mode):", result.mode);
    for table in &result.tables {
        println!(
            "  {} -> {}: {} insert, {} update, {} delete, {} skip",
            table.source_table,
            table.target_table,
            table.estimated_inserts,
            table.estimated_updates,
            table.estimated_deletes,
            table.estimated_skips
        );
    }
    println!("\n  Rows: {}", result.total_estimated_rows);
    println!("  Batches: {}", result.estimated_batches);
    println!(
        "  Estimated duration: {:.1}s",
        result.estimated_duration_ms as f64 / 1000.0
    );
    for warning in &result.warnings {
        println!("  Warning: {}", warning);
    }
    for error in &result.errors {
        println!("  Error: {}", error);
    }
    Ok(())
}

fn map_type(from: &str, to: &str, native: &str, output_json: bool) -> Result<ExitCode, MigrateError> {
    let from: DatabaseEngine = from.parse()?;
    let to: DatabaseEngine = to.parse()?;
    let canonical = dialect::to_canonical(from, &NativeTypeSpec::parse(native));
    let mapping = dialect::map_type(from, to, native);

    if output_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "source_engine": from.to_string(),
                "source_type": native,
                "canonical_type": canonical.canonical_type.to_string(),
                "target_engine": to.to_string(),
                "target_type": mapping.target_type.to_string(),
                "lossiness": mapping.lossiness,
                "warning": mapping.warning,
            }))?
        );
    } else {
        println!("{} {} -> {} {}", from, native, to, mapping.target_type);
        println!("  Canonical: {}", canonical.canonical_type);
        println!("  Lossiness: {}", mapping.lossiness);
        if let Some(warning) = &mapping.warning {
            println!("  Warning: {}", warning);
        }
    }

    Ok(if canonical.canonical_type.is_unsupported() {
        ExitCode::from(4)
    } else {
        ExitCode::SUCCESS
    })
}

/// Connect and ping one endpoint. Returns the error message on failure.
async fn check_endpoint(
    orchestrator: &Orchestrator,
    config: &upsert_migrate::ConnectionConfig,
) -> Option<String> {
    let driver = match orchestrator.catalog().connect(config).await {
        Ok(driver) => driver,
        Err(e) => return Some(e.to_string()),
    };
    let outcome = driver.ping().await;
    driver.close().await;
    outcome.err().map(|e| e.to_string())
}

fn change_marker(change: ChangeType) -> &'static str {
    match change {
        ChangeType::Added => "+",
        ChangeType::Removed => "-",
        ChangeType::Modified => "~",
        ChangeType::Unchanged => "=",
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Forward progress snapshots of a run to stderr as JSON lines.
fn spawn_progress_printer(orchestrator: Orchestrator, migration_id: String) {
    tokio::spawn(async move {
        // The run registers itself once execute_migration starts.
        let mut rx = loop {
            if let Some(rx) = orchestrator.subscribe(&migration_id) {
                break rx;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        };
        while rx.changed().await.is_ok() {
            let progress = rx.borrow_and_update().clone();
            if let Ok(line) = serde_json::to_string(&progress) {
                eprintln!("{}", line);
            }
        }
    });
}

/// Setup signal handlers for graceful shutdown.
///
/// Returns a CancellationToken that will be cancelled when SIGINT or SIGTERM
/// is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    let token_term = cancel_token.clone();

    tokio::spawn(async move {
        let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
            return;
        };
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Stopping after the current batch...");
        token_int.cancel();
    });

    tokio::spawn(async move {
        let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
            return;
        };
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Stopping after the current batch...");
        token_term.cancel();
    });

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}

/// Cancel `migration_id` once `token` fires: the current batch finishes,
/// nothing further is written. Resolves to whether a running migration was
/// stopped.
fn forward_cancellation(
    token: CancellationToken,
    orchestrator: Orchestrator,
    migration_id: String,
) -> tokio::task::JoinHandle<bool> {
    tokio::spawn(async move {
        token.cancelled().await;
        orchestrator.cancel_migration(&migration_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use upsert_migrate::config::ConnectionConfig;
    use upsert_migrate::core::{row, ColumnInfo, SqlValue, TableInfo, TableMapping};
    use upsert_migrate::drivers::MemoryDriver;
    use upsert_migrate::orchestrator::Endpoints;

    fn users(int: &str) -> TableInfo {
        TableInfo::new(
            "users",
            vec![
                ColumnInfo::new("id", int).primary_key(),
                ColumnInfo::new("name", "varchar(20)"),
            ],
        )
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_running_migration() {
        let source = Arc::new(MemoryDriver::new(DatabaseEngine::SqlServer, "source"));
        let target = Arc::new(MemoryDriver::new(DatabaseEngine::PostgreSql, "target"));
        source.create_table(users("int")).await.unwrap();
        target.create_table(users("integer")).await.unwrap();
        source
            .insert_rows(
                "users",
                (1..=10)
                    .map(|i| row([("id", SqlValue::I32(i)), ("name", SqlValue::from("u"))]))
                    .collect(),
            )
            .await
            .unwrap();
        target.set_write_delay(Duration::from_millis(100)).await;
        let endpoints = Endpoints::new(source, target.clone());

        let mut config = Config::new(
            ConnectionConfig::file(DatabaseEngine::SqlServer, "source.json"),
            ConnectionConfig::file(DatabaseEngine::PostgreSql, "target.json"),
        );
        config.migration.batch_size = 1;
        config.tables = vec![TableMapping::same_name("users", &["id"])];

        let orchestrator = Orchestrator::new(DriverCatalog::new());
        let token = CancellationToken::new();
        let forwarded =
            forward_cancellation(token.clone(), orchestrator.clone(), "cli-cancel".into());

        let run = orchestrator.execute_migration_on(&endpoints, &config, &[], "cli-cancel", None);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            token.cancel();
        };
        let (result, ()) = tokio::join!(run, cancel);

        assert_eq!(result.unwrap().status, MigrationStatus::Cancelled);
        assert!(forwarded.await.unwrap());
        assert!(target.rows("users").await.unwrap().len() < 10);
    }

    #[tokio::test]
    async fn test_cancelled_token_without_run() {
        let token = CancellationToken::new();
        let forwarded = forward_cancellation(
            token.clone(),
            Orchestrator::new(DriverCatalog::new()),
            "idle".into(),
        );
        token.cancel();
        assert!(!forwarded.await.unwrap());
    }
}
