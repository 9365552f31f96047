//! End-to-end migration tests against in-memory databases.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use upsert_migrate::config::ConnectionConfig;
use upsert_migrate::core::{
    row, ColumnInfo, ConstraintInfo, DatabaseDriver, DatabaseEngine, DriverCatalog, Row, RowBatch,
    RowCursor, SqlValue, TableInfo, TableMapping, WriteOperation, WriteReport,
};
use upsert_migrate::drivers::MemoryDriver;
use upsert_migrate::orchestrator::{
    read_backup, Endpoints, ErrorKind, MigrationStatus, Orchestrator, ProgressEvent, TableStatus,
};
use upsert_migrate::state::{FileStateBackend, RunStatus};
use upsert_migrate::transform::{RuleKind, TransformRule};
use upsert_migrate::{
    Config, ConflictResolution, MigrateError, MigrationMode, RowStatus, TransactionMode,
};

// =============================================================================
// Fixtures
// =============================================================================

fn users_table(engine: DatabaseEngine) -> TableInfo {
    named_users_table("users", engine)
}

fn named_users_table(name: &str, engine: DatabaseEngine) -> TableInfo {
    let (int, text) = match engine {
        DatabaseEngine::SqlServer => ("int", "nvarchar(50)"),
        _ => ("integer", "varchar(50)"),
    };
    TableInfo::new(
        name,
        vec![
            ColumnInfo::new("id", int).primary_key(),
            ColumnInfo::new("name", text).not_null(),
        ],
    )
}

fn user(id: i32, name: &str) -> Row {
    row([("id", SqlValue::I32(id)), ("name", SqlValue::from(name))])
}

fn config(mode: MigrationMode) -> Config {
    let mut config = Config::new(
        ConnectionConfig::file(DatabaseEngine::SqlServer, "source.json"),
        ConnectionConfig::file(DatabaseEngine::PostgreSql, "target.json"),
    );
    config.migration.mode = mode;
    config.migration.retry_backoff_ms = 1;
    config.migration.max_backoff_ms = 10;
    config
}

struct Fixture {
    source: Arc<MemoryDriver>,
    target: Arc<MemoryDriver>,
    endpoints: Endpoints,
    orchestrator: Orchestrator,
}

impl Fixture {
    fn new() -> Self {
        Self::with_target(Arc::new(MemoryDriver::new(DatabaseEngine::PostgreSql, "target")))
    }

    fn with_target(target: Arc<MemoryDriver>) -> Self {
        let source = Arc::new(MemoryDriver::new(DatabaseEngine::SqlServer, "source"));
        let endpoints = Endpoints::new(source.clone(), target.clone());
        Self {
            source,
            target,
            endpoints,
            orchestrator: Orchestrator::new(DriverCatalog::new()),
        }
    }

    async fn users(source_rows: Vec<Row>, target_rows: Vec<Row>) -> Self {
        let fixture = Self::new();
        fixture
            .source
            .create_table(users_table(DatabaseEngine::SqlServer))
            .await
            .unwrap();
        fixture
            .target
            .create_table(users_table(DatabaseEngine::PostgreSql))
            .await
            .unwrap();
        fixture.source.insert_rows("users", source_rows).await.unwrap();
        fixture.target.insert_rows("users", target_rows).await.unwrap();
        fixture
    }
}

fn users_config(mode: MigrationMode) -> Config {
    let mut config = config(mode);
    config.tables = vec![TableMapping::same_name("users", &["id"])];
    config
}

fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by_key(|r| r.get("id").and_then(|v| v.as_i64()));
    rows
}

// =============================================================================
// Mode scenarios
// =============================================================================

#[tokio::test]
async fn test_upsert_updates_changed_row() {
    let f = Fixture::users(vec![user(1, "Alice")], vec![user(1, "Alicia")]).await;
    let config = users_config(MigrationMode::Upsert);

    let mapping = TableMapping::same_name("users", &["id"]);
    let diff = f
        .orchestrator
        .compare_data(&f.endpoints, &config, &mapping)
        .await
        .unwrap();
    assert_eq!(diff.result.updated_count, 1);
    assert_eq!(diff.rows[0].status, RowStatus::Updated);
    assert_eq!(diff.rows[0].changed_columns, vec!["name".to_string()]);

    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "upsert-1", None)
        .await
        .unwrap();
    assert_eq!(result.status, MigrationStatus::Completed);
    let users = result.table("users").unwrap();
    assert_eq!(users.counters.updated, 1);
    assert_eq!(users.diff.as_ref().unwrap().updated_count, 1);
    assert_eq!(f.target.rows("users").await.unwrap(), vec![user(1, "Alice")]);
}

#[tokio::test]
async fn test_append_only_leaves_existing_rows() {
    let f = Fixture::users(vec![user(1, "Alice")], vec![user(1, "Alicia")]).await;
    let config = users_config(MigrationMode::AppendOnly);

    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "append-1", None)
        .await
        .unwrap();
    let users = result.table("users").unwrap();
    assert_eq!(users.counters.written(), 0);
    assert_eq!(users.skip_reasons["ignored_by_mode"], 1);
    assert_eq!(f.target.rows("users").await.unwrap(), vec![user(1, "Alicia")]);
    assert_eq!(f.target.write_calls().await, 0);
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let f = Fixture::users(
        vec![user(1, "Alice"), user(2, "Bob"), user(3, "Carol")],
        vec![user(1, "Alicia")],
    )
    .await;
    let config = users_config(MigrationMode::Upsert);

    let first = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "idem-1", None)
        .await
        .unwrap();
    assert_eq!(first.totals.inserted, 2);
    assert_eq!(first.totals.updated, 1);

    let second = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "idem-2", None)
        .await
        .unwrap();
    assert_eq!(second.totals.inserted, 0);
    assert_eq!(second.totals.updated, 0);
    assert_eq!(second.totals.unchanged, 3);
}

#[tokio::test]
async fn test_mirror_converges() {
    let f = Fixture::users(
        vec![user(1, "Alice"), user(2, "Bob")],
        vec![user(1, "Alicia"), user(3, "Mallory")],
    )
    .await;
    let config = users_config(MigrationMode::Mirror);

    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "mirror-1", None)
        .await
        .unwrap();
    assert_eq!(result.totals.inserted, 1);
    assert_eq!(result.totals.updated, 1);
    assert_eq!(result.totals.deleted, 1);

    let mapping = TableMapping::same_name("users", &["id"]);
    let diff = f
        .orchestrator
        .compare_data(&f.endpoints, &config, &mapping)
        .await
        .unwrap();
    assert_eq!(diff.result.inserted_count, 0);
    assert_eq!(diff.result.updated_count, 0);
    assert_eq!(diff.result.deleted_count, 0);
    assert_eq!(
        sorted(f.target.rows("users").await.unwrap()),
        vec![user(1, "Alice"), user(2, "Bob")]
    );
}

#[tokio::test]
async fn test_upsert_keeps_target_only_rows() {
    let f = Fixture::users(vec![user(1, "Alice")], vec![user(3, "Mallory")]).await;
    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &users_config(MigrationMode::Merge), &[], "merge-1", None)
        .await
        .unwrap();
    assert_eq!(result.totals.inserted, 1);
    assert_eq!(result.totals.deleted, 0);
    assert_eq!(f.target.rows("users").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_schema_only_writes_nothing() {
    let f = Fixture::users(vec![user(1, "Alice")], Vec::new()).await;
    let result = f
        .orchestrator
        .execute_migration_on(
            &f.endpoints,
            &users_config(MigrationMode::SchemaOnly),
            &[],
            "schema-1",
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.status, MigrationStatus::Completed);
    assert!(result.schema_diff.is_some());
    assert_eq!(result.totals.written(), 0);
    assert!(f.target.rows("users").await.unwrap().is_empty());
}

// =============================================================================
// Transforms and validation
// =============================================================================

async fn people_fixture() -> Fixture {
    let f = Fixture::new();
    f.source
        .create_table(TableInfo::new(
            "people",
            vec![
                ColumnInfo::new("id", "int").primary_key(),
                ColumnInfo::new("age", "nvarchar(10)"),
            ],
        ))
        .await
        .unwrap();
    f.target
        .create_table(TableInfo::new(
            "people",
            vec![
                ColumnInfo::new("id", "integer").primary_key(),
                ColumnInfo::new("age", "integer"),
            ],
        ))
        .await
        .unwrap();
    f.source
        .insert_rows(
            "people",
            vec![
                row([("id", SqlValue::I32(1)), ("age", SqlValue::from("123"))]),
                row([("id", SqlValue::I32(2)), ("age", SqlValue::from("abc"))]),
            ],
        )
        .await
        .unwrap();
    f
}

fn people_config() -> Config {
    let mut config = config(MigrationMode::Upsert);
    config.tables = vec![TableMapping::same_name("people", &["id"])];
    config.transforms = vec![TransformRule {
        table_id: "people".into(),
        source_column: "age".into(),
        target_column: None,
        order: 1,
        kind: RuleKind::TypeCast {
            target_type: "integer".into(),
        },
    }];
    config
}

#[tokio::test]
async fn test_failed_type_cast_is_row_write_error() {
    let f = people_fixture().await;
    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &people_config(), &[], "cast-1", None)
        .await
        .unwrap();

    let people = result.table("people").unwrap();
    assert_eq!(people.counters.inserted, 1);
    assert_eq!(people.counters.errors, 1);
    assert_eq!(people.counters.skipped, 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ErrorKind::RowWrite);
    assert_eq!(result.errors[0].row_id.as_deref(), Some("2"));

    let rows = f.target.rows("people").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], SqlValue::I32(1));
}

#[tokio::test]
async fn test_dry_run_counts_every_row_once() {
    let f = people_fixture().await;
    let result = f
        .orchestrator
        .dry_run_on(&f.endpoints, &people_config(), &[])
        .await
        .unwrap();

    let people = result.table("people").unwrap();
    assert_eq!(people.estimated_inserts, 1);
    assert_eq!(people.skip_reasons["invalid_row"], 1);
    assert_eq!(
        people.estimated_inserts
            + people.estimated_updates
            + people.estimated_deletes
            + people.estimated_skips,
        people.total_estimated_rows
    );
    assert!(f.target.rows("people").await.unwrap().is_empty());
    assert_eq!(f.target.write_calls().await, 0);
}

#[tokio::test]
async fn test_missing_required_value_is_skipped() {
    let f = Fixture::new();
    f.source
        .create_table(TableInfo::new(
            "accounts",
            vec![
                ColumnInfo::new("id", "int").primary_key(),
                ColumnInfo::new("email", "nvarchar(100)"),
                ColumnInfo::new("nickname", "nvarchar(20)"),
            ],
        ))
        .await
        .unwrap();
    f.target
        .create_table(TableInfo::new(
            "accounts",
            vec![
                ColumnInfo::new("id", "integer").primary_key(),
                ColumnInfo::new("email", "varchar(100)").not_null(),
                ColumnInfo::new("nickname", "varchar(5)"),
            ],
        ))
        .await
        .unwrap();
    f.source
        .insert_rows(
            "accounts",
            vec![
                row([
                    ("id", SqlValue::I32(1)),
                    ("email", SqlValue::from("a@example.com")),
                    ("nickname", SqlValue::from("alexandria")),
                ]),
                row([("id", SqlValue::I32(2)), ("email", SqlValue::Null)]),
            ],
        )
        .await
        .unwrap();

    let mut config = config(MigrationMode::Upsert);
    config.tables = vec![TableMapping::same_name("accounts", &["id"])];
    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "skip-1", None)
        .await
        .unwrap();

    let accounts = result.table("accounts").unwrap();
    assert_eq!(accounts.counters.inserted, 1);
    assert_eq!(accounts.counters.skipped, 1);
    assert_eq!(accounts.counters.errors, 0);
    assert_eq!(accounts.skip_reasons["missing_required"], 1);
    assert_eq!(accounts.truncated_columns, vec!["nickname".to_string()]);

    let rows = f.target.rows("accounts").await.unwrap();
    assert_eq!(rows[0]["nickname"], SqlValue::from("alexa"));
}

#[tokio::test]
async fn test_truncated_rows_stay_in_sync() {
    let f = Fixture::new();
    f.source
        .create_table(users_table(DatabaseEngine::SqlServer))
        .await
        .unwrap();
    f.target
        .create_table(TableInfo::new(
            "users",
            vec![
                ColumnInfo::new("id", "integer").primary_key(),
                ColumnInfo::new("name", "varchar(5)").not_null(),
            ],
        ))
        .await
        .unwrap();
    f.source
        .insert_rows("users", vec![user(1, "Alexandra"), user(2, "Bo")])
        .await
        .unwrap();
    let config = users_config(MigrationMode::Mirror);

    let first = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "trunc-1", None)
        .await
        .unwrap();
    assert_eq!(first.totals.inserted, 2);
    assert_eq!(
        sorted(f.target.rows("users").await.unwrap()),
        vec![user(1, "Alexa"), user(2, "Bo")]
    );

    let second = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "trunc-2", None)
        .await
        .unwrap();
    assert_eq!(second.totals.inserted, 0);
    assert_eq!(second.totals.updated, 0);
    assert_eq!(second.totals.unchanged, 2);

    let mapping = TableMapping::same_name("users", &["id"]);
    let diff = f
        .orchestrator
        .compare_data(&f.endpoints, &config, &mapping)
        .await
        .unwrap();
    assert!(diff.result.is_identical(), "{:?}", diff.result);
}

// =============================================================================
// Ordering
// =============================================================================

async fn shop_fixture(f: &Fixture) {
    for (driver, int) in [(&f.source, "int"), (&f.target, "integer")] {
        driver
            .create_table(TableInfo::new(
                "customers",
                vec![ColumnInfo::new("id", int).primary_key()],
            ))
            .await
            .unwrap();
        let mut orders = TableInfo::new(
            "orders",
            vec![
                ColumnInfo::new("id", int).primary_key(),
                ColumnInfo::new("customer_id", int).not_null(),
            ],
        );
        orders.constraints.push(ConstraintInfo::foreign_key(
            "fk_orders_customer",
            vec!["customer_id".into()],
            "customers",
            vec!["id".into()],
        ));
        driver.create_table(orders).await.unwrap();
    }
    f.source
        .insert_rows("customers", vec![row([("id", SqlValue::I32(1))])])
        .await
        .unwrap();
    f.source
        .insert_rows(
            "orders",
            vec![row([
                ("id", SqlValue::I32(10)),
                ("customer_id", SqlValue::I32(1)),
            ])],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_parent_tables_finish_first() {
    let f = Fixture::new();
    shop_fixture(&f).await;
    let mut config = config(MigrationMode::Upsert);
    // child listed first on purpose
    config.tables = vec![
        TableMapping::same_name("orders", &["id"]),
        TableMapping::same_name("customers", &["id"]),
    ];

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "fk-1", Some(tx))
        .await
        .unwrap();
    assert_eq!(result.status, MigrationStatus::Completed);
    let order: Vec<&str> = result.tables.iter().map(|t| t.target_table.as_str()).collect();
    assert_eq!(order, vec!["customers", "orders"]);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let position = |wanted: &dyn Fn(&ProgressEvent) -> bool| events.iter().position(|e| wanted(e));
    let customers_done = position(&|e| {
        matches!(e, ProgressEvent::TableFinished { table, .. } if table == "customers")
    })
    .unwrap();
    let orders_started = position(&|e| {
        matches!(e, ProgressEvent::TableStarted { table, .. } if table == "orders")
    })
    .unwrap();
    assert!(customers_done < orders_started);
}

#[tokio::test]
async fn test_independent_tables_run_in_parallel_within_pool() {
    let target = Arc::new(
        MemoryDriver::new(DatabaseEngine::PostgreSql, "target").with_max_connections(2),
    );
    let f = Fixture::with_target(target);
    shop_fixture(&f).await;
    for name in ["notes", "tags"] {
        f.source
            .create_table(named_users_table(name, DatabaseEngine::SqlServer))
            .await
            .unwrap();
        f.target
            .create_table(named_users_table(name, DatabaseEngine::PostgreSql))
            .await
            .unwrap();
        f.source
            .insert_rows(name, (1..=3).map(|i| user(i, name)).collect())
            .await
            .unwrap();
    }
    f.source
        .insert_rows(
            "customers",
            (2..=3).map(|i| row([("id", SqlValue::I32(i))])).collect(),
        )
        .await
        .unwrap();
    f.target.set_write_delay(Duration::from_millis(50)).await;

    let mut config = config(MigrationMode::Upsert);
    config.tables = vec![
        TableMapping::same_name("orders", &["id"]),
        TableMapping::same_name("customers", &["id"]),
        TableMapping::same_name("notes", &["id"]),
        TableMapping::same_name("tags", &["id"]),
    ];
    config.migration.transaction_mode = TransactionMode::None;
    config.migration.max_parallel_tables = 4;
    config.migration.batch_size = 1;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "parallel-1", Some(tx))
        .await
        .unwrap();

    assert_eq!(result.status, MigrationStatus::Completed);
    for table in ["customers", "orders", "notes", "tags"] {
        assert_eq!(result.table(table).unwrap().status, TableStatus::Completed, "{table}");
    }
    assert_eq!(f.target.rows("customers").await.unwrap().len(), 3);
    assert_eq!(f.target.rows("orders").await.unwrap().len(), 1);
    assert_eq!(f.target.rows("notes").await.unwrap().len(), 3);
    assert_eq!(f.target.rows("tags").await.unwrap().len(), 3);
    // three independent tables share a pool of two connections
    assert_eq!(f.target.peak_concurrent_writes().await, 2);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let customers_done = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::TableFinished { table, .. } if table == "customers"))
        .unwrap();
    let orders_started = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::TableStarted { table, .. } if table == "orders"))
        .unwrap();
    assert!(customers_done < orders_started);
}

#[tokio::test]
async fn test_foreign_key_cycle_rejected_before_writes() {
    let f = Fixture::new();
    for (driver, int) in [(&f.source, "int"), (&f.target, "integer")] {
        for (name, other) in [("a", "b"), ("b", "a")] {
            let mut info = TableInfo::new(
                name,
                vec![
                    ColumnInfo::new("id", int).primary_key(),
                    ColumnInfo::new("other_id", int),
                ],
            );
            info.constraints.push(ConstraintInfo::foreign_key(
                format!("fk_{}_{}", name, other),
                vec!["other_id".into()],
                other,
                vec!["id".into()],
            ));
            driver.create_table(info).await.unwrap();
        }
    }
    f.source
        .insert_rows("a", vec![row([("id", SqlValue::I32(1))])])
        .await
        .unwrap();

    let mut config = config(MigrationMode::Upsert);
    config.tables = vec![
        TableMapping::same_name("a", &["id"]),
        TableMapping::same_name("b", &["id"]),
    ];
    let err = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "cycle-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::DependencyCycle(_)));
    assert!(err.is_fatal());
    assert_eq!(f.target.write_calls().await, 0);
}

// =============================================================================
// Transactions, retries, cancellation
// =============================================================================

async fn stock_fixture(f: &Fixture) {
    f.source
        .create_table(TableInfo::new(
            "stock",
            vec![
                ColumnInfo::new("id", "int").primary_key(),
                ColumnInfo::new("qty", "nvarchar(10)"),
            ],
        ))
        .await
        .unwrap();
    f.target
        .create_table(TableInfo::new(
            "stock",
            vec![
                ColumnInfo::new("id", "integer").primary_key(),
                ColumnInfo::new("qty", "integer"),
            ],
        ))
        .await
        .unwrap();
    f.source
        .insert_rows(
            "stock",
            vec![
                row([("id", SqlValue::I32(1)), ("qty", SqlValue::from("10"))]),
                row([("id", SqlValue::I32(2)), ("qty", SqlValue::from("oops"))]),
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_whole_migration_rolls_back_on_row_error() {
    let f = Fixture::new();
    stock_fixture(&f).await;
    let mut config = config(MigrationMode::Upsert);
    config.tables = vec![TableMapping::same_name("stock", &["id"])];
    config.migration.transaction_mode = TransactionMode::WholeMigration;
    config.migration.batch_size = 1;

    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "whole-1", None)
        .await
        .unwrap();
    assert_eq!(result.status, MigrationStatus::RolledBack);
    assert!(result.rolled_back);
    assert_eq!(result.table("stock").unwrap().status, TableStatus::RolledBack);
    assert!(f.target.rows("stock").await.unwrap().is_empty());
    assert!(!f.target.in_transaction().await);
}

#[tokio::test]
async fn test_per_batch_keeps_good_rows() {
    let f = Fixture::new();
    stock_fixture(&f).await;
    let mut config = config(MigrationMode::Upsert);
    config.tables = vec![TableMapping::same_name("stock", &["id"])];
    config.migration.batch_size = 1;

    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "batch-1", None)
        .await
        .unwrap();
    let stock = result.table("stock").unwrap();
    assert_eq!(stock.counters.inserted, 1);
    assert_eq!(stock.counters.errors, 1);
    assert_eq!(result.errors[0].kind, ErrorKind::RowWrite);
    assert_eq!(f.target.rows("stock").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_transient_write_failures_retried() {
    let f = Fixture::users(vec![user(1, "Alice"), user(2, "Bob")], Vec::new()).await;
    f.target.fail_next_writes(2).await;

    let result = f
        .orchestrator
        .execute_migration_on(
            &f.endpoints,
            &users_config(MigrationMode::Upsert),
            &[],
            "retry-1",
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.status, MigrationStatus::Completed);
    assert_eq!(result.totals.inserted, 2);
    assert_eq!(f.target.write_calls().await, 3);
    assert!(!f.target.in_transaction().await);
}

#[tokio::test]
async fn test_permanent_write_failure_stops_run() {
    let f = Fixture::users(vec![user(1, "Alice")], Vec::new()).await;
    f.target.fail_writes_on("users", "permission denied").await;

    let result = f
        .orchestrator
        .execute_migration_on(
            &f.endpoints,
            &users_config(MigrationMode::Upsert),
            &[],
            "fatal-1",
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.status, MigrationStatus::Failed);
    assert_eq!(result.errors[0].kind, ErrorKind::Batch);
    assert_eq!(f.target.write_calls().await, 1);
}

#[tokio::test]
async fn test_cancellation_between_batches() {
    let f = Fixture::users((1..=10).map(|i| user(i, "user")).collect(), Vec::new()).await;
    f.target.set_write_delay(Duration::from_millis(100)).await;
    f.source
        .create_table(named_users_table("archive", DatabaseEngine::SqlServer))
        .await
        .unwrap();
    f.target
        .create_table(named_users_table("archive", DatabaseEngine::PostgreSql))
        .await
        .unwrap();

    let mut config = users_config(MigrationMode::Upsert);
    config.tables.push(TableMapping::same_name("archive", &["id"]));
    config.migration.batch_size = 1;

    let run = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "cancel-1", None);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(f.orchestrator.cancel_migration("cancel-1"));
    };
    let (result, ()) = tokio::join!(run, cancel);
    let result = result.unwrap();

    assert_eq!(result.status, MigrationStatus::Cancelled);
    let users = result.table("users").unwrap();
    assert_eq!(users.status, TableStatus::Cancelled);
    assert!(users.counters.inserted > 0 && users.counters.inserted < 10);
    assert_eq!(result.table("archive").unwrap().status, TableStatus::Skipped);
    // committed batches stay
    assert_eq!(
        f.target.rows("users").await.unwrap().len() as u64,
        users.counters.inserted
    );
    assert!(!f.orchestrator.is_running("cancel-1"));
}

#[tokio::test]
async fn test_overlapping_runs_rejected() {
    let f = Fixture::users(vec![user(1, "Alice")], Vec::new()).await;
    f.target.set_write_delay(Duration::from_millis(50)).await;
    let config = users_config(MigrationMode::Upsert);

    let first = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "overlap-1", None);
    let second = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "overlap-2", None);
    let (first, second) = tokio::join!(first, second);
    assert!(first.is_ok());
    assert!(matches!(second, Err(MigrateError::MigrationInProgress(_))));

    // both entries are released afterwards
    assert!(f.orchestrator.dry_run_on(&f.endpoints, &config, &[]).await.is_ok());
}

#[tokio::test]
async fn test_dry_run_flag_refuses_execution() {
    let f = Fixture::users(vec![user(1, "Alice")], Vec::new()).await;
    let mut config = users_config(MigrationMode::Upsert);
    config.migration.dry_run = true;
    let err = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "flag-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::Config(_)));
}

// =============================================================================
// Conflict resolution
// =============================================================================

/// Target that edits rows behind the orchestrator's back on the first write.
struct ConcurrentEditor {
    inner: Arc<MemoryDriver>,
    edits: Vec<WriteOperation>,
    fired: AtomicBool,
}

#[async_trait]
impl DatabaseDriver for ConcurrentEditor {
    fn engine(&self) -> DatabaseEngine {
        self.inner.engine()
    }

    fn identity(&self) -> String {
        self.inner.identity()
    }

    async fn list_tables(&self) -> upsert_migrate::Result<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn get_table_info(&self, table: &str) -> upsert_migrate::Result<TableInfo> {
        self.inner.get_table_info(table).await
    }

    async fn get_row_count(&self, table: &str) -> upsert_migrate::Result<u64> {
        self.inner.get_row_count(table).await
    }

    async fn stream_rows(
        &self,
        table: &str,
        key_columns: &[String],
        cursor: Option<&RowCursor>,
        batch_size: usize,
    ) -> upsert_migrate::Result<RowBatch> {
        self.inner
            .stream_rows(table, key_columns, cursor, batch_size)
            .await
    }

    async fn write_batch(
        &self,
        table: &str,
        operations: &[WriteOperation],
    ) -> upsert_migrate::Result<WriteReport> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let report = self.inner.write_batch(table, &self.edits).await?;
            assert!(report.is_clean());
        }
        self.inner.write_batch(table, operations).await
    }

    async fn begin_tx(&self) -> upsert_migrate::Result<()> {
        self.inner.begin_tx().await
    }

    async fn commit_tx(&self) -> upsert_migrate::Result<()> {
        self.inner.commit_tx().await
    }

    async fn rollback_tx(&self) -> upsert_migrate::Result<()> {
        self.inner.rollback_tx().await
    }
}

fn item(id: i32, name: &str, updated_at: &str) -> Row {
    row([
        ("id", SqlValue::I32(id)),
        ("name", SqlValue::from(name)),
        ("updated_at", SqlValue::from(updated_at)),
    ])
}

fn edit(id: i32, name: &str, updated_at: &str) -> WriteOperation {
    WriteOperation::Update {
        key: row([("id", SqlValue::I32(id))]),
        row: row([
            ("name", SqlValue::from(name)),
            ("updated_at", SqlValue::from(updated_at)),
        ]),
    }
}

/// Items 1..=3 changed in the source; rows 2 and 3 are edited in the target
/// after classification, 2 with an older timestamp and 3 with a newer one.
async fn conflict_run(resolution: ConflictResolution) -> (upsert_migrate::MigrationResult, Vec<Row>) {
    let items = |int: &str| {
        TableInfo::new(
            "items",
            vec![
                ColumnInfo::new("id", int).primary_key(),
                ColumnInfo::new("name", "varchar(50)"),
                ColumnInfo::new("updated_at", "varchar(40)"),
            ],
        )
    };
    let inner = Arc::new(MemoryDriver::new(DatabaseEngine::PostgreSql, "target"));
    let f = Fixture::with_target(inner.clone());
    f.source.create_table(items("int")).await.unwrap();
    inner.create_table(items("integer")).await.unwrap();
    f.source
        .insert_rows(
            "items",
            (1..=3)
                .map(|i| item(i, "source", "2024-02-01T00:00:00Z"))
                .collect(),
        )
        .await
        .unwrap();
    inner
        .insert_rows(
            "items",
            (1..=3)
                .map(|i| item(i, "original", "2024-01-01T00:00:00Z"))
                .collect(),
        )
        .await
        .unwrap();

    let editor = Arc::new(ConcurrentEditor {
        inner: inner.clone(),
        edits: vec![
            edit(2, "older edit", "2024-01-15T00:00:00Z"),
            edit(3, "newer edit", "2024-03-01T00:00:00Z"),
        ],
        fired: AtomicBool::new(false),
    });
    let endpoints = Endpoints::new(f.source.clone(), editor);

    let mut config = config(MigrationMode::Upsert);
    let mut mapping = TableMapping::same_name("items", &["id"]);
    mapping.timestamp_column = Some("updated_at".into());
    config.tables = vec![mapping];
    config.migration.batch_size = 1;
    config.migration.conflict_resolution = resolution;

    let result = f
        .orchestrator
        .execute_migration_on(&endpoints, &config, &[], "conflict-1", None)
        .await
        .unwrap();
    (result, sorted(inner.rows("items").await.unwrap()))
}

fn names(rows: &[Row]) -> Vec<SqlValue> {
    rows.iter().map(|r| r["name"].clone()).collect()
}

#[tokio::test]
async fn test_source_wins_overwrites_edits() {
    let (result, rows) = conflict_run(ConflictResolution::SourceWins).await;
    assert_eq!(result.totals.conflicts, 2);
    assert_eq!(result.totals.updated, 3);
    assert_eq!(names(&rows), vec![SqlValue::from("source"); 3]);
}

#[tokio::test]
async fn test_target_wins_keeps_edits() {
    let (result, rows) = conflict_run(ConflictResolution::TargetWins).await;
    assert_eq!(result.totals.updated, 1);
    assert_eq!(result.table("items").unwrap().skip_reasons["conflict_target_wins"], 2);
    assert_eq!(
        names(&rows),
        vec![
            SqlValue::from("source"),
            SqlValue::from("older edit"),
            SqlValue::from("newer edit")
        ]
    );
}

#[tokio::test]
async fn test_newest_wins_compares_timestamps() {
    let (result, rows) = conflict_run(ConflictResolution::NewestWins).await;
    assert_eq!(result.totals.updated, 2);
    assert_eq!(result.table("items").unwrap().skip_reasons["conflict_target_newer"], 1);
    assert_eq!(
        names(&rows),
        vec![
            SqlValue::from("source"),
            SqlValue::from("source"),
            SqlValue::from("newer edit")
        ]
    );
}

#[tokio::test]
async fn test_manual_review_defers_conflicts() {
    let (result, rows) = conflict_run(ConflictResolution::ManualReview).await;
    assert_eq!(result.totals.deferred, 2);
    assert_eq!(result.review_queue.len(), 2);
    let review = &result.review_queue[1];
    assert_eq!(review.row_id, "3");
    assert_eq!(review.operation, "update");
    assert_eq!(
        review.target_current.as_ref().unwrap()["name"],
        SqlValue::from("newer edit")
    );
    assert_eq!(names(&rows)[1], SqlValue::from("older edit"));
}

// =============================================================================
// Backups and history
// =============================================================================

#[tokio::test]
async fn test_backup_captures_pre_images() {
    let dir = TempDir::new().unwrap();
    let f = Fixture::users(vec![user(1, "Alice"), user(2, "Bob")], vec![user(1, "Alicia")]).await;
    let mut config = users_config(MigrationMode::Upsert);
    config.migration.backup_before_migrate = true;
    config.migration.backup_dir = Some(dir.path().to_path_buf());

    let result = f
        .orchestrator
        .execute_migration_on(&f.endpoints, &config, &[], "backup-1", None)
        .await
        .unwrap();
    assert_eq!(result.backup.len(), 1);
    assert_eq!(result.backup[0].rows, vec![user(1, "Alicia")]);

    let path = result.backup_path.as_ref().unwrap();
    let saved = read_backup(&path.join("users.json")).unwrap();
    assert_eq!(saved.rows, vec![user(1, "Alicia")]);
}

#[tokio::test]
async fn test_run_history_recorded() {
    let dir = TempDir::new().unwrap();
    let f = Fixture::users(vec![user(1, "Alice")], vec![user(1, "Alicia")]).await;
    let orchestrator = Orchestrator::new(DriverCatalog::new())
        .with_state_backend(Arc::new(FileStateBackend::new(dir.path())));

    orchestrator
        .execute_migration_on(
            &f.endpoints,
            &users_config(MigrationMode::Upsert),
            &[],
            "history-1",
            None,
        )
        .await
        .unwrap();

    let history = orchestrator.history().await.unwrap();
    assert_eq!(history.len(), 1);
    let record = &history[0];
    assert_eq!(record.run_id, "history-1");
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.rows_updated, 1);
    assert_eq!(record.tables["users"].status, "completed");
    assert!(record.result_snapshot.is_some());
}
