mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{ScriptedConnector, TestWorkspace, numbered_source, sqlite_count, sqlite_table_exists, text_source};
use rusqlite::Connection;
use sheetload::audit::{AuditEvent, MemoryAuditSink};
use sheetload::error::DatabaseError;
use sheetload::inference::SampleSize;
use sheetload::reconcile::TableAction;
use sheetload::source::{Cell, SourceTable};
use sheetload::{
    CancellationToken, FailurePolicy, LoadEngine, LoadError, LoadOptions, SqliteConnector,
};

fn options(batch_size: usize) -> LoadOptions {
    LoadOptions {
        batch_size,
        ..LoadOptions::default()
    }
}

/// 10 000 rows where row 3 501 repeats the id of row 1.
fn source_with_duplicate_in_fourth_batch() -> SourceTable {
    let rows = (1..=10_000usize)
        .map(|n| {
            let id = if n == 3_501 { 1 } else { n };
            vec![Cell::text(id.to_string()), Cell::text(format!("item {n}"))]
        })
        .collect();
    SourceTable::from_rows(vec!["id".into(), "label".into()], rows).unwrap()
}

fn existing_keyed_table(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch("CREATE TABLE ITEMS (ID INTEGER PRIMARY KEY, LABEL TEXT)")
        .unwrap();
}

#[test]
fn sqlite_load_creates_table_and_inserts_every_row() {
    let workspace = TestWorkspace::new();
    let db_path = workspace.join("load.db");
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = LoadEngine::new(SqliteConnector::new(&db_path), options(400), audit.clone());

    let result = engine
        .load("monthly ledger", &numbered_source(1_234), &CancellationToken::new())
        .unwrap();
    assert!(result.is_complete());
    assert_eq!(result.batches_executed, 4);
    assert_eq!(sqlite_count(&db_path, "MONTHLY_LEDGER"), 1_234);

    let conn = Connection::open(&db_path).unwrap();
    let (amount, name): (f64, String) = conn
        .query_row("SELECT AMOUNT, NAME FROM MONTHLY_LEDGER WHERE ID = 98", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(amount, 1.5);
    assert_eq!(name, "customer 98");

    let kinds: Vec<&str> = audit
        .events()
        .iter()
        .map(|event| match event {
            AuditEvent::Sanitized { .. } => "sanitized",
            AuditEvent::Inferred { .. } => "inferred",
            AuditEvent::Reconciled { .. } => "reconciled",
            AuditEvent::Rejected { .. } => "rejected",
            AuditEvent::Batch { .. } => "batch",
            AuditEvent::Completed { .. } => "completed",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["sanitized", "inferred", "reconciled", "batch", "batch", "batch", "batch", "completed"]
    );
}

#[test]
fn running_the_same_load_twice_inserts_rows_twice() {
    let workspace = TestWorkspace::new();
    let db_path = workspace.join("rerun.db");
    let engine = LoadEngine::new(
        SqliteConnector::new(&db_path),
        options(100),
        Arc::new(MemoryAuditSink::new()),
    );
    let source = numbered_source(250);

    let first = engine.load("ledger", &source, &CancellationToken::new()).unwrap();
    let second = engine.load("ledger", &source, &CancellationToken::new()).unwrap();
    assert_eq!(first.rows_succeeded, 250);
    assert_eq!(second.rows_succeeded, 250);
    assert_eq!(sqlite_count(&db_path, "LEDGER"), 500);
}

#[test]
fn sqlite_fail_fast_keeps_committed_batches_only() {
    let workspace = TestWorkspace::new();
    let db_path = workspace.join("failfast.db");
    existing_keyed_table(&db_path);
    let engine = LoadEngine::new(
        SqliteConnector::new(&db_path),
        options(1_000),
        Arc::new(MemoryAuditSink::new()),
    );

    let result = engine
        .load("items", &source_with_duplicate_in_fourth_batch(), &CancellationToken::new())
        .unwrap();
    assert_eq!(result.failed_batch_indices(), vec![4]);
    assert_eq!(result.batches_executed, 4);
    assert_eq!(result.rows_succeeded, 3_000);
    assert_eq!(sqlite_count(&db_path, "ITEMS"), 3_000);
}

#[test]
fn sqlite_best_effort_skips_only_the_failed_batch() {
    let workspace = TestWorkspace::new();
    let db_path = workspace.join("besteffort.db");
    existing_keyed_table(&db_path);
    let mut opts = options(1_000);
    opts.on_batch_failure = FailurePolicy::BestEffort;
    let engine = LoadEngine::new(
        SqliteConnector::new(&db_path),
        opts,
        Arc::new(MemoryAuditSink::new()),
    );

    let result = engine
        .load("ITEMS", &source_with_duplicate_in_fourth_batch(), &CancellationToken::new())
        .unwrap();
    assert_eq!(result.failed_batch_indices(), vec![4]);
    assert_eq!(result.batches_executed, 10);
    assert_eq!(result.rows_succeeded, 9_000);
    assert_eq!(sqlite_count(&db_path, "ITEMS"), 9_000);
}

#[test]
fn missing_table_without_auto_create_loads_nothing() {
    let workspace = TestWorkspace::new();
    let db_path = workspace.join("strict.db");
    let audit = Arc::new(MemoryAuditSink::new());
    let mut opts = options(100);
    opts.auto_create_table = false;
    let engine = LoadEngine::new(SqliteConnector::new(&db_path), opts, audit.clone());

    let err = engine
        .load("orders", &numbered_source(10), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, LoadError::TableMissing { .. }));
    assert!(!sqlite_table_exists(&db_path, "ORDERS"));
    assert!(matches!(audit.events().last(), Some(AuditEvent::Rejected { .. })));
}

#[test]
fn schema_mismatch_names_the_column_and_loads_nothing() {
    let workspace = TestWorkspace::new();
    let db_path = workspace.join("mismatch.db");
    let conn = Connection::open(&db_path).unwrap();
    conn.execute_batch("CREATE TABLE LEDGER (ID INTEGER, NAME TEXT)").unwrap();
    drop(conn);

    let engine = LoadEngine::new(
        SqliteConnector::new(&db_path),
        options(100),
        Arc::new(MemoryAuditSink::new()),
    );
    let err = engine
        .load("ledger", &numbered_source(10), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.mismatched_columns(), vec!["AMOUNT"]);
    assert!(err.to_string().contains("AMOUNT"));
    assert_eq!(sqlite_count(&db_path, "LEDGER"), 0);
}

#[test]
fn unreachable_database_is_a_connectivity_failure() {
    let workspace = TestWorkspace::new();
    let missing = workspace.join("nowhere").join("absent.db");
    let engine = LoadEngine::new(
        SqliteConnector::existing(&missing),
        options(100),
        Arc::new(MemoryAuditSink::new()),
    );
    let err = engine
        .load("ledger", &numbered_source(3), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, LoadError::ConnectivityFailure(_)));

    let scripted = LoadEngine::new(
        ScriptedConnector::new().unreachable(),
        options(100),
        Arc::new(MemoryAuditSink::new()),
    );
    let err = scripted
        .load("ledger", &numbered_source(3), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, LoadError::ConnectivityFailure(_)));
}

#[test]
fn invalid_table_names_are_rejected_before_connecting() {
    let engine = LoadEngine::new(
        ScriptedConnector::new(),
        options(100),
        Arc::new(MemoryAuditSink::new()),
    );
    let err = engine
        .load("$$$", &numbered_source(3), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, LoadError::InvalidTableName(_)));
    assert_eq!(engine.connector().open_connections(), 0);
    assert!(engine.connector().insert_calls().is_empty());
}

#[test]
fn concurrent_loads_use_independent_connections() {
    let engine = LoadEngine::new(
        ScriptedConnector::new(),
        options(50),
        Arc::new(MemoryAuditSink::new()),
    );
    let source = numbered_source(500);

    thread::scope(|scope| {
        for worker in 0..4 {
            let engine = &engine;
            let source = &source;
            scope.spawn(move || {
                let table = format!("part_{worker}");
                let result = engine.load(&table, source, &CancellationToken::new()).unwrap();
                assert_eq!(result.rows_succeeded, 500);
            });
        }
    });

    for worker in 0..4 {
        assert_eq!(engine.connector().row_count(&format!("PART_{worker}")), 500);
    }
    assert_eq!(engine.connector().open_connections(), 0);
}

#[test]
fn connections_are_released_on_every_exit_path() {
    let script = ScriptedConnector::new().with_table("LOCKED", &[("OTHER", "TEXT", true)]);
    let engine = LoadEngine::new(script, options(10), Arc::new(MemoryAuditSink::new()));
    assert!(engine.load("locked", &numbered_source(5), &CancellationToken::new()).is_err());
    assert!(engine.load("fresh", &numbered_source(5), &CancellationToken::new()).is_ok());
    assert_eq!(engine.connector().open_connections(), 0);
}

#[test]
fn reconciled_event_reports_existing_tables() {
    let script = ScriptedConnector::new().with_table(
        "CONTACTS",
        &[("EMAIL", "TEXT", false), ("AGE", "INTEGER", true)],
    );
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = LoadEngine::new(script, options(10), audit.clone());
    let source = text_source(&["Email", "Age"], &[&["a@example.com", "41"], &["b@example.com", ""]]);

    let result = engine.load("contacts", &source, &CancellationToken::new()).unwrap();
    assert_eq!(result.rows_succeeded, 2);
    assert!(audit.events().iter().any(|event| matches!(
        event,
        AuditEvent::Reconciled { action: TableAction::Existing, columns: 2, .. }
    )));
}

#[test]
fn nulls_past_the_inference_sample_still_load() {
    let workspace = TestWorkspace::new();
    let db_path = workspace.join("sampled.db");
    let mut opts = options(2);
    opts.sample_size_for_inference = SampleSize::Rows(2);
    opts.on_batch_failure = FailurePolicy::BestEffort;
    let engine = LoadEngine::new(SqliteConnector::new(&db_path), opts, Arc::new(MemoryAuditSink::new()));
    let source = text_source(&["qty"], &[&["1"], &["2"], &[""], &["4"]]);

    let result = engine.load("t", &source, &CancellationToken::new()).unwrap();
    assert!(result.is_complete(), "{:?}", result.batch_failures);
    assert_eq!(result.rows_succeeded, 4);

    let conn = Connection::open(&db_path).unwrap();
    let nulls: i64 = conn
        .query_row("SELECT COUNT(*) FROM T WHERE QTY IS NULL", [], |row| row.get(0))
        .unwrap();
    assert_eq!(nulls, 1);
}

#[test]
fn catalog_lookup_honours_the_configured_timeout() {
    let workspace = TestWorkspace::new();
    let db_path = workspace.join("locked.db");
    let locker = Connection::open(&db_path).unwrap();
    locker
        .execute_batch("CREATE TABLE LEDGER (ID INTEGER, NAME TEXT, AMOUNT REAL); BEGIN EXCLUSIVE;")
        .unwrap();

    let mut opts = options(100);
    opts.timeout_per_batch = Some(Duration::from_millis(200));
    let engine = LoadEngine::new(SqliteConnector::new(&db_path), opts, Arc::new(MemoryAuditSink::new()));
    let started = Instant::now();
    let err = engine
        .load("ledger", &numbered_source(3), &CancellationToken::new())
        .unwrap_err();
    assert!(
        matches!(err, LoadError::ConnectivityFailure(DatabaseError::Timeout(limit)) if limit == Duration::from_millis(200)),
        "{err}"
    );
    assert!(started.elapsed() < Duration::from_secs(4));

    locker.execute_batch("ROLLBACK").unwrap();
    assert_eq!(sqlite_count(&db_path, "LEDGER"), 0);
}

#[test]
fn slow_batches_are_interrupted_and_rolled_back() {
    let workspace = TestWorkspace::new();
    let db_path = workspace.join("slow.db");
    Connection::open(&db_path)
        .unwrap()
        .execute_batch(
            "CREATE TABLE N (X INTEGER);
             WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000)
             INSERT INTO N SELECT x FROM c;
             CREATE TABLE ITEMS (ID INTEGER, LABEL TEXT);
             CREATE TRIGGER ITEMS_SLOW AFTER INSERT ON ITEMS
             BEGIN SELECT COUNT(*) FROM N a, N b, N c; END;",
        )
        .unwrap();

    let mut opts = options(10);
    opts.timeout_per_batch = Some(Duration::from_millis(100));
    let engine = LoadEngine::new(SqliteConnector::new(&db_path), opts, Arc::new(MemoryAuditSink::new()));
    let source = text_source(&["id", "label"], &[&["1", "a"], &["2", "b"]]);

    let result = engine.load("items", &source, &CancellationToken::new()).unwrap();
    assert_eq!(result.failed_batch_indices(), vec![1]);
    assert!(result.batch_failures[0].timed_out);
    assert!(result.batch_failures[0].error.starts_with("timeout"));
    assert_eq!(result.rows_succeeded, 0);
    assert_eq!(sqlite_count(&db_path, "ITEMS"), 0);
}

#[test]
fn result_carries_the_sanitized_table_name() {
    let engine = LoadEngine::new(
        ScriptedConnector::new(),
        options(10),
        Arc::new(MemoryAuditSink::new()),
    );
    let result = engine
        .load(" monthly ledger ", &numbered_source(3), &CancellationToken::new())
        .unwrap();
    assert_eq!(result.table, "MONTHLY_LEDGER");
}
