use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use sheetload::audit::MemoryAuditSink;
use sheetload::source::{ReadOptions, SourceTable, read_path};
use sheetload::{CancellationToken, LoadEngine, LoadOptions, SqliteConnector};
use tempfile::TempDir;

fn generate_orders(rows: usize) -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let csv_path = temp_dir.path().join("orders.csv");
    let mut file = File::create(&csv_path).expect("create csv");
    writeln!(file, "Order Id,Ordered At,Amount,Status,Express").expect("header");
    for i in 1..=rows {
        let status = match i % 3 {
            0 => "shipped",
            1 => "pending",
            _ => "processing",
        };
        let day = (i % 28) + 1;
        let express = if i % 5 == 0 { "yes" } else { "no" };
        writeln!(
            file,
            "{i},2024-01-{day:02} 10:30:00,{}.{:02},{status},{express}",
            i % 500,
            i % 100
        )
        .expect("row");
    }
    (temp_dir, csv_path)
}

fn load_once(db_path: &Path, source: &SourceTable, batch_size: usize) {
    let options = LoadOptions {
        batch_size,
        ..LoadOptions::default()
    };
    let engine = LoadEngine::new(
        SqliteConnector::new(db_path),
        options,
        Arc::new(MemoryAuditSink::new()),
    );
    let result = engine
        .load("orders", source, &CancellationToken::new())
        .expect("load orders");
    assert!(result.is_complete());
}

fn bench_load_throughput(c: &mut Criterion) {
    let (temp_dir, csv_path) = generate_orders(20_000);
    let source = read_path(&csv_path, &ReadOptions::default()).expect("read orders");

    let mut group = c.benchmark_group("sqlite_load");
    group.sample_size(10);
    for batch_size in [100usize, 1_000, 5_000] {
        group.bench_function(format!("batch_{batch_size}"), |b| {
            b.iter_batched(
                || {
                    let db_path = temp_dir.path().join(format!("orders_{batch_size}.db"));
                    let _ = std::fs::remove_file(&db_path);
                    db_path
                },
                |db_path| load_once(&db_path, &source, batch_size),
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();

    c.bench_function("infer_schema_20k", |b| {
        let engine = LoadEngine::new(
            SqliteConnector::new(temp_dir.path().join("unused.db")),
            LoadOptions::default(),
            Arc::new(MemoryAuditSink::new()),
        );
        b.iter(|| engine.prepare(&source));
    });
}

criterion_group!(benches, bench_load_throughput);
criterion_main!(benches);
