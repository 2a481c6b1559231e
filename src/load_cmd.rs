use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::info;

use crate::{
    audit::{AuditSink, JsonLinesAuditSink, LogAuditSink, TeeAuditSink},
    cli::{InputArgs, LoadArgs},
    config::LoadOptions,
    engine::LoadEngine,
    io_utils,
    loader::{CancellationToken, FailurePolicy},
    printable_delimiter,
    source::{self, ReadOptions, SourceTable},
    sqlite::SqliteConnector,
    table,
};

pub fn execute(args: &LoadArgs) -> Result<()> {
    let options = resolve_options(args)?;
    let source = read_input(&args.input)?;

    let audit: Arc<dyn AuditSink> = match &args.audit_log {
        Some(path) => {
            let file = JsonLinesAuditSink::open(path)
                .with_context(|| format!("Opening audit log {path:?}"))?;
            Arc::new(TeeAuditSink::new(vec![Arc::new(LogAuditSink), Arc::new(file)]))
        }
        None => Arc::new(LogAuditSink),
    };
    let engine = LoadEngine::new(SqliteConnector::new(&args.db), options, audit);
    let result = engine.load(&args.table, &source, &CancellationToken::new())?;

    print!("{}", table::render_load_result(&result));

    if !result.batch_failures.is_empty() {
        bail!(
            "{} batch(es) failed; {} of {} row(s) loaded into {}",
            result.batch_failures.len(),
            result.rows_succeeded,
            result.total_rows,
            result.table
        );
    }
    Ok(())
}

fn resolve_options(args: &LoadArgs) -> Result<LoadOptions> {
    let mut options = match &args.config {
        Some(path) => LoadOptions::load(path)?,
        None => LoadOptions::default(),
    };
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    if args.no_create {
        options.auto_create_table = false;
    }
    if args.best_effort {
        options.on_batch_failure = FailurePolicy::BestEffort;
    }
    if let Some(max_len) = args.max_identifier_length {
        options.max_identifier_length = max_len;
    }
    if let Some(sample) = args.sample_rows {
        options.sample_size_for_inference = sample;
    }
    if let Some(timeout) = args.timeout {
        options.timeout_per_batch = Some(timeout);
    }
    options.validate()?;
    Ok(options)
}

pub(crate) fn read_input(args: &InputArgs) -> Result<SourceTable> {
    if io_utils::is_workbook_path(&args.input) {
        info!(
            "Reading workbook '{}' (sheet: {})",
            args.input.display(),
            args.sheet.as_deref().unwrap_or("first")
        );
    } else {
        let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
        info!(
            "Reading '{}' with delimiter '{}'",
            args.input.display(),
            printable_delimiter(delimiter)
        );
    }
    let read = ReadOptions {
        delimiter: args.delimiter,
        encoding: args.input_encoding.clone(),
        sheet: args.sheet.clone(),
    };
    let table = source::read_path(&args.input, &read)
        .with_context(|| format!("Reading input {:?}", args.input))?;
    info!(
        "Read {} row(s) across {} column(s)",
        table.row_count(),
        table.column_count()
    );
    Ok(table)
}
