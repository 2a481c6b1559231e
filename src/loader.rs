//! Batched inserts with per-batch outcome tracking.
//!
//! Rows are cut into contiguous batches in source order. Every batch is
//! converted to the plan's column types and handed to the database as one
//! atomic unit; a failure is recorded against its 1-based batch index and,
//! depending on [`FailurePolicy`], either ends the load or is skipped over.

use std::{
    fmt,
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    audit::{AuditEvent, AuditSink, BatchOutcome},
    data::{Value, parse_boolean, parse_strict_float, parse_strict_integer, parse_timestamp},
    database::Database,
    error::DatabaseError,
    inference::NullMarkers,
    reconcile::LoadPlan,
    schema::ColumnType,
    source::{Cell, SourceTable},
};

pub const DEFAULT_BATCH_SIZE: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failed batch.
    #[default]
    FailFast,
    /// Record failed batches and keep going.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// 1-based position of the batch in the load.
    pub batch_index: usize,
    /// 1-based data row the batch starts at.
    pub first_row: usize,
    pub rows: usize,
    pub timed_out: bool,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    FailFast { batch_index: usize },
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::FailFast { batch_index } => write!(f, "batch {batch_index} failed"),
            StopReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadResult {
    /// Sanitized name of the table the rows went into.
    pub table: String,
    pub total_rows: usize,
    pub rows_attempted: usize,
    pub rows_succeeded: usize,
    pub batches_executed: usize,
    pub batch_failures: Vec<BatchFailure>,
    pub stopped: Option<StopReason>,
    pub elapsed: Duration,
}

impl LoadResult {
    /// Every source row was committed.
    pub fn is_complete(&self) -> bool {
        self.batch_failures.is_empty() && self.stopped.is_none() && self.rows_succeeded == self.total_rows
    }

    pub fn failed_batch_indices(&self) -> Vec<usize> {
        self.batch_failures.iter().map(|f| f.batch_index).collect()
    }
}

/// Cooperative cancellation flag shared between a load and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub batch_size: usize,
    pub on_failure: FailurePolicy,
    pub timeout: Option<Duration>,
    pub null_markers: NullMarkers,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        LoaderSettings {
            batch_size: DEFAULT_BATCH_SIZE,
            on_failure: FailurePolicy::default(),
            timeout: None,
            null_markers: NullMarkers::default(),
        }
    }
}

/// Contiguous row ranges of at most `batch_size` rows covering `0..total`.
pub fn batch_ranges(total: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    let size = batch_size.max(1);
    (0..total)
        .step_by(size)
        .map(move |start| start..(start + size).min(total))
}

/// Converts one raw cell to a value of `column_type`. Null markers become
/// `None`.
pub fn convert_cell(
    cell: &Cell,
    column_type: ColumnType,
    markers: &NullMarkers,
) -> Result<Option<Value>, String> {
    if markers.is_null(cell) {
        return Ok(None);
    }
    let converted = match (column_type, cell) {
        (ColumnType::Text, Cell::Text(text)) => Some(Value::Text(text.clone())),
        (ColumnType::Text, other) => Some(Value::Text(other.to_string())),

        (ColumnType::Integer, Cell::Integer(value)) => Some(Value::Integer(*value)),
        (ColumnType::Integer, Cell::Float(value)) if value.fract() == 0.0 => {
            i64::try_from(*value as i128).ok().map(Value::Integer)
        }
        (ColumnType::Integer, Cell::Boolean(value)) => Some(Value::Integer(i64::from(*value))),
        (ColumnType::Integer, Cell::Text(text)) => parse_strict_integer(text).map(Value::Integer),

        (ColumnType::Float, Cell::Integer(value)) => Some(Value::Float(*value as f64)),
        (ColumnType::Float, Cell::Float(value)) if value.is_finite() => Some(Value::Float(*value)),
        (ColumnType::Float, Cell::Boolean(value)) => Some(Value::Float(f64::from(u8::from(*value)))),
        (ColumnType::Float, Cell::Text(text)) => parse_strict_float(text)
            .or_else(|| parse_strict_integer(text).map(|v| v as f64))
            .map(Value::Float),

        (ColumnType::DateTime, Cell::DateTime(value)) => Some(Value::DateTime(*value)),
        (ColumnType::DateTime, Cell::Text(text)) => parse_timestamp(text).ok().map(Value::DateTime),

        (ColumnType::Boolean, Cell::Boolean(value)) => Some(Value::Boolean(*value)),
        (ColumnType::Boolean, Cell::Integer(value @ (0 | 1))) => Some(Value::Boolean(*value == 1)),
        (ColumnType::Boolean, Cell::Text(text)) => parse_boolean(text).map(Value::Boolean),

        _ => None,
    };
    converted
        .map(Some)
        .ok_or_else(|| format!("cannot convert '{cell}' to {column_type}"))
}

fn batch_values(
    source: &SourceTable,
    plan: &LoadPlan,
    rows: Range<usize>,
    markers: &NullMarkers,
) -> Result<Vec<Vec<Option<Value>>>, String> {
    let columns = source.columns();
    rows.map(|row| {
        plan.bindings
            .iter()
            .map(|binding| {
                let cell = columns
                    .get(binding.source_index)
                    .and_then(|column| column.cells.get(row))
                    .unwrap_or(&Cell::Null);
                convert_cell(cell, binding.column_type, markers)
                    .map_err(|err| format!("row {}, column {}: {err}", row + 1, binding.target_name))
            })
            .collect::<Result<Vec<_>, String>>()
    })
    .collect()
}

/// Inserts `source` into the plan's table batch by batch.
pub fn load_batches<D: Database + ?Sized>(
    db: &mut D,
    source: &SourceTable,
    plan: &LoadPlan,
    settings: &LoaderSettings,
    cancel: &CancellationToken,
    audit: &dyn AuditSink,
) -> LoadResult {
    let started = Instant::now();
    let table = plan.table_name().to_string();
    let columns = plan.column_names();
    let mut result = LoadResult {
        table: table.clone(),
        total_rows: source.row_count(),
        ..LoadResult::default()
    };

    for (offset, range) in batch_ranges(source.row_count(), settings.batch_size).enumerate() {
        let batch_index = offset + 1;
        if cancel.is_cancelled() {
            info!("Load into {table} cancelled before batch {batch_index}");
            result.stopped = Some(StopReason::Cancelled);
            break;
        }

        let batch_started = Instant::now();
        let first_row = range.start + 1;
        let rows = range.len();
        result.rows_attempted += rows;
        result.batches_executed += 1;

        let outcome = batch_values(source, plan, range, &settings.null_markers).and_then(|values| {
            db.insert_rows(&table, &columns, &values, settings.timeout)
                .map_err(|err| match err {
                    DatabaseError::Timeout(_) => format!("timeout: {err}"),
                    other => other.to_string(),
                })
        });
        let elapsed_ms = batch_started.elapsed().as_millis() as u64;

        match outcome {
            Ok(written) => {
                result.rows_succeeded += written;
                debug!("Batch {batch_index} committed {written} row(s) into {table}");
                audit.record(&AuditEvent::Batch {
                    table: table.clone(),
                    batch_index,
                    first_row,
                    rows,
                    outcome: BatchOutcome::Committed,
                    elapsed_ms,
                });
            }
            Err(error) => {
                warn!("Batch {batch_index} ({rows} row(s) from row {first_row}) failed: {error}");
                audit.record(&AuditEvent::Batch {
                    table: table.clone(),
                    batch_index,
                    first_row,
                    rows,
                    outcome: BatchOutcome::Failed {
                        error: error.clone(),
                    },
                    elapsed_ms,
                });
                result.batch_failures.push(BatchFailure {
                    batch_index,
                    first_row,
                    rows,
                    timed_out: error.starts_with("timeout: "),
                    error,
                });
                if settings.on_failure == FailurePolicy::FailFast {
                    result.stopped = Some(StopReason::FailFast { batch_index });
                    break;
                }
            }
        }
    }

    result.elapsed = started.elapsed();
    audit.record(&AuditEvent::Completed {
        table,
        total_rows: result.total_rows,
        rows_attempted: result.rows_attempted,
        rows_succeeded: result.rows_succeeded,
        failed_batches: result.batch_failures.len(),
        stopped: result.stopped,
        elapsed_ms: result.elapsed.as_millis() as u64,
    });
    result
}
