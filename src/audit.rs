//! Audit trail of a load.
//!
//! The engine reports every stage to an injected [`AuditSink`]. Sinks must be
//! shareable across threads because one engine may serve concurrent loads.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{loader::StopReason, reconcile::TableAction, schema::ColumnSpec};

pub const DEFAULT_ROTATE_BYTES: u64 = 2_000_000;
pub const DEFAULT_ROTATE_BACKUPS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedColumn {
    pub original: String,
    pub sanitized: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Committed,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Headers that changed during sanitization.
    Sanitized {
        table: String,
        columns: usize,
        renamed: Vec<RenamedColumn>,
    },
    Inferred {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    Reconciled {
        table: String,
        action: TableAction,
        columns: usize,
    },
    Rejected {
        table: String,
        reason: String,
    },
    Batch {
        table: String,
        batch_index: usize,
        first_row: usize,
        rows: usize,
        outcome: BatchOutcome,
        elapsed_ms: u64,
    },
    Completed {
        table: String,
        total_rows: usize,
        rows_attempted: usize,
        rows_succeeded: usize,
        failed_batches: usize,
        stopped: Option<StopReason>,
        elapsed_ms: u64,
    },
}

impl AuditEvent {
    pub fn table(&self) -> &str {
        match self {
            AuditEvent::Sanitized { table, .. }
            | AuditEvent::Inferred { table, .. }
            | AuditEvent::Reconciled { table, .. }
            | AuditEvent::Rejected { table, .. }
            | AuditEvent::Batch { table, .. }
            | AuditEvent::Completed { table, .. } => table,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: &AuditEvent) {
        match event {
            AuditEvent::Sanitized {
                table,
                columns,
                renamed,
            } => {
                info!("[{table}] sanitized {columns} header(s), {} renamed", renamed.len());
                for column in renamed {
                    info!("[{table}]   '{}' -> {}", column.original, column.sanitized);
                }
            }
            AuditEvent::Inferred { table, columns } => {
                for column in columns {
                    info!(
                        "[{table}] {} inferred as {}{}",
                        column.sanitized_name,
                        column.inferred_type,
                        if column.nullable { " (nullable)" } else { "" }
                    );
                }
            }
            AuditEvent::Reconciled {
                table,
                action,
                columns,
            } => match action {
                TableAction::Created => info!("[{table}] created with {columns} column(s)"),
                TableAction::Existing => {
                    info!("[{table}] existing table accepts {columns} column(s)")
                }
            },
            AuditEvent::Rejected { table, reason } => warn!("[{table}] load rejected: {reason}"),
            AuditEvent::Batch {
                table,
                batch_index,
                rows,
                outcome,
                elapsed_ms,
                ..
            } => match outcome {
                BatchOutcome::Committed => {
                    info!("[{table}] batch {batch_index}: {rows} row(s) committed in {elapsed_ms}ms")
                }
                BatchOutcome::Failed { error } => {
                    warn!("[{table}] batch {batch_index}: {rows} row(s) failed: {error}")
                }
            },
            AuditEvent::Completed {
                table,
                total_rows,
                rows_succeeded,
                failed_batches,
                stopped,
                elapsed_ms,
                ..
            } => {
                let suffix = match stopped {
                    Some(reason) => format!(", stopped: {reason}"),
                    None => String::new(),
                };
                info!(
                    "[{table}] loaded {rows_succeeded} of {total_rows} row(s), {failed_batches} failed batch(es) in {elapsed_ms}ms{suffix}"
                );
            }
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event.clone());
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    at: String,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Appends one JSON object per event to a file, rotating it to
/// `<file>.1`, `<file>.2`, ... once it would grow past `max_bytes`.
#[derive(Debug)]
pub struct JsonLinesAuditSink {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: Mutex<File>,
}

impl JsonLinesAuditSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_rotation(path, DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_BACKUPS)
    }

    pub fn with_rotation(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating audit directory {parent:?}"))?;
        }
        let file = open_append(&path)?;
        Ok(JsonLinesAuditSink {
            path,
            max_bytes,
            backups,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(&JsonLine {
            at: Utc::now().to_rfc3339(),
            event,
        })
        .context("Serializing audit event")?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Audit file lock poisoned"))?;
        let current = file
            .metadata()
            .with_context(|| format!("Reading size of {:?}", self.path))?
            .len();
        if self.max_bytes > 0 && current > 0 && current + line.len() as u64 > self.max_bytes {
            self.rotate()?;
            *file = open_append(&self.path)?;
        }
        file.write_all(line.as_bytes())
            .with_context(|| format!("Writing audit event to {:?}", self.path))?;
        file.flush()
            .with_context(|| format!("Flushing {:?}", self.path))
    }

    fn rotate(&self) -> Result<()> {
        if self.backups == 0 {
            return fs::remove_file(&self.path)
                .with_context(|| format!("Truncating {:?}", self.path));
        }
        for index in (1..self.backups).rev() {
            let from = backup_path(&self.path, index);
            if from.exists() {
                fs::rename(&from, backup_path(&self.path, index + 1))
                    .with_context(|| format!("Rotating {from:?}"))?;
            }
        }
        fs::rename(&self.path, backup_path(&self.path, 1))
            .with_context(|| format!("Rotating {:?}", self.path))
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Err(err) = self.append(event) {
            warn!("Dropping audit event: {err:#}");
        }
    }
}

pub fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Opening audit log {path:?}"))
}

/// Sends every event to each inner sink in order.
#[derive(Default)]
pub struct TeeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl TeeAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        TeeAuditSink { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn AuditSink>) {
        self.sinks.push(sink);
    }
}

impl AuditSink for TeeAuditSink {
    fn record(&self, event: &AuditEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
