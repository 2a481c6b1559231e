#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use sheetload::data::Value;
use sheetload::database::{CatalogColumn, Connector, Database};
use sheetload::error::DatabaseError;
use sheetload::schema::TargetSchema;
use sheetload::source::{Cell, SourceTable};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}

/// `rows` rows of `ID,NAME,AMOUNT` with ids starting at 1.
pub fn numbered_source(rows: usize) -> SourceTable {
    let headers = vec!["id".to_string(), "name".to_string(), "amount".to_string()];
    let data = (1..=rows)
        .map(|id| {
            vec![
                Cell::text(id.to_string()),
                Cell::text(format!("customer {id}")),
                Cell::text(format!("{}.5", id % 97)),
            ]
        })
        .collect();
    SourceTable::from_rows(headers, data).expect("rectangular source")
}

pub fn text_source(headers: &[&str], rows: &[&[&str]]) -> SourceTable {
    SourceTable::from_rows(
        headers.iter().map(|h| h.to_string()).collect(),
        rows.iter()
            .map(|row| row.iter().map(|cell| Cell::from(*cell)).collect())
            .collect(),
    )
    .expect("rectangular source")
}

pub fn sqlite_count(path: &Path, table: &str) -> i64 {
    let conn = Connection::open(path).expect("open sqlite");
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))
        .expect("count rows")
}

pub fn sqlite_table_exists(path: &Path, table: &str) -> bool {
    let conn = Connection::open(path).expect("open sqlite");
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .expect("query catalog")
        > 0
}

#[derive(Debug, Default)]
pub struct ScriptState {
    pub tables: HashMap<String, Vec<CatalogColumn>>,
    pub rows: HashMap<String, Vec<Vec<Option<Value>>>>,
    /// Row count of every insert call, in call order.
    pub insert_calls: Vec<usize>,
    pub connections: usize,
    pub released: usize,
}

/// In-memory database double whose insert calls can be scripted to fail.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
    failing_calls: BTreeSet<usize>,
    timeout_calls: BTreeSet<usize>,
    unreachable: bool,
    catalog_unreachable: bool,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an existing table. Columns are `(name, declared type, nullable)`.
    pub fn with_table(self, name: &str, columns: &[(&str, &str, bool)]) -> Self {
        let catalog = columns
            .iter()
            .map(|(column, declared, nullable)| CatalogColumn {
                name: column.to_string(),
                declared_type: declared.to_string(),
                nullable: *nullable,
                has_default: false,
            })
            .collect();
        self.lock().tables.insert(name.to_string(), catalog);
        self
    }

    /// Insert calls (1-based) that fail with a constraint violation.
    pub fn failing_calls(mut self, calls: &[usize]) -> Self {
        self.failing_calls.extend(calls);
        self
    }

    /// Insert calls (1-based) that exceed their timeout.
    pub fn timeout_calls(mut self, calls: &[usize]) -> Self {
        self.timeout_calls.extend(calls);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn catalog_unreachable(mut self) -> Self {
        self.catalog_unreachable = true;
        self
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().expect("script state")
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .rows
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, rows)| rows.len())
            .sum()
    }

    pub fn rows(&self, table: &str) -> Vec<Vec<Option<Value>>> {
        self.lock().rows.get(table).cloned().unwrap_or_default()
    }

    pub fn insert_calls(&self) -> Vec<usize> {
        self.lock().insert_calls.clone()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock()
            .tables
            .keys()
            .any(|name| name.eq_ignore_ascii_case(table))
    }

    pub fn table_columns(&self, table: &str) -> Vec<CatalogColumn> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Connections handed out minus connections dropped.
    pub fn open_connections(&self) -> usize {
        let state = self.lock();
        state.connections - state.released
    }

    pub fn database(&self) -> ScriptedDatabase {
        self.lock().connections += 1;
        ScriptedDatabase {
            script: self.clone(),
        }
    }
}

impl Connector for ScriptedConnector {
    type Connection = ScriptedDatabase;

    fn connect(&self, _timeout: Option<Duration>) -> Result<ScriptedDatabase, DatabaseError> {
        if self.unreachable {
            return Err(DatabaseError::Unreachable("scripted outage".into()));
        }
        Ok(self.database())
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

pub struct ScriptedDatabase {
    script: ScriptedConnector,
}

impl Drop for ScriptedDatabase {
    fn drop(&mut self) {
        self.script.lock().released += 1;
    }
}

impl Database for ScriptedDatabase {
    fn table_columns(&mut self, table: &str) -> Result<Option<Vec<CatalogColumn>>, DatabaseError> {
        if self.script.catalog_unreachable {
            return Err(DatabaseError::Unreachable("catalog offline".into()));
        }
        Ok(self
            .script
            .lock()
            .tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, columns)| columns.clone()))
    }

    fn create_table(&mut self, schema: &TargetSchema) -> Result<(), DatabaseError> {
        let columns = schema
            .columns
            .iter()
            .map(|column| CatalogColumn {
                name: column.sanitized_name.clone(),
                declared_type: column.inferred_type.sql_type().to_string(),
                nullable: true,
                has_default: false,
            })
            .collect();
        self.script
            .lock()
            .tables
            .insert(schema.table_name.clone(), columns);
        Ok(())
    }

    fn insert_rows(
        &mut self,
        table: &str,
        _columns: &[String],
        rows: &[Vec<Option<Value>>],
        timeout: Option<Duration>,
    ) -> Result<usize, DatabaseError> {
        let mut state = self.script.lock();
        state.insert_calls.push(rows.len());
        let call = state.insert_calls.len();
        if self.script.timeout_calls.contains(&call) {
            return Err(DatabaseError::Timeout(
                timeout.unwrap_or(Duration::from_secs(1)),
            ));
        }
        if self.script.failing_calls.contains(&call) {
            return Err(DatabaseError::Rejected(
                "UNIQUE constraint failed: scripted".into(),
            ));
        }
        state
            .rows
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len())
    }
}
