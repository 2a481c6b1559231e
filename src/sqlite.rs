//! SQLite backend built on `rusqlite`.
//!
//! Each batch runs in its own transaction. Multi-row `INSERT` statements are
//! split so no statement binds more than [`SQLITE_MAX_PARAMS`] values, and
//! all of them share the batch's transaction. Timeouts combine the busy
//! timeout with a progress handler that interrupts the running statement once
//! the deadline passes. Catalog lookups and DDL use the timeout given to
//! [`Connector::connect`]; inserts use the one passed per batch.
//!
//! Created tables carry no NOT NULL constraints: nullability is inferred from
//! a sample, so rows past it may still hold nulls.

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use itertools::Itertools;
use log::debug;
use rusqlite::{
    Connection, ErrorCode, OpenFlags, OptionalExtension, params_from_iter,
    types::{ToSql, ToSqlOutput},
};

use crate::{
    data::{Value, format_timestamp},
    database::{CatalogColumn, Connector, Database},
    error::DatabaseError,
    schema::TargetSchema,
};

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Largest busy timeout `rusqlite` accepts.
pub const MAX_BUSY_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);
/// Bound-parameter ceiling of the bundled SQLite build.
pub const SQLITE_MAX_PARAMS: usize = 32_766;
/// Virtual machine instructions between progress-handler deadline checks.
const PROGRESS_INTERVAL_OPS: i32 = 1_000;

#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
    create_missing: bool,
}

impl SqliteConnector {
    /// Connects to `path`, creating the database file when it is absent.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteConnector {
            path: path.into(),
            create_missing: true,
        }
    }

    /// Connects only to an already existing database file.
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        SqliteConnector {
            path: path.into(),
            create_missing: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for SqliteConnector {
    type Connection = SqliteDatabase;

    fn connect(&self, timeout: Option<Duration>) -> Result<SqliteDatabase, DatabaseError> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.create_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(&self.path, flags).map_err(|err| {
            DatabaseError::Unreachable(format!("{}: {err}", self.path.display()))
        })?;
        conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
            .map_err(classify)?;
        debug!("Acquired SQLite connection to {:?}", self.path);
        Ok(SqliteDatabase { conn, timeout })
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

pub struct SqliteDatabase {
    conn: Connection,
    /// Applies to catalog lookups and DDL.
    timeout: Option<Duration>,
}

impl SqliteDatabase {
    /// Wraps an already configured connection, e.g. an in-memory database.
    pub fn from_connection(conn: Connection) -> Self {
        SqliteDatabase {
            conn,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs `op` under `timeout`: the busy handler waits at most that long
    /// and the progress handler interrupts the statement at the deadline.
    fn run_with_timeout<T>(
        &mut self,
        timeout: Option<Duration>,
        op: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, DatabaseError> {
        let Some(limit) = timeout else {
            return op(&mut self.conn).map_err(classify);
        };
        self.conn
            .busy_timeout(limit.min(MAX_BUSY_TIMEOUT))
            .map_err(classify)?;
        let deadline = Instant::now().checked_add(limit);
        self.conn.progress_handler(
            PROGRESS_INTERVAL_OPS,
            Some(move || deadline.is_some_and(|deadline| Instant::now() >= deadline)),
        );

        let outcome = op(&mut self.conn);

        self.conn.progress_handler(0, None::<fn() -> bool>);
        self.conn
            .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
            .map_err(classify)?;
        outcome.map_err(|err| {
            if is_timeout(&err) {
                DatabaseError::Timeout(limit)
            } else {
                classify(err)
            }
        })
    }
}

impl Drop for SqliteDatabase {
    fn drop(&mut self) {
        debug!("Released SQLite connection");
    }
}

impl Database for SqliteDatabase {
    fn table_columns(&mut self, table: &str) -> Result<Option<Vec<CatalogColumn>>, DatabaseError> {
        let timeout = self.timeout;
        self.run_with_timeout(timeout, |conn| catalog_columns(conn, table))
    }

    fn create_table(&mut self, schema: &TargetSchema) -> Result<(), DatabaseError> {
        let sql = create_table_sql(schema);
        debug!("Executing DDL: {sql}");
        let timeout = self.timeout;
        self.run_with_timeout(timeout, |conn| conn.execute(&sql, []).map(|_| ()))
    }

    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Option<Value>>],
        timeout: Option<Duration>,
    ) -> Result<usize, DatabaseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.run_with_timeout(timeout, |conn| insert_in_transaction(conn, table, columns, rows))
    }
}

fn catalog_columns(conn: &Connection, table: &str) -> rusqlite::Result<Option<Vec<CatalogColumn>>> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE LIMIT 1",
            [table],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    if !exists {
        return Ok(None);
    }

    let mut stmt = conn.prepare(
        r#"SELECT name, type, "notnull", dflt_value IS NOT NULL FROM pragma_table_info(?1) ORDER BY cid"#,
    )?;
    let columns = stmt
        .query_map([table], |row| {
            let not_null: i64 = row.get(2)?;
            Ok(CatalogColumn {
                name: row.get(0)?,
                declared_type: row.get(1)?,
                nullable: not_null == 0,
                has_default: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Some(columns))
}

fn insert_in_transaction(
    conn: &mut Connection,
    table: &str,
    columns: &[String],
    rows: &[Vec<Option<Value>>],
) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    let rows_per_statement = (SQLITE_MAX_PARAMS / columns.len().max(1)).max(1);
    for chunk in rows.chunks(rows_per_statement) {
        let sql = insert_sql(table, columns, chunk.len());
        let mut stmt = tx.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(chunk.iter().flatten()))?;
    }
    tx.commit()?;
    Ok(rows.len())
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn create_table_sql(schema: &TargetSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|column| {
            format!(
                "  {} {}",
                quote_identifier(&column.sanitized_name),
                column.inferred_type.sql_type()
            )
        })
        .join(",\n");
    format!(
        "CREATE TABLE {} (\n{}\n)",
        quote_identifier(&schema.table_name),
        columns
    )
}

pub fn insert_sql(table: &str, columns: &[String], row_count: usize) -> String {
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_identifier(table),
        columns.iter().map(|c| quote_identifier(c)).join(", "),
        vec![placeholders; row_count].join(", ")
    )
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Text(text) => ToSqlOutput::from(text.as_str()),
            Value::Integer(value) => ToSqlOutput::from(*value),
            Value::Float(value) => ToSqlOutput::from(*value),
            Value::Boolean(value) => ToSqlOutput::from(*value),
            Value::DateTime(value) => ToSqlOutput::from(format_timestamp(value)),
        })
    }
}

/// Interrupted by the progress handler, or the busy handler gave up.
fn is_timeout(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                ErrorCode::OperationInterrupted | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            )
    )
}

fn classify(err: rusqlite::Error) -> DatabaseError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                ErrorCode::CannotOpen
                    | ErrorCode::NotADatabase
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
            ) =>
        {
            DatabaseError::Unreachable(err.to_string())
        }
        _ => DatabaseError::Rejected(err.to_string()),
    }
}
