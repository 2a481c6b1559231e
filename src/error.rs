use std::{fmt, time::Duration};

use itertools::Itertools;
use thiserror::Error;

use crate::schema::ColumnType;

/// Failures reported by a [`crate::database::Database`] implementation.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database unreachable: {0}")]
    Unreachable(String),
    #[error("statement exceeded the {}ms timeout", .0.as_millis())]
    Timeout(Duration),
    #[error("{0}")]
    Rejected(String),
}

impl DatabaseError {
    /// Connectivity faults and timeouts are fatal during reconciliation;
    /// plain rejections are not connectivity problems.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, DatabaseError::Unreachable(_) | DatabaseError::Timeout(_))
    }
}

/// One reason an existing table cannot receive the source columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnMismatch {
    /// The source column has no counterpart in the table.
    Missing { column: String },
    /// The counterpart exists with an incompatible type family.
    Incompatible {
        column: String,
        source: ColumnType,
        target: String,
    },
    /// A NOT NULL table column that the source does not provide.
    Unfilled { column: String },
}

impl ColumnMismatch {
    pub fn column(&self) -> &str {
        match self {
            ColumnMismatch::Missing { column }
            | ColumnMismatch::Incompatible { column, .. }
            | ColumnMismatch::Unfilled { column } => column,
        }
    }
}

impl fmt::Display for ColumnMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnMismatch::Missing { column } => write!(f, "{column} is not in the table"),
            ColumnMismatch::Incompatible {
                column,
                source,
                target,
            } => write!(f, "{column} is {source} in the file but {target} in the table"),
            ColumnMismatch::Unfilled { column } => {
                write!(f, "{column} is NOT NULL but absent from the file")
            }
        }
    }
}

/// Terminal errors that stop a load before any row is inserted.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("table {table} does not exist and automatic table creation is disabled")]
    TableMissing { table: String },
    #[error("table {table} does not match the file: {}", .mismatches.iter().join("; "))]
    SchemaMismatch {
        table: String,
        mismatches: Vec<ColumnMismatch>,
    },
    #[error("database connectivity failure: {0}")]
    ConnectivityFailure(#[source] DatabaseError),
    #[error("database rejected {operation}: {source}")]
    Rejected {
        operation: &'static str,
        #[source]
        source: DatabaseError,
    },
    #[error("'{0}' cannot be used as a table name")]
    InvalidTableName(String),
}

impl LoadError {
    pub(crate) fn from_database(operation: &'static str, error: DatabaseError) -> Self {
        if error.is_connectivity() {
            LoadError::ConnectivityFailure(error)
        } else {
            LoadError::Rejected {
                operation,
                source: error,
            }
        }
    }

    /// Column names named by a [`LoadError::SchemaMismatch`].
    pub fn mismatched_columns(&self) -> Vec<&str> {
        match self {
            LoadError::SchemaMismatch { mismatches, .. } => {
                mismatches.iter().map(ColumnMismatch::column).collect()
            }
            _ => Vec::new(),
        }
    }
}
