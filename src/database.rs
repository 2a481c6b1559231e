//! Database collaborator seam.
//!
//! The engine talks to storage only through these traits: a [`Connector`]
//! hands out one owned connection per load and the [`Database`] connection
//! answers catalog lookups, runs table DDL and inserts batches. Releasing a
//! connection is dropping it, so every exit path gives it back.

use std::time::Duration;

use crate::{
    data::Value,
    error::DatabaseError,
    schema::{ColumnType, TargetSchema},
};

/// A column as described by the database catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    pub has_default: bool,
}

impl CatalogColumn {
    pub fn column_type(&self) -> ColumnType {
        ColumnType::from_declared(&self.declared_type)
    }
}

pub trait Database {
    /// Returns the table's columns in declaration order, or `None` when the
    /// table does not exist.
    fn table_columns(&mut self, table: &str) -> Result<Option<Vec<CatalogColumn>>, DatabaseError>;

    fn create_table(&mut self, schema: &TargetSchema) -> Result<(), DatabaseError>;

    /// Inserts `rows` into `columns` of `table` as one atomic unit: either
    /// every row commits or none does. Returns the number of rows written.
    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Option<Value>>],
        timeout: Option<Duration>,
    ) -> Result<usize, DatabaseError>;
}

pub trait Connector: Send + Sync {
    type Connection: Database;

    /// Opens a connection whose catalog lookups and DDL are bounded by
    /// `timeout`, reported as [`DatabaseError::Timeout`] when exceeded.
    fn connect(&self, timeout: Option<Duration>) -> Result<Self::Connection, DatabaseError>;

    /// Human-readable target description for logs.
    fn describe(&self) -> String;
}
