//! In-memory source tables and the readers that build them.
//!
//! A [`SourceTable`] is column-major: an ordered list of named columns that all
//! hold the same number of raw [`Cell`]s. Readers exist for delimited text
//! (`csv` + `encoding_rs`) and spreadsheets (`calamine`); both skip rows in
//! which every cell is blank.

use std::{fmt, path::Path};

use anyhow::{Context, Result, anyhow, bail, ensure};
use calamine::{Data, DataType, Reader, open_workbook_auto};
use chrono::NaiveDateTime;
use encoding_rs::Encoding;
use log::debug;

use crate::{
    data::{format_timestamp, parse_timestamp},
    io_utils,
};

/// A raw value as supplied by the input file.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Text(value) => value.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Text(value) => f.write_str(value),
            Cell::Integer(value) => write!(f, "{value}"),
            Cell::Float(value) => write!(f, "{value}"),
            Cell::Boolean(value) => write!(f, "{value}"),
            Cell::DateTime(value) => f.write_str(&format_timestamp(value)),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceColumn {
    pub name: String,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    columns: Vec<SourceColumn>,
    row_count: usize,
}

impl SourceTable {
    /// Builds a table from row-major data. Every row must have exactly one
    /// cell per header.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let width = headers.len();
        let mut columns: Vec<SourceColumn> = headers
            .into_iter()
            .map(|name| SourceColumn {
                name,
                cells: Vec::with_capacity(rows.len()),
            })
            .collect();
        let row_count = rows.len();
        for (idx, row) in rows.into_iter().enumerate() {
            ensure!(
                row.len() == width,
                "Row {} has {} value(s) but the header declares {} column(s)",
                idx + 1,
                row.len(),
                width
            );
            for (column, cell) in columns.iter_mut().zip(row) {
                column.cells.push(cell);
            }
        }
        Ok(SourceTable { columns, row_count })
    }

    pub fn from_columns(columns: Vec<SourceColumn>) -> Result<Self> {
        let row_count = columns.first().map_or(0, |column| column.cells.len());
        if let Some(ragged) = columns.iter().find(|c| c.cells.len() != row_count) {
            bail!(
                "Column '{}' has {} value(s), expected {}",
                ragged.name,
                ragged.cells.len(),
                row_count
            );
        }
        Ok(SourceTable { columns, row_count })
    }

    pub fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Cell> {
        self.columns.get(column).and_then(|c| c.cells.get(row))
    }
}

/// Options for turning an input path into a [`SourceTable`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub delimiter: Option<u8>,
    pub encoding: Option<String>,
    pub sheet: Option<String>,
}

/// Reads a CSV or spreadsheet file depending on its extension.
pub fn read_path(path: &Path, options: &ReadOptions) -> Result<SourceTable> {
    if io_utils::is_workbook_path(path) {
        read_workbook(path, options.sheet.as_deref())
    } else {
        let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
        let encoding = io_utils::resolve_encoding(options.encoding.as_deref())?;
        read_csv(path, delimiter, encoding)
    }
}

pub fn read_csv(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<SourceTable> {
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
    let headers = io_utils::reader_headers(&mut reader, encoding)
        .with_context(|| format!("Reading headers from {path:?}"))?;
    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    let mut skipped = 0usize;
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Reading records from {path:?}"))?
    {
        let line = record.position().map_or(0, |pos| pos.line());
        let fields = io_utils::decode_record(&record, encoding)
            .with_context(|| format!("Decoding line {line} of {path:?}"))?;
        if fields.iter().all(|field| field.trim().is_empty()) {
            skipped += 1;
            continue;
        }
        rows.push(fields.into_iter().map(Cell::Text).collect());
    }
    debug!(
        "Read {} row(s) from {:?} ({} blank row(s) skipped)",
        rows.len(),
        path,
        skipped
    );
    SourceTable::from_rows(headers, rows)
}

pub fn read_workbook(path: &Path, sheet: Option<&str>) -> Result<SourceTable> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("Opening workbook {path:?}"))?;
    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("Workbook {path:?} does not contain any sheets"))?,
    };
    let range = workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("Reading sheet '{sheet_name}' from {path:?}"))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| anyhow!("Sheet '{sheet_name}' in {path:?} is empty"))?
        .iter()
        .map(|cell| cell.to_string().trim().to_string())
        .collect();
    let data: Vec<Vec<Cell>> = rows
        .map(|row| row.iter().map(workbook_cell).collect::<Vec<_>>())
        .filter(|row| !row.iter().all(Cell::is_blank))
        .collect();
    debug!(
        "Read {} row(s) from sheet '{}' of {:?}",
        data.len(),
        sheet_name,
        path
    );
    SourceTable::from_rows(headers, data)
}

fn workbook_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => Cell::Null,
        Data::Int(value) => Cell::Integer(*value),
        Data::Float(value) => Cell::Float(*value),
        Data::Bool(value) => Cell::Boolean(*value),
        Data::String(value) => Cell::Text(value.clone()),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(Cell::DateTime)
            .unwrap_or_else(|| Cell::Text(cell.to_string())),
        Data::DateTimeIso(value) => parse_timestamp(value)
            .map(Cell::DateTime)
            .unwrap_or_else(|_| Cell::Text(value.clone())),
        Data::DurationIso(value) => Cell::Text(value.clone()),
    }
}
