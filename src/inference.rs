//! Column type inference.
//!
//! Each candidate type is a pure predicate over a single [`Cell`]. The
//! candidates are kept in a fixed table ordered from most to least specific
//! and are reduced left to right across the sampled values: a candidate stays
//! viable only while every non-null value satisfies it, and the first viable
//! candidate is the inferred type. `Text` accepts everything, so every column
//! resolves to some type.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::{parse_boolean, parse_strict_float, parse_strict_integer, parse_timestamp},
    schema::{ColumnSpec, ColumnType},
    source::{Cell, SourceTable},
};

/// Upper bound on rows sampled when the sample size is `all`.
pub const INFERENCE_ROW_CAP: usize = 100_000;

pub const DEFAULT_NULL_MARKERS: &[&str] = &["NULL", "NA", "N/A", "#N/A", "NaN", "None"];

/// Largest magnitude below which every integer is exactly representable as `f64`.
const F64_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

pub type Predicate = fn(&Cell) -> bool;

const CANDIDATE_COUNT: usize = 5;

/// Candidate types in priority order.
pub const CANDIDATES: [(ColumnType, Predicate); CANDIDATE_COUNT] = [
    (ColumnType::Integer, fits_integer),
    (ColumnType::Float, fits_float),
    (ColumnType::DateTime, fits_datetime),
    (ColumnType::Boolean, fits_boolean),
    (ColumnType::Text, fits_text),
];

pub fn fits_integer(cell: &Cell) -> bool {
    match cell {
        Cell::Integer(_) => true,
        Cell::Float(value) => value.fract() == 0.0 && value.abs() < F64_EXACT_INTEGER,
        Cell::Text(value) => parse_strict_integer(value).is_some(),
        _ => false,
    }
}

pub fn fits_float(cell: &Cell) -> bool {
    match cell {
        Cell::Integer(value) => (*value as f64).abs() < F64_EXACT_INTEGER,
        Cell::Float(value) => value.is_finite(),
        Cell::Text(value) => parse_strict_float(value).is_some(),
        _ => false,
    }
}

pub fn fits_datetime(cell: &Cell) -> bool {
    match cell {
        Cell::DateTime(_) => true,
        Cell::Text(value) => parse_timestamp(value).is_ok(),
        _ => false,
    }
}

pub fn fits_boolean(cell: &Cell) -> bool {
    match cell {
        Cell::Boolean(_) => true,
        Cell::Text(value) => parse_boolean(value).is_some(),
        _ => false,
    }
}

pub fn fits_text(_cell: &Cell) -> bool {
    true
}

/// How many rows the inferrer looks at per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "SampleSizeRepr", into = "SampleSizeRepr")]
pub enum SampleSize {
    /// Every row, up to [`INFERENCE_ROW_CAP`].
    #[default]
    All,
    Rows(usize),
}

impl SampleSize {
    pub fn limit(&self, row_count: usize) -> usize {
        match self {
            SampleSize::All => row_count.min(INFERENCE_ROW_CAP),
            SampleSize::Rows(rows) => row_count.min(*rows),
        }
    }
}

impl FromStr for SampleSize {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(SampleSize::All);
        }
        match trimmed.parse::<usize>() {
            Ok(0) => Ok(SampleSize::All),
            Ok(rows) => Ok(SampleSize::Rows(rows)),
            Err(_) => Err(anyhow!(
                "Invalid sample size '{value}': expected 'all' or a row count"
            )),
        }
    }
}

impl fmt::Display for SampleSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleSize::All => f.write_str("all"),
            SampleSize::Rows(rows) => write!(f, "{rows}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SampleSizeRepr {
    Rows(usize),
    Token(String),
}

impl TryFrom<SampleSizeRepr> for SampleSize {
    type Error = anyhow::Error;

    fn try_from(repr: SampleSizeRepr) -> Result<Self> {
        match repr {
            SampleSizeRepr::Rows(0) => Ok(SampleSize::All),
            SampleSizeRepr::Rows(rows) => Ok(SampleSize::Rows(rows)),
            SampleSizeRepr::Token(token) => token.parse(),
        }
    }
}

impl From<SampleSize> for SampleSizeRepr {
    fn from(size: SampleSize) -> Self {
        match size {
            SampleSize::All => SampleSizeRepr::Token("all".to_string()),
            SampleSize::Rows(rows) => SampleSizeRepr::Rows(rows),
        }
    }
}

/// Tokens treated as missing values, compared case-insensitively after
/// trimming. Blank text and [`Cell::Null`] are always null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullMarkers {
    tokens: Vec<String>,
}

impl NullMarkers {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        NullMarkers { tokens }
    }

    pub fn is_null(&self, cell: &Cell) -> bool {
        match cell {
            Cell::Null => true,
            Cell::Text(value) => {
                let trimmed = value.trim();
                trimmed.is_empty()
                    || self
                        .tokens
                        .iter()
                        .any(|token| trimmed.eq_ignore_ascii_case(token))
            }
            _ => false,
        }
    }
}

impl Default for NullMarkers {
    fn default() -> Self {
        NullMarkers::new(DEFAULT_NULL_MARKERS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferredColumn {
    pub column_type: ColumnType,
    pub nullable: bool,
    pub sampled: usize,
    pub non_null: usize,
}

/// Infers the type of one column from its first `sample.limit(..)` cells.
pub fn infer_column(cells: &[Cell], sample: SampleSize, markers: &NullMarkers) -> InferredColumn {
    let sampled = sample.limit(cells.len());
    let (values, nulls): (Vec<&Cell>, Vec<&Cell>) = cells[..sampled]
        .iter()
        .partition(|cell| !markers.is_null(cell));
    let viable = values
        .iter()
        .fold([true; CANDIDATE_COUNT], |mut viable, cell| {
            for (slot, (_, fits)) in viable.iter_mut().zip(CANDIDATES.iter()) {
                *slot = *slot && fits(*cell);
            }
            viable
        });
    let column_type = if values.is_empty() {
        ColumnType::Text
    } else {
        CANDIDATES
            .iter()
            .zip(viable)
            .find_map(|((ty, _), ok)| ok.then_some(*ty))
            .unwrap_or(ColumnType::Text)
    };
    InferredColumn {
        column_type,
        nullable: values.is_empty() || !nulls.is_empty(),
        sampled,
        non_null: values.len(),
    }
}

/// Pairs every source column with its sanitized name and inferred type.
pub fn infer_columns(
    source: &SourceTable,
    sanitized: &[String],
    sample: SampleSize,
    markers: &NullMarkers,
) -> Vec<ColumnSpec> {
    source
        .columns()
        .iter()
        .zip(sanitized)
        .map(|(column, name)| {
            let inferred = infer_column(&column.cells, sample, markers);
            debug!(
                "Column '{}' -> {} ({}, {} of {} sampled value(s) non-null)",
                column.name,
                inferred.column_type,
                if inferred.nullable { "nullable" } else { "not null" },
                inferred.non_null,
                inferred.sampled
            );
            ColumnSpec {
                original_name: column.name.clone(),
                sanitized_name: name.clone(),
                inferred_type: inferred.column_type,
                nullable: inferred.nullable,
                non_null_samples: inferred.non_null,
            }
        })
        .collect()
}
