//! Column and table schema model.
//!
//! [`ColumnType`] is the fixed candidate set the inferrer chooses from, in
//! order of decreasing specificity. [`ColumnSpec`] pairs a source header with
//! its sanitized identifier and inferred type, and [`TargetSchema`] is the
//! ordered column list of the destination table, whether it was read from the
//! catalog or derived from the source.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    DateTime,
    Boolean,
    Text,
}

/// Broad families used to decide whether a source column can be written to an
/// existing target column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    Numeric,
    Temporal,
    Text,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::DateTime => "datetime",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::DateTime => "TIMESTAMP",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text => "TEXT",
        }
    }

    pub fn category(&self) -> TypeCategory {
        match self {
            ColumnType::Integer | ColumnType::Float | ColumnType::Boolean => TypeCategory::Numeric,
            ColumnType::DateTime => TypeCategory::Temporal,
            ColumnType::Text => TypeCategory::Text,
        }
    }

    /// Maps a declared catalog type onto the closest candidate, following
    /// SQLite's affinity rules with extra checks for boolean and temporal
    /// names.
    pub fn from_declared(declared: &str) -> ColumnType {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.contains("BOOL") {
            ColumnType::Boolean
        } else if upper.contains("INT") {
            ColumnType::Integer
        } else if ["CHAR", "CLOB", "TEXT"].iter().any(|t| upper.contains(t)) {
            ColumnType::Text
        } else if upper.contains("DATE") || upper.contains("TIME") {
            ColumnType::DateTime
        } else if ["REAL", "FLOA", "DOUB", "NUM", "DEC"]
            .iter()
            .any(|t| upper.contains(t))
        {
            ColumnType::Float
        } else {
            ColumnType::Text
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    pub original_name: String,
    pub sanitized_name: String,
    pub inferred_type: ColumnType,
    pub nullable: bool,
    /// Number of non-null values the inference saw. Zero means the sample
    /// carried no type evidence at all.
    #[serde(default)]
    pub non_null_samples: usize,
}

impl ColumnSpec {
    pub fn has_type_evidence(&self) -> bool {
        self.non_null_samples > 0
    }

    /// Whether values of this source column may be written into a target
    /// column of type `target`. Flag columns also fit text targets, where
    /// they keep their spelling (`Y`/`N`).
    pub fn is_compatible_with(&self, target: ColumnType) -> bool {
        !self.has_type_evidence()
            || self.inferred_type.category() == target.category()
            || (self.inferred_type == ColumnType::Boolean && target == ColumnType::Text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetSchema {
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TargetSchema {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        TargetSchema {
            table_name: table_name.into(),
            columns,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.sanitized_name.as_str())
            .collect()
    }

    /// Identifier lookups are ASCII case-insensitive, matching how the
    /// supported databases resolve unquoted names.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.sanitized_name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.position(name).map(|idx| &self.columns[idx])
    }
}
