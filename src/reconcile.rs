//! Schema reconciliation between the inferred source columns and the
//! destination table.
//!
//! ```text
//! Unchecked --catalog query--> Exists | Missing --policy--> Reconciled | Rejected
//! ```
//!
//! Existing tables are validated in full before anything is written, so a
//! rejection never leaves partial data or a half-created table behind.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    database::{CatalogColumn, Database},
    error::{ColumnMismatch, LoadError},
    schema::{ColumnSpec, ColumnType, TargetSchema},
};

/// What to do when the destination table does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TablePolicy {
    #[default]
    CreateIfMissing,
    RequireExisting,
}

impl From<bool> for TablePolicy {
    fn from(auto_create: bool) -> Self {
        if auto_create {
            TablePolicy::CreateIfMissing
        } else {
            TablePolicy::RequireExisting
        }
    }
}

/// How the destination table was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableAction {
    Created,
    Existing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    Unchecked,
    Exists(Vec<CatalogColumn>),
    Missing,
    Reconciled(TableAction),
    Rejected,
}

impl ReconcileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReconcileState::Reconciled(_) | ReconcileState::Rejected)
    }
}

/// Maps one source column onto a target column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    pub source_index: usize,
    pub target_name: String,
    /// Type cells are converted to before binding: the source column's
    /// inferred type, or text when the target column is text.
    pub column_type: ColumnType,
}

/// Everything the loader needs once reconciliation succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub target: TargetSchema,
    pub action: TableAction,
    /// Bindings in target column order.
    pub bindings: Vec<ColumnBinding>,
}

impl LoadPlan {
    pub fn table_name(&self) -> &str {
        &self.target.table_name
    }

    pub fn column_names(&self) -> Vec<String> {
        self.bindings.iter().map(|b| b.target_name.clone()).collect()
    }
}

#[derive(Debug)]
pub struct Reconciler {
    table: String,
    policy: TablePolicy,
    state: ReconcileState,
}

impl Reconciler {
    pub fn new(table: impl Into<String>, policy: TablePolicy) -> Self {
        Reconciler {
            table: table.into(),
            policy,
            state: ReconcileState::Unchecked,
        }
    }

    pub fn state(&self) -> &ReconcileState {
        &self.state
    }

    /// Queries the catalog, moving `Unchecked` to `Exists` or `Missing`.
    pub fn check<D: Database>(&mut self, db: &mut D) -> Result<&ReconcileState, LoadError> {
        if matches!(self.state, ReconcileState::Unchecked) {
            match db.table_columns(&self.table) {
                Ok(Some(columns)) => self.state = ReconcileState::Exists(columns),
                Ok(None) => self.state = ReconcileState::Missing,
                Err(err) => {
                    self.state = ReconcileState::Rejected;
                    return Err(LoadError::from_database("catalog lookup", err));
                }
            }
        }
        Ok(&self.state)
    }

    /// Applies the table policy to the proposed columns and produces the
    /// load plan, or rejects the load.
    pub fn resolve<D: Database>(
        &mut self,
        db: &mut D,
        proposed: &[ColumnSpec],
    ) -> Result<LoadPlan, LoadError> {
        if self.state.is_terminal() {
            self.state = ReconcileState::Unchecked;
        }
        let existing = match self.check(db)? {
            ReconcileState::Exists(columns) => Some(columns.clone()),
            _ => None,
        };
        let outcome = match existing {
            Some(columns) => self.validate(&columns, proposed),
            None => self.create(db, proposed),
        };
        self.state = match &outcome {
            Ok(plan) => ReconcileState::Reconciled(plan.action),
            Err(_) => ReconcileState::Rejected,
        };
        outcome
    }

    fn create<D: Database>(&self, db: &mut D, proposed: &[ColumnSpec]) -> Result<LoadPlan, LoadError> {
        if self.policy == TablePolicy::RequireExisting {
            return Err(LoadError::TableMissing {
                table: self.table.clone(),
            });
        }
        let target = TargetSchema::new(self.table.clone(), proposed.to_vec());
        db.create_table(&target)
            .map_err(|err| LoadError::from_database("table creation", err))?;
        info!(
            "Created table {} with {} column(s)",
            self.table,
            target.columns.len()
        );
        let bindings = proposed
            .iter()
            .enumerate()
            .map(|(idx, spec)| ColumnBinding {
                source_index: idx,
                target_name: spec.sanitized_name.clone(),
                column_type: spec.inferred_type,
            })
            .collect();
        Ok(LoadPlan {
            target,
            action: TableAction::Created,
            bindings,
        })
    }

    fn validate(&self, existing: &[CatalogColumn], proposed: &[ColumnSpec]) -> Result<LoadPlan, LoadError> {
        let target = TargetSchema::new(
            self.table.clone(),
            existing
                .iter()
                .map(|column| ColumnSpec {
                    original_name: column.name.clone(),
                    sanitized_name: column.name.clone(),
                    inferred_type: column.column_type(),
                    nullable: column.nullable,
                    non_null_samples: 0,
                })
                .collect(),
        );

        let mut mismatches = Vec::new();
        let mut matched = vec![None; target.columns.len()];
        for (source_index, spec) in proposed.iter().enumerate() {
            let Some(position) = target.position(&spec.sanitized_name) else {
                mismatches.push(ColumnMismatch::Missing {
                    column: spec.sanitized_name.clone(),
                });
                continue;
            };
            let declared = &existing[position];
            if !spec.is_compatible_with(declared.column_type()) {
                mismatches.push(ColumnMismatch::Incompatible {
                    column: spec.sanitized_name.clone(),
                    source: spec.inferred_type,
                    target: declared.declared_type.clone(),
                });
                continue;
            }
            matched[position] = Some(source_index);
        }
        for column in existing.iter().filter(|c| !c.nullable && !c.has_default) {
            let provided = proposed
                .iter()
                .any(|spec| spec.sanitized_name.eq_ignore_ascii_case(&column.name));
            if !provided {
                mismatches.push(ColumnMismatch::Unfilled {
                    column: column.name.clone(),
                });
            }
        }
        if !mismatches.is_empty() {
            return Err(LoadError::SchemaMismatch {
                table: self.table.clone(),
                mismatches,
            });
        }

        let bindings = matched
            .iter()
            .enumerate()
            .filter_map(|(position, source)| {
                source.map(|source_index| {
                    let target_column = &target.columns[position];
                    let column_type = if target_column.inferred_type == ColumnType::Text {
                        ColumnType::Text
                    } else {
                        proposed[source_index].inferred_type
                    };
                    ColumnBinding {
                        source_index,
                        target_name: target_column.sanitized_name.clone(),
                        column_type,
                    }
                })
            })
            .collect();
        debug!("Validated existing table {} against the source", self.table);
        Ok(LoadPlan {
            target,
            action: TableAction::Existing,
            bindings,
        })
    }
}

/// Runs the full state machine in one call.
pub fn reconcile<D: Database>(
    db: &mut D,
    table: &str,
    proposed: &[ColumnSpec],
    policy: TablePolicy,
) -> Result<LoadPlan, LoadError> {
    Reconciler::new(table, policy).resolve(db, proposed)
}
