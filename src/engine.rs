//! Orchestrates one load: sanitize, infer, reconcile, then insert.
//!
//! [`LoadEngine::load`] takes `&self` and acquires its own connection from the
//! [`Connector`], so one engine can serve loads from several threads at once.
//! The connection lives only for the duration of the call.

use std::sync::Arc;

use log::info;

use crate::{
    audit::{AuditEvent, AuditSink, LogAuditSink, RenamedColumn},
    config::LoadOptions,
    database::Connector,
    error::LoadError,
    identifiers::{sanitize_identifiers, sanitize_table_name},
    inference::infer_columns,
    loader::{CancellationToken, LoadResult, load_batches},
    reconcile::Reconciler,
    schema::ColumnSpec,
    source::SourceTable,
};

pub struct LoadEngine<C: Connector> {
    connector: C,
    options: LoadOptions,
    audit: Arc<dyn AuditSink>,
}

impl<C: Connector> LoadEngine<C> {
    pub fn new(connector: C, options: LoadOptions, audit: Arc<dyn AuditSink>) -> Self {
        LoadEngine {
            connector,
            options,
            audit,
        }
    }

    /// Engine that reports to the `log` facade.
    pub fn with_log_audit(connector: C, options: LoadOptions) -> Self {
        Self::new(connector, options, Arc::new(LogAuditSink))
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Sanitized and inferred columns for `source`, without touching the
    /// database or the audit sink.
    pub fn prepare(&self, source: &SourceTable) -> Vec<ColumnSpec> {
        let sanitized = sanitize_identifiers(&source.headers(), self.options.max_identifier_length);
        infer_columns(
            source,
            &sanitized,
            self.options.sample_size_for_inference,
            &self.options.null_markers(),
        )
    }

    /// Loads `source` into `table`.
    ///
    /// Returns `Err` when the load is rejected before any row is written:
    /// invalid table name, unreachable database, missing table under
    /// [`crate::reconcile::TablePolicy::RequireExisting`], or a schema
    /// mismatch. Otherwise the [`LoadResult`] lists every failed batch.
    pub fn load(
        &self,
        table: &str,
        source: &SourceTable,
        cancel: &CancellationToken,
    ) -> Result<LoadResult, LoadError> {
        let max_len = self.options.max_identifier_length;
        let table = sanitize_table_name(table, max_len).map_err(|err| self.reject(table, err))?;

        let headers = source.headers();
        let sanitized = sanitize_identifiers(&headers, max_len);
        let renamed = headers
            .iter()
            .zip(&sanitized)
            .filter(|(original, clean)| **original != clean.as_str())
            .map(|(original, clean)| RenamedColumn {
                original: original.to_string(),
                sanitized: clean.clone(),
            })
            .collect();
        self.audit.record(&AuditEvent::Sanitized {
            table: table.clone(),
            columns: sanitized.len(),
            renamed,
        });

        let proposed = infer_columns(
            source,
            &sanitized,
            self.options.sample_size_for_inference,
            &self.options.null_markers(),
        );
        self.audit.record(&AuditEvent::Inferred {
            table: table.clone(),
            columns: proposed.clone(),
        });

        info!(
            "Loading {} row(s) into {table} via {}",
            source.row_count(),
            self.connector.describe()
        );
        let mut db = self
            .connector
            .connect(self.options.timeout_per_batch)
            .map_err(|err| self.reject(&table, LoadError::ConnectivityFailure(err)))?;

        let mut reconciler = Reconciler::new(table.clone(), self.options.table_policy());
        let plan = reconciler
            .resolve(&mut db, &proposed)
            .map_err(|err| self.reject(&table, err))?;
        self.audit.record(&AuditEvent::Reconciled {
            table: table.clone(),
            action: plan.action,
            columns: plan.bindings.len(),
        });

        Ok(load_batches(
            &mut db,
            source,
            &plan,
            &self.options.loader_settings(),
            cancel,
            self.audit.as_ref(),
        ))
    }

    fn reject(&self, table: &str, err: LoadError) -> LoadError {
        self.audit.record(&AuditEvent::Rejected {
            table: table.to_string(),
            reason: err.to_string(),
        });
        err
    }
}
