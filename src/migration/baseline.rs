//! `BaselineStore` - reads and writes a module's row in the bookkeeping table

use crate::executor::{DbError, PgExecutor};
use crate::migration::lock::lock_bookkeeping_table;
use crate::migration::parameters::quote_identifier;
use crate::migration::record::{encode_checksums, BaselineRecord, SELECT_COLUMNS};
use crate::migration::state_table::{initialize_statements, DEFAULT_SCHEMA, DEFAULT_TABLE};
use crate::migration::version::Version;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("module {0} is not installed")]
    NotInstalled(String),
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Access to one module's baseline
///
/// Nothing here commits: writes happen on whatever executor is passed in,
/// normally the upgrade transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineStore {
    schema: String,
    table: String,
    module: String,
}

impl BaselineStore {
    /// Store for `module` in `public.tmmt_migrations`
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_TABLE.to_string(),
            module: module.into(),
        }
    }

    pub fn with_table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.schema = schema.into();
        self.table = table.into();
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn qualified_table(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.table)
        )
    }

    /// Whether the bookkeeping table exists
    pub fn exists(&self, executor: &dyn PgExecutor) -> Result<bool, DbError> {
        let name = self.qualified_table();
        let row = executor.query_one("SELECT to_regclass($1::text) IS NOT NULL", &[&name])?;
        Ok(row.try_get(0)?)
    }

    /// Full record of the module, `None` when never installed
    pub fn load(&self, executor: &dyn PgExecutor) -> Result<Option<BaselineRecord>, DbError> {
        if !self.exists(executor)? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE module = $1",
            self.qualified_table()
        );
        executor
            .query_opt(&sql, &[&self.module])?
            .map(|row| BaselineRecord::from_row(&row))
            .transpose()
    }

    /// Installed version of the module
    ///
    /// # Errors
    ///
    /// `NotInstalled` when the table or the module's row is absent.
    pub fn baseline(&self, executor: &dyn PgExecutor) -> Result<Version, BaselineError> {
        self.load(executor)?
            .map(|record| record.version)
            .ok_or_else(|| BaselineError::NotInstalled(self.module.clone()))
    }

    /// Create the schema and table when missing
    ///
    /// Creation runs under the bookkeeping table lock, so modules installing
    /// concurrently into a fresh database do not collide on the catalog.
    pub fn ensure_table(&self, executor: &dyn PgExecutor) -> Result<(), DbError> {
        if self.exists(executor)? {
            return Ok(());
        }
        lock_bookkeeping_table(executor, &self.qualified_table())?;
        for statement in initialize_statements(&self.schema, &self.table) {
            executor.execute(&statement, &[])?;
        }
        Ok(())
    }

    /// Upsert the module's row
    pub fn record(
        &self,
        executor: &dyn PgExecutor,
        version: Version,
        checksum: &str,
        changeset_checksums: &BTreeMap<Version, String>,
        parameters: &serde_json::Value,
    ) -> Result<(), DbError> {
        let sql = format!(
            "INSERT INTO {} (module, version, checksum, applied_at, changeset_checksums, parameters) \
             VALUES ($1, $2, $3, now() AT TIME ZONE 'utc', $4::text::jsonb, $5::text::jsonb) \
             ON CONFLICT (module) DO UPDATE SET \
             version = EXCLUDED.version, \
             checksum = EXCLUDED.checksum, \
             applied_at = EXCLUDED.applied_at, \
             changeset_checksums = EXCLUDED.changeset_checksums, \
             parameters = EXCLUDED.parameters",
            self.qualified_table()
        );
        let version = version.to_string();
        let checksums = encode_checksums(changeset_checksums);
        let parameters = parameters.to_string();
        executor.execute(
            &sql,
            &[&self.module, &version, &checksum, &checksums, &parameters],
        )?;
        log::debug!("recorded module {} at version {version}", self.module);
        Ok(())
    }
}
