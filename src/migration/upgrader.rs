//! Upgrader - applies a module's changesets to a target database
//!
//! An install or upgrade is one transaction:
//!
//! 1. take the module's advisory lock
//! 2. read the baseline and check it against the requested mode
//! 3. resolve pending changesets (verifying checksums of applied ones)
//! 4. render every pending changeset with the resolved parameters
//! 5. execute them in ascending version order
//! 6. record the new baseline, then commit
//!
//! Any failure drops the transaction, which rolls back: the database keeps its
//! previous baseline and none of the partial changes.

use crate::config::TmmtConfig;
use crate::executor::{PgClientExecutor, PgExecutor};
use crate::migration::baseline::BaselineStore;
use crate::migration::changeset::Changeset;
use crate::migration::lock::acquire_module_lock;
use crate::migration::manifest::ModuleConfiguration;
use crate::migration::parameters::{self, ParameterValues, ResolvedParameters};
use crate::migration::resolver::ChangesetResolver;
use crate::migration::roles::{apply_roles, RolesReport};
use crate::migration::status::{PendingChangeset, UpgradeReport, UpgradeStatus};
use crate::migration::version::Version;
use crate::migration::UpgradeError;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Install,
    Upgrade,
}

/// A changeset with its scripts rendered, ready to run
struct RenderedChangeset<'a> {
    changeset: &'a Changeset,
    scripts: Vec<(String, String)>,
}

pub struct Upgrader {
    config: ModuleConfiguration,
    parameters: ParameterValues,
    store: BaselineStore,
    lock_timeout: Duration,
}

impl Upgrader {
    /// Upgrader for `config`, with caller-supplied parameter values
    ///
    /// Bookkeeping goes to `public.tmmt_migrations`; the lock is not waited on.
    pub fn new(config: ModuleConfiguration, parameters: ParameterValues) -> Self {
        let store = BaselineStore::new(config.name());
        Self {
            config,
            parameters,
            store,
            lock_timeout: Duration::ZERO,
        }
    }

    /// Upgrader using the bookkeeping table and lock timeout of `settings`
    pub fn from_settings(
        config: ModuleConfiguration,
        parameters: ParameterValues,
        settings: &TmmtConfig,
    ) -> Self {
        let store = BaselineStore::new(config.name())
            .with_table(&settings.bookkeeping_schema, &settings.bookkeeping_table);
        Self::new(config, parameters)
            .with_store(store)
            .with_lock_timeout(settings.lock_timeout())
    }

    pub fn with_store(mut self, store: BaselineStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn configuration(&self) -> &ModuleConfiguration {
        &self.config
    }

    pub fn store(&self) -> &BaselineStore {
        &self.store
    }

    /// First installation of the module
    ///
    /// # Errors
    ///
    /// `AlreadyInstalled` when the module has a baseline; otherwise any error
    /// of [`Upgrader::upgrade`] except `NotInstalled`.
    pub fn install(
        &self,
        executor: &PgClientExecutor,
        target: Option<Version>,
    ) -> Result<UpgradeReport, UpgradeError> {
        self.run(executor, Mode::Install, target)
    }

    /// Bring an installed module to `target` (latest when `None`)
    ///
    /// # Errors
    ///
    /// - `NotInstalled` when the module has no baseline
    /// - `MissingParameter` / `InvalidParameter` before anything is executed
    /// - `LockContention` when another session upgrades the same module
    /// - `ChecksumDrift` / `MissingChangeset` when applied changesets changed
    /// - `Execution` when a changeset script fails
    pub fn upgrade(
        &self,
        executor: &PgClientExecutor,
        target: Option<Version>,
    ) -> Result<UpgradeReport, UpgradeError> {
        self.run(executor, Mode::Upgrade, target)
    }

    fn check_parameters(&self, mode: Mode) -> Result<(), UpgradeError> {
        let specs = self.config.parameters();
        parameters::validate_supplied(specs, &self.parameters)?;
        // Nothing recorded to fall back on for an install
        if mode == Mode::Install {
            parameters::resolve(specs, &self.parameters, None)?;
        }
        Ok(())
    }

    fn run(
        &self,
        executor: &PgClientExecutor,
        mode: Mode,
        target: Option<Version>,
    ) -> Result<UpgradeReport, UpgradeError> {
        let module = self.config.name();

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::upgrade_span(module).entered();

        self.check_parameters(mode)?;

        let start = Instant::now();
        let result = self.run_in_transaction(executor, mode, target);
        match &result {
            Ok(report) => {
                log::info!(
                    "module {module}: {} changeset(s) applied in {:?}",
                    report.applied.len(),
                    start.elapsed()
                );
                #[cfg(feature = "metrics")]
                crate::metrics::METRICS.record_upgrade(module, report.applied.len(), start.elapsed());
            }
            Err(e) => {
                log::error!("module {module}: rolled back: {e}");
                #[cfg(feature = "metrics")]
                crate::metrics::METRICS.record_failure(module);
            }
        }
        result
    }

    fn run_in_transaction(
        &self,
        executor: &PgClientExecutor,
        mode: Mode,
        target: Option<Version>,
    ) -> Result<UpgradeReport, UpgradeError> {
        let module = self.config.name();
        let transaction = executor.begin()?;
        acquire_module_lock(&transaction, module, self.lock_timeout)?;

        let baseline = self.store.load(&transaction)?;
        match (mode, &baseline) {
            (Mode::Install, Some(record)) => {
                return Err(UpgradeError::AlreadyInstalled {
                    module: module.to_string(),
                    version: record.version,
                });
            }
            (Mode::Upgrade, None) => {
                return Err(UpgradeError::NotInstalled {
                    module: module.to_string(),
                });
            }
            _ => {}
        }
        let from = baseline.as_ref().map(|b| b.version);

        let pending = ChangesetResolver::pending(self.config.changesets(), baseline.as_ref(), target)?;

        let recorded = baseline
            .as_ref()
            .map(|b| ParameterValues::from_json(&b.parameters));
        let resolved =
            parameters::resolve(self.config.parameters(), &self.parameters, recorded.as_ref())?;

        let Some(last) = pending.last().copied() else {
            transaction.commit()?;
            log::info!("module {module} has nothing to apply");
            return Ok(UpgradeReport {
                module: module.to_string(),
                from,
                applied: Vec::new(),
            });
        };

        let rendered = render_all(&pending, &resolved)?;
        for item in &rendered {
            apply(&transaction, item)?;
            log::info!("applied changeset {} of module {module}", item.changeset.version);
        }

        let mut checksums = baseline
            .map(|b| b.changeset_checksums)
            .unwrap_or_default();
        for changeset in &pending {
            checksums.insert(changeset.version, changeset.checksum.clone());
        }

        self.store.ensure_table(&transaction)?;
        self.store.record(
            &transaction,
            last.version,
            &last.checksum,
            &checksums,
            &resolved.to_json(),
        )?;
        transaction.commit()?;

        Ok(UpgradeReport {
            module: module.to_string(),
            from,
            applied: pending.iter().map(|c| c.version).collect(),
        })
    }

    /// Baseline and pending changesets, without changing anything
    ///
    /// # Errors
    ///
    /// `ChecksumDrift` / `MissingChangeset` as an upgrade would raise them.
    pub fn status(&self, executor: &dyn PgExecutor) -> Result<UpgradeStatus, UpgradeError> {
        let baseline = self.store.load(executor)?;
        let pending = ChangesetResolver::pending(self.config.changesets(), baseline.as_ref(), None)?
            .into_iter()
            .map(|c| PendingChangeset {
                version: c.version,
                files: c.files.iter().map(|f| f.path.clone()).collect(),
                checksum: c.checksum.clone(),
            })
            .collect();

        Ok(UpgradeStatus {
            module: self.config.name().to_string(),
            baseline,
            pending,
            latest: self.config.latest_version(),
        })
    }

    /// Create the module's roles and grant their permissions
    ///
    /// Runs in its own transaction under the module lock. Idempotent: roles
    /// that already exist are kept and grants are re-applied.
    pub fn create_and_grant_roles(
        &self,
        executor: &PgClientExecutor,
    ) -> Result<RolesReport, UpgradeError> {
        let module = self.config.name();
        let transaction = executor.begin()?;
        acquire_module_lock(&transaction, module, self.lock_timeout)?;

        let report = apply_roles(&transaction, &self.config.roles_in_creation_order())?;
        transaction.commit()?;

        log::info!(
            "module {module}: {} role(s) created, {} already present",
            report.created.len(),
            report.existing.len()
        );
        Ok(report)
    }
}

/// Render every script up front so a bad placeholder fails before execution
fn render_all<'a>(
    pending: &[&'a Changeset],
    resolved: &ResolvedParameters,
) -> Result<Vec<RenderedChangeset<'a>>, UpgradeError> {
    pending
        .iter()
        .map(|changeset| -> Result<RenderedChangeset<'a>, UpgradeError> {
            let scripts = changeset
                .files
                .iter()
                .map(|file| -> Result<(String, String), UpgradeError> {
                    Ok((file.name.clone(), resolved.render(&file.sql, &file.name)?))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RenderedChangeset {
                changeset: *changeset,
                scripts,
            })
        })
        .collect()
}

fn apply(executor: &dyn PgExecutor, item: &RenderedChangeset<'_>) -> Result<(), UpgradeError> {
    let version = item.changeset.version;

    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::changeset_span(&version.to_string()).entered();

    for (file, sql) in &item.scripts {
        log::debug!("executing {file} ({version})");
        executor
            .batch_execute(sql)
            .map_err(|source| UpgradeError::Execution {
                version,
                file: file.clone(),
                source,
            })?;
    }
    Ok(())
}
