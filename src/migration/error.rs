//! Error taxonomy of the upgrade core

use crate::executor::DbError;
use crate::migration::baseline::BaselineError;
use crate::migration::changeset::ChangesetError;
use crate::migration::lock::LockError;
use crate::migration::manifest::ManifestError;
use crate::migration::parameters::ParameterError;
use crate::migration::resolver::ResolveError;
use crate::migration::version::Version;
use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by install, upgrade, status and role runs
///
/// Every variant raised after the transaction started implies it was rolled
/// back: the baseline is what it was before the call.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error(transparent)]
    Manifest(ManifestError),

    #[error("module {module} is not installed")]
    NotInstalled { module: String },

    #[error("module {module} is already installed at version {version}")]
    AlreadyInstalled { module: String, version: Version },

    #[error(
        "changeset {version} has been modified after being applied\n\
         Recorded checksum: {recorded}\n\
         Current checksum: {current}"
    )]
    ChecksumDrift {
        version: Version,
        recorded: String,
        current: String,
    },

    #[error("version {version} is provided by both {first} and {second}")]
    DuplicateVersion {
        version: Version,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("installed version {version} has no changeset in the package")]
    MissingChangeset { version: Version },

    #[error("required parameter '{name}' was not supplied")]
    MissingParameter { name: String },

    #[error(transparent)]
    InvalidParameter(ParameterError),

    #[error("module {module} is being upgraded by another session (waited {waited:?})")]
    LockContention { module: String, waited: Duration },

    #[error("changeset {version} failed in {file}: {source}")]
    Execution {
        version: Version,
        file: String,
        #[source]
        source: DbError,
    },

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl UpgradeError {
    /// Whether running the same operation again may succeed unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpgradeError::LockContention { .. })
    }
}

impl From<ManifestError> for UpgradeError {
    fn from(error: ManifestError) -> Self {
        match error {
            ManifestError::DuplicateVersion {
                version,
                first,
                second,
            } => UpgradeError::DuplicateVersion {
                version,
                first,
                second,
            },
            ManifestError::Changeset(ChangesetError::Io { path, source }) => {
                UpgradeError::Io { path, source }
            }
            other => UpgradeError::Manifest(other),
        }
    }
}

impl From<ParameterError> for UpgradeError {
    fn from(error: ParameterError) -> Self {
        match error {
            ParameterError::Missing { name } => UpgradeError::MissingParameter { name },
            other => UpgradeError::InvalidParameter(other),
        }
    }
}

impl From<ResolveError> for UpgradeError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::ChecksumDrift {
                version,
                recorded,
                current,
            } => UpgradeError::ChecksumDrift {
                version,
                recorded,
                current,
            },
            ResolveError::MissingChangeset { version } => UpgradeError::MissingChangeset { version },
        }
    }
}

impl From<LockError> for UpgradeError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Contention { module, waited } => {
                UpgradeError::LockContention { module, waited }
            }
            LockError::Database(e) => UpgradeError::Database(e),
        }
    }
}

impl From<BaselineError> for UpgradeError {
    fn from(error: BaselineError) -> Self {
        match error {
            BaselineError::NotInstalled(module) => UpgradeError::NotInstalled { module },
            BaselineError::Database(e) => UpgradeError::Database(e),
        }
    }
}
