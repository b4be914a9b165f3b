//! Module installation and schema upgrades
//!
//! A module package holds a manifest and a directory of versioned SQL
//! changesets. The [`Upgrader`] applies the changesets above the recorded
//! baseline in one transaction and records the new baseline.
//!
//! # Example
//!
//! ```rust,no_run
//! use tmmt::migration::{ManifestLoader, ParameterValues, Upgrader};
//! use tmmt::{connect, PgClientExecutor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManifestLoader::load("datamodel")?;
//! let parameters = ParameterValues::new().with("SRID", 2056);
//! let executor = PgClientExecutor::new(connect("host=localhost user=postgres dbname=tww")?);
//!
//! let upgrader = Upgrader::new(config, parameters);
//! upgrader.install(&executor, None)?;
//! upgrader.create_and_grant_roles(&executor)?;
//! # Ok(())
//! # }
//! ```

pub mod baseline;
pub mod changeset;
pub mod checksum;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod parameters;
pub mod record;
pub mod resolver;
pub mod roles;
pub mod state_table;
pub mod status;
pub mod upgrader;
pub mod version;

pub use baseline::{BaselineError, BaselineStore};
pub use changeset::{discover_changesets, Changeset, ChangesetError, ChangesetFile};
pub use error::UpgradeError;
pub use lock::{acquire_module_lock, is_module_locked, lock_bookkeeping_table, LockError};
pub use manifest::{ManifestError, ManifestLoader, ModuleConfiguration};
pub use parameters::{
    resolve, validate_supplied, ParameterError, ParameterSpec, ParameterType, ParameterValue,
    ParameterValues, ResolvedParameters,
};
pub use record::BaselineRecord;
pub use resolver::{ChangesetResolver, ResolveError};
pub use roles::{PermissionKind, RoleSpec, RolesReport};
pub use status::{PendingChangeset, UpgradeReport, UpgradeStatus};
pub use upgrader::Upgrader;
pub use version::Version;
