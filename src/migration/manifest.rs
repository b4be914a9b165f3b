//! Module manifest loading
//!
//! A package directory carries a YAML manifest at its root:
//!
//! ```yaml
//! module: tww
//! changelogs_directory: changelogs
//! parameters:
//!   - name: SRID
//!     type: integer
//!     default: 2056
//!     description: Spatial reference system of all geometries
//! roles:
//!   - name: tww_viewer
//!     permissions:
//!       - type: read
//!         schemas: [tww_od, tww_vl]
//! ```

use crate::migration::changeset::{discover_changesets, Changeset, ChangesetError};
use crate::migration::parameters::{ParameterSpec, ParameterType, ParameterValue};
use crate::migration::roles::{creation_order, RoleOrderError, RoleSpec};
use crate::migration::version::Version;
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Manifest file names looked up in a package directory, in order
pub const MANIFEST_FILE_NAMES: [&str; 2] = [".tmmt.yaml", ".pum.yaml"];

const DEFAULT_CHANGELOGS_DIRECTORY: &str = "changelogs";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest not found in {0} (expected one of .tmmt.yaml, .pum.yaml)")]
    NotFound(PathBuf),
    #[error("malformed manifest {path}: {message}")]
    Malformed { path: PathBuf, message: String },
    #[error("manifest {0} does not declare a module name")]
    MissingModuleName(PathBuf),
    #[error("parameter '{0}' is declared more than once")]
    DuplicateParameter(String),
    #[error("default '{value}' of parameter '{name}' is not a valid {expected}")]
    InvalidDefault {
        name: String,
        expected: ParameterType,
        value: String,
    },
    #[error("role '{0}' is declared more than once")]
    DuplicateRole(String),
    #[error(transparent)]
    Roles(#[from] RoleOrderError),
    #[error("changelogs directory not found: {0}")]
    ChangelogsNotFound(PathBuf),
    #[error("version {version} is provided by both {first} and {second}")]
    DuplicateVersion {
        version: Version,
        first: PathBuf,
        second: PathBuf,
    },
    #[error(transparent)]
    Changeset(ChangesetError),
}

impl From<ChangesetError> for ManifestError {
    fn from(error: ChangesetError) -> Self {
        match error {
            ChangesetError::DirectoryNotFound(path) => ManifestError::ChangelogsNotFound(path),
            ChangesetError::DuplicateVersion {
                version,
                first,
                second,
            } => ManifestError::DuplicateVersion {
                version,
                first,
                second,
            },
            other => ManifestError::Changeset(other),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    changelogs_directory: Option<String>,
    #[serde(default)]
    parameters: Vec<RawParameter>,
    #[serde(default)]
    roles: Vec<RoleSpec>,
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    name: String,
    #[serde(rename = "type", default)]
    kind: ParameterType,
    #[serde(default)]
    default: Option<ParameterValue>,
    #[serde(default)]
    description: Option<String>,
}

/// In-memory form of a module manifest plus the changesets it points at
///
/// Invariants: parameter names and role names are unique, role inheritance is
/// acyclic, changesets are sorted by strictly increasing version.
#[derive(Debug, Clone)]
pub struct ModuleConfiguration {
    name: String,
    parameters: Vec<ParameterSpec>,
    roles: Vec<RoleSpec>,
    root_dir: PathBuf,
    changesets: Vec<Changeset>,
}

impl ModuleConfiguration {
    /// Build a configuration, enforcing the manifest invariants
    pub fn new(
        name: impl Into<String>,
        root_dir: impl Into<PathBuf>,
        parameters: Vec<ParameterSpec>,
        roles: Vec<RoleSpec>,
        mut changesets: Vec<Changeset>,
    ) -> Result<Self, ManifestError> {
        let mut seen = HashSet::new();
        for spec in &parameters {
            if !seen.insert(spec.name.as_str()) {
                return Err(ManifestError::DuplicateParameter(spec.name.clone()));
            }
        }

        let mut seen = HashSet::new();
        for role in &roles {
            if !seen.insert(role.name.as_str()) {
                return Err(ManifestError::DuplicateRole(role.name.clone()));
            }
        }
        creation_order(&roles)?;

        changesets.sort_by_key(|c| c.version);
        for pair in changesets.windows(2) {
            if pair[0].version == pair[1].version {
                let origin = |c: &Changeset| c.files.first().map(|f| f.path.clone()).unwrap_or_default();
                return Err(ManifestError::DuplicateVersion {
                    version: pair[0].version,
                    first: origin(&pair[0]),
                    second: origin(&pair[1]),
                });
            }
        }

        Ok(Self {
            name: name.into(),
            parameters,
            roles,
            root_dir: root_dir.into(),
            changesets,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters, in manifest order
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn roles(&self) -> &[RoleSpec] {
        &self.roles
    }

    /// Roles ordered so that inherited roles come first
    pub fn roles_in_creation_order(&self) -> Vec<&RoleSpec> {
        // Validated in `new`
        creation_order(&self.roles).unwrap_or_default()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Changesets in ascending version order
    pub fn changesets(&self) -> &[Changeset] {
        &self.changesets
    }

    pub fn changeset(&self, version: &Version) -> Option<&Changeset> {
        self.changesets
            .binary_search_by_key(version, |c| c.version)
            .ok()
            .map(|i| &self.changesets[i])
    }

    pub fn latest_version(&self) -> Option<Version> {
        self.changesets.last().map(|c| c.version)
    }
}

/// Reads module manifests into [`ModuleConfiguration`]s
pub struct ManifestLoader;

impl ManifestLoader {
    /// Load the manifest found at the root of a package directory
    pub fn load(package_dir: impl AsRef<Path>) -> Result<ModuleConfiguration, ManifestError> {
        let package_dir = package_dir.as_ref();
        let manifest = MANIFEST_FILE_NAMES
            .iter()
            .map(|name| package_dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| ManifestError::NotFound(package_dir.to_path_buf()))?;
        Self::load_file(manifest)
    }

    /// Load an explicit manifest file; its directory is the package root
    pub fn load_file(path: impl AsRef<Path>) -> Result<ModuleConfiguration, ManifestError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ManifestError::NotFound(path.to_path_buf()));
        }
        let root_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

        let malformed = |message: String| ManifestError::Malformed {
            path: path.to_path_buf(),
            message,
        };
        let raw: RawManifest = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .build()
            .and_then(|config| config.try_deserialize::<RawManifest>())
            .map_err(|e| malformed(e.to_string()))?;

        let name = raw
            .module
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ManifestError::MissingModuleName(path.to_path_buf()))?;

        let parameters = raw
            .parameters
            .into_iter()
            .map(parameter_spec)
            .collect::<Result<Vec<_>, _>>()?;

        let changelogs_dir = root_dir.join(
            raw.changelogs_directory
                .as_deref()
                .unwrap_or(DEFAULT_CHANGELOGS_DIRECTORY),
        );
        let changesets = discover_changesets(&changelogs_dir)?;

        log::debug!(
            "loaded manifest {} for module {name}: {} parameter(s), {} role(s), {} changeset(s)",
            path.display(),
            parameters.len(),
            raw.roles.len(),
            changesets.len()
        );

        ModuleConfiguration::new(name, root_dir, parameters, raw.roles, changesets)
    }
}

fn parameter_spec(raw: RawParameter) -> Result<ParameterSpec, ManifestError> {
    let default = match raw.default {
        None => None,
        Some(value) => Some(value.coerce(raw.kind).ok_or_else(|| {
            ManifestError::InvalidDefault {
                name: raw.name.clone(),
                expected: raw.kind,
                value: value.to_string(),
            }
        })?),
    };
    Ok(ParameterSpec {
        name: raw.name,
        kind: raw.kind,
        default,
        description: raw.description,
    })
}
