//! `Module` - a registered module and its known versions

use crate::registry::github::VersionSource;
use crate::registry::version::{ModuleVersion, OriginKind};
use crate::registry::RegistryError;
use std::sync::{Arc, PoisonError, RwLock};

/// One complete, immutable list of versions
///
/// A refresh builds a new snapshot and swaps it in; readers holding the
/// previous one keep a consistent view.
#[derive(Debug, Clone, Default)]
pub struct VersionSnapshot {
    versions: Vec<ModuleVersion>,
    latest: Option<usize>,
}

impl VersionSnapshot {
    /// Sort newest first and find the latest stable release
    pub fn new(mut versions: Vec<ModuleVersion>) -> Self {
        versions.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        let latest = versions
            .iter()
            .position(|v| v.origin() == OriginKind::Release && !v.is_prerelease());
        Self { versions, latest }
    }

    pub fn versions(&self) -> &[ModuleVersion] {
        &self.versions
    }

    /// Most recently created release that is not a prerelease
    pub fn latest(&self) -> Option<&ModuleVersion> {
        self.latest.map(|i| &self.versions[i])
    }

    pub fn find(&self, name: &str) -> Option<&ModuleVersion> {
        self.versions.iter().find(|v| v.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[derive(Debug)]
pub struct Module {
    name: String,
    organisation: String,
    repository: String,
    releases: RwLock<Arc<VersionSnapshot>>,
    development: RwLock<Arc<VersionSnapshot>>,
}

impl Module {
    pub fn new(
        name: impl Into<String>,
        organisation: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            organisation: organisation.into(),
            repository: repository.into(),
            releases: RwLock::default(),
            development: RwLock::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn organisation(&self) -> &str {
        &self.organisation
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Current release snapshot
    pub fn versions(&self) -> Arc<VersionSnapshot> {
        self.releases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current branches and pull requests snapshot
    pub fn development_versions(&self) -> Arc<VersionSnapshot> {
        self.development
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn latest(&self) -> Option<ModuleVersion> {
        self.versions().latest().cloned()
    }

    /// Replace the release list wholesale
    pub fn load_versions(&self, source: &dyn VersionSource) -> Result<Arc<VersionSnapshot>, RegistryError> {
        let snapshot = Arc::new(VersionSnapshot::new(
            source.releases(&self.organisation, &self.repository)?,
        ));
        log::info!(
            "module {}: {} release(s) loaded",
            self.name,
            snapshot.versions().len()
        );
        *self.releases.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        Ok(snapshot)
    }

    /// Replace the development list (branches, then open pull requests) wholesale
    pub fn load_development_versions(
        &self,
        source: &dyn VersionSource,
    ) -> Result<Arc<VersionSnapshot>, RegistryError> {
        let mut versions = source.branches(&self.organisation, &self.repository)?;
        versions.extend(source.pull_requests(&self.organisation, &self.repository)?);
        let snapshot = Arc::new(VersionSnapshot::new(versions));
        *self.development.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        Ok(snapshot)
    }
}
