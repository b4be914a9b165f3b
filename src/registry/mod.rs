//! Registry of known modules and their published versions

pub mod github;
pub mod module;
pub mod version;

pub use github::{GithubClient, VersionSource};
pub use module::{Module, VersionSnapshot};
pub use version::{archive_url, ModuleVersion, OriginKind};

use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("module '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("module '{0}' is not registered")]
    NotFound(String),
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },
}

/// Modules by name
#[derive(Debug, Default)]
pub struct ModulesRegistry {
    modules: BTreeMap<String, Arc<Module>>,
}

impl ModulesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the TEKSI modules
    pub fn teksi() -> Self {
        let mut modules = BTreeMap::new();
        modules.insert(
            "tww".to_string(),
            Arc::new(Module::new("tww", "teksi", "wastewater")),
        );
        Self { modules }
    }

    pub fn register(&mut self, module: Module) -> Result<Arc<Module>, RegistryError> {
        if self.modules.contains_key(module.name()) {
            return Err(RegistryError::AlreadyRegistered(module.name().to_string()));
        }
        let module = Arc::new(module);
        self.modules
            .insert(module.name().to_string(), Arc::clone(&module));
        Ok(module)
    }

    pub fn unregister(&mut self, name: &str) -> Result<Arc<Module>, RegistryError> {
        self.modules
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<Arc<Module>, RegistryError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Registered modules in name order
    pub fn list(&self) -> Vec<Arc<Module>> {
        self.modules.values().cloned().collect()
    }
}
