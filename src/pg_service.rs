//! Named PostgreSQL service profiles (`pg_service.conf`).
//!
//! `may_postgres` does not understand `service=` in a conninfo string, so the
//! profile is resolved here and rendered back into plain key/value conninfo.

use config::{Config, File, FileFormat};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("no pg_service.conf found (checked PGSERVICEFILE, ~/.pg_service.conf and PGSYSCONFDIR)")]
    NoServiceFile,
    #[error("failed to read service file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
    #[error("service '{0}' is not defined in the service file")]
    UnknownService(String),
}

/// Connection settings of one service profile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    pub host: Option<String>,
    pub port: Option<String>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Remaining keys (sslmode, connect_timeout, ...), passed through verbatim
    pub extra: BTreeMap<String, String>,
}

impl ServiceConfig {
    fn from_entries(name: &str, mut entries: HashMap<String, String>) -> Self {
        let mut take = |key: &str| entries.remove(key);
        let host = take("host");
        let port = take("port");
        let dbname = take("dbname");
        let user = take("user");
        let password = take("password");
        Self {
            name: name.to_string(),
            host,
            port,
            dbname,
            user,
            password,
            extra: entries.into_iter().collect(),
        }
    }

    /// Render as a key/value conninfo string
    pub fn to_conninfo(&self) -> String {
        let mut parts = Vec::new();
        let known = [
            ("host", &self.host),
            ("port", &self.port),
            ("dbname", &self.dbname),
            ("user", &self.user),
            ("password", &self.password),
        ];
        for (key, value) in known {
            if let Some(value) = value {
                parts.push(format!("{key}={}", quote_conninfo_value(value)));
            }
        }
        for (key, value) in &self.extra {
            parts.push(format!("{key}={}", quote_conninfo_value(value)));
        }
        parts.join(" ")
    }
}

fn quote_conninfo_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Location of the service file, following libpq's lookup order
pub fn conf_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PGSERVICEFILE") {
        return Some(PathBuf::from(path));
    }

    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
    if let Some(home) = home {
        let user_file = Path::new(&home).join(".pg_service.conf");
        if user_file.exists() {
            return Some(user_file);
        }
    }

    if let Ok(dir) = std::env::var("PGSYSCONFDIR") {
        let system_file = Path::new(&dir).join("pg_service.conf");
        if system_file.exists() {
            return Some(system_file);
        }
    }

    None
}

/// Parse every profile of a service file
pub fn read_services(path: &Path) -> Result<BTreeMap<String, ServiceConfig>, ServiceError> {
    let unreadable = |message: String| ServiceError::Unreadable {
        path: path.to_path_buf(),
        message,
    };

    let settings = Config::builder()
        .add_source(File::from(path).format(FileFormat::Ini))
        .build()
        .map_err(|e| unreadable(e.to_string()))?;

    let sections: HashMap<String, HashMap<String, String>> = settings
        .try_deserialize()
        .map_err(|e| unreadable(e.to_string()))?;

    Ok(sections
        .into_iter()
        .map(|(name, entries)| {
            let service = ServiceConfig::from_entries(&name, entries);
            (name, service)
        })
        .collect())
}

/// Names of all services in the default service file
pub fn service_names() -> Result<Vec<String>, ServiceError> {
    let path = conf_path().ok_or(ServiceError::NoServiceFile)?;
    Ok(read_services(&path)?.into_keys().collect())
}

/// Look up one service in the default service file
pub fn service_config(name: &str) -> Result<ServiceConfig, ServiceError> {
    let path = conf_path().ok_or(ServiceError::NoServiceFile)?;
    lookup(&read_services(&path)?, name)
}

/// Look up one service in an explicit service file
pub fn service_config_from(path: &Path, name: &str) -> Result<ServiceConfig, ServiceError> {
    lookup(&read_services(path)?, name)
}

fn lookup(
    services: &BTreeMap<String, ServiceConfig>,
    name: &str,
) -> Result<ServiceConfig, ServiceError> {
    // Section names may come back case-folded from the INI reader
    services
        .get(name)
        .or_else(|| {
            services
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, service)| service)
        })
        .map(|service| ServiceConfig {
            name: name.to_string(),
            ..service.clone()
        })
        .ok_or_else(|| ServiceError::UnknownService(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn service_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".conf").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_services() {
        let file = service_file(
            "[tww_demo]\nhost=localhost\nport=5432\ndbname=tww\nuser=postgres\nsslmode=disable\n\n[other]\nhost=db.example.org\n",
        );
        let services = read_services(file.path()).unwrap();
        assert_eq!(services.len(), 2);

        let demo = service_config_from(file.path(), "tww_demo").unwrap();
        assert_eq!(demo.host.as_deref(), Some("localhost"));
        assert_eq!(demo.dbname.as_deref(), Some("tww"));
        assert_eq!(demo.extra.get("sslmode").map(String::as_str), Some("disable"));
    }

    #[test]
    fn test_unknown_service() {
        let file = service_file("[tww_demo]\nhost=localhost\n");
        let err = service_config_from(file.path(), "missing").unwrap_err();
        assert!(matches!(err, ServiceError::UnknownService(name) if name == "missing"));
    }

    #[test]
    fn test_to_conninfo_quotes_values() {
        let service = ServiceConfig {
            name: "s".into(),
            host: Some("localhost".into()),
            dbname: Some("tww".into()),
            password: Some("it's secret".into()),
            ..Default::default()
        };
        assert_eq!(
            service.to_conninfo(),
            "host=localhost dbname=tww password='it\\'s secret'"
        );
    }
}
