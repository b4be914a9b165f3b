//! Tool settings.
//!
//! [`TmmtConfig::load`] reads `config/tmmt.toml` (optional) and `TMMT__*`
//! environment variables, e.g. `TMMT__TOOL__LOCK_TIMEOUT_SECONDS=30`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE: &str = "config/tmmt.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct TmmtConfig {
    /// Source-hosting REST API root
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    /// How long an upgrade waits for another process holding the module lock; 0 fails fast
    #[serde(default)]
    pub lock_timeout_seconds: u64,
    #[serde(default = "default_bookkeeping_schema")]
    pub bookkeeping_schema: String,
    #[serde(default = "default_bookkeeping_table")]
    pub bookkeeping_table: String,
    /// Parent directory for scratch space; the system temp dir when unset
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl Default for TmmtConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            http_timeout_seconds: default_http_timeout_seconds(),
            lock_timeout_seconds: 0,
            bookkeeping_schema: default_bookkeeping_schema(),
            bookkeeping_table: default_bookkeeping_table(),
            work_dir: None,
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    60
}

fn default_bookkeeping_schema() -> String {
    "public".to_string()
}

fn default_bookkeeping_table() -> String {
    "tmmt_migrations".to_string()
}

impl TmmtConfig {
    /// Load the tool configuration from `config/tmmt.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix("TMMT").separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // The file exists but could not be read or parsed: retry with env only
                if std::path::Path::new(CONFIG_FILE).exists() {
                    log::warn!("failed to load {CONFIG_FILE}, falling back to env: {err}");
                }
                Config::builder()
                    .add_source(Environment::with_prefix("TMMT").separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        match settings.get::<TmmtConfig>("tool") {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(ConfigError::Message(format!(
                "Tool configuration could not be loaded from file or environment: {e}"
            ))),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TmmtConfig::default();
        assert_eq!(config.bookkeeping_schema, "public");
        assert_eq!(config.bookkeeping_table, "tmmt_migrations");
        assert_eq!(config.lock_timeout(), Duration::ZERO);
        assert_eq!(config.http_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_section_uses_field_defaults() {
        let settings = Config::builder()
            .add_source(config::File::from_str(
                "[tool]\nlock_timeout_seconds = 30\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: TmmtConfig = settings.get("tool").unwrap();
        assert_eq!(config.lock_timeout_seconds, 30);
        assert_eq!(config.api_base_url, "https://api.github.com");
    }
}
