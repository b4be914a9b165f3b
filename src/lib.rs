//! # tmmt
//!
//! Module management for PostgreSQL data models: install and upgrade a
//! module's schema from versioned SQL changesets, grant its roles, and fetch
//! published versions of the module.
//!
//! - [`migration`]: manifest, changesets, baseline bookkeeping, [`Upgrader`](migration::Upgrader)
//! - [`registry`]: known modules and their versions on the source-hosting API
//! - [`package`]: downloading and extracting a version into a package directory
//! - [`connection`] / [`pg_service`]: opening connections, `pg_service.conf` profiles

pub mod config;
pub mod connection;
pub mod executor;
pub mod metrics;
pub mod migration;
pub mod package;
pub mod pg_service;
pub mod registry;
pub mod transaction;

pub use config::TmmtConfig;
pub use connection::{connect, connect_service, validate_connection_string, ConnectionError};
pub use executor::{DbError, PgClientExecutor, PgExecutor};
pub use transaction::Transaction;
