//! Per-module advisory locking
//!
//! Upgrades and role runs of the same module serialise on a transaction-level
//! advisory lock. The lock lives as long as the surrounding transaction, so
//! commit and rollback both release it and there is nothing to clean up.

use crate::executor::{DbError, PgExecutor};
use std::thread;
use std::time::{Duration, Instant};

/// First key of every module lock ("TMMT")
pub const LOCK_CLASS_ID: i32 = 0x544D_4D54;

/// First key of the bookkeeping table lock ("TMMB"), shared by all modules
pub const TABLE_LOCK_CLASS_ID: i32 = 0x544D_4D42;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("module {module} is locked by another session (waited {waited:?})")]
    Contention { module: String, waited: Duration },
    #[error(transparent)]
    Database(#[from] DbError),
}

fn try_lock(executor: &dyn PgExecutor, module: &str) -> Result<bool, DbError> {
    let row = executor.query_one(
        "SELECT pg_try_advisory_xact_lock($1::int4, hashtext($2))",
        &[&LOCK_CLASS_ID, &module],
    )?;
    Ok(row.try_get(0)?)
}

/// Take the module lock inside the current transaction
///
/// Polls every 100 ms until `timeout` has elapsed; a zero timeout makes a
/// single attempt.
///
/// # Errors
///
/// `LockError::Contention` if another session still holds the lock.
pub fn acquire_module_lock(
    executor: &dyn PgExecutor,
    module: &str,
    timeout: Duration,
) -> Result<(), LockError> {
    let start = Instant::now();
    loop {
        if try_lock(executor, module)? {
            log::debug!("acquired lock for module {module}");
            return Ok(());
        }

        let waited = start.elapsed();
        if waited >= timeout {
            #[cfg(feature = "metrics")]
            crate::metrics::METRICS.record_lock_contention(module);
            return Err(LockError::Contention {
                module: module.to_string(),
                waited,
            });
        }
        log::debug!("module {module} is locked, retrying");
        thread::sleep(POLL_INTERVAL.min(timeout - waited));
    }
}

/// Serialise creation of a bookkeeping table shared by several modules
///
/// Module locks do not exclude each other, so two modules installing into a
/// fresh database would race on the catalog. Blocks until free; released with
/// the transaction.
pub fn lock_bookkeeping_table(executor: &dyn PgExecutor, qualified_table: &str) -> Result<(), DbError> {
    executor.execute(
        "SELECT pg_advisory_xact_lock($1::int4, hashtext($2))",
        &[&TABLE_LOCK_CLASS_ID, &qualified_table],
    )?;
    log::debug!("acquired creation lock for {qualified_table}");
    Ok(())
}

/// Whether any session currently holds the module lock
pub fn is_module_locked(executor: &dyn PgExecutor, module: &str) -> Result<bool, DbError> {
    let row = executor.query_one(
        "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_locks \
         WHERE locktype = 'advisory' AND classid::int4 = $1::int4 \
         AND objid::int4 = hashtext($2) AND granted)",
        &[&LOCK_CLASS_ID, &module],
    )?;
    Ok(row.try_get(0)?)
}
