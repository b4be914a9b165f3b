//! Transaction guard used by every mutating operation of the upgrade core.
//!
//! A [`Transaction`] issues `BEGIN` on creation and must be finished with
//! [`Transaction::commit`]. Dropping it while still open issues `ROLLBACK`, so
//! an early return through `?` never leaves a half-applied upgrade behind.

use crate::executor::{timed, DbError, PgExecutor};
use may_postgres::types::ToSql;
use may_postgres::{Client, Row};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// A database transaction
///
/// # Examples
///
/// ```no_run
/// use tmmt::{connect, PgClientExecutor, PgExecutor};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let executor = PgClientExecutor::new(connect("host=localhost user=postgres dbname=tww")?);
/// let transaction = executor.begin()?;
/// transaction.execute("CREATE SCHEMA IF NOT EXISTS tww_od", &[])?;
/// transaction.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction {
    client: Client,
    closed: bool,
}

impl Transaction {
    /// Start a transaction on the given client
    ///
    /// # Errors
    ///
    /// Returns `DbError` if `BEGIN` fails.
    pub fn begin(client: Client) -> Result<Self, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        client.execute("BEGIN", &[]).map_err(DbError::from)?;
        Ok(Self {
            client,
            closed: false,
        })
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is already closed or `COMMIT` fails.
    pub fn commit(mut self) -> Result<(), DbError> {
        if self.closed {
            return Err(DbError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        // Marked closed first: a failed COMMIT already ended the transaction server-side
        self.closed = true;
        self.client.execute("COMMIT", &[]).map_err(DbError::from)?;
        Ok(())
    }

    /// Roll back the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is already closed or `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<(), DbError> {
        if self.closed {
            return Err(DbError::TransactionClosed);
        }
        self.rollback_in_place()
    }

    fn rollback_in_place(&mut self) -> Result<(), DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();

        self.closed = true;
        self.client.execute("ROLLBACK", &[]).map_err(DbError::from)?;
        Ok(())
    }

    /// Check if the transaction is closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.closed {
            Err(DbError::TransactionClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.rollback_in_place() {
                log::warn!("rollback of abandoned transaction failed: {e}");
            }
        }
    }
}

impl PgExecutor for Transaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        self.ensure_open()?;
        timed(query, || self.client.execute(query, params))
    }

    fn batch_execute(&self, script: &str) -> Result<(), DbError> {
        self.ensure_open()?;
        timed(script, || self.client.batch_execute(script))
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError> {
        self.ensure_open()?;
        timed(query, || self.client.query_one(query, params))
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        self.ensure_open()?;
        timed(query, || self.client.query(query, params))
    }
}
