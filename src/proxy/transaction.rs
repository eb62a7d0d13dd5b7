//! Scoped transaction helper

use futures::future::BoxFuture;
use tracing::warn;

use crate::domain::{DomainError, Record, RecordKey, TxHandle};

use super::context::ProxyContext;

impl<K, V> ProxyContext<K, V>
where
    K: RecordKey,
    V: Record,
{
    /// Runs `body` inside a fresh transaction.
    ///
    /// Commits when `body` returns `Ok`, rolls back when it returns `Err`.
    /// A commit rejected with [`DomainError::Conflict`] re-runs the whole
    /// body in a new transaction, up to `max_attempts` times in total.
    pub async fn run_in_transaction<T, F>(&self, mut body: F) -> Result<T, DomainError>
    where
        T: Send,
        F: for<'a> FnMut(&'a Self, &'a TxHandle) -> BoxFuture<'a, Result<T, DomainError>> + Send,
    {
        let attempts = self.options().max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let tx = self.begin_transaction().await?;

            let value = match body(self, &tx).await {
                Ok(value) => value,
                Err(e) => {
                    if let Err(rollback_error) = self.rollback(&tx).await {
                        warn!(tx = %tx, error = %rollback_error, "caching: rollback failed");
                    }
                    return Err(e);
                }
            };

            match self.commit(&tx).await {
                Ok(()) => return Ok(value),
                Err(e) if e.is_conflict() && attempt < attempts => {
                    warn!(tx = %tx, attempt, error = %e, "caching: commit conflict, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
