//! Retrying execution strategy.
//!
//! Operations are passed as closures that receive the connection and return
//! a boxed future, so the strategy can run them again after a transient
//! failure:
//!
//! ```rust,ignore
//! let strategy = RetryingExecutionStrategy::new(RetryPolicy::default());
//! let rows = strategy
//!     .execute(&mut connection, |conn| {
//!         let command = command.clone();
//!         Box::pin(async move { command.execute_non_query(conn, CommandArgs::new()).await })
//!     })
//!     .await?;
//! ```

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::config::RetryPolicy;
use crate::connection::RelationalConnection;
use crate::error::{Error, Result};
use crate::transaction::IsolationLevel;

type TransientPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Runs operations with retries on transient errors.
#[derive(Clone)]
pub struct RetryingExecutionStrategy {
    policy: RetryPolicy,
    is_transient: TransientPredicate,
}

impl RetryingExecutionStrategy {
    /// A strategy that retries errors for which [`Error::is_transient`] holds.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            is_transient: Arc::new(Error::is_transient),
        }
    }

    /// Replace the transient-error predicate.
    #[must_use]
    pub fn with_transient_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.is_transient = Arc::new(predicate);
        self
    }

    /// The retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        !matches!(error, Error::Cancelled) && self.policy.should_retry(attempt) && (self.is_transient)(error)
    }

    async fn wait_before_retry(&self, attempt: u32, error: &Error) {
        let delay = self.policy.backoff_for_attempt(attempt);
        tracing::debug!(
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying after transient failure"
        );
        tokio::time::sleep(delay).await;
    }

    /// Run `operation`, retrying it on transient errors.
    ///
    /// Inside a user transaction the operation runs exactly once: a retry
    /// would replay only part of the transaction.
    pub async fn execute<T, F>(&self, connection: &mut RelationalConnection, mut operation: F) -> Result<T>
    where
        F: for<'a> FnMut(&'a mut RelationalConnection) -> BoxFuture<'a, Result<T>>,
    {
        if connection.current_transaction().is_some() {
            tracing::debug!(
                connection_id = %connection.id(),
                "a transaction is current; running without retries"
            );
            return operation(&mut *connection).await;
        }

        let mut attempt = 0;
        loop {
            match operation(&mut *connection).await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, attempt) => {
                    attempt += 1;
                    self.wait_before_retry(attempt, &e).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run `operation` inside a transaction and commit it, retrying the
    /// whole unit on transient errors.
    ///
    /// When the commit itself fails, `verify_succeeded` runs on the
    /// connection; if it reports that the work was persisted, the result
    /// of `operation` is returned.
    pub async fn execute_in_transaction<T, F, V>(
        &self,
        connection: &mut RelationalConnection,
        isolation_level: IsolationLevel,
        mut operation: F,
        mut verify_succeeded: V,
    ) -> Result<T>
    where
        F: for<'a> FnMut(&'a mut RelationalConnection) -> BoxFuture<'a, Result<T>>,
        V: for<'a> FnMut(&'a mut RelationalConnection) -> BoxFuture<'a, Result<bool>>,
    {
        let mut attempt = 0;
        loop {
            match self
                .attempt_in_transaction(connection, isolation_level, &mut operation, &mut verify_succeeded)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, attempt) => {
                    attempt += 1;
                    self.wait_before_retry(attempt, &e).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_in_transaction<T, F, V>(
        &self,
        connection: &mut RelationalConnection,
        isolation_level: IsolationLevel,
        operation: &mut F,
        verify_succeeded: &mut V,
    ) -> Result<T>
    where
        F: for<'a> FnMut(&'a mut RelationalConnection) -> BoxFuture<'a, Result<T>>,
        V: for<'a> FnMut(&'a mut RelationalConnection) -> BoxFuture<'a, Result<bool>>,
    {
        connection.start_transaction(isolation_level, None).await?;

        let value = match operation(&mut *connection).await {
            Ok(value) => value,
            Err(e) => {
                abandon_transaction(connection).await;
                return Err(e);
            }
        };

        match connection.commit_transaction(None).await {
            Ok(()) => Ok(value),
            Err(commit_error) => {
                abandon_transaction(connection).await;
                if verify_succeeded(&mut *connection).await? {
                    tracing::debug!(
                        connection_id = %connection.id(),
                        error = %commit_error,
                        "commit failed but the work was verified as persisted"
                    );
                    Ok(value)
                } else {
                    Err(commit_error)
                }
            }
        }
    }
}

/// Roll back whatever transaction is still current, disposing it if the
/// rollback fails.
async fn abandon_transaction(connection: &mut RelationalConnection) {
    if connection.current_transaction().is_none() {
        return;
    }
    if let Err(e) = connection.rollback_transaction(None).await {
        tracing::debug!(error = %e, "rollback after failed attempt also failed");
        connection.dispose_transaction();
    }
}

impl fmt::Debug for RetryingExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingExecutionStrategy")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
