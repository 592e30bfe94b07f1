use std::{future::Future, pin::Pin, time::Duration};

use sea_orm::{DatabaseTransaction, IsolationLevel, TransactionTrait};
use thiserror::Error;

use crate::error::QueryError;

/// Limits for an interactive transaction.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Forwarded to the driver when the transaction begins. SQLite ignores it.
    pub isolation_level: Option<IsolationLevel>,
    /// How long to wait for a connection and `BEGIN`.
    pub max_wait: Duration,
    /// How long the transaction body may run before it is rolled back.
    pub timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation_level: None,
            max_wait: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
        }
    }
}

impl TransactionOptions {
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Error)]
pub enum TransactionError<E> {
    #[error("could not start a transaction within {0:?}")]
    MaxWaitExceeded(Duration),

    #[error("transaction did not finish within {0:?} and was rolled back")]
    TimedOut(Duration),

    #[error(transparent)]
    Database(QueryError),

    #[error("transaction aborted: {0}")]
    Aborted(E),
}

impl<E> TransactionError<E>
where
    E: From<QueryError>,
{
    /// Folds every failure into the body's own error type.
    pub fn into_inner(self) -> E {
        match self {
            TransactionError::Aborted(err) => err,
            TransactionError::Database(err) => err.into(),
            TransactionError::MaxWaitExceeded(limit) => {
                QueryError::Timeout(format!("transaction start exceeded {limit:?}")).into()
            }
            TransactionError::TimedOut(limit) => {
                QueryError::Timeout(format!("transaction exceeded {limit:?}")).into()
            }
        }
    }
}

/// Runs `body` inside a transaction. `Ok` commits, `Err` and timeouts roll back.
pub async fn run_transaction<C, F, T, E>(
    db: &C,
    options: TransactionOptions,
    body: F,
) -> Result<T, TransactionError<E>>
where
    C: TransactionTrait,
    F: for<'c> FnOnce(
            &'c DatabaseTransaction,
        ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
        + Send,
    T: Send,
    E: Send,
{
    let txn = tokio::time::timeout(
        options.max_wait,
        db.begin_with_config(options.isolation_level, None),
    )
    .await
    .map_err(|_| TransactionError::MaxWaitExceeded(options.max_wait))?
    .map_err(|err| TransactionError::Database(err.into()))?;

    let outcome = tokio::time::timeout(options.timeout, body(&txn)).await;

    match outcome {
        Ok(Ok(value)) => {
            txn.commit()
                .await
                .map_err(|err| TransactionError::Database(err.into()))?;
            Ok(value)
        }
        Ok(Err(err)) => {
            if let Err(rollback) = txn.rollback().await {
                tracing::warn!(error = %rollback, "rollback after aborted transaction failed");
            }
            Err(TransactionError::Aborted(err))
        }
        Err(_) => {
            tracing::warn!(timeout = ?options.timeout, "transaction timed out, rolling back");
            if let Err(rollback) = txn.rollback().await {
                tracing::warn!(error = %rollback, "rollback after timeout failed");
            }
            Err(TransactionError::TimedOut(options.timeout))
        }
    }
}
