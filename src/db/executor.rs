//! Query execution on pooled connections.
//!
//! `DbAccess` owns one [`ConnectionPool`] and runs every operation on a
//! connection checked out for that operation alone:
//! - `execute_select`: run a query and hand a cursor to a row handler
//! - `execute_update`: run one auto-committed statement
//! - `execute_in_transaction`: run a body inside a serializable transaction
//! - `metadata`: describe the database behind the pool
//!
//! Each operation returns its connection to the pool exactly once, on every
//! exit path. Session state an operation changes (auto-commit, isolation) is
//! restored before the connection goes back; if restoring fails, or the
//! operation is cancelled halfway, the connection is discarded instead.

use crate::config::AccessConfig;
use crate::db::bootstrap;
use crate::db::connection::{Connection, Driver};
use crate::db::cursor::Cursor;
use crate::db::driver::SqlxDriver;
use crate::db::pool::{ConnectionPool, PoolStatus};
use crate::db::transaction::{TransactionScope, generate_transaction_id};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectTarget, IsolationLevel, Metadata};
use futures_util::future::BoxFuture;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Database access over a bounded connection pool.
pub struct DbAccess<D: Driver = SqlxDriver> {
    pool: RwLock<Option<ConnectionPool<D>>>,
    /// Masked connection URL, for logs
    url: String,
}

impl DbAccess<SqlxDriver> {
    /// Create an executor for one of the sqlx-backed databases.
    ///
    /// No connection is opened until the first operation.
    pub fn new(config: AccessConfig) -> DbResult<Self> {
        let driver = SqlxDriver::for_driver_id(&config.driver)?;
        Self::with_driver(driver, &config)
    }
}

impl<D: Driver> DbAccess<D> {
    /// Create an executor over any driver.
    pub fn with_driver(driver: D, config: &AccessConfig) -> DbResult<Self> {
        config.validate()?;
        bootstrap::ensure_loaded(&driver)?;

        let target = ConnectTarget::new(config.full_url(), config.credentials());
        let url = target.masked_url();
        let pool = ConnectionPool::new(driver, target, config.pool_size)?;

        info!(
            driver = %config.driver,
            url = %url,
            pool_size = config.pool_size,
            "Database access initialized"
        );
        Ok(Self {
            pool: RwLock::new(Some(pool)),
            url,
        })
    }

    /// The underlying pool; `NotInitialized` after [`close`](Self::close).
    pub fn pool(&self) -> DbResult<ConnectionPool<D>> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DbError::NotInitialized)
    }

    pub fn pool_status(&self) -> DbResult<PoolStatus> {
        Ok(self.pool()?.status())
    }

    /// Run a query and pass its cursor to `handler`.
    ///
    /// Database errors are reported as `QueryFailed`; errors returned by the
    /// handler propagate unchanged. The cursor is closed afterwards.
    pub async fn execute_select<T, F>(&self, sql: &str, handler: F) -> DbResult<T>
    where
        F: FnOnce(&mut Cursor) -> DbResult<T> + Send,
    {
        let pool = self.pool()?;
        let mut conn = pool.acquire().await?;

        debug!(connection_id = conn.id(), sql = %sql, "Executing select");
        let result = match conn.query(sql).await {
            Ok(rows) => {
                let mut cursor = Cursor::new(rows);
                let value = handler(&mut cursor);
                cursor.close();
                value
            }
            Err(e) => Err(e.into_query_failed()),
        };

        finish(result, pool.release(conn), "release connection")
    }

    /// Run one statement with auto-commit on, returning the affected row count.
    ///
    /// The connection's previous auto-commit setting is restored afterwards.
    pub async fn execute_update(&self, sql: &str) -> DbResult<u64> {
        let pool = self.pool()?;
        let mut conn = pool.acquire().await?;

        let prior_auto_commit = conn.auto_commit();
        conn.mark_dirty();
        debug!(connection_id = conn.id(), sql = %sql, "Executing update");

        let result = async {
            conn.set_auto_commit(true).await?;
            conn.execute(sql).await
        }
        .await
        .map_err(DbError::into_update_failed);

        let restored = conn.set_auto_commit(prior_auto_commit).await;
        if restored.is_ok() {
            conn.mark_clean();
        }
        let result = finish(result, restored, "restore auto-commit");

        finish(result, pool.release(conn), "release connection")
    }

    /// Run `body` inside a serializable transaction.
    ///
    /// The body gets a [`TransactionScope`] bound to one pooled connection.
    /// If the body succeeds the transaction is committed; if the body or the
    /// commit fails it is rolled back and the error returned, with database
    /// errors reported as `TransactionFailed`. Either way every cursor from the
    /// scope is closed and the connection's auto-commit and isolation level
    /// are restored before it is released.
    ///
    /// ```ignore
    /// let total = db
    ///     .execute_in_transaction(|tx| {
    ///         Box::pin(async move {
    ///             tx.execute_update("UPDATE accum SET value = value + 1 WHERE id = 1").await?;
    ///             let mut cursor = tx.execute_select("SELECT value FROM accum WHERE id = 1").await?;
    ///             cursor.advance()?;
    ///             cursor.get::<i64>("value")
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn execute_in_transaction<R, F>(&self, body: F) -> DbResult<R>
    where
        R: Send,
        F: for<'t> FnOnce(&'t mut TransactionScope<'_, D::Connection>) -> BoxFuture<'t, DbResult<R>>
            + Send,
    {
        let pool = self.pool()?;
        let mut conn = pool.acquire().await?;

        let transaction_id = generate_transaction_id();
        let connection_id = conn.id();
        let prior_auto_commit = conn.auto_commit();
        let prior_isolation = conn.isolation_level();
        conn.mark_dirty();

        debug!(
            transaction_id = %transaction_id,
            connection_id,
            prior_auto_commit,
            prior_isolation = %prior_isolation,
            "Starting transaction"
        );

        let setup = async {
            conn.set_isolation_level(IsolationLevel::Serializable).await?;
            conn.set_auto_commit(false).await
        }
        .await;

        let mut rollback_failed = false;
        let result = match setup {
            Err(e) => Err(e),
            Ok(()) => {
                let mut scope = TransactionScope::new(&mut *conn, transaction_id.clone());
                let outcome = body(&mut scope).await;
                let result = match outcome {
                    Ok(value) => scope.commit().await.map(|()| value),
                    Err(e) => Err(e),
                };

                let result = match result {
                    Ok(value) => {
                        debug!(
                            transaction_id = %transaction_id,
                            statements = scope.statement_count(),
                            "Transaction committed"
                        );
                        Ok(value)
                    }
                    Err(e) => {
                        if let Err(rollback_err) = scope.rollback().await {
                            rollback_failed = true;
                            warn!(
                                transaction_id = %transaction_id,
                                error = %rollback_err,
                                "Rollback failed"
                            );
                        } else {
                            debug!(
                                transaction_id = %transaction_id,
                                error = %e,
                                "Transaction rolled back"
                            );
                        }
                        Err(e)
                    }
                };

                let open_cursors = scope.close_cursors();
                if open_cursors > 0 {
                    debug!(transaction_id = %transaction_id, open_cursors, "Closed cursors");
                }
                result
            }
        };
        let result = result.map_err(|e| e.into_transaction_failed(&transaction_id));

        // Restoring auto-commit on a session whose rollback failed could commit
        // the failed work; leave it dirty so the pool discards it.
        let result = if rollback_failed {
            result
        } else {
            let restored = async {
                conn.set_auto_commit(prior_auto_commit).await?;
                conn.set_isolation_level(prior_isolation).await
            }
            .await;
            if restored.is_ok() {
                conn.mark_clean();
            }
            finish(result, restored, "restore connection state")
        };

        finish(result, pool.release(conn), "release connection")
    }

    /// Driver and catalog metadata of the database.
    pub async fn metadata(&self) -> DbResult<Metadata> {
        let pool = self.pool()?;
        let mut conn = pool.acquire().await?;
        let result = conn.metadata().await.map_err(DbError::into_query_failed);
        finish(result, pool.release(conn), "release connection")
    }

    /// Shut the pool down, closing every connection.
    ///
    /// Waits for in-flight operations to hand their connections back. Later
    /// operations fail with `NotInitialized`; closing again does nothing.
    pub async fn close(&self) -> DbResult<()> {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match pool {
            Some(pool) => {
                info!(url = %self.url, "Closing database access");
                pool.shutdown().await
            }
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<D: Driver> std::fmt::Debug for DbAccess<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbAccess")
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Combine an operation's result with a cleanup step; the first failure wins.
fn finish<T>(result: DbResult<T>, cleanup: DbResult<()>, step: &str) -> DbResult<T> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup_err)) => {
            warn!(step, error = %cleanup_err, "Cleanup failed after earlier error");
            Err(e)
        }
    }
}
