//! Driver seam.
//!
//! The pool and the executor only talk to a database through these two
//! traits. `SqlxDriver` is the production implementation; tests plug in an
//! in-memory one.

use crate::error::DbResult;
use crate::models::{ConnectTarget, IsolationLevel, Metadata, ResultSet};
use std::future::Future;

/// A live, stateful database session.
///
/// Auto-commit semantics: while auto-commit is off, the first statement opens
/// a transaction at the current isolation level and `commit`/`rollback` end
/// it. Turning auto-commit back on commits an open transaction. `commit` and
/// `rollback` without an open transaction do nothing.
pub trait Connection: Send + Sized + 'static {
    fn auto_commit(&self) -> bool;

    fn set_auto_commit(&mut self, enabled: bool) -> impl Future<Output = DbResult<()>> + Send;

    fn isolation_level(&self) -> IsolationLevel;

    /// Applies to the next transaction this session opens.
    fn set_isolation_level(
        &mut self,
        level: IsolationLevel,
    ) -> impl Future<Output = DbResult<()>> + Send;

    /// Run a statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str) -> impl Future<Output = DbResult<u64>> + Send;

    /// Run a query and fetch every row.
    fn query(&mut self, sql: &str) -> impl Future<Output = DbResult<ResultSet>> + Send;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn metadata(&mut self) -> impl Future<Output = DbResult<Metadata>> + Send;

    /// True once the session is known to be unusable.
    fn is_closed(&self) -> bool;

    fn close(self) -> impl Future<Output = DbResult<()>> + Send;
}

/// Factory for connections of one kind.
pub trait Driver: Send + Sync + 'static {
    type Connection: Connection;

    /// Identifier used for one-time bootstrap (e.g. `mysql`).
    fn name(&self) -> &str;

    /// One-time, process-wide initialization. Called through
    /// [`crate::db::bootstrap::ensure_loaded`].
    fn load(&self) -> DbResult<()> {
        Ok(())
    }

    /// Quote an identifier for this driver's SQL dialect.
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn connect(
        &self,
        target: &ConnectTarget,
    ) -> impl Future<Output = DbResult<Self::Connection>> + Send;
}
