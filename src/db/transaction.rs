//! Connection-scoped executor handed to transaction bodies.

use crate::db::connection::Connection;
use crate::db::cursor::Cursor;
use crate::error::DbResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Statements issued through a scope run, in order, inside one transaction
/// on one pooled connection. The scope only lives for the duration of the
/// body passed to `DbAccess::execute_in_transaction`.
pub struct TransactionScope<'c, C: Connection> {
    conn: &'c mut C,
    transaction_id: String,
    cursors: Vec<Arc<AtomicBool>>,
    statements: usize,
}

impl<'c, C: Connection> TransactionScope<'c, C> {
    pub(crate) fn new(conn: &'c mut C, transaction_id: String) -> Self {
        Self {
            conn,
            transaction_id,
            cursors: Vec::new(),
            statements: 0,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Number of statements issued so far.
    pub fn statement_count(&self) -> usize {
        self.statements
    }

    /// Run a statement, returning the number of affected rows.
    pub async fn execute_update(&mut self, sql: &str) -> DbResult<u64> {
        self.statements += 1;
        debug!(
            transaction_id = %self.transaction_id,
            statement = self.statements,
            sql = %sql,
            "Executing update in transaction"
        );
        self.conn.execute(sql).await
    }

    /// Run a query. The cursor is closed when the transaction ends.
    pub async fn execute_select(&mut self, sql: &str) -> DbResult<Cursor> {
        self.statements += 1;
        debug!(
            transaction_id = %self.transaction_id,
            statement = self.statements,
            sql = %sql,
            "Executing select in transaction"
        );
        let result = self.conn.query(sql).await?;
        let closed = Arc::new(AtomicBool::new(false));
        self.cursors.push(Arc::clone(&closed));
        Ok(Cursor::with_close_flag(result, closed))
    }

    pub(crate) async fn commit(&mut self) -> DbResult<()> {
        self.conn.commit().await
    }

    pub(crate) async fn rollback(&mut self) -> DbResult<()> {
        self.conn.rollback().await
    }

    /// Close every cursor opened in this scope. Returns how many were still open.
    pub(crate) fn close_cursors(&mut self) -> usize {
        self.cursors
            .drain(..)
            .filter(|closed| !closed.swap(true, Ordering::AcqRel))
            .count()
    }
}

/// Generate a unique transaction ID.
pub(crate) fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32); // "tx_" + 32 hex chars
        assert_ne!(id, generate_transaction_id());
    }
}
