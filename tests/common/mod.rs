//! In-memory driver for pool and executor tests.
//!
//! Statements containing marker words change behavior:
//! - `FAIL`: fails with a database error (SQLSTATE 42000)
//! - `DISCONNECT`: fails with a connection error and marks the session closed
//! - `SLOW`: sleeps for 10 seconds first
//!
//! Every query returns one row: `connection_id`, `auto_commit`, `isolation`.

#![allow(dead_code)]

use db_access::config::AccessConfig;
use db_access::db::{Connection, Driver};
use db_access::error::{DbError, DbResult};
use db_access::models::{ConnectTarget, Credentials, IsolationLevel, Metadata, ResultSet, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FRESH_ISOLATION: IsolationLevel = IsolationLevel::RepeatableRead;

/// One executed statement as seen by the mock.
#[derive(Debug, Clone)]
pub struct Statement {
    pub connection_id: u64,
    pub sql: String,
    pub auto_commit: bool,
    pub isolation: IsolationLevel,
}

#[derive(Debug, Default)]
pub struct MockStats {
    next_id: AtomicU64,
    pub connects: AtomicUsize,
    pub loads: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub closed_ids: Mutex<Vec<u64>>,
    pub statements: Mutex<Vec<Statement>>,
    pub fail_connect: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_close: AtomicBool,
    /// Reject switching isolation to anything but SERIALIZABLE
    pub fail_isolation_restore: AtomicBool,
}

impl MockStats {
    pub fn closed_ids(&self) -> Vec<u64> {
        self.closed_ids.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.statements.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MockDriver {
    name: String,
    pub stats: Arc<MockStats>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stats: Arc::new(MockStats::default()),
        }
    }
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> DbResult<()> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, _target: &ConnectTarget) -> DbResult<MockConnection> {
        tokio::task::yield_now().await;
        if self.stats.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::connection("mock connect refused", "start the mock"));
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id: self.stats.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            stats: Arc::clone(&self.stats),
            auto_commit: true,
            isolation: FRESH_ISOLATION,
            in_transaction: false,
            closed: false,
        })
    }
}

#[derive(Debug)]
pub struct MockConnection {
    pub id: u64,
    stats: Arc<MockStats>,
    auto_commit: bool,
    isolation: IsolationLevel,
    in_transaction: bool,
    closed: bool,
}

impl MockConnection {
    async fn run(&mut self, sql: &str) -> DbResult<()> {
        if sql.contains("SLOW") {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        if sql.contains("DISCONNECT") {
            self.closed = true;
            return Err(DbError::connection("mock connection lost", "reconnect"));
        }
        self.stats.statements.lock().unwrap().push(Statement {
            connection_id: self.id,
            sql: sql.to_string(),
            auto_commit: self.auto_commit,
            isolation: self.isolation,
        });
        if sql.contains("FAIL") {
            return Err(DbError::database(
                "mock statement failed",
                Some("42000".to_string()),
                "fix the statement",
            ));
        }
        if !self.auto_commit {
            self.in_transaction = true;
        }
        Ok(())
    }

    fn end(&mut self, committed: bool) {
        if !self.in_transaction {
            return;
        }
        self.in_transaction = false;
        let counter = if committed {
            &self.stats.commits
        } else {
            &self.stats.rollbacks
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

impl Connection for MockConnection {
    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> DbResult<()> {
        if enabled && !self.auto_commit {
            self.end(true);
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> DbResult<()> {
        if level != IsolationLevel::Serializable
            && self.stats.fail_isolation_restore.load(Ordering::SeqCst)
        {
            return Err(DbError::internal("mock cannot change isolation"));
        }
        self.isolation = level;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        self.run(sql).await?;
        Ok(1)
    }

    async fn query(&mut self, sql: &str) -> DbResult<ResultSet> {
        self.run(sql).await?;
        Ok(ResultSet::new(
            vec![
                "connection_id".to_string(),
                "auto_commit".to_string(),
                "isolation".to_string(),
            ],
            vec![vec![
                Value::Int(self.id as i64),
                Value::Bool(self.auto_commit),
                Value::Text(self.isolation.as_sql().to_string()),
            ]],
        ))
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.in_transaction && self.stats.fail_commit.load(Ordering::SeqCst) {
            return Err(DbError::database(
                "mock serialization failure",
                Some("40001".to_string()),
                "retry the transaction",
            ));
        }
        self.end(true);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.end(false);
        Ok(())
    }

    async fn metadata(&mut self) -> DbResult<Metadata> {
        Ok(Metadata {
            driver_name: "mock".to_string(),
            product_name: "Mock".to_string(),
            product_version: "1.0".to_string(),
            url: "mock://pool".to_string(),
            user: None,
            default_isolation: FRESH_ISOLATION,
            tables: vec!["accum".to_string()],
        })
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(self) -> DbResult<()> {
        self.stats.closed_ids.lock().unwrap().push(self.id);
        if self.stats.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::internal("mock close failed"));
        }
        Ok(())
    }
}

pub fn target() -> ConnectTarget {
    ConnectTarget::new("mock://pool", Credentials::default())
}

pub fn config(pool_size: usize) -> AccessConfig {
    AccessConfig::new("mock", "mock", "mock://pool").with_pool_size(pool_size)
}

/// Let spawned close tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
