//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Driver seam (`Connection` / `Driver`) and the sqlx-backed driver
//! - Bounded connection pool
//! - Query, update and transaction execution
//! - Result cursors and type mappings
//! - Database dispatch macros for reducing code duplication
//! - One-time driver bootstrap

pub mod bootstrap;
pub mod connection;
pub mod cursor;
pub mod driver;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod pool;
pub mod transaction;
pub mod types;

pub use connection::{Connection, Driver};
pub use cursor::{ColumnIndex, Cursor, FromValue};
pub use driver::{DbConnection, SqlxConnection, SqlxDriver};
pub use executor::DbAccess;
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use transaction::TransactionScope;
