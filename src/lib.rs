//! Database access library.
//!
//! A bounded connection pool plus an executor that runs selects,
//! auto-committed updates and serializable transactions against SQL
//! databases (MySQL/MariaDB, PostgreSQL, SQLite), always returning each
//! connection to the pool with its session state restored.

pub mod config;
pub mod db;
pub mod error;
pub mod mapper;
pub mod models;

pub use config::{AccessConfig, Config};
pub use db::{Cursor, DbAccess, TransactionScope};
pub use error::{DbError, DbResult};
