//! Data models for the database access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    ConnectTarget, Credentials, DatabaseType, IsolationLevel, Metadata, mask_url,
};
pub use query::{ResultSet, Value};
