//! Error types for the database access layer.
//!
//! Pool and executor failures carry the kind callers branch on (`PoolClosed`,
//! `NotInitialized`, `TransactionFailed`, ...); raw driver failures keep their
//! SQLSTATE so callers can decide whether to retry.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Database access is not initialized: the connection pool has been shut down")]
    NotInitialized,

    #[error("Query failed: {message}")]
    QueryFailed {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Update failed: {message}")]
    UpdateFailed {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Transaction failed: {message} (transaction: {transaction_id})")]
    TransactionFailed {
        message: String,
        transaction_id: String,
        sql_state: Option<String>,
    },

    #[error("Interrupted while waiting for a connection")]
    Interrupted,

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Column not found: {column}")]
    ColumnNotFound { column: String },

    #[error("Mapping error: {message}")]
    Mapping { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// SQLSTATE / driver codes that signal a transient conflict worth retrying.
const RETRYABLE_SQL_STATES: &[&str] = &[
    "40001", // serialization failure (also MySQL deadlock)
    "40P01", // PostgreSQL deadlock detected
    "5",     // SQLITE_BUSY
];

impl DbError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// A failure that leaves the session unusable; the pool discards the connection.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn column_not_found(column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            column: column.into(),
        }
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Re-tag a raw database error with the operation that hit it. Errors of
    /// any other kind (handler errors, pool errors) pass through unchanged.
    fn retag(self, tag: impl FnOnce(String, Option<String>) -> Self) -> Self {
        match self {
            Self::Database {
                message, sql_state, ..
            } => tag(message, sql_state),
            other => other,
        }
    }

    pub fn into_query_failed(self) -> Self {
        self.retag(|message, sql_state| Self::QueryFailed { message, sql_state })
    }

    pub fn into_update_failed(self) -> Self {
        self.retag(|message, sql_state| Self::UpdateFailed { message, sql_state })
    }

    pub fn into_transaction_failed(self, transaction_id: &str) -> Self {
        self.retag(|message, sql_state| Self::TransactionFailed {
            message,
            transaction_id: transaction_id.to_string(),
            sql_state,
        })
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::PoolClosed | Self::NotInitialized => {
                Some("Create a new DbAccess; a closed pool cannot be reopened")
            }
            _ => None,
        }
    }

    /// SQLSTATE (or driver error code) of the underlying database failure.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. }
            | Self::QueryFailed { sql_state, .. }
            | Self::UpdateFailed { sql_state, .. }
            | Self::TransactionFailed { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Nothing is retried automatically; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        if matches!(self, Self::Connection { .. }) {
            return true;
        }
        self.sql_state()
            .is_some_and(|state| RETRYABLE_SQL_STATES.contains(&state))
    }
}

/// Convert sqlx errors to DbError.
///
/// Errors that leave the session unusable become `Connection`, which the
/// driver uses to mark the connection closed so the pool discards it.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;

        let suggestion = match &err {
            E::Configuration(_) => "Check the connection string format and credentials",
            E::Io(_) | E::WorkerCrashed => "Check network connectivity and database server status",
            E::Tls(_) => "Verify TLS configuration and certificates",
            E::Protocol(_) => "Check database server compatibility",
            E::Database(_) => "Check the SQL syntax and referenced objects",
            E::RowNotFound => "Verify the query conditions match existing data",
            _ => "",
        };

        match err {
            E::Database(db_err) => DbError::database(
                db_err.message(),
                db_err.code().map(|c| c.into_owned()),
                suggestion,
            ),
            E::RowNotFound => DbError::database("No rows returned", None, suggestion),
            E::PoolClosed => DbError::PoolClosed,
            E::ColumnNotFound(column) => DbError::column_not_found(column),
            E::Configuration(_)
            | E::Io(_)
            | E::Tls(_)
            | E::Protocol(_)
            | E::WorkerCrashed => DbError::connection(err.to_string(), suggestion),
            E::ColumnIndexOutOfBounds { .. } | E::ColumnDecode { .. } | E::Decode(_) => {
                DbError::mapping(err.to_string())
            }
            other => DbError::internal(format!("Unexpected database error: {}", other)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
