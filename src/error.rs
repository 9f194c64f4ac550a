//! Error types for the connection pool.
//!
//! This module defines all error types using `thiserror`. Only `acquire` and the
//! registry surface errors to callers; release and the sweep log and move on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to open connection for pool '{pool}': {message}")]
    OpenFailure { pool: String, message: String },

    #[error("Timed out acquiring a connection from pool '{pool}' after {waited_ms}ms")]
    AcquireTimeout { pool: String, waited_ms: u64 },

    #[error("Unknown connection record: {key}")]
    UnknownRecord { key: String },

    #[error("Pool '{pool}' is closed")]
    PoolClosed { pool: String },

    #[error("No configuration registered for database '{name}'")]
    NotConfigured { name: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Database error: {message}")]
    Database { message: String },
}

impl PoolError {
    /// Create an open failure error.
    pub fn open_failure(pool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OpenFailure {
            pool: pool.into(),
            message: message.into(),
        }
    }

    /// Create an acquire timeout error.
    pub fn acquire_timeout(pool: impl Into<String>, waited_ms: u64) -> Self {
        Self::AcquireTimeout {
            pool: pool.into(),
            waited_ms,
        }
    }

    /// Create an unknown record error.
    pub fn unknown_record(key: impl Into<String>) -> Self {
        Self::UnknownRecord { key: key.into() }
    }

    /// Create a pool closed error.
    pub fn pool_closed(pool: impl Into<String>) -> Self {
        Self::PoolClosed { pool: pool.into() }
    }

    /// Create a not configured error.
    pub fn not_configured(name: impl Into<String>) -> Self {
        Self::NotConfigured { name: name.into() }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Check if the caller may reasonably retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AcquireTimeout { .. } | Self::OpenFailure { .. } | Self::Database { .. }
        )
    }
}

/// Convert sqlx errors to PoolError.
impl From<sqlx::Error> for PoolError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => PoolError::invalid_config(msg.to_string()),
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) => {
                    PoolError::database(format!("{} (SQLSTATE: {})", db_err.message(), code))
                }
                None => PoolError::database(db_err.message()),
            },
            sqlx::Error::Io(io_err) => PoolError::database(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => PoolError::database(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => PoolError::database(format!("Protocol error: {}", msg)),
            sqlx::Error::WorkerCrashed => PoolError::database("Database worker crashed"),
            _ => PoolError::database(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
