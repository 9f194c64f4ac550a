//! Data models for the connection pool.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod status;

// Re-export commonly used types
pub use connection::{ConnectOptions, DEFAULT_CONNECT_TIMEOUT_SECS, DatabaseType};
pub use status::PoolStatus;
