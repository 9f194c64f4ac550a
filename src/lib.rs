//! DB Connection Pool Library
//!
//! Bounded, per-database connection pools with connection reuse, liveness checks
//! before hand-out, idle expiry and scoped guards that always give connections back.
//! Ships with sqlx-backed handles for SQLite, PostgreSQL and MySQL; any type
//! implementing [`db::ConnectionHandle`] can be pooled.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{AffinityPolicy, Config, PoolConfig};
pub use db::{AffinityTag, ConnectionGuard, ConnectionHandle, Pool, PoolRegistry, SqlHandle};
pub use error::{PoolError, PoolResult};
