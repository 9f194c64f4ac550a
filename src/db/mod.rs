//! Connection pooling.
//!
//! - [`handle`]: the contract every pooled connection type implements
//! - [`sql_handle`]: sqlx-backed handles for MySQL, PostgreSQL and SQLite
//! - [`pool`]: one bounded pool per logical database
//! - [`registry`]: name to pool map with lazy creation
//! - [`guard`]: scoped acquisition that always releases

#[macro_use]
pub mod macros;
pub mod guard;
pub mod handle;
pub mod pool;
pub(crate) mod record;
pub mod registry;
pub mod sql_handle;

pub use guard::ConnectionGuard;
pub use handle::ConnectionHandle;
pub use pool::{Lease, Pool};
pub use record::{AffinityTag, RecordKey};
pub use registry::PoolRegistry;
pub use sql_handle::{DbConnection, SqlHandle};
