//! Scoped connection acquisition.

use crate::config::DEFAULT_POOL_NAME;
use crate::db::handle::ConnectionHandle;
use crate::db::pool::{Lease, Pool};
use crate::db::record::{AffinityTag, RecordKey};
use crate::db::registry::PoolRegistry;
use crate::error::{PoolError, PoolResult};
use std::sync::Arc;
use std::time::Duration;

/// RAII guard over one leased connection.
///
/// The connection goes back to its pool exactly once: on [`ConnectionGuard::release`]
/// or when the guard is dropped, whichever comes first. Release is synchronous, so
/// the record is idle again as soon as the guard's scope ends, including early
/// returns and unwinding.
///
/// A guard whose acquisition failed holds no connection and reports why through
/// [`ConnectionGuard::failure`].
///
/// # Usage
///
/// ```ignore
/// let mut guard = ConnectionGuard::acquire(&registry, "account", None).await;
/// let conn = guard.connection_mut().ok_or_else(|| "no connection available")?;
/// // use conn; it is released when `guard` goes out of scope
/// ```
pub struct ConnectionGuard<C: ConnectionHandle> {
    pool: Option<Arc<Pool<C>>>,
    lease: Option<Lease<C>>,
    failure: Option<PoolError>,
}

impl<C: ConnectionHandle> ConnectionGuard<C> {
    /// Resolve `name` through the registry and acquire a connection for the
    /// current thread, waiting up to `timeout` or the pool's default.
    pub async fn acquire(
        registry: &PoolRegistry<C>,
        name: &str,
        timeout: Option<Duration>,
    ) -> Self {
        match registry.resolve(name).await {
            Ok(pool) => Self::from_pool(pool, &AffinityTag::current(), timeout).await,
            Err(e) => Self {
                pool: None,
                lease: None,
                failure: Some(e),
            },
        }
    }

    /// Same as [`ConnectionGuard::acquire`] for the default database.
    pub async fn acquire_default(registry: &PoolRegistry<C>, timeout: Option<Duration>) -> Self {
        Self::acquire(registry, DEFAULT_POOL_NAME, timeout).await
    }

    async fn from_pool(
        pool: Arc<Pool<C>>,
        affinity: &AffinityTag,
        timeout: Option<Duration>,
    ) -> Self {
        let timeout = timeout.unwrap_or_else(|| pool.acquire_timeout());
        match pool.acquire(affinity, timeout).await {
            Ok(lease) => Self {
                pool: Some(pool),
                lease: Some(lease),
                failure: None,
            },
            Err(e) => Self {
                pool: Some(pool),
                lease: None,
                failure: Some(e),
            },
        }
    }

    /// Check if the guard holds a connection.
    pub fn is_held(&self) -> bool {
        self.lease.is_some()
    }

    /// Why acquisition failed, if it did.
    pub fn failure(&self) -> Option<&PoolError> {
        self.failure.as_ref()
    }

    pub fn key(&self) -> Option<&RecordKey> {
        self.lease.as_ref().map(Lease::key)
    }

    pub fn connection(&self) -> Option<&C> {
        self.lease.as_ref().map(Lease::handle)
    }

    pub fn connection_mut(&mut self) -> Option<&mut C> {
        self.lease.as_mut().map(Lease::handle_mut)
    }

    /// The pool this guard acquired from, if resolution succeeded.
    pub fn pool(&self) -> Option<&Arc<Pool<C>>> {
        self.pool.as_ref()
    }

    /// Turn a failed guard into its error, for use with `?`.
    pub fn into_result(mut self) -> PoolResult<Self> {
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    /// Release the connection now instead of at end of scope.
    pub fn release(mut self) {
        self.release_lease();
    }

    fn release_lease(&mut self) {
        if let (Some(pool), Some(lease)) = (&self.pool, self.lease.take()) {
            pool.release(lease);
        }
    }
}

impl<C: ConnectionHandle> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        self.release_lease();
    }
}

impl<C: ConnectionHandle> std::fmt::Debug for ConnectionGuard<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("pool", &self.pool.as_ref().map(|p| p.name()))
            .field("key", &self.key())
            .field("failure", &self.failure)
            .finish()
    }
}

impl<C: ConnectionHandle> Pool<C> {
    /// Acquire a guarded connection, failing with the acquisition error.
    ///
    /// `timeout` defaults to the pool's configured acquire timeout.
    pub async fn guard(
        self: &Arc<Self>,
        affinity: &AffinityTag,
        timeout: Option<Duration>,
    ) -> PoolResult<ConnectionGuard<C>> {
        ConnectionGuard::from_pool(Arc::clone(self), affinity, timeout)
            .await
            .into_result()
    }
}
