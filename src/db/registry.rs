//! Process-wide map from database name to pool.
//!
//! The registry is an explicit object: create one at startup, share it behind an
//! `Arc`, and call [`PoolRegistry::close_all`] on shutdown. Pools are created lazily
//! on first [`PoolRegistry::resolve`] and live until then.
//!
//! # Single instance per name
//!
//! Construction happens outside the registry lock to keep it short. Concurrent
//! first resolves may each build a pool, but the write lock re-checks the map and
//! every loser closes its candidate and returns the winner, so callers only ever
//! observe one pool per name.

use crate::config::{DEFAULT_POOL_NAME, PoolConfig};
use crate::db::handle::ConnectionHandle;
use crate::db::pool::Pool;
use crate::error::{PoolError, PoolResult};
use crate::models::PoolStatus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct PoolSettings<O> {
    options: O,
    config: PoolConfig,
}

pub struct PoolRegistry<C: ConnectionHandle> {
    settings: RwLock<HashMap<String, PoolSettings<C::Options>>>,
    pools: RwLock<HashMap<String, Arc<Pool<C>>>>,
}

impl<C: ConnectionHandle> PoolRegistry<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            settings: RwLock::new(HashMap::new()),
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Register driver options and limits for a database name.
    ///
    /// Must happen before the first resolve of that name. Reconfiguring a name whose
    /// pool is already running is rejected.
    pub async fn configure(
        &self,
        name: impl Into<String>,
        options: C::Options,
        config: PoolConfig,
    ) -> PoolResult<()> {
        let name = name.into();
        config.validate()?;

        if self.pools.read().await.contains_key(&name) {
            return Err(PoolError::invalid_config(format!(
                "Pool '{}' is already running; close it before reconfiguring",
                name
            )));
        }

        debug!(pool = %name, "Registered pool configuration");
        self.settings
            .write()
            .await
            .insert(name, PoolSettings { options, config });
        Ok(())
    }

    /// Get the pool for `name`, creating it on first use.
    pub async fn resolve(&self, name: &str) -> PoolResult<Arc<Pool<C>>> {
        // Fast path
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(name) {
                return Ok(Arc::clone(pool));
            }
        }

        let settings = self
            .settings
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::not_configured(name))?;

        // Build outside the registry lock
        let candidate = Pool::new(name, settings.options, settings.config)?;

        Ok(self.install(name, candidate).await)
    }

    /// Insert a freshly built pool unless another caller got there first, in which
    /// case the candidate is closed and the running pool returned.
    async fn install(&self, name: &str, candidate: Arc<Pool<C>>) -> Arc<Pool<C>> {
        // Re-check after construction to prevent a duplicate pool
        let (pool, redundant) = {
            let mut pools = self.pools.write().await;
            match pools.get(name) {
                Some(existing) => (Arc::clone(existing), Some(candidate)),
                None => {
                    pools.insert(name.to_string(), Arc::clone(&candidate));
                    (candidate, None)
                }
            }
        }; // Lock released here

        if let Some(redundant) = redundant {
            debug!(pool = %name, "Concurrent resolve detected, discarding redundant pool");
            redundant.close().await;
        }

        pool
    }

    /// Resolve the pool registered under [`DEFAULT_POOL_NAME`].
    pub async fn resolve_default(&self) -> PoolResult<Arc<Pool<C>>> {
        self.resolve(DEFAULT_POOL_NAME).await
    }

    /// Get a running pool without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<Pool<C>>> {
        self.pools.read().await.get(name).cloned()
    }

    /// Names of the running pools.
    pub async fn pool_names(&self) -> Vec<String> {
        let pools = self.pools.read().await;
        pools.keys().cloned().collect()
    }

    /// Number of running pools.
    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.read().await.is_empty()
    }

    /// Status of every running pool.
    pub async fn status_all(&self) -> Vec<PoolStatus> {
        let pools = self.pools.read().await;
        pools.values().map(|pool| pool.status()).collect()
    }

    /// Close every pool and forget them. Configuration is kept, so a later resolve
    /// starts a fresh pool.
    pub async fn close_all(&self) {
        // Drain under lock, close outside lock
        let pools: Vec<(String, Arc<Pool<C>>)> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        };

        for (name, pool) in pools {
            info!(pool = %name, "Closing connection pool");
            pool.close().await;
        }
        info!("All connection pools closed");
    }
}

impl<C: ConnectionHandle> Default for PoolRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ConnectionHandle> std::fmt::Debug for PoolRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry").finish_non_exhaustive()
    }
}
