//! Bounded connection pool.
//!
//! One [`Pool`] serves one logical database. It lends out handles through
//! [`Pool::acquire`] / [`Pool::release`] and reclaims idle ones with a periodic sweep.
//!
//! # Locking
//!
//! - All record state lives behind a single `std::sync::Mutex`, so [`Pool::release`]
//!   stays synchronous and can run from `Drop`
//! - The mutex is never held across an await point. Handle I/O (open, probe, close)
//!   happens on a record that is already reserved: marked in use, or counted as
//!   `opening` while a brand new handle connects
//! - Waiters park on a `tokio::sync::Notify`. Interest is registered before the state
//!   is inspected, so a release between the check and the wait is never lost
//!
//! # Capacity
//!
//! `records + opening <= max_connections` after every operation. Lowering the limit
//! below the current record count never evicts in-use records; surplus idle records
//! are removed by the next sweep.

use crate::config::{AffinityPolicy, PoolConfig};
use crate::db::handle::ConnectionHandle;
use crate::db::record::{AffinityTag, ConnectionRecord, RecordKey};
use crate::error::{PoolError, PoolResult};
use crate::models::PoolStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A handle lent out by [`Pool::acquire`]. Hand it back with [`Pool::release`].
#[derive(Debug)]
pub struct Lease<C> {
    key: RecordKey,
    handle: C,
}

impl<C> Lease<C> {
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn handle(&self) -> &C {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut C {
        &mut self.handle
    }
}

struct PoolState<C> {
    records: HashMap<RecordKey, ConnectionRecord<C>>,
    /// Slots reserved by connections currently being opened.
    opening: usize,
    max_connections: usize,
    closed: bool,
}

impl<C: ConnectionHandle> PoolState<C> {
    fn has_capacity(&self) -> bool {
        self.records.len() + self.opening < self.max_connections
    }

    /// Check out the first idle record accepted by `matches`.
    fn check_out_idle(
        &mut self,
        matches: impl Fn(&AffinityTag) -> bool,
    ) -> Option<(RecordKey, C)> {
        let key = self
            .records
            .iter()
            .find(|(_, r)| r.is_idle() && r.handle.is_some() && matches(&r.affinity))
            .map(|(k, _)| k.clone())?;
        let handle = self.records.get_mut(&key)?.check_out()?;
        Some((key, handle))
    }
}

enum Next<C> {
    Verify(RecordKey, C),
    Open,
    Wait,
}

enum Slot {
    Opening,
    Record(RecordKey),
}

/// Undoes a capacity reservation unless the acquire that made it completes.
///
/// Covers both failed opens and acquire futures dropped mid-I/O.
struct Reservation<'a, C: ConnectionHandle> {
    pool: &'a Pool<C>,
    slot: Option<Slot>,
}

impl<'a, C: ConnectionHandle> Reservation<'a, C> {
    fn opening(pool: &'a Pool<C>) -> Self {
        Self {
            pool,
            slot: Some(Slot::Opening),
        }
    }

    fn record(pool: &'a Pool<C>, key: RecordKey) -> Self {
        Self {
            pool,
            slot: Some(Slot::Record(key)),
        }
    }

    /// Keep the reservation: the record stays checked out by the caller.
    fn keep(mut self) {
        self.slot = None;
    }

    /// Turn an opening slot into a registered, checked-out record.
    /// Returns `None` if the pool was closed meanwhile.
    fn register(mut self, affinity: &AffinityTag) -> Option<RecordKey> {
        self.slot = None;
        let mut state = self.pool.lock_state();
        state.opening -= 1;
        if state.closed {
            drop(state);
            self.pool.released.notify_one();
            return None;
        }
        let key = RecordKey::generate();
        state
            .records
            .insert(key.clone(), ConnectionRecord::checked_out(affinity.clone()));
        Some(key)
    }
}

impl<C: ConnectionHandle> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        {
            let mut state = self.pool.lock_state();
            match slot {
                Slot::Opening => state.opening -= 1,
                Slot::Record(key) => {
                    state.records.remove(&key);
                }
            }
        }
        self.pool.released.notify_one();
    }
}

/// A bounded pool of connection handles for one logical database.
pub struct Pool<C: ConnectionHandle> {
    name: String,
    options: C::Options,
    config: PoolConfig,
    state: Mutex<PoolState<C>>,
    /// Signalled once per freed slot or idle record.
    released: Notify,
    /// Sweeper task handle. Uses std::sync::Mutex so Drop can abort it.
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ConnectionHandle> Pool<C> {
    /// Create a pool and start its background sweeper.
    ///
    /// Must be called from within a Tokio runtime. The sweeper holds a weak
    /// reference and stops when the pool is closed or dropped.
    pub fn new(
        name: impl Into<String>,
        options: C::Options,
        config: PoolConfig,
    ) -> PoolResult<Arc<Self>> {
        let pool = Self::with_manual_sweep(name, options, config)?;

        let weak_pool = Arc::downgrade(&pool);
        let sweep_interval = pool.config.sweep_interval;
        let handle = tokio::spawn(async move {
            Self::sweep_task(weak_pool, sweep_interval).await;
        });
        *pool
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(pool)
    }

    /// Create a pool without a background sweeper. Call [`Pool::sweep`] yourself.
    pub fn with_manual_sweep(
        name: impl Into<String>,
        options: C::Options,
        config: PoolConfig,
    ) -> PoolResult<Arc<Self>> {
        config.validate()?;
        let name = name.into();
        info!(
            pool = %name,
            max_connections = config.max_connections,
            expire_timeout_ms = config.expire_timeout.as_millis() as u64,
            affinity = %config.affinity,
            "Created connection pool"
        );
        Ok(Arc::new(Self {
            name,
            options,
            state: Mutex::new(PoolState {
                records: HashMap::new(),
                opening: 0,
                max_connections: config.max_connections,
                closed: false,
            }),
            config,
            released: Notify::new(),
            sweeper: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &C::Options {
        &self.options
    }

    /// Configuration the pool was created with. See [`Pool::max_connections`]
    /// for the live capacity.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Default wait bound for callers that do not choose their own.
    pub fn acquire_timeout(&self) -> Duration {
        self.config.acquire_timeout
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire a verified, open handle.
    ///
    /// Reuses an idle record tagged with `affinity` when one exists, otherwise opens
    /// a new connection while under capacity, otherwise waits up to `timeout` for a
    /// release. A zero timeout still makes one full pass before failing.
    ///
    /// # Errors
    ///
    /// - `OpenFailure` if a new handle cannot be opened or a dead one reopened
    /// - `AcquireTimeout` if the pool stayed full for the whole timeout
    /// - `PoolClosed` after [`Pool::close`]
    pub async fn acquire(
        &self,
        affinity: &AffinityTag,
        timeout: Duration,
    ) -> PoolResult<Lease<C>> {
        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + Duration::from_secs(86_400 * 365));

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut state = self.lock_state();
                if state.closed {
                    return Err(PoolError::pool_closed(&self.name));
                }
                if let Some((key, handle)) = state.check_out_idle(|tag| tag == affinity) {
                    Next::Verify(key, handle)
                } else if state.has_capacity() {
                    state.opening += 1;
                    Next::Open
                } else if self.config.affinity == AffinityPolicy::Prefer {
                    match state.check_out_idle(|_| true) {
                        Some((key, handle)) => Next::Verify(key, handle),
                        None => Next::Wait,
                    }
                } else {
                    Next::Wait
                }
            };

            match next {
                Next::Verify(key, handle) => return self.verify(key, handle, affinity).await,
                Next::Open => return self.open_new(affinity).await,
                Next::Wait => {}
            }

            let now = Instant::now();
            if now >= deadline {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                debug!(pool = %self.name, affinity = %affinity, waited_ms, "Acquire timed out");
                return Err(PoolError::acquire_timeout(&self.name, waited_ms));
            }

            // Woken by a release, a sweep or a capacity change; the loop re-checks everything.
            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    /// Probe a checked-out record, reopening it in place if it is dead.
    async fn verify(
        &self,
        key: RecordKey,
        mut handle: C,
        affinity: &AffinityTag,
    ) -> PoolResult<Lease<C>> {
        let reservation = Reservation::record(self, key.clone());

        if !handle.is_open() || !handle.probe().await {
            warn!(pool = %self.name, key = %key, "Connection failed liveness check, reopening");
            if let Err(e) = handle.close().await {
                debug!(pool = %self.name, key = %key, error = %e, "Close of dead connection failed");
            }
            if let Err(e) = Self::open_handle(&mut handle).await {
                warn!(pool = %self.name, key = %key, error = %e, "Reopen failed, dropping record");
                return Err(PoolError::open_failure(&self.name, e.to_string()));
            }
        }

        reservation.keep();
        debug!(pool = %self.name, key = %key, affinity = %affinity, "Reused connection");
        Ok(Lease { key, handle })
    }

    /// Open a brand new handle in a slot reserved by the caller.
    async fn open_new(&self, affinity: &AffinityTag) -> PoolResult<Lease<C>> {
        let reservation = Reservation::opening(self);

        let mut handle = C::new(&self.options);
        if let Err(e) = Self::open_handle(&mut handle).await {
            warn!(pool = %self.name, error = %e, "Failed to open connection");
            return Err(PoolError::open_failure(&self.name, e.to_string()));
        }

        let Some(key) = reservation.register(affinity) else {
            if let Err(e) = handle.close().await {
                debug!(pool = %self.name, error = %e, "Close after pool shutdown failed");
            }
            return Err(PoolError::pool_closed(&self.name));
        };

        debug!(pool = %self.name, key = %key, affinity = %affinity, "Opened new connection");
        Ok(Lease { key, handle })
    }

    async fn open_handle(handle: &mut C) -> PoolResult<()> {
        handle.open().await?;
        if let Err(e) = handle.apply_session_settings().await {
            let _ = handle.close().await;
            return Err(e);
        }
        Ok(())
    }

    /// Return a leased handle and wake one waiter.
    ///
    /// Releasing a record the pool no longer knows (removed by [`Pool::close`], or a
    /// lease from another pool) is logged and otherwise ignored; the handle is dropped.
    pub fn release(&self, lease: Lease<C>) {
        if let Err(e) = self.try_release(lease) {
            warn!(pool = %self.name, error = %e, "Ignoring release of unknown record");
        }
    }

    /// Like [`Pool::release`], but reports an unknown record as `UnknownRecord`.
    pub fn try_release(&self, lease: Lease<C>) -> PoolResult<()> {
        let Lease { key, handle } = lease;
        {
            let mut state = self.lock_state();
            match state.records.get_mut(&key) {
                Some(record) if record.in_use => record.check_in(handle),
                _ => return Err(PoolError::unknown_record(key.as_str())),
            }
        }
        self.released.notify_one();
        debug!(pool = %self.name, key = %key, "Released connection");
        Ok(())
    }

    /// Close and remove idle records older than the expiry threshold, plus the
    /// least recently used idle records above a lowered capacity.
    ///
    /// In-use records are never touched. Returns the number of records removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expire_timeout = self.config.expire_timeout;

        let removed: Vec<(RecordKey, Option<C>)> = {
            let mut state = self.lock_state();
            let mut keys: Vec<RecordKey> = state
                .records
                .iter()
                .filter(|(_, r)| r.is_expired(now, expire_timeout))
                .map(|(k, _)| k.clone())
                .collect();

            let remaining = state.records.len() - keys.len();
            if remaining > state.max_connections {
                let surplus = remaining - state.max_connections;
                let mut idle: Vec<(&RecordKey, Instant)> = state
                    .records
                    .iter()
                    .filter(|(k, r)| r.is_idle() && !keys.contains(*k))
                    .map(|(k, r)| (k, r.last_used))
                    .collect();
                idle.sort_by_key(|(_, last_used)| *last_used);
                let evict: Vec<RecordKey> = idle
                    .into_iter()
                    .take(surplus)
                    .map(|(k, _)| k.clone())
                    .collect();
                keys.extend(evict);
            }

            keys.into_iter()
                .filter_map(|key| state.records.remove(&key).map(|r| (key, r.handle)))
                .collect()
        };

        let count = removed.len();
        for (key, handle) in removed {
            // Each removal frees a slot for one waiter.
            self.released.notify_one();
            let Some(mut handle) = handle else {
                continue;
            };
            match handle.close().await {
                Ok(()) => info!(pool = %self.name, key = %key, "Closed idle connection"),
                Err(e) => warn!(
                    pool = %self.name,
                    key = %key,
                    error = %e,
                    "Failed to close idle connection, record removed anyway"
                ),
            }
        }

        count
    }

    /// Change the capacity. Raising it wakes every waiter; lowering it leaves
    /// in-use records alone and lets the next sweep trim idle ones.
    pub fn set_max_connections(&self, max_connections: usize) -> PoolResult<()> {
        if max_connections == 0 {
            return Err(PoolError::invalid_config(
                "max_connections must be greater than 0",
            ));
        }
        let previous = {
            let mut state = self.lock_state();
            std::mem::replace(&mut state.max_connections, max_connections)
        };
        info!(pool = %self.name, previous, max_connections, "Changed pool capacity");
        if max_connections > previous {
            self.released.notify_waiters();
        }
        Ok(())
    }

    pub fn max_connections(&self) -> usize {
        self.lock_state().max_connections
    }

    /// Number of registered records, idle and in use.
    pub fn record_count(&self) -> usize {
        self.lock_state().records.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Snapshot of the pool's counts.
    pub fn status(&self) -> PoolStatus {
        let state = self.lock_state();
        let in_use = state.records.values().filter(|r| r.in_use).count();
        PoolStatus {
            name: self.name.clone(),
            max_connections: state.max_connections,
            total: state.records.len(),
            idle: state.records.len() - in_use,
            in_use,
            opening: state.opening,
            closed: state.closed,
            captured_at: chrono::Utc::now(),
        }
    }

    /// Stop the sweeper, close every idle handle and fail all current and future
    /// acquires with `PoolClosed`. Handles still lent out are dropped on release.
    pub async fn close(&self) {
        self.stop_sweeper();

        let handles: Vec<C> = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state
                .records
                .drain()
                .filter_map(|(_, record)| record.handle)
                .collect()
        };
        self.released.notify_waiters();

        for mut handle in handles {
            if let Err(e) = handle.close().await {
                warn!(pool = %self.name, error = %e, "Failed to close connection during shutdown");
            }
        }
        info!(pool = %self.name, "Connection pool closed");
    }

    fn stop_sweeper(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = sweeper.take() {
            handle.abort();
        }
    }

    /// Background task running [`Pool::sweep`] every `sweep_interval`.
    ///
    /// Uses a Weak reference so the task never keeps its pool alive.
    async fn sweep_task(weak_pool: Weak<Self>, sweep_interval: Duration) {
        let mut interval = tokio::time::interval(sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;

            let Some(pool) = weak_pool.upgrade() else {
                debug!("Connection pool dropped, sweeper exiting");
                return;
            };
            let removed = pool.sweep().await;
            if removed > 0 {
                debug!(pool = %pool.name, removed, "Sweep pass finished");
            }
            // Drop strong reference before sleeping to allow pool deallocation
            drop(pool);
        }
    }
}

impl<C: ConnectionHandle> Drop for Pool<C> {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

impl<C: ConnectionHandle> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
