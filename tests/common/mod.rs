//! Scripted in-memory connection handle shared by the integration tests.

#![allow(dead_code)]

use db_conn_pool::config::{AffinityPolicy, PoolConfig};
use db_conn_pool::db::ConnectionHandle;
use db_conn_pool::error::{PoolError, PoolResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counters and failure switches observed and flipped by tests.
#[derive(Debug, Default)]
pub struct Script {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub probes: AtomicUsize,
    /// Sessions currently open.
    pub live: AtomicUsize,
    /// Highest value `live` ever reached.
    pub max_live: AtomicUsize,
    /// Number of upcoming opens that fail.
    pub failing_opens: AtomicUsize,
    pub dead: AtomicBool,
    pub open_delay_ms: AtomicU64,
    /// Handle ids currently lent to a test body.
    pub held: Mutex<HashSet<usize>>,
    next_id: AtomicUsize,
}

impl Script {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn set_dead(&self, dead: bool) {
        self.dead.store(dead, Ordering::SeqCst);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.open_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Mark a handle as being used. Panics if another holder already has it.
    pub fn enter(&self, handle: &MockHandle) {
        let inserted = self.held.lock().unwrap().insert(handle.id);
        assert!(inserted, "handle {} lent to two holders", handle.id);
    }

    pub fn leave(&self, handle: &MockHandle) {
        self.held.lock().unwrap().remove(&handle.id);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    pub script: Arc<Script>,
}

#[derive(Debug)]
pub struct MockHandle {
    pub id: usize,
    script: Arc<Script>,
    open: bool,
}

impl ConnectionHandle for MockHandle {
    type Options = MockOptions;

    fn new(options: &MockOptions) -> Self {
        Self {
            id: options.script.next_id.fetch_add(1, Ordering::SeqCst),
            script: Arc::clone(&options.script),
            open: false,
        }
    }

    async fn open(&mut self) -> PoolResult<()> {
        self.close().await?;

        let delay = self.script.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = self
            .script
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(PoolError::database("scripted open failure"));
        }

        self.script.opens.fetch_add(1, Ordering::SeqCst);
        let live = self.script.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.max_live.fetch_max(live, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> PoolResult<()> {
        if self.open {
            self.open = false;
            self.script.closes.fetch_add(1, Ordering::SeqCst);
            self.script.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn probe(&mut self) -> bool {
        self.script.probes.fetch_add(1, Ordering::SeqCst);
        self.open && !self.script.dead.load(Ordering::SeqCst)
    }
}

pub fn config(max_connections: usize) -> PoolConfig {
    PoolConfig {
        max_connections,
        expire_timeout: Duration::from_secs(1),
        acquire_timeout: Duration::from_millis(200),
        sweep_interval: Duration::from_secs(3600),
        affinity: AffinityPolicy::Strict,
    }
}

pub fn options() -> (MockOptions, Arc<Script>) {
    let options = MockOptions::default();
    let script = Arc::clone(&options.script);
    (options, script)
}
