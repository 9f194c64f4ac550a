//! Pool-internal connection records.

use crate::db::handle::ConnectionHandle;
use serde::Serialize;
use tokio::time::{Duration, Instant};

/// Unique key of one record within a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RecordKey(String);

impl RecordKey {
    /// Generate a fresh, never reused key.
    pub fn generate() -> Self {
        Self(format!("conn_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity hint used to prefer handing a caller the record it used before.
///
/// Tags only steer reuse. They never grant exclusive access to a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AffinityTag(String);

impl AffinityTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Tag derived from the calling OS thread.
    pub fn current() -> Self {
        Self(format!("{:?}", std::thread::current().id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AffinityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A handle plus the metadata the pool keeps about it.
///
/// `handle` is `None` exactly while the record is lent out.
#[derive(Debug)]
pub(crate) struct ConnectionRecord<C> {
    pub(crate) handle: Option<C>,
    pub(crate) last_used: Instant,
    pub(crate) in_use: bool,
    pub(crate) affinity: AffinityTag,
}

impl<C: ConnectionHandle> ConnectionRecord<C> {
    /// A freshly opened record, already checked out by its creator.
    pub(crate) fn checked_out(affinity: AffinityTag) -> Self {
        Self {
            handle: None,
            last_used: Instant::now(),
            in_use: true,
            affinity,
        }
    }

    /// Mark the record as lent out and take its handle.
    pub(crate) fn check_out(&mut self) -> Option<C> {
        self.in_use = true;
        self.last_used = Instant::now();
        self.handle.take()
    }

    /// Return the handle and mark the record idle.
    pub(crate) fn check_in(&mut self, handle: C) {
        self.handle = Some(handle);
        self.in_use = false;
        self.last_used = Instant::now();
    }

    pub(crate) fn is_idle(&self) -> bool {
        !self.in_use
    }

    /// Check if the record sat idle for longer than `expire_timeout` as of `now`.
    pub(crate) fn is_expired(&self, now: Instant, expire_timeout: Duration) -> bool {
        self.is_idle() && now.saturating_duration_since(self.last_used) > expire_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolResult;

    #[derive(Debug, PartialEq)]
    struct Dummy(u32);

    impl ConnectionHandle for Dummy {
        type Options = u32;

        fn new(options: &u32) -> Self {
            Dummy(*options)
        }

        async fn open(&mut self) -> PoolResult<()> {
            Ok(())
        }

        async fn close(&mut self) -> PoolResult<()> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }

        async fn probe(&mut self) -> bool {
            true
        }
    }

    #[test]
    fn test_record_key_format() {
        let key = RecordKey::generate();
        assert!(key.as_str().starts_with("conn_"));
        assert_eq!(key.as_str().len(), 5 + 32); // "conn_" + 32 hex chars
        assert_ne!(key, RecordKey::generate());
    }

    #[test]
    fn test_current_affinity_is_stable_per_thread() {
        let here = AffinityTag::current();
        assert_eq!(here, AffinityTag::current());

        let elsewhere = std::thread::spawn(AffinityTag::current).join().unwrap();
        assert_ne!(here, elsewhere);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_out_and_in() {
        let mut record = ConnectionRecord::checked_out(AffinityTag::new("a"));
        assert!(!record.is_idle());

        record.check_in(Dummy(7));
        assert!(record.is_idle());

        tokio::time::advance(Duration::from_secs(5)).await;
        let handle = record.check_out();
        assert_eq!(handle, Some(Dummy(7)));
        assert!(record.handle.is_none());
        assert_eq!(record.last_used, Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_only_applies_to_idle_records() {
        let mut record: ConnectionRecord<Dummy> =
            ConnectionRecord::checked_out(AffinityTag::new("a"));
        let timeout = Duration::from_secs(60);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!record.is_expired(Instant::now(), timeout));

        record.check_in(Dummy(1));
        assert!(!record.is_expired(Instant::now(), timeout));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!record.is_expired(Instant::now(), timeout));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(record.is_expired(Instant::now(), timeout));
    }
}
