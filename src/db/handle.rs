//! The connection handle contract.
//!
//! A pool never talks to a database directly. It manages values implementing
//! [`ConnectionHandle`], which know how to open, probe and close one session.

use crate::error::PoolResult;
use std::fmt::Debug;
use std::future::Future;

/// One database session the pool can open, verify and close.
///
/// Handles are constructed unopened from the pool's stored options and are only
/// ever driven by one task at a time.
pub trait ConnectionHandle: Send + Sized + 'static {
    /// Driver parameters shared by every handle of a pool.
    type Options: Clone + Debug + Send + Sync + 'static;

    /// Construct a handle that is not yet open.
    fn new(options: &Self::Options) -> Self;

    /// Open the session. Opening an already open handle replaces the session.
    fn open(&mut self) -> impl Future<Output = PoolResult<()>> + Send;

    /// Close the session. Closing a closed handle is a no-op.
    fn close(&mut self) -> impl Future<Output = PoolResult<()>> + Send;

    fn is_open(&self) -> bool;

    /// Cheap round trip proving the session is still usable.
    fn probe(&mut self) -> impl Future<Output = bool> + Send;

    /// Re-apply session settings after an open. Must be idempotent.
    fn apply_session_settings(&mut self) -> impl Future<Output = PoolResult<()>> + Send {
        async { Ok(()) }
    }
}
