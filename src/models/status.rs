//! Point-in-time pool statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of a pool's record counts, taken under the pool lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatus {
    /// Logical database name the pool serves
    pub name: String,
    pub max_connections: usize,
    /// Registered records, idle and in use
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
    /// Connections being opened and not yet registered
    pub opening: usize,
    pub closed: bool,
    pub captured_at: DateTime<Utc>,
}

impl PoolStatus {
    /// Slots still available for new connections.
    pub fn available_capacity(&self) -> usize {
        self.max_connections
            .saturating_sub(self.total + self.opening)
    }

    /// Check if every slot is taken by a busy or opening connection.
    pub fn is_saturated(&self) -> bool {
        self.idle == 0 && self.available_capacity() == 0
    }
}
