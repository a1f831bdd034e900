//! Cache validity and capacity rules.
//!
//! Entries are trusted for 30 days from creation and for 7 days since their
//! last use. Invalid entries are removed lazily by the resolver when read.
//! Capacity is enforced on the write path: inserting a new key into a full
//! cache first evicts the least-recently-used fifth.

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::cache::CacheStore;
use super::types::{CacheEntry, CacheError};

pub const MAX_AGE_DAYS: i64 = 30;
pub const UNUSED_THRESHOLD_DAYS: i64 = 7;
pub const MAX_ENTRIES: u64 = 10_000;
pub const EVICTION_FRACTION: f64 = 0.2;

/// Outcome of a validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Fresh,
    /// Older than the maximum age.
    Expired,
    /// Not used within the unused threshold.
    Unused,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidityPolicy {
    pub max_age: Duration,
    pub unused_threshold: Duration,
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::days(MAX_AGE_DAYS),
            unused_threshold: Duration::days(UNUSED_THRESHOLD_DAYS),
        }
    }
}

impl ValidityPolicy {
    pub fn new(max_age: Duration, unused_threshold: Duration) -> Self {
        Self {
            max_age,
            unused_threshold,
        }
    }

    pub fn check(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Validity {
        if now - entry.created_at > self.max_age {
            Validity::Expired
        } else if now - entry.last_used_at > self.unused_threshold {
            Validity::Unused
        } else {
            Validity::Fresh
        }
    }

    pub fn is_valid(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.check(entry, now) == Validity::Fresh
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    pub max_entries: u64,
    pub fraction: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_entries: MAX_ENTRIES,
            fraction: EVICTION_FRACTION,
        }
    }
}

impl EvictionPolicy {
    pub fn new(max_entries: u64, fraction: f64) -> Self {
        Self {
            max_entries,
            fraction: fraction.clamp(0.0, 1.0),
        }
    }

    /// Rows removed per eviction pass. Never zero, so a full cache always makes room.
    pub fn batch_size(&self) -> u64 {
        ((self.max_entries as f64 * self.fraction).floor() as u64).max(1)
    }

    /// Run before inserting a key the store does not hold yet.
    /// Returns the number of evicted rows.
    pub async fn before_insert(&self, store: &dyn CacheStore) -> Result<u64, CacheError> {
        let count = store.count().await?;
        if count < self.max_entries {
            return Ok(0);
        }
        let removed = store.delete_oldest(self.batch_size()).await?;
        info!(
            "Cache at capacity ({}/{}), evicted {} least-recently-used entries",
            count, self.max_entries, removed
        );
        Ok(removed)
    }
}
