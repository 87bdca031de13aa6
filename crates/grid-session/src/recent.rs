//! Bounded, time-windowed memory of recently created session ids.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::RecentKeysConfig;

/// Remembers ids recently classified as new sessions.
///
/// Entries are kept in insertion order. Adding past capacity evicts the
/// oldest entry, and entries older than the ttl are purged whenever the
/// memory is read or written, so membership can lapse with time alone.
/// Lookups never consume an entry.
#[derive(Debug)]
pub struct RecentKeys {
    /// Id to enqueue time. Only `put`, `peek` and `pop_lru` are used, so
    /// LRU order is insertion order.
    entries: Mutex<LruCache<String, Instant>>,

    /// Maximum age of an entry.
    ttl: Duration,
}

impl RecentKeys {
    /// Create a memory holding at most `capacity` ids for at most `ttl`.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    /// Create a memory from configuration.
    pub fn from_config(config: &RecentKeysConfig) -> Self {
        Self::new(config.capacity, config.ttl())
    }

    /// Record an id as seen now.
    pub fn remember(&self, id: &str) {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        Self::insert(&mut entries, id);
    }

    /// Whether an id is currently remembered.
    pub fn contains(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        entries.contains(id)
    }

    /// Remember an id unless it is already known.
    ///
    /// Returns `true` when the id was not known and has now been recorded.
    /// The check and the insert happen under one lock, so among concurrent
    /// callers for the same id exactly one sees `true`.
    pub fn remember_if_absent(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        if entries.contains(id) {
            return false;
        }
        Self::insert(&mut entries, id);
        true
    }

    /// Drop an id so its next creation counts as new again.
    pub fn forget(&self, id: &str) -> bool {
        self.entries.lock().pop(id).is_some()
    }

    /// Number of remembered ids, after purging stale ones.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        entries.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Configured maximum age.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn insert(entries: &mut LruCache<String, Instant>, id: &str) {
        if let Some((evicted, _)) = entries.push(id.to_string(), Instant::now()) {
            if evicted != id {
                debug!(session_id = %evicted, "Evicted oldest recently created session id");
            }
        }
    }

    fn purge(&self, entries: &mut LruCache<String, Instant>) {
        while let Some((_, seen)) = entries.peek_lru() {
            if seen.elapsed() <= self.ttl {
                break;
            }
            entries.pop_lru();
        }
    }
}

impl Default for RecentKeys {
    fn default() -> Self {
        Self::from_config(&RecentKeysConfig::default())
    }
}
