//! Idle-time tracking for region entry expiration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks when each region entry was last read or written.
///
/// Owned by the region and guarded by the region's lock.
#[derive(Debug, Default)]
pub struct IdleTracker {
    last_used: HashMap<String, Instant>,

    /// Idle timeout. `None` disables expiration.
    timeout: Option<Duration>,
}

impl IdleTracker {
    /// Create a tracker with the given idle timeout.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            last_used: HashMap::new(),
            timeout,
        }
    }

    /// Record a read or write of an entry.
    pub fn touch(&mut self, key: &str) {
        if self.timeout.is_some() {
            self.last_used.insert(key.to_string(), Instant::now());
        }
    }

    /// Whether an entry has been idle past the timeout.
    ///
    /// Untracked keys are never idle.
    pub fn is_idle(&self, key: &str) -> bool {
        self.is_idle_at(key, Instant::now())
    }

    fn is_idle_at(&self, key: &str, now: Instant) -> bool {
        match (self.timeout, self.last_used.get(key)) {
            (Some(timeout), Some(last)) => now.saturating_duration_since(*last) > timeout,
            _ => false,
        }
    }

    /// Stop tracking an entry.
    pub fn remove(&mut self, key: &str) {
        self.last_used.remove(key);
    }

    /// Remove and return every idle key.
    pub fn drain_idle(&mut self) -> Vec<String> {
        if self.timeout.is_none() {
            return Vec::new();
        }
        let now = Instant::now();
        let idle: Vec<String> = self
            .last_used
            .keys()
            .filter(|key| self.is_idle_at(key, now))
            .cloned()
            .collect();
        for key in &idle {
            self.last_used.remove(key);
        }
        idle
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.last_used.len()
    }

    /// Whether no entries are tracked.
    pub fn is_empty(&self) -> bool {
        self.last_used.is_empty()
    }

    /// The idle timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
