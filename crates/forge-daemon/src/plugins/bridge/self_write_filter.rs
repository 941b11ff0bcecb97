//! Self-write filter to prevent feedback loops
//!
//! When the bridge writes a file, it needs to filter out the subsequent
//! watcher event to avoid an infinite loop (write → watch → write → ...).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Self-write filter with TTL
///
/// Tracks paths recently written by the bridge with an expiration time.
/// Used to filter out watcher events triggered by the bridge's own writes.
#[derive(Debug)]
pub struct SelfWriteFilter {
    /// Map of path to expiration time
    entries: HashMap<PathBuf, Instant>,

    /// Time-to-live for entries (how long to filter events after a write)
    ttl: Duration,
}

impl SelfWriteFilter {
    /// Create a new filter with the specified TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Register a path as recently written
    ///
    /// Events for this path will be filtered for the TTL duration.
    pub fn register(&mut self, path: PathBuf) {
        let expiration = Instant::now() + self.ttl;
        self.entries.insert(path, expiration);
    }

    /// Check if an event for this path should be filtered
    ///
    /// Returns `true` if the path was recently written by the bridge.
    /// Automatically cleans up expired entries.
    pub fn should_filter(&mut self, path: &PathBuf) -> bool {
        let now = Instant::now();

        // Check if path is registered
        if let Some(&expiration) = self.entries.get(path) {
            if now < expiration {
                // Still within TTL - filter this event
                return true;
            }
            // Expired - remove and don't filter
            self.entries.remove(path);
        }

        false
    }

    /// Clean up all expired entries
    ///
    /// Called periodically to prevent memory growth.
    pub fn cleanup_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, &mut expiration| now < expiration);
    }

    /// Get the number of entries (for testing)
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if filter is empty (for testing)
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SelfWriteFilter {
    fn default() -> Self {
        // Default TTL: 5 seconds
        Self::new(Duration::from_secs(5))
    }
}
