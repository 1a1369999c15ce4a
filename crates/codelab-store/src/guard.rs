use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Shared expiring counters and markers backing the run-rate limit and the
/// run cooldown.
///
/// This sits behind a trait because the guards must stay correct across
/// horizontally-scaled API processes; a deployment with more than one
/// instance plugs in an externally-consistent backend here.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait GuardStore: Send + Sync {
    /// Increment a counter, arming `ttl` on its first increment only.
    /// Returns the value after the increment.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Set a marker with `ttl` if absent. Returns false when a live
    /// marker already exists.
    async fn set_marker(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime of a live marker, if any.
    async fn marker_ttl(&self, key: &str) -> Result<Option<Duration>>;
}

/// Process-local guard store for tests and single-instance deployments.
/// Entries expire lazily on access.
pub struct MemoryGuardStore {
    entries: Mutex<HashMap<String, GuardEntry>>,
}

struct GuardEntry {
    count: u64,
    expires_at: Instant,
}

impl MemoryGuardStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryGuardStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GuardStore for MemoryGuardStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();

        let entry = entries.entry(key.to_string()).or_insert(GuardEntry {
            count: 0,
            expires_at: now + ttl,
        });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + ttl;
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn set_marker(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(false),
            _ => {
                entries.insert(
                    key.to_string(),
                    GuardEntry {
                        count: 1,
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn marker_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let entries = self.entries.lock().unwrap();
        let now = Instant::now();
        Ok(entries.get(key).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.expires_at - now)
            } else {
                None
            }
        }))
    }
}
