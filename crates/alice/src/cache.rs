//! Short-lived per-want result cache.

use crate::types::WantId;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Which of a want's results an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    Data,
    Wake,
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// TTL cache keyed by (want id, slot). Owned by the aggregator; entries are
/// only read while unexpired and purged every tick.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<(WantId, CacheSlot), CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, want: &WantId, slot: CacheSlot, now: Instant) -> Option<&Value> {
        self.entries
            .get(&(want.clone(), slot))
            .filter(|entry| now < entry.expires_at)
            .map(|entry| &entry.value)
    }

    pub fn set(&mut self, want: &WantId, slot: CacheSlot, value: Value, ttl: Duration, now: Instant) {
        self.entries.insert(
            (want.clone(), slot),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Drop everything cached for a want.
    pub fn forget(&mut self, want: &WantId) {
        self.entries.retain(|(id, _), _| id != want);
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
