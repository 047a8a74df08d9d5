//! Match and prefetch caches.
//!
//! Both caches are plain data structures; the matcher owns them behind its
//! lock. Methods that depend on time take `now` explicitly so expiry can be
//! tested without sleeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::entry::KnowledgeEntry;
use super::normalize::normalize;

/// Cached outcome of a lookup. `None` records a confirmed no-match.
pub type CachedMatch = Option<Arc<KnowledgeEntry>>;

#[derive(Debug)]
struct Slot {
    value: CachedMatch,
    inserted_at: Instant,
    access_count: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

/// Bounded query → result cache with lazy TTL expiry.
///
/// When full, inserting a new key evicts the slot with the fewest reads,
/// the oldest one among equals.
#[derive(Debug)]
pub struct MatchCache {
    slots: HashMap<String, Slot>,
    capacity: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl MatchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// `Some(result)` on a live hit (which may itself be a cached no-match),
    /// `None` when the key is absent or expired.
    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<CachedMatch> {
        let expired = match self.slots.get_mut(key) {
            Some(slot) if now.saturating_duration_since(slot.inserted_at) <= self.ttl => {
                slot.access_count += 1;
                self.hits += 1;
                return Some(slot.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.slots.remove(key);
        }
        self.misses += 1;
        None
    }

    pub fn insert_at(&mut self, key: String, value: CachedMatch, now: Instant) {
        if !self.slots.contains_key(&key) && self.slots.len() >= self.capacity {
            self.evict_one();
        }
        self.slots.insert(key, Slot { value, inserted_at: now, access_count: 0 });
    }

    fn evict_one(&mut self) {
        let victim = self
            .slots
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.access_count.cmp(&b.access_count).then(a.inserted_at.cmp(&b.inserted_at))
            })
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            self.slots.remove(&key);
            self.evictions += 1;
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            size: self.slots.len(),
            capacity: self.capacity,
        }
    }
}

/// Normalized canonical pattern → entry. Unbounded; rebuilt on refresh.
#[derive(Debug, Default)]
pub struct PrefetchCache {
    by_pattern: HashMap<String, Arc<KnowledgeEntry>>,
}

impl PrefetchCache {
    pub fn build(entries: &[Arc<KnowledgeEntry>]) -> Self {
        let mut by_pattern = HashMap::new();
        for entry in entries {
            if let Some(pattern) = entry.canonical_pattern() {
                let key = normalize(pattern);
                if !key.is_empty() {
                    // first entry claiming a canonical pattern keeps it
                    by_pattern.entry(key).or_insert_with(|| Arc::clone(entry));
                }
            }
        }
        Self { by_pattern }
    }

    pub fn get(&self, normalized: &str) -> Option<Arc<KnowledgeEntry>> {
        self.by_pattern.get(normalized).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_pattern.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pattern.is_empty()
    }
}
