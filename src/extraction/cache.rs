//! Bounded LRU cache for extraction results, with per-entry expiry.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Cache key for `text` extracted relative to `reference`.
///
/// Text is trimmed, lowercased and whitespace-collapsed before hashing, so
/// "Ran  5km" and "ran 5km" share a key. The reference date is part of the key
/// because relative phrases ("yesterday") resolve differently on other days.
pub fn cache_key(text: &str, reference: NaiveDate) -> String {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(reference.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Slot<V> {
    value: V,
    stored_at: Instant,
    tick: u64,
}

pub struct ExtractionCache<V> {
    capacity: usize,
    ttl: Duration,
    slots: HashMap<String, Slot<V>>,
    /// Recency index: tick → key. Smallest tick is least recently used.
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    stats: CacheStats,
}

impl<V: Clone> ExtractionCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ttl,
            slots: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            stats: CacheStats {
                capacity,
                ..CacheStats::default()
            },
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&mut self, key: String, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&mut self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.recency.clear();
        self.stats.size = 0;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub(crate) fn get_at(&mut self, key: &str, now: Instant) -> Option<V> {
        let expired = match self.slots.get(key) {
            None => {
                self.stats.misses += 1;
                return None;
            }
            Some(slot) => now.saturating_duration_since(slot.stored_at) >= self.ttl,
        };

        if expired {
            self.remove(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            return None;
        }

        let tick = self.bump_tick();
        let slot = self.slots.get_mut(key)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, key.to_string());
        self.stats.hits += 1;
        Some(slot.value.clone())
    }

    pub(crate) fn insert_at(&mut self, key: String, value: V, now: Instant) {
        self.remove(&key);

        while self.slots.len() >= self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.slots.remove(&oldest);
            self.stats.evictions += 1;
            tracing::debug!(capacity = self.capacity, "Evicted least recently used extraction");
        }

        let tick = self.bump_tick();
        self.recency.insert(tick, key.clone());
        self.slots.insert(
            key,
            Slot {
                value,
                stored_at: now,
                tick,
            },
        );
        self.stats.stores += 1;
        self.stats.size = self.slots.len();
    }

    pub(crate) fn cleanup_expired_at(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| now.saturating_duration_since(slot.stored_at) >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }

    fn remove(&mut self, key: &str) {
        if let Some(slot) = self.slots.remove(key) {
            self.recency.remove(&slot.tick);
        }
        self.stats.size = self.slots.len();
    }

    fn bump_tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    #[test]
    fn key_ignores_case_and_spacing() {
        assert_eq!(cache_key("Ran  5km\ttoday ", day()), cache_key("ran 5km today", day()));
        assert_ne!(cache_key("ran 5km", day()), cache_key("ran 6km", day()));
        assert_eq!(cache_key("ran", day()).len(), 64);
    }

    #[test]
    fn key_depends_on_reference_date() {
        let next = day().succ_opt().unwrap();
        assert_ne!(cache_key("ran yesterday", day()), cache_key("ran yesterday", next));
    }

    #[test]
    fn hit_and_miss_are_counted() {
        let mut cache = ExtractionCache::new(10, Duration::from_secs(60));
        assert_eq!(cache.get("a"), None::<u32>);
        cache.insert("a".into(), 1);
        assert_eq!(cache.get("a"), Some(1));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stores, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ExtractionCache::new(2, Duration::from_secs(60));
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        // Touch "a" so "b" becomes the oldest.
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c".into(), 3);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsert_replaces_without_eviction() {
        let mut cache = ExtractionCache::new(2, Duration::from_secs(60));
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.insert("a".into(), 10);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn expired_entries_are_misses() {
        let mut cache = ExtractionCache::new(10, Duration::from_secs(60));
        let start = Instant::now();
        cache.insert_at("a".into(), 1, start);

        assert_eq!(cache.get_at("a", start + Duration::from_secs(30)), Some(1));
        assert_eq!(cache.get_at("a", start + Duration::from_secs(61)), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let mut cache = ExtractionCache::new(10, Duration::from_secs(60));
        let start = Instant::now();
        cache.insert_at("old".into(), 1, start);
        cache.insert_at("new".into(), 2, start + Duration::from_secs(50));

        let removed = cache.cleanup_expired_at(start + Duration::from_secs(70));
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("new", start + Duration::from_secs(70)), Some(2));
    }

    #[test]
    fn clear_keeps_counters() {
        let mut cache = ExtractionCache::new(10, Duration::from_secs(60));
        cache.insert("a".into(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().stores, 1);
        assert_eq!(cache.stats().size, 0);
    }
}
