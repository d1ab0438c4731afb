//! Result Cache Module
//!
//! Memoizes execution results per (query id, parameters).
//!
//! ## Design
//!
//! Entries are grouped per query id; each group holds at most one entry per
//! parameter signature. Staleness is decided at read time from the entry's
//! own TTL and never refreshes the entry. The size budget is global: when a
//! put overflows it, the oldest entry across all queries is evicted until the
//! store is back within budget.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::model::{Parameters, QueryResult};

/// Build the cache key for a query invocation.
///
/// The parameter map is serialized with recursively sorted object keys, so
/// the key does not depend on the order parameters were inserted in.
pub fn cache_key(query_id: &str, parameters: &Parameters) -> String {
    let canonical: serde_json::Map<String, serde_json::Value> = parameters
        .iter()
        .map(|(k, v)| (k.clone(), canonicalize(v)))
        .collect();
    format!("{query_id}:{}", serde_json::Value::Object(canonical))
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// A memoized result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached payload
    pub result: QueryResult,

    /// When the entry was stored
    pub inserted_at: DateTime<Utc>,

    /// Time-to-live in seconds
    pub ttl_secs: u64,

    /// Parameters the result was produced with
    pub parameters: Parameters,

    /// Derived from query id and parameters
    pub cache_key: String,

    /// Insertion order, breaks ties between equal timestamps
    sequence: u64,
}

impl CacheEntry {
    /// Age of the entry in milliseconds at `now`
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.inserted_at).num_milliseconds()
    }

    /// Stale once the age exceeds the TTL
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age_ms(now) > (self.ttl_secs as i64).saturating_mul(1000)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of lookup hits
    pub hits: u64,

    /// Number of lookup misses
    pub misses: u64,

    /// Number of entries currently in the cache
    pub size: usize,

    /// Number of entries evicted for the size budget
    pub evictions: u64,

    /// Number of stale entries physically purged
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Size-bounded, TTL-aware result store
pub struct CacheStore {
    /// Per-query entry lists
    entries: HashMap<String, Vec<CacheEntry>>,

    /// Every key currently stored
    keys: HashSet<String>,

    current_size: usize,
    max_size: usize,
    next_sequence: u64,

    hits: AtomicU64,
    misses: AtomicU64,
    evictions: u64,
    expirations: u64,

    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Create a store holding at most `max_size` entries
    pub fn new(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        CacheStore {
            entries: HashMap::new(),
            keys: HashSet::new(),
            current_size: 0,
            max_size,
            next_sequence: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: 0,
            expirations: 0,
            clock,
        }
    }

    /// Store a result, evicting the oldest entries if the budget overflows
    pub fn put(
        &mut self,
        query_id: &str,
        parameters: &Parameters,
        result: QueryResult,
        ttl_secs: u64,
    ) -> String {
        let key = cache_key(query_id, parameters);

        // Replace rather than duplicate an existing signature
        self.evict(query_id, &key);

        let entry = CacheEntry {
            result,
            inserted_at: self.clock.now(),
            ttl_secs,
            parameters: parameters.clone(),
            cache_key: key.clone(),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        self.entries
            .entry(query_id.to_string())
            .or_default()
            .push(entry);
        self.keys.insert(key.clone());
        self.current_size += 1;

        while self.current_size > self.max_size {
            if !self.evict_oldest() {
                break;
            }
        }

        key
    }

    /// Find a non-stale result for this invocation
    pub fn lookup(&self, query_id: &str, parameters: &Parameters) -> Option<&QueryResult> {
        let key = cache_key(query_id, parameters);
        let now = self.clock.now();

        let hit = self
            .entries
            .get(query_id)
            .and_then(|list| list.iter().find(|e| e.cache_key == key && !e.is_stale(now)));

        match hit {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(&entry.result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remove one entry. Absent keys are ignored.
    pub fn evict(&mut self, query_id: &str, key: &str) -> bool {
        let Some(list) = self.entries.get_mut(query_id) else {
            return false;
        };
        let Some(pos) = list.iter().position(|e| e.cache_key == key) else {
            return false;
        };

        list.remove(pos);
        if list.is_empty() {
            self.entries.remove(query_id);
        }
        self.keys.remove(key);
        self.current_size -= 1;
        true
    }

    /// Remove one query's entries, or everything when `query_id` is `None`.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&mut self, query_id: Option<&str>) -> usize {
        match query_id {
            Some(query_id) => {
                let Some(list) = self.entries.remove(query_id) else {
                    return 0;
                };
                for entry in &list {
                    self.keys.remove(&entry.cache_key);
                }
                self.current_size -= list.len();
                list.len()
            }
            None => {
                let removed = self.current_size;
                self.entries.clear();
                self.keys.clear();
                self.current_size = 0;
                removed
            }
        }
    }

    /// Physically drop every stale entry
    pub fn purge_stale(&mut self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        for list in self.entries.values_mut() {
            let before = list.len();
            list.retain(|e| {
                let stale = e.is_stale(now);
                if stale {
                    self.keys.remove(&e.cache_key);
                }
                !stale
            });
            removed += before - list.len();
        }
        self.entries.retain(|_, list| !list.is_empty());

        self.current_size -= removed;
        self.expirations += removed as u64;
        if removed > 0 {
            tracing::debug!(removed, "cache_stale_purged");
        }
        removed
    }

    /// Evict the globally oldest entry
    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .flat_map(|(query_id, list)| list.iter().map(move |e| (query_id, e)))
            .min_by_key(|(_, e)| (e.inserted_at, e.sequence))
            .map(|(query_id, e)| (query_id.clone(), e.cache_key.clone()));

        match oldest {
            Some((query_id, key)) => {
                self.evict(&query_id, &key);
                self.evictions += 1;
                tracing::debug!(query_id = %query_id, cache_key = %key, "cache_entry_evicted");
                true
            }
            None => false,
        }
    }

    /// Entries held for one query
    pub fn entries(&self, query_id: &str) -> &[CacheEntry] {
        self.entries.get(query_id).map_or(&[], Vec::as_slice)
    }

    /// Query ids with at least one entry
    pub fn query_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.current_size
    }

    pub fn is_empty(&self) -> bool {
        self.current_size == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.current_size,
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn result(tag: &str) -> QueryResult {
        QueryResult::from_rows(vec![json!({ "tag": tag })])
    }

    fn store(max: usize) -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        (CacheStore::new(max, clock.clone()), clock)
    }

    #[test]
    fn test_cache_key_ignores_nested_key_order() {
        let a = params(&[("filter", json!({"b": 1, "a": {"y": 2, "x": 1}}))]);
        let b = params(&[("filter", json!({"a": {"x": 1, "y": 2}, "b": 1}))]);
        assert_eq!(cache_key("q", &a), cache_key("q", &b));
        assert_ne!(cache_key("q", &a), cache_key("other", &a));
    }

    #[test]
    fn test_put_then_lookup_hits() {
        let (mut cache, _) = store(10);
        let p = params(&[("a", json!(1))]);
        cache.put("q1", &p, result("R1"), 300);

        assert_eq!(cache.lookup("q1", &p), Some(&result("R1")));
        assert_eq!(cache.stats().hits, 1);
        assert!(cache.lookup("q1", &params(&[("a", json!(2))])).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_stale_entry_misses_but_stays() {
        let (mut cache, clock) = store(10);
        let p = params(&[("a", json!(1))]);
        cache.put("q1", &p, result("R1"), 300);

        clock.advance_secs(300);
        assert!(cache.lookup("q1", &p).is_some());

        clock.advance(chrono::Duration::milliseconds(1));
        assert!(cache.lookup("q1", &p).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_same_signature_replaces() {
        let (mut cache, _) = store(10);
        let p = params(&[("a", json!(1))]);
        cache.put("q1", &p, result("old"), 300);
        cache.put("q1", &p, result("new"), 300);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup("q1", &p), Some(&result("new")));
    }

    #[test]
    fn test_eviction_is_global_oldest_first() {
        let (mut cache, clock) = store(2);
        let p = Parameters::new();
        cache.put("q1", &p, result("1"), 300);
        clock.advance_secs(1);
        cache.put("q2", &p, result("2"), 300);
        clock.advance_secs(1);
        cache.put("q3", &p, result("3"), 300);

        assert_eq!(cache.len(), 2);
        assert!(cache.entries("q1").is_empty());
        assert!(cache.lookup("q2", &p).is_some());
        assert!(cache.lookup("q3", &p).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_equal_timestamps_evict_in_insertion_order() {
        let (mut cache, _) = store(1);
        let p = Parameters::new();
        cache.put("q1", &p, result("1"), 300);
        cache.put("q2", &p, result("2"), 300);

        assert!(cache.entries("q1").is_empty());
        assert_eq!(cache.entries("q2").len(), 1);
    }

    #[test]
    fn test_evict_absent_is_noop() {
        let (mut cache, _) = store(4);
        assert!(!cache.evict("missing", "missing:{}"));
        cache.put("q1", &Parameters::new(), result("1"), 300);
        assert!(!cache.evict("q1", "q1:{\"a\":1}"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_one_query() {
        let (mut cache, _) = store(10);
        cache.put("q1", &params(&[("a", json!(1))]), result("1"), 300);
        cache.put("q1", &params(&[("a", json!(2))]), result("2"), 300);
        cache.put("q2", &Parameters::new(), result("3"), 300);

        assert_eq!(cache.clear(Some("q1")), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entries("q2").len(), 1);
        assert_eq!(cache.clear(Some("q1")), 0);
    }

    #[test]
    fn test_clear_all() {
        let (mut cache, _) = store(10);
        cache.put("q1", &Parameters::new(), result("1"), 300);
        cache.put("q2", &Parameters::new(), result("2"), 300);

        assert_eq!(cache.clear(None), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.query_ids().count(), 0);
    }

    #[test]
    fn test_purge_stale() {
        let (mut cache, clock) = store(10);
        cache.put("short", &Parameters::new(), result("s"), 10);
        cache.put("long", &Parameters::new(), result("l"), 600);
        clock.advance_secs(11);

        assert_eq!(cache.purge_stale(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 1);
        assert!(!cache.contains_key(&cache_key("short", &Parameters::new())));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
            ..Default::default()
        };

        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
    }
}
