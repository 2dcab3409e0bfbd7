//! Cache Store Module
//!
//! The cache contract on top of a shared segment: lock-free reads, locked
//! read-modify-write cycles, lazy TTL expiration and overflow recovery.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::codec::{self, CacheMap};
use crate::cache::{
    CacheStats, Clock, Entry, LockCoordinator, LockGuard, Payload, SegmentHandle, SharedSegment,
    StoreStats, SystemClock,
};
use crate::config::Config;
use crate::error::{CacheError, Result};

// == Write Outcome ==
/// What persisting a map did to the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The map fit and was written as is
    Written,
    /// Expired entries had to be collected before the map fit
    Collected {
        /// Number of expired entries removed
        removed: usize,
    },
    /// Even the collected map did not fit; the segment was deleted
    Reset {
        /// Number of entries discarded
        dropped: usize,
    },
}

/// Result of a mutation closure: the value handed back to the caller and
/// whether the map has to be written.
struct Mutation<R> {
    value: R,
    changed: bool,
}

impl<R> Mutation<R> {
    fn changed(value: R) -> Self {
        Self {
            value,
            changed: true,
        }
    }

    fn unchanged(value: R) -> Self {
        Self {
            value,
            changed: false,
        }
    }
}

// == Cache Store ==
/// Key-value cache whose whole state lives in one shared segment.
///
/// Every store built from the same configuration, in any process on the
/// host, sees the same entries.
#[derive(Debug)]
pub struct CacheStore {
    segment: SharedSegment,
    lock: LockCoordinator,
    clock: Arc<dyn Clock>,
    stats: StoreStats,
    strict_decode: bool,
}

impl CacheStore {
    // == Constructor ==
    /// Attaches to the segment selected by `config`, creating it if needed.
    ///
    /// # Errors
    /// `SegmentUnavailable` if the segment can be neither created nor opened.
    pub fn open(config: &Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`open`](Self::open), reading time from `clock`.
    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let segment = SharedSegment::from_config(config);
        let capacity = segment.open_or_create()?.actual_capacity();
        debug!(
            "Attached to segment {:08x} at {} ({} bytes)",
            segment.key().raw(),
            segment.path().display(),
            capacity
        );

        Ok(Self {
            lock: LockCoordinator::from_config(config),
            segment,
            clock,
            stats: StoreStats::new(),
            strict_decode: config.strict_decode,
        })
    }

    // == Get ==
    /// Retrieves a live value.
    ///
    /// Lock free. An expired entry is evicted on the way out and reported
    /// as a miss.
    pub fn get(&self, key: &str) -> Result<Option<Payload>> {
        let mut map = self.read_map()?;
        let now = self.clock.now();

        match map.remove(key) {
            Some(entry) if entry.is_expired(now) => {
                debug!("Key '{}' expired at {}, evicting", key, entry.expires_at);
                self.evict_expired(&[key.to_string()])?;
                self.stats.record_miss();
                Ok(None)
            }
            Some(entry) => {
                self.stats.record_hit();
                Ok(Some(entry.value))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    // == Get Many ==
    /// Retrieves several keys from one snapshot of the segment.
    ///
    /// Every requested key is present in the result, `None` marking a miss.
    /// A key requested more than once is looked up and counted once.
    pub fn get_many<I, S>(&self, keys: I) -> Result<HashMap<String, Option<Payload>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = self.read_map()?;
        let now = self.clock.now();
        let mut found = HashMap::new();
        let mut expired = Vec::new();

        for key in keys {
            let key = key.as_ref();
            if found.contains_key(key) {
                continue;
            }
            let value = match map.remove(key) {
                Some(entry) if entry.is_expired(now) => {
                    expired.push(key.to_string());
                    None
                }
                Some(entry) => Some(entry.value),
                None => None,
            };
            match value {
                Some(_) => self.stats.record_hit(),
                None => self.stats.record_miss(),
            }
            found.insert(key.to_string(), value);
        }

        if !expired.is_empty() {
            debug!("Evicting {} expired keys found by a bulk read", expired.len());
            self.evict_expired(&expired)?;
        }

        Ok(found)
    }

    /// Retrieves a value and deserializes it into `T`.
    pub fn get_deserialized<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(payload) => serde_json::from_value(payload.to_json())
                .map(Some)
                .map_err(|e| CacheError::UnexpectedShape {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    // == Put ==
    /// Stores a value for `ttl_seconds`, 0 meaning forever.
    pub fn put(&self, key: &str, value: impl Into<Payload>, ttl_seconds: u64) -> Result<()> {
        let value = value.into();
        self.mutate(|map, now| {
            map.insert(key.to_string(), Entry::new(value, ttl_seconds, now));
            Ok(Mutation::changed(()))
        })?;
        debug!("Stored key '{}' (ttl {}s)", key, ttl_seconds);
        Ok(())
    }

    /// Stores several values with one TTL in a single locked cycle.
    pub fn put_many<I, K, V>(&self, items: I, ttl_seconds: u64) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Payload>,
    {
        let items: Vec<(String, Payload)> = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let count = items.len();

        self.mutate(|map, now| {
            for (key, value) in items {
                map.insert(key, Entry::new(value, ttl_seconds, now));
            }
            Ok(Mutation::changed(()))
        })?;
        debug!("Stored {} keys (ttl {}s)", count, ttl_seconds);
        Ok(())
    }

    /// Serializes `value` and stores it for `ttl_seconds`.
    pub fn put_serialized<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| CacheError::Encode(e.to_string()))?;
        self.put(key, value, ttl_seconds)
    }

    // == Forever ==
    /// Stores a value that never expires.
    pub fn forever(&self, key: &str, value: impl Into<Payload>) -> Result<()> {
        self.put(key, value, 0)
    }

    // == Increment ==
    /// Adds `delta` to an integer value and returns the result.
    ///
    /// A missing or expired key starts at `delta` and never expires; an
    /// existing key keeps its expiry.
    ///
    /// # Errors
    /// - `NotNumeric` if the stored value has no integer reading
    /// - `IntegerOverflow` if the sum leaves the i64 range
    pub fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let value = self.mutate(|map, now| {
            let live = map.get(key).is_some_and(|entry| !entry.is_expired(now));
            if !live {
                map.insert(key.to_string(), Entry::forever(Payload::Int(delta)));
                return Ok(Mutation::changed(delta));
            }

            let entry = map
                .get_mut(key)
                .ok_or_else(|| CacheError::Internal(format!("key '{}' vanished", key)))?;
            let current = entry
                .value
                .as_integer()
                .ok_or_else(|| CacheError::NotNumeric(key.to_string()))?;
            let next = current
                .checked_add(delta)
                .ok_or_else(|| CacheError::IntegerOverflow(key.to_string()))?;
            entry.value = Payload::Int(next);
            Ok(Mutation::changed(next))
        })?;
        debug!("Incremented key '{}' by {} to {}", key, delta, value);
        Ok(value)
    }

    // == Decrement ==
    /// Subtracts `delta`; identical to `increment(key, -delta)`.
    pub fn decrement(&self, key: &str, delta: i64) -> Result<i64> {
        let negated = delta
            .checked_neg()
            .ok_or_else(|| CacheError::IntegerOverflow(key.to_string()))?;
        self.increment(key, negated)
    }

    // == Forget ==
    /// Removes a key. Returns whether it was present.
    pub fn forget(&self, key: &str) -> Result<bool> {
        let removed = self.mutate(|map, _| {
            let removed = map.remove(key).is_some();
            Ok(if removed {
                Mutation::changed(true)
            } else {
                Mutation::unchanged(false)
            })
        })?;
        debug!("Forget key '{}': removed={}", key, removed);
        Ok(removed)
    }

    // == Flush ==
    /// Removes every entry.
    pub fn flush(&self) -> Result<()> {
        self.store_map(CacheMap::new())?;
        info!("Flushed segment {:08x}", self.segment.key().raw());
        Ok(())
    }

    // == Introspection ==
    /// Returns the persisted map as is, expired entries included.
    pub fn snapshot(&self) -> Result<CacheMap> {
        self.read_map()
    }

    /// Returns this process's counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Returns the configured segment capacity.
    pub fn requested_capacity(&self) -> usize {
        self.segment.requested_capacity()
    }

    /// Returns the capacity of the segment as currently allocated.
    pub fn actual_capacity(&self) -> Result<usize> {
        Ok(self.segment.open_or_create()?.actual_capacity())
    }

    /// Returns the underlying segment.
    pub fn segment(&self) -> &SharedSegment {
        &self.segment
    }

    // == Internals ==
    /// Removes the given keys if they are still expired under the lock.
    ///
    /// A key re-stored by someone else since the caller's read is kept.
    fn evict_expired(&self, keys: &[String]) -> Result<()> {
        self.mutate(|map, now| {
            let before = map.len();
            for key in keys {
                if map.get(key).is_some_and(|entry| entry.is_expired(now)) {
                    map.remove(key);
                }
            }
            let evicted = before - map.len();
            Ok(if evicted > 0 {
                Mutation::changed(())
            } else {
                Mutation::unchanged(())
            })
        })
    }

    /// One locked read-modify-write cycle.
    fn mutate<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut CacheMap, i64) -> Result<Mutation<R>>,
    {
        let guard = self.lock.acquire()?;
        let result = self.mutate_locked(&guard, f);
        guard.release();
        result
    }

    /// Decode, mutate and write under an already held lock.
    fn mutate_locked<R, F>(&self, _guard: &LockGuard, f: F) -> Result<R>
    where
        F: FnOnce(&mut CacheMap, i64) -> Result<Mutation<R>>,
    {
        let mut handle = self.segment.open_or_create()?;
        let mut map = self.decode(&handle.read_all()?)?;
        let now = self.clock.now();

        let Mutation { value, changed } = f(&mut map, now)?;
        if changed {
            self.write_map(&handle, map, now)?;
        }
        Ok(value)
    }

    /// Replaces the whole map in one locked cycle, without reading it first.
    fn store_map(&self, map: CacheMap) -> Result<WriteOutcome> {
        let guard = self.lock.acquire()?;
        let outcome = self
            .segment
            .open_or_create()
            .and_then(|handle| self.write_map(&handle, map, self.clock.now()));
        guard.release();
        outcome
    }

    // == Write Map ==
    /// Persists `map`, keeping the encoded size within the segment.
    ///
    /// When the encoding is too large, expired entries are collected first.
    /// If it still does not fit the segment is deleted and nothing is
    /// written; the next access starts from an empty segment.
    fn write_map(&self, handle: &SegmentHandle<'_>, mut map: CacheMap, now: i64) -> Result<WriteOutcome> {
        let capacity = handle.actual_capacity();
        let encoded = codec::encode(&map)?;
        if encoded.len() <= capacity {
            handle.write_all(&encoded)?;
            self.stats.record_write();
            return Ok(WriteOutcome::Written);
        }

        let before = map.len();
        map.retain(|_, entry| !entry.is_expired(now));
        let removed = before - map.len();
        self.stats.record_gc(removed);

        let collected = codec::encode(&map)?;
        if collected.len() <= capacity {
            handle.write_all(&collected)?;
            self.stats.record_write();
            info!(
                "Garbage collection performed on segment {:08x}: removed {} expired entries, {} of {} bytes used",
                self.segment.key().raw(),
                removed,
                collected.len(),
                capacity
            );
            return Ok(WriteOutcome::Collected { removed });
        }

        warn!(
            "Segment {:08x} will be recreated: {} bytes exceed capacity of {} bytes after garbage collection, dropping {} entries",
            self.segment.key().raw(),
            collected.len(),
            capacity,
            before
        );
        self.segment.delete()?;
        self.stats.record_reset(before);
        Ok(WriteOutcome::Reset { dropped: before })
    }

    fn read_map(&self) -> Result<CacheMap> {
        let mut handle = self.segment.open_or_create()?;
        let bytes = handle.read_all()?;
        self.decode(&bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<CacheMap> {
        match codec::decode(bytes) {
            Ok(map) => Ok(map),
            Err(e) => {
                self.stats.record_decode_failure();
                if self.strict_decode {
                    return Err(e.into());
                }
                warn!(
                    "Segment {:08x} content is undecodable ({}), treating it as empty",
                    self.segment.key().raw(),
                    e
                );
                Ok(CacheMap::new())
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use serde::Deserialize;
    use serde_json::json;
    use std::path::Path;
    use std::thread;
    use tempfile::tempdir;

    const START: i64 = 1_700_000_000;

    fn test_store(dir: &Path) -> (CacheStore, ManualClock) {
        test_store_with(Config::default().with_directory(dir))
    }

    fn test_store_with(config: Config) -> (CacheStore, ManualClock) {
        let clock = ManualClock::new(START);
        let store = CacheStore::with_clock(&config, Arc::new(clock.clone())).unwrap();
        (store, clock)
    }

    fn small_store(dir: &Path) -> (CacheStore, ManualClock) {
        test_store_with(
            Config::default()
                .with_directory(dir)
                .with_segment_size(4096),
        )
    }

    fn filler(i: usize) -> Payload {
        Payload::from(format!("{:0>100}", i))
    }

    #[test]
    fn test_store_open_creates_segment() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        assert!(store.segment().exists());
        assert_eq!(store.requested_capacity(), 320_000);
        assert!(store.actual_capacity().unwrap() >= 320_000);
    }

    #[test]
    fn test_store_put_and_get() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        store.put("key1", "value1", 60).unwrap();
        assert_eq!(store.get("key1").unwrap(), Some(Payload::from("value1")));
    }

    #[test]
    fn test_store_get_nonexistent() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        assert_eq!(store.get("nonexistent").unwrap(), None);
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_store_overwrite() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        store.put("key1", "value1", 0).unwrap();
        store.put("key1", json!({"v": 2}), 0).unwrap();

        assert_eq!(store.get("key1").unwrap(), Some(Payload::from(json!({"v": 2}))));
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_store_ttl_expiration_evicts_lazily() {
        let dir = tempdir().unwrap();
        let (store, clock) = test_store(dir.path());

        store.put("key1", "value1", 10).unwrap();
        clock.advance(10);
        assert!(store.get("key1").unwrap().is_some(), "Still live in its last second");

        clock.advance(1);
        assert!(store.snapshot().unwrap().contains_key("key1"));
        assert_eq!(store.get("key1").unwrap(), None);
        assert!(!store.snapshot().unwrap().contains_key("key1"));
    }

    #[test]
    fn test_eviction_keeps_value_restored_meanwhile() {
        let dir = tempdir().unwrap();
        let (store, clock) = test_store(dir.path());

        store.put("key1", "old", 5).unwrap();
        clock.advance(10);
        store.put("key1", "fresh", 0).unwrap();

        store.evict_expired(&["key1".to_string()]).unwrap();
        assert_eq!(store.get("key1").unwrap(), Some(Payload::from("fresh")));
    }

    #[test]
    fn test_store_forever() {
        let dir = tempdir().unwrap();
        let (store, clock) = test_store(dir.path());

        store.forever("key1", 7).unwrap();
        clock.advance(10 * 365 * 24 * 3600);
        assert_eq!(store.get("key1").unwrap(), Some(Payload::Int(7)));
    }

    #[test]
    fn test_increment_absent_key_starts_at_delta() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        assert_eq!(store.increment("hits", 5).unwrap(), 5);
        assert_eq!(store.snapshot().unwrap()["hits"].expires_at, 0);
        assert_eq!(store.increment("hits", 1).unwrap(), 6);
    }

    #[test]
    fn test_increment_keeps_expiry() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        store.put("n", 10, 60).unwrap();
        let expires_at = store.snapshot().unwrap()["n"].expires_at;

        assert_eq!(store.increment("n", 2).unwrap(), 12);
        assert_eq!(store.snapshot().unwrap()["n"].expires_at, expires_at);
    }

    #[test]
    fn test_increment_expired_key_restarts() {
        let dir = tempdir().unwrap();
        let (store, clock) = test_store(dir.path());

        store.put("n", 10, 5).unwrap();
        clock.advance(6);

        assert_eq!(store.increment("n", 1).unwrap(), 1);
        assert_eq!(store.snapshot().unwrap()["n"].expires_at, 0);
    }

    #[test]
    fn test_increment_numeric_string() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        store.forever("n", "41").unwrap();
        assert_eq!(store.increment("n", 1).unwrap(), 42);
        assert_eq!(store.get("n").unwrap(), Some(Payload::Int(42)));
    }

    #[test]
    fn test_increment_non_numeric_leaves_value() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        store.forever("name", "ada").unwrap();
        let result = store.increment("name", 1);

        assert!(matches!(result, Err(CacheError::NotNumeric(_))));
        assert_eq!(store.get("name").unwrap(), Some(Payload::from("ada")));
    }

    #[test]
    fn test_increment_overflow() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        store.forever("n", i64::MAX).unwrap();
        assert!(matches!(
            store.increment("n", 1),
            Err(CacheError::IntegerOverflow(_))
        ));
        assert!(matches!(
            store.decrement("m", i64::MIN),
            Err(CacheError::IntegerOverflow(_))
        ));
    }

    #[test]
    fn test_decrement_matches_negative_increment() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        for n in [-3, 0, 4, 1_000] {
            store.forever("a", 100).unwrap();
            store.forever("b", 100).unwrap();
            assert_eq!(store.decrement("a", n).unwrap(), store.increment("b", -n).unwrap());
        }
    }

    #[test]
    fn test_forget() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        store.forever("keep", 1).unwrap();
        let before = store.snapshot().unwrap();
        let writes = store.stats().writes;

        assert!(!store.forget("missing").unwrap());
        assert_eq!(store.snapshot().unwrap(), before);
        assert_eq!(store.stats().writes, writes, "No write for a no-op forget");

        assert!(store.forget("keep").unwrap());
        assert_eq!(store.get("keep").unwrap(), None);
    }

    #[test]
    fn test_flush() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        store.put_many([("a", 1), ("b", 2), ("c", 3)], 0).unwrap();
        store.flush().unwrap();

        for key in ["a", "b", "c"] {
            assert_eq!(store.get(key).unwrap(), None);
        }
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_get_many() {
        let dir = tempdir().unwrap();
        let (store, clock) = test_store(dir.path());

        store.forever("live", "x").unwrap();
        store.put("short", "y", 1).unwrap();
        clock.advance(5);

        let found = store.get_many(["live", "short", "absent"]).unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found["live"], Some(Payload::from("x")));
        assert_eq!(found["short"], None);
        assert_eq!(found["absent"], None);
        assert!(!store.snapshot().unwrap().contains_key("short"));
    }

    #[test]
    fn test_get_many_repeated_key() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());
        store.forever("a", 1).unwrap();

        let found = store.get_many(["a", "a", "b", "b"]).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], Some(Payload::Int(1)));
        assert_eq!(found["b"], None);

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Session {
            user: String,
            roles: Vec<String>,
            score: f64,
        }

        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());
        let session = Session {
            user: "ada".to_string(),
            roles: vec!["admin".to_string()],
            score: 0.5,
        };

        store.put_serialized("session", &session, 60).unwrap();
        assert_eq!(store.get_deserialized::<Session>("session").unwrap(), Some(session));
        assert!(matches!(
            store.get_deserialized::<u32>("session"),
            Err(CacheError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn test_overflow_collects_expired_entries_first() {
        let dir = tempdir().unwrap();
        let (store, _) = small_store(dir.path());

        let mut map = CacheMap::new();
        for i in 0..40 {
            map.insert(format!("expired-{i}"), Entry::new(filler(i), 1, START - 100));
        }
        map.insert("live".to_string(), Entry::forever(Payload::Int(1)));
        map.insert("ttl".to_string(), Entry::new(Payload::Int(2), 60, START));
        assert!(codec::encode(&map).unwrap().len() > store.actual_capacity().unwrap());

        let outcome = store.store_map(map).unwrap();
        assert_eq!(outcome, WriteOutcome::Collected { removed: 40 });

        let persisted = store.snapshot().unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(store.get("live").unwrap(), Some(Payload::Int(1)));
        assert_eq!(store.get("ttl").unwrap(), Some(Payload::Int(2)));
        assert_eq!(store.stats().gc_passes, 1);
    }

    #[test]
    fn test_overflow_resets_when_live_entries_do_not_fit() {
        let dir = tempdir().unwrap();
        let (store, _) = small_store(dir.path());

        store.forever("before", "stored earlier").unwrap();

        let mut map = store.snapshot().unwrap();
        for i in 0..60 {
            map.insert(format!("live-{i}"), Entry::forever(filler(i)));
        }

        let outcome = store.store_map(map).unwrap();
        assert_eq!(outcome, WriteOutcome::Reset { dropped: 61 });
        assert!(!store.segment().exists());

        assert_eq!(store.get("before").unwrap(), None);
        assert_eq!(store.get("live-0").unwrap(), None);
        assert_eq!(store.stats().resets, 1);
        assert!(store.segment().exists(), "Next access recreates the segment");
    }

    #[test]
    fn test_put_that_overflows_still_succeeds() {
        let dir = tempdir().unwrap();
        let (store, _) = small_store(dir.path());

        for i in 0..20 {
            store.forever(&format!("k{i}"), filler(i)).unwrap();
        }
        let huge = Payload::from("x".repeat(5_000));
        store.forever("huge", huge).unwrap();

        assert_eq!(store.get("huge").unwrap(), None);
        assert_eq!(store.get("k0").unwrap(), None);
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_recreated_segment_uses_current_size() {
        let dir = tempdir().unwrap();
        let (small, _) = small_store(dir.path());
        assert_eq!(small.actual_capacity().unwrap(), 4096);

        let (bigger, _) = test_store_with(
            Config::default()
                .with_directory(dir.path())
                .with_segment_size(3 * 4096),
        );
        assert_eq!(bigger.actual_capacity().unwrap(), 4096);

        bigger.forever("huge", "x".repeat(5_000)).unwrap();
        assert_eq!(bigger.actual_capacity().unwrap(), 3 * 4096);
    }

    #[test]
    fn test_corrupt_segment_reads_as_empty() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        store.segment().open_or_create().unwrap().write_all(b"not a map").unwrap();

        assert_eq!(store.get("anything").unwrap(), None);
        assert_eq!(store.stats().decode_failures, 1);

        store.forever("k", 1).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(Payload::Int(1)));
    }

    #[test]
    fn test_strict_decode_surfaces_corruption() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store_with(
            Config::default()
                .with_directory(dir.path())
                .with_strict_decode(true),
        );

        store.segment().open_or_create().unwrap().write_all(b"not a map").unwrap();

        assert!(matches!(store.get("anything"), Err(CacheError::Decode(_))));
        assert!(matches!(store.forever("k", 1), Err(CacheError::Decode(_))));

        store.flush().unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn test_independent_stores_share_state() {
        let dir = tempdir().unwrap();
        let (writer, _) = test_store(dir.path());
        let (reader, _) = test_store(dir.path());

        writer.forever("shared", "yes").unwrap();
        assert_eq!(reader.get("shared").unwrap(), Some(Payload::from("yes")));

        reader.forget("shared").unwrap();
        assert_eq!(writer.get("shared").unwrap(), None);
    }

    #[test]
    fn test_concurrent_increments_do_not_lose_updates() {
        let dir = tempdir().unwrap();
        let threads = 8;
        let per_thread = 25;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let config = Config::default().with_directory(dir.path());
                thread::spawn(move || {
                    let store = CacheStore::open(&config).unwrap();
                    for _ in 0..per_thread {
                        store.increment("counter", 1).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let (store, _) = test_store(dir.path());
        assert_eq!(
            store.get("counter").unwrap(),
            Some(Payload::Int(threads * per_thread))
        );
    }
}
