//! Thread-safe context store.

use crate::entry::{encoded_size, ContextEntry};
use crate::slice::ContextSlice;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weft_core::{StepId, Timestamp};

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextConfig {
    /// Maximum serialized size of a single value in bytes (0 = unlimited)
    pub max_entry_bytes: usize,
    /// Maximum serialized size of all live values in bytes (0 = unlimited)
    pub max_total_bytes: usize,
    /// Maximum number of keys (0 = unlimited)
    pub max_entries: usize,
    /// TTL applied when a write does not carry its own
    pub default_ttl_ms: Option<u64>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_entry_bytes: 1024 * 1024,       // 1 MiB
            max_total_bytes: 64 * 1024 * 1024, // 64 MiB
            max_entries: 10_000,
            default_ttl_ms: None,
        }
    }
}

impl ContextConfig {
    /// Configuration with every bound disabled
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_entry_bytes: 0,
            max_total_bytes: 0,
            max_entries: 0,
            default_ttl_ms: None,
        }
    }

    /// Set the per-entry size limit
    #[must_use]
    pub fn with_max_entry_bytes(mut self, bytes: usize) -> Self {
        self.max_entry_bytes = bytes;
        self
    }

    /// Set the total size limit
    #[must_use]
    pub fn with_max_total_bytes(mut self, bytes: usize) -> Self {
        self.max_total_bytes = bytes;
        self
    }

    /// Set the key count limit
    #[must_use]
    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    /// Set the default TTL
    #[must_use]
    pub fn with_default_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.default_ttl_ms = Some(ttl_ms);
        self
    }
}

/// Store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// A single value exceeds the per-entry limit
    #[error("context value for '{key}' is {size} bytes, limit is {limit}")]
    EntryTooLarge {
        /// Key being written
        key: String,
        /// Serialized size of the rejected value
        size: usize,
        /// Configured per-entry limit
        limit: usize,
    },

    /// The store as a whole is full
    #[error("context store capacity exceeded for {resource} (limit {limit})")]
    CapacityExceeded {
        /// Which bound was hit
        resource: String,
        /// Configured limit
        limit: u64,
    },
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was not present
    Inserted,
    /// The key already held a value, which was overwritten
    Replaced {
        /// Step that wrote the overwritten value
        previous_producer: StepId,
    },
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    /// Keys currently held (including expired, not yet swept)
    pub entries: usize,
    /// Bytes currently held
    pub total_bytes: u64,
    /// Successful writes
    pub writes: u64,
    /// Reads that found a live value
    pub reads: u64,
    /// Entries removed by TTL sweeps
    pub evictions: u64,
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, Arc<ContextEntry>>,
    total_bytes: u64,
    writes: u64,
    evictions: u64,
}

impl StoreInner {
    fn sweep(&mut self, now: &Timestamp) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes as u64);
            }
        }
        self.evictions += expired.len() as u64;
        expired.len()
    }
}

/// In-memory context store
///
/// Reads take a shared lock for a single map lookup and never wait on a
/// tool; writes happen only after a step has completed. A read observes the
/// most recent completed write for its key. [`ContextStore::put_many`]
/// applies a step's keys together or not at all.
pub struct ContextStore {
    /// Store configuration
    config: ContextConfig,
    /// Entries and write-side counters
    inner: RwLock<StoreInner>,
    /// Read counter, kept outside the lock so reads stay shared
    reads: AtomicU64,
}

impl ContextStore {
    /// Create a store with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Create with custom configuration
    #[must_use]
    pub fn with_config(config: ContextConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(StoreInner::default()),
            reads: AtomicU64::new(0),
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Write a value, overwriting any previous value under the same key
    ///
    /// `ttl_ms` overrides the configured default TTL.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::EntryTooLarge`] if the value alone exceeds the
    /// per-entry limit, or [`ContextError::CapacityExceeded`] if the store is
    /// still full after evicting expired entries. Values are never truncated.
    pub fn put(
        &self,
        key: impl Into<String>,
        value: Value,
        producer: StepId,
        ttl_ms: Option<u64>,
    ) -> Result<PutOutcome, ContextError> {
        let entry = self.prepare(key.into(), value, producer, ttl_ms)?;
        let mut outcomes = self.write_batch(vec![entry])?;
        Ok(outcomes.pop().map_or(PutOutcome::Inserted, |(_, outcome)| outcome))
    }

    /// Write several values from one producer, all or nothing
    ///
    /// Every bound is checked against the whole batch under one write lock
    /// before anything is inserted, so a rejected batch leaves the store
    /// untouched. A key repeated within the batch keeps its last value.
    /// Outcomes are returned in first-occurrence order.
    ///
    /// # Errors
    ///
    /// Same as [`ContextStore::put`]; on error no key has been written.
    pub fn put_many<K: Into<String>>(
        &self,
        entries: impl IntoIterator<Item = (K, Value)>,
        producer: StepId,
        ttl_ms: Option<u64>,
    ) -> Result<Vec<(String, PutOutcome)>, ContextError> {
        let batch: IndexMap<String, Value> = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        let prepared = batch
            .into_iter()
            .map(|(key, value)| self.prepare(key, value, producer.clone(), ttl_ms))
            .collect::<Result<Vec<_>, _>>()?;
        self.write_batch(prepared)
    }

    fn prepare(
        &self,
        key: String,
        value: Value,
        producer: StepId,
        ttl_ms: Option<u64>,
    ) -> Result<ContextEntry, ContextError> {
        let size = encoded_size(&value);
        if self.config.max_entry_bytes > 0 && size > self.config.max_entry_bytes {
            return Err(ContextError::EntryTooLarge {
                key,
                size,
                limit: self.config.max_entry_bytes,
            });
        }

        let mut entry = ContextEntry::new(key, value, size, producer);
        if let Some(ttl) = ttl_ms.or(self.config.default_ttl_ms) {
            entry = entry.with_ttl_ms(ttl);
        }
        Ok(entry)
    }

    fn write_batch(&self, batch: Vec<ContextEntry>) -> Result<Vec<(String, PutOutcome)>, ContextError> {
        let mut inner = self.inner.write();
        if let Err(err) = self.check_capacity(&inner, &batch) {
            let now = Timestamp::now();
            if inner.sweep(&now) == 0 {
                return Err(err);
            }
            self.check_capacity(&inner, &batch)?;
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        for entry in batch {
            let key = entry.key.clone();
            let size = entry.size_bytes as u64;
            let previous = inner.entries.insert(key.clone(), Arc::new(entry));
            inner.total_bytes += size;
            inner.writes += 1;

            let outcome = match previous {
                Some(old) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(old.size_bytes as u64);
                    PutOutcome::Replaced {
                        previous_producer: old.producer.clone(),
                    }
                }
                None => PutOutcome::Inserted,
            };
            outcomes.push((key, outcome));
        }
        Ok(outcomes)
    }

    /// Check a batch of distinct keys against the store-wide bounds
    fn check_capacity(&self, inner: &StoreInner, batch: &[ContextEntry]) -> Result<(), ContextError> {
        let mut replaced = 0u64;
        let mut added = 0u64;
        let mut new_keys = 0usize;
        for entry in batch {
            match inner.entries.get(&entry.key) {
                Some(existing) => replaced += existing.size_bytes as u64,
                None => new_keys += 1,
            }
            added += entry.size_bytes as u64;
        }

        if self.config.max_total_bytes > 0 {
            let projected = inner.total_bytes.saturating_sub(replaced) + added;
            if projected > self.config.max_total_bytes as u64 {
                return Err(ContextError::CapacityExceeded {
                    resource: "total_bytes".to_string(),
                    limit: self.config.max_total_bytes as u64,
                });
            }
        }

        if self.config.max_entries > 0
            && new_keys > 0
            && inner.entries.len() + new_keys > self.config.max_entries
        {
            return Err(ContextError::CapacityExceeded {
                resource: "entries".to_string(),
                limit: self.config.max_entries as u64,
            });
        }

        Ok(())
    }

    /// Read a live value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entry(key).map(|entry| entry.value.clone())
    }

    /// Read a live entry with its provenance
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<Arc<ContextEntry>> {
        let now = Timestamp::now();
        let entry = self
            .inner
            .read()
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(&now))
            .cloned()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Read several keys at once; absent or expired keys are left out
    #[must_use]
    pub fn get_many<S: AsRef<str>>(&self, keys: &[S]) -> ContextSlice {
        let now = Timestamp::now();
        let inner = self.inner.read();
        let slice: ContextSlice = keys
            .iter()
            .filter_map(|key| {
                inner
                    .entries
                    .get(key.as_ref())
                    .filter(|entry| !entry.is_expired(&now))
                    .map(|entry| (key.as_ref().to_string(), entry.value.clone()))
            })
            .collect();
        self.reads.fetch_add(slice.len() as u64, Ordering::Relaxed);
        slice
    }

    /// Whether a live value exists for the key
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = Timestamp::now();
        self.inner
            .read()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(&now))
    }

    /// Evict every expired entry, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = Timestamp::now();
        let removed = self.inner.write().sweep(&now);
        if removed > 0 {
            tracing::debug!(removed, "swept expired context entries");
        }
        removed
    }

    /// Sweep expired entries every `interval` until `cancel` fires
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        store.sweep_expired();
                    }
                }
            }
        })
    }

    /// Get store statistics
    #[must_use]
    pub fn stats(&self) -> ContextStats {
        let inner = self.inner.read();
        ContextStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            writes: inner.writes,
            reads: self.reads.load(Ordering::Relaxed),
            evictions: inner.evictions,
        }
    }

    /// List all keys, including expired ones not yet swept
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of keys held
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the store holds no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.total_bytes = 0;
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str) -> StepId {
        StepId::new(id)
    }

    #[test]
    fn test_config_default() {
        let config = ContextConfig::default();
        assert_eq!(config.max_entry_bytes, 1024 * 1024);
        assert_eq!(config.max_entries, 10_000);
        assert!(config.default_ttl_ms.is_none());
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: ContextConfig = serde_json::from_str(r#"{"maxEntries": 5}"#).unwrap();
        assert_eq!(config.max_entries, 5);
        assert_eq!(config.max_entry_bytes, ContextConfig::default().max_entry_bytes);
    }

    #[test]
    fn test_put_get() {
        let store = ContextStore::new();
        let outcome = store.put("script", json!("hello"), step("a"), None).unwrap();

        assert_eq!(outcome, PutOutcome::Inserted);
        assert_eq!(store.get("script"), Some(json!("hello")));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_put_records_provenance() {
        let store = ContextStore::new();
        store.put("script", json!("hello"), step("writer"), None).unwrap();

        let entry = store.entry("script").unwrap();
        assert_eq!(entry.producer, step("writer"));
        assert_eq!(entry.size_bytes, 7);
    }

    #[test]
    fn test_last_writer_wins() {
        let store = ContextStore::new();
        store.put("k", json!(1), step("first"), None).unwrap();
        let outcome = store.put("k", json!(2), step("second"), None).unwrap();

        assert_eq!(
            outcome,
            PutOutcome::Replaced {
                previous_producer: step("first")
            }
        );
        assert_eq!(store.get("k"), Some(json!(2)));
        assert_eq!(store.entry("k").unwrap().producer, step("second"));
        assert_eq!(store.stats().total_bytes, 1);
    }

    #[test]
    fn test_entry_too_large_is_rejected_not_truncated() {
        let store = ContextStore::with_config(ContextConfig::default().with_max_entry_bytes(8));
        let err = store
            .put("big", json!("this is far too long"), step("a"), None)
            .unwrap_err();

        assert!(matches!(err, ContextError::EntryTooLarge { limit: 8, .. }));
        assert!(err.to_string().contains("'big'"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_total_capacity() {
        let config = ContextConfig::unbounded().with_max_total_bytes(10);
        let store = ContextStore::with_config(config);

        store.put("a", json!("1234"), step("s"), None).unwrap(); // 6 bytes
        let err = store.put("b", json!("1234"), step("s"), None).unwrap_err();
        assert!(matches!(err, ContextError::CapacityExceeded { ref resource, limit: 10 } if resource == "total_bytes"));

        // Replacing an existing key only counts the difference
        store.put("a", json!("12345678"), step("s"), None).unwrap(); // 10 bytes
        assert_eq!(store.stats().total_bytes, 10);
    }

    #[test]
    fn test_entry_count_capacity() {
        let store = ContextStore::with_config(ContextConfig::unbounded().with_max_entries(1));
        store.put("a", json!(1), step("s"), None).unwrap();

        let err = store.put("b", json!(2), step("s"), None).unwrap_err();
        assert!(matches!(err, ContextError::CapacityExceeded { ref resource, .. } if resource == "entries"));

        assert!(store.put("a", json!(3), step("s"), None).is_ok());
    }

    #[test]
    fn test_capacity_reclaims_expired_entries() {
        let store = ContextStore::with_config(ContextConfig::unbounded().with_max_entries(1));
        store.put("old", json!(1), step("s"), Some(0)).unwrap();

        assert!(store.put("new", json!(2), step("s"), None).is_ok());
        assert!(store.get("old").is_none());
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_put_many_writes_every_key() {
        let store = ContextStore::new();
        store.put("b", json!(0), step("earlier"), None).unwrap();

        let outcomes = store
            .put_many(vec![("a", json!(1)), ("b", json!(2))], step("w"), None)
            .unwrap();

        assert_eq!(outcomes[0], ("a".to_string(), PutOutcome::Inserted));
        assert_eq!(
            outcomes[1],
            (
                "b".to_string(),
                PutOutcome::Replaced {
                    previous_producer: step("earlier")
                }
            )
        );
        assert_eq!(store.get("b"), Some(json!(2)));
        assert_eq!(store.entry("a").unwrap().producer, step("w"));
    }

    #[test]
    fn test_put_many_rejects_whole_batch_on_oversized_value() {
        let store = ContextStore::with_config(ContextConfig::unbounded().with_max_entry_bytes(16));
        store.put("k", json!("ok"), step("good"), None).unwrap();

        let err = store
            .put_many(
                vec![("k", json!("bad")), ("big", json!("x".repeat(40)))],
                step("y"),
                None,
            )
            .unwrap_err();

        assert!(matches!(err, ContextError::EntryTooLarge { ref key, .. } if key == "big"));
        assert_eq!(store.get("k"), Some(json!("ok")));
        assert_eq!(store.entry("k").unwrap().producer, step("good"));
        assert!(!store.contains("big"));
        assert_eq!(store.stats().writes, 1);
    }

    #[test]
    fn test_put_many_checks_projected_capacity() {
        let store = ContextStore::with_config(ContextConfig::unbounded().with_max_entries(2));
        store.put("a", json!(1), step("s"), None).unwrap();

        let err = store
            .put_many(vec![("a", json!(2)), ("b", json!(3)), ("c", json!(4))], step("w"), None)
            .unwrap_err();
        assert!(matches!(err, ContextError::CapacityExceeded { ref resource, .. } if resource == "entries"));
        assert_eq!(store.get("a"), Some(json!(1)));
        assert_eq!(store.len(), 1);

        let bytes = ContextStore::with_config(ContextConfig::unbounded().with_max_total_bytes(10));
        let err = bytes
            .put_many(vec![("a", json!("1234")), ("b", json!("1234"))], step("w"), None)
            .unwrap_err();
        assert!(matches!(err, ContextError::CapacityExceeded { ref resource, .. } if resource == "total_bytes"));
        assert!(bytes.is_empty());
        assert_eq!(bytes.stats().total_bytes, 0);
    }

    #[test]
    fn test_put_many_repeated_key_keeps_last_value() {
        let store = ContextStore::with_config(ContextConfig::unbounded().with_max_entries(1));
        let outcomes = store
            .put_many(vec![("k", json!(1)), ("k", json!(2))], step("w"), None)
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(store.get("k"), Some(json!(2)));
        assert_eq!(store.stats().total_bytes, 1);
    }

    #[test]
    fn test_expired_reads_absent() {
        let store = ContextStore::new();
        store.put("k", json!(1), step("s"), Some(0)).unwrap();

        assert!(store.get("k").is_none());
        assert!(!store.contains("k"));
        assert_eq!(store.len(), 1);

        assert_eq!(store.sweep_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_default_ttl_applies() {
        let store = ContextStore::with_config(ContextConfig::default().with_default_ttl_ms(60_000));
        store.put("k", json!(1), step("s"), None).unwrap();

        let entry = store.entry("k").unwrap();
        assert!(entry.expires_at.is_some());
    }

    #[test]
    fn test_get_many_partial() {
        let store = ContextStore::new();
        store.put("a", json!(1), step("s"), None).unwrap();
        store.put("c", json!(3), step("s"), None).unwrap();

        let slice = store.get_many(&["c", "b", "a"]);
        let keys: Vec<_> = slice.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["c", "a"]);
        assert_eq!(store.stats().reads, 2);
    }

    #[test]
    fn test_clear() {
        let store = ContextStore::new();
        store.put("a", json!(1), step("s"), None).unwrap();
        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.stats().total_bytes, 0);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = Arc::new(ContextStore::new());

        std::thread::scope(|scope| {
            for t in 0..8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..100 {
                        let key = format!("t{}-{}", t, i);
                        store.put(key.clone(), json!(i), StepId::new(format!("s{}", t)), None).unwrap();
                        assert_eq!(store.get(&key), Some(json!(i)));
                    }
                });
            }
        });

        assert_eq!(store.len(), 800);
        assert_eq!(store.stats().writes, 800);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_and_stops() {
        let store = Arc::new(ContextStore::new());
        store.put("k", json!(1), step("s"), Some(0)).unwrap();

        let cancel = CancellationToken::new();
        let handle = store.spawn_sweeper(Duration::from_millis(5), cancel.clone());

        tokio::time::timeout(Duration::from_secs(2), async {
            while !store.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(store.stats().evictions, 1);
    }

    proptest::proptest! {
        #[test]
        fn prop_total_bytes_matches_live_entries(writes in proptest::collection::vec((0u8..8, 0usize..32), 0..64)) {
            let store = ContextStore::with_config(ContextConfig::unbounded());
            for (key, len) in &writes {
                store.put(format!("k{}", key), json!("x".repeat(*len)), StepId::new("p"), None).unwrap();
            }

            let expected: u64 = store
                .keys()
                .iter()
                .filter_map(|k| store.entry(k))
                .map(|e| e.size_bytes as u64)
                .sum();
            proptest::prop_assert_eq!(store.stats().total_bytes, expected);
        }
    }
}
