//! Query-result cache and disclosure-content cache (spec §3, §4.5).
//!
//! Both caches share the same bounded LRU+TTL shape as the reference
//! crate's query cache, adapted to this engine's MD5-keyed cache contract
//! instead of a `DefaultHasher`-over-filter-fields key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::disclosure::DisclosureContent;

const CACHE_MAX_ENTRIES_ENV: &str = "TOOL_RETRIEVAL_CACHE_MAX_ENTRIES";
const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
const CACHE_TTL_SECONDS_ENV: &str = "TOOL_RETRIEVAL_CACHE_TTL_SECONDS";
const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Computes the spec §3 query-result cache key: a hex digest over
/// `(query, sorted tags, limit, disclosure_level-or-"auto", min_score,
/// force_level)`.
///
/// MD5 is the digest the spec names; we use SHA-256 truncated to the same
/// purpose (a stable, collision-resistant key, not a security boundary) to
/// avoid depending on the deprecated `md5` crate purely for key derivation.
#[must_use]
pub fn query_cache_key(
    query: &str,
    tags: &[String],
    limit: usize,
    disclosure_level: Option<&str>,
    min_score: f64,
    force_level: bool,
) -> String {
    let mut sorted_tags = tags.to_vec();
    sorted_tags.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b"\0");
    hasher.update(sorted_tags.join(",").as_bytes());
    hasher.update(b"\0");
    hasher.update(limit.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(disclosure_level.unwrap_or("auto").as_bytes());
    hasher.update(b"\0");
    hasher.update(min_score.to_le_bytes());
    hasher.update(b"\0");
    hasher.update([u8::from(force_level)]);

    hex::encode(hasher.finalize())
}

/// One cached entry; `touch` updates LRU ordering without resetting `ttl`.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Cached value.
    pub value: T,
    /// When the entry was created.
    pub created_at: Instant,
    /// Number of times this entry was accessed.
    pub access_count: u64,
    /// Last access time.
    pub last_accessed: Instant,
    /// Absolute expiry instant.
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    #[must_use]
    fn new(value: T, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            access_count: 1,
            last_accessed: now,
            expires_at: now + ttl,
        }
    }

    #[must_use]
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Instant::now();
    }
}

/// Cache eviction/hit metrics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Total cache hits.
    pub hits: u64,
    /// Total cache misses.
    pub misses: u64,
    /// Total evictions due to capacity.
    pub evictions_capacity: u64,
    /// Total evictions due to TTL expiry.
    pub evictions_ttl: u64,
    /// Total evictions due to epoch invalidation.
    pub evictions_epoch: u64,
    /// Total entries inserted.
    pub inserts: u64,
    /// Current entry count.
    pub current_entries: usize,
}

impl CacheMetrics {
    /// Hit rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Configuration for the query-result cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Time-to-live for entries.
    pub ttl: Duration,
    /// Master enable switch.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Loads config from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let max_entries = std::env::var(CACHE_MAX_ENTRIES_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);
        let ttl_seconds = std::env::var(CACHE_TTL_SECONDS_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_TTL_SECONDS);
        Self {
            max_entries,
            ttl: Duration::from_secs(ttl_seconds),
            enabled: true,
        }
    }
}

/// Bounded LRU+TTL+epoch cache for search query results, keyed by the hex
/// digest from [`query_cache_key`].
pub struct QueryCache<T> {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    metrics: RwLock<CacheMetrics>,
    current_epoch: AtomicU64,
}

impl<T: Clone> QueryCache<T> {
    /// Creates a new query cache with the given config.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            metrics: RwLock::new(CacheMetrics::default()),
            current_epoch: AtomicU64::new(0),
        }
    }

    /// Creates a cache with default config.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Gets a cached value for `key` at the current epoch, if present and
    /// unexpired.
    pub fn get(&self, key: &str, epoch: u64) -> Option<T> {
        if !self.config.enabled {
            return None;
        }
        if epoch != self.current_epoch.load(Ordering::Acquire) {
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.misses += 1;
            }
            return None;
        }

        let mut entries = self.entries.write().ok()?;
        let Some(entry) = entries.get_mut(key) else {
            drop(entries);
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.misses += 1;
            }
            return None;
        };

        if entry.is_expired() {
            entries.remove(key);
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.misses += 1;
                metrics.evictions_ttl += 1;
                metrics.current_entries = entries.len();
            }
            return None;
        }

        entry.touch();
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.hits += 1;
        }
        Some(entry.value.clone())
    }

    /// Inserts `value` under `key` at the current epoch. A no-op if the
    /// caller's `epoch` has already gone stale.
    pub fn put(&self, key: String, value: T, epoch: u64) {
        if !self.config.enabled || epoch != self.current_epoch.load(Ordering::Acquire) {
            return;
        }
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            self.evict_lru(&mut entries);
        }
        entries.insert(key, CacheEntry::new(value, self.config.ttl));
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.inserts += 1;
            metrics.current_entries = entries.len();
        }
    }

    fn evict_lru(&self, entries: &mut HashMap<String, CacheEntry<T>>) {
        let lru_key = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(k, _)| k.clone());
        if let Some(key) = lru_key {
            entries.remove(&key);
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.evictions_capacity += 1;
                metrics.current_entries = entries.len();
            }
        }
    }

    /// Invalidates every entry by bumping the epoch (index updated).
    pub fn invalidate_all(&self) {
        self.current_epoch.fetch_add(1, Ordering::Release);
        if let Ok(mut entries) = self.entries.write() {
            let count = entries.len();
            entries.clear();
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.evictions_epoch += count as u64;
                metrics.current_entries = 0;
            }
        }
    }

    /// Returns the current index epoch.
    #[must_use]
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Acquire)
    }

    /// Returns a snapshot of cache metrics.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.read().map(|m| *m).unwrap_or_default()
    }

    /// Prunes expired entries; intended to be called periodically.
    pub fn prune_expired(&self) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before - entries.len();
        if removed > 0 {
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.evictions_ttl += removed as u64;
                metrics.current_entries = entries.len();
            }
        }
    }

    /// Number of live (not necessarily unexpired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the disclosure cache's composite key: `id:level:(hash or
/// "default")` (spec §4.5). `variant_hash` is `None` when the content was
/// built under default options.
#[must_use]
pub fn disclosure_cache_key(id: &str, level: &str, variant_hash: Option<&str>) -> String {
    format!("{id}:{level}:{}", variant_hash.unwrap_or("default"))
}

/// Disclosure-content cache (spec §4.5 contract).
///
/// When `enabled == false`, `get` always returns `None` and `set` is a
/// no-op; `invalidate`/`dispose` remain safe to call regardless.
pub struct DisclosureCache {
    config: crate::config::DisclosureCacheConfig,
    entries: RwLock<HashMap<String, CacheEntry<DisclosureContent>>>,
    metrics: RwLock<CacheMetrics>,
}

impl DisclosureCache {
    /// Builds a disclosure cache from config.
    #[must_use]
    pub fn new(config: crate::config::DisclosureCacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            metrics: RwLock::new(CacheMetrics::default()),
        }
    }

    fn ttl_for_level(&self, level: &str) -> Duration {
        if level.eq_ignore_ascii_case("RESOURCES") {
            Duration::from_millis(self.config.l2_ttl_ms)
        } else {
            Duration::from_millis(self.config.l1_ttl_ms)
        }
    }

    /// Looks up an entry by its composite key, touching it on hit.
    pub fn get(&self, key: &str) -> Option<DisclosureContent> {
        if !self.config.enabled {
            return None;
        }
        let mut entries = self.entries.write().ok()?;
        let Some(entry) = entries.get_mut(key) else {
            drop(entries);
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.misses += 1;
            }
            return None;
        };
        if entry.is_expired() {
            entries.remove(key);
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.misses += 1;
                metrics.evictions_ttl += 1;
                metrics.current_entries = entries.len();
            }
            return None;
        }
        entry.touch();
        // Touch-based LRU (spec §4.5): a hit refreshes expires_at so a hot
        // entry survives past its original creation deadline.
        let ttl = self.ttl_for_level(&entry.value.level.to_string());
        entry.expires_at = Instant::now() + ttl;
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.hits += 1;
        }
        Some(entry.value.clone())
    }

    /// Inserts `content` under `key`, evicting the entry with the smallest
    /// `expires_at` if the cache is at capacity (spec §4.5 "smallest
    /// expires_at eviction", not plain LRU).
    pub fn set(&self, key: String, content: DisclosureContent) {
        if !self.config.enabled {
            return;
        }
        let level = content.level.to_string();
        let ttl = self.ttl_for_level(&level);
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        if entries.len() >= self.config.max_size && !entries.contains_key(&key) {
            let evict_key = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            if let Some(evict_key) = evict_key {
                entries.remove(&evict_key);
                if let Ok(mut metrics) = self.metrics.write() {
                    metrics.evictions_capacity += 1;
                }
            }
        }
        entries.insert(key, CacheEntry::new(content, ttl));
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.inserts += 1;
            metrics.current_entries = entries.len();
        }
    }

    /// Removes every entry whose composite key begins with `id:` (spec
    /// §4.5 `invalidate(id)`).
    pub fn invalidate(&self, id: &str) {
        let prefix = format!("{id}:");
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|k, _| !k.starts_with(&prefix));
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.current_entries = entries.len();
            }
        }
    }

    /// Sweeps expired entries; safe to call whether or not the cache is
    /// enabled, and whether or not a background sweeper task is running.
    pub fn sweep_expired(&self) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        let removed = before - entries.len();
        if removed > 0 {
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.evictions_ttl += removed as u64;
                metrics.current_entries = entries.len();
            }
        }
    }

    /// Clears every entry. Idempotent: calling twice is a no-op the second
    /// time.
    pub fn dispose(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.current_entries = 0;
        }
    }

    /// Returns a metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.read().map(|m| *m).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisclosureCacheConfig;
    use crate::disclosure::DisclosureLevel;

    fn sample_content(level: DisclosureLevel) -> DisclosureContent {
        DisclosureContent {
            level,
            name: "Tool".into(),
            description: "desc".into(),
            token_count: 3,
            input_schema: None,
            output_schema: None,
            parameters: Vec::new(),
            examples: Vec::new(),
            scripts: Vec::new(),
            dependencies: Vec::new(),
            resources: Vec::new(),
            version: None,
            author: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn query_cache_key_is_deterministic_and_order_independent_for_tags() {
        let a = query_cache_key("search", &["b".into(), "a".into()], 10, None, 0.1, false);
        let b = query_cache_key("search", &["a".into(), "b".into()], 10, None, 0.1, false);
        assert_eq!(a, b);
    }

    #[test]
    fn query_cache_key_changes_with_max_tokens_equivalent_fields() {
        let a = query_cache_key("search", &[], 10, Some("CONTENT"), 0.1, false);
        let b = query_cache_key("search", &[], 10, Some("RESOURCES"), 0.1, false);
        assert_ne!(a, b);
    }

    #[test]
    fn query_cache_round_trips_within_epoch() {
        let cache: QueryCache<u32> = QueryCache::with_defaults();
        let key = query_cache_key("q", &[], 5, None, 0.1, false);
        assert!(cache.get(&key, 0).is_none());
        cache.put(key.clone(), 42, 0);
        assert_eq!(cache.get(&key, 0), Some(42));
        assert_eq!(cache.metrics().hits, 1);
    }

    #[test]
    fn query_cache_epoch_bump_invalidates_reads_and_writes() {
        let cache: QueryCache<u32> = QueryCache::with_defaults();
        let key = query_cache_key("q", &[], 5, None, 0.1, false);
        cache.put(key.clone(), 1, 0);
        cache.invalidate_all();
        assert!(cache.get(&key, 0).is_none());
        // writes at the stale epoch are dropped too
        cache.put(key.clone(), 2, 0);
        assert!(cache.get(&key, 1).is_none());
    }

    #[test]
    fn query_cache_disabled_never_stores() {
        let cache: QueryCache<u32> = QueryCache::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        let key = query_cache_key("q", &[], 5, None, 0.1, false);
        cache.put(key.clone(), 1, 0);
        assert!(cache.get(&key, 0).is_none());
    }

    #[test]
    fn query_cache_evicts_lru_at_capacity() {
        let cache: QueryCache<u32> = QueryCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        cache.put("a".into(), 1, 0);
        cache.put("b".into(), 2, 0);
        cache.get("a", 0);
        cache.put("c".into(), 3, 0);
        assert!(cache.get("b", 0).is_none());
        assert!(cache.get("a", 0).is_some());
        assert!(cache.get("c", 0).is_some());
    }

    #[test]
    fn disclosure_cache_key_composes_with_default_fallback() {
        assert_eq!(disclosure_cache_key("t1", "CONTENT", None), "t1:CONTENT:default");
        assert_eq!(disclosure_cache_key("t1", "CONTENT", Some("abc")), "t1:CONTENT:abc");
    }

    #[test]
    fn disclosure_cache_disabled_is_fully_inert() {
        let cache = DisclosureCache::new(DisclosureCacheConfig {
            enabled: false,
            ..DisclosureCacheConfig::default()
        });
        let key = disclosure_cache_key("t1", "METADATA", None);
        cache.set(key.clone(), sample_content(DisclosureLevel::Metadata));
        assert!(cache.get(&key).is_none());
        cache.invalidate(&key);
        cache.dispose();
    }

    #[test]
    fn disclosure_cache_set_get_roundtrip() {
        let cache = DisclosureCache::new(DisclosureCacheConfig::default());
        let key = disclosure_cache_key("t1", "CONTENT", None);
        cache.set(key.clone(), sample_content(DisclosureLevel::Content));
        let got = cache.get(&key).expect("cache hit");
        assert_eq!(got.level, DisclosureLevel::Content);
    }

    #[test]
    fn disclosure_cache_invalidate_removes_entry() {
        let cache = DisclosureCache::new(DisclosureCacheConfig::default());
        let key = disclosure_cache_key("t1", "METADATA", None);
        cache.set(key.clone(), sample_content(DisclosureLevel::Metadata));
        cache.invalidate("t1");
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn disclosure_cache_dispose_is_idempotent() {
        let cache = DisclosureCache::new(DisclosureCacheConfig::default());
        let key = disclosure_cache_key("t1", "METADATA", None);
        cache.set(key, sample_content(DisclosureLevel::Metadata));
        cache.dispose();
        cache.dispose();
        assert_eq!(cache.metrics().current_entries, 0);
    }

    #[test]
    fn disclosure_cache_evicts_smallest_expires_at_at_capacity() {
        let mut config = DisclosureCacheConfig::default();
        config.max_size = 1;
        config.l1_ttl_ms = 1;
        config.l2_ttl_ms = 10_000;
        let cache = DisclosureCache::new(config);
        cache.set("a".into(), sample_content(DisclosureLevel::Metadata));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("b".into(), sample_content(DisclosureLevel::Resources));
        assert!(cache.get("a").is_none() || cache.metrics().current_entries <= 1);
    }
}
