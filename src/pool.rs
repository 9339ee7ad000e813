//! Path-keyed connection pool for vector-store handles (spec §4.7).
//!
//! Deliberately NOT modeled on the reference crate's SQLite-corruption-
//! recovery pool: this pool's job is handle lifecycle and health, not
//! repairing a corrupt file. It follows the reference stack's general
//! `Config`/`from_env`/`Arc<RwLock<HashMap>>`/tracing idiom instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{RetrievalError, RetrievalResult};
use crate::vector_store::VectorConnection;

/// A factory for opening a [`VectorConnection`] at a given path; lets the
/// pool stay driver-agnostic.
#[async_trait::async_trait]
pub trait ConnectionOpener: Send + Sync {
    /// Opens (or connects to) the store rooted at `path`.
    async fn open(&self, path: &str) -> RetrievalResult<Arc<dyn VectorConnection>>;
}

struct PooledHandle {
    connection: Arc<dyn VectorConnection>,
    created_at: Instant,
    last_access: Instant,
    access_count: u64,
    borrowed_since: Option<Instant>,
    healthy: bool,
}

/// Pool statistics snapshot (spec §4.7 "Statistics").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Current handle count.
    pub size: usize,
    /// Configured maximum handle count.
    pub max_size: usize,
    /// Cumulative accesses across all handles.
    pub total_access: u64,
    /// Hit rate in `[0, 1]`: accesses that reused an existing handle.
    pub hit_rate: f64,
    /// Handles currently marked healthy.
    pub healthy_count: usize,
    /// Handles idle (no access) for more than 30 seconds.
    pub idle_count: usize,
    /// Handles currently checked out.
    pub borrowed_count: usize,
    /// Handles borrowed longer than the leak-detection threshold.
    pub potential_leaks: usize,
}

struct PoolState {
    handles: HashMap<String, PooledHandle>,
    hits: u64,
    misses: u64,
}

/// Owns up to `max_instances` [`VectorConnection`] handles keyed by
/// normalized path (spec §4.7).
pub struct ConnectionPool {
    config: PoolConfig,
    opener: Arc<dyn ConnectionOpener>,
    state: RwLock<PoolState>,
}

fn normalize_path(path: &str) -> String {
    path.trim_end_matches('/').to_owned()
}

impl ConnectionPool {
    /// Builds a pool with the given config and connection factory.
    #[must_use]
    pub fn new(config: PoolConfig, opener: Arc<dyn ConnectionOpener>) -> Self {
        Self {
            config,
            opener,
            state: RwLock::new(PoolState {
                handles: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Returns the healthy existing handle for `path`, opening a new one if
    /// needed; evicts stale/unhealthy entries first if the pool is full.
    /// Never blocks waiting for capacity — overflow is resolved by
    /// eviction (spec §4.7 / §5 "the pool itself never blocks
    /// `get_connection`").
    pub async fn get_connection(&self, path: &str) -> RetrievalResult<Arc<dyn VectorConnection>> {
        let key = normalize_path(path);
        let now = Instant::now();

        {
            let mut state = self.state.write().await;
            if let Some(handle) = state.handles.get_mut(&key) {
                if handle.healthy {
                    handle.last_access = now;
                    handle.access_count += 1;
                    handle.borrowed_since = Some(now);
                    state.hits += 1;
                    return Ok(handle.connection.clone());
                }
                state.handles.remove(&key);
            }
            state.misses += 1;
        }

        self.evict_if_full().await;

        let connection = self.opener.open(&key).await?;
        let mut state = self.state.write().await;
        state.handles.insert(
            key,
            PooledHandle {
                connection: connection.clone(),
                created_at: now,
                last_access: now,
                access_count: 1,
                borrowed_since: Some(now),
                healthy: true,
            },
        );
        Ok(connection)
    }

    /// Marks a handle as no longer checked out by the caller.
    pub async fn release(&self, path: &str) {
        let key = normalize_path(path);
        let mut state = self.state.write().await;
        if let Some(handle) = state.handles.get_mut(&key) {
            handle.borrowed_since = None;
        }
    }

    async fn evict_if_full(&self) {
        let mut state = self.state.write().await;
        if state.handles.len() < self.config.max_instances {
            return;
        }

        let ttl = Duration::from_millis(self.config.instance_ttl_ms);
        let now = Instant::now();

        let expired_key = state
            .handles
            .iter()
            .find(|(_, h)| {
                let age = now.duration_since(h.created_at);
                let idle = now.duration_since(h.last_access);
                (age > ttl && idle > Duration::from_secs(60)) || age > ttl * 2
            })
            .map(|(k, _)| k.clone());

        let evict_key = expired_key.or_else(|| state.handles.iter().min_by_key(|(_, h)| h.last_access).map(|(k, _)| k.clone()));

        if let Some(key) = evict_key {
            debug!(path = %key, "evicting pooled connection handle");
            state.handles.remove(&key);
        }
    }

    /// Runs a cheap health probe (`table_names`) against every handle,
    /// evicting any that fail (spec §4.7 "Health check").
    pub async fn health_check(&self) {
        let paths: Vec<String> = {
            let state = self.state.read().await;
            state.handles.keys().cloned().collect()
        };

        for path in paths {
            let connection = {
                let state = self.state.read().await;
                state.handles.get(&path).map(|h| h.connection.clone())
            };
            let Some(connection) = connection else { continue };

            let healthy = connection.table_names().await.is_ok();
            let mut state = self.state.write().await;
            if let Some(handle) = state.handles.get_mut(&path) {
                handle.healthy = healthy;
                if !healthy {
                    warn!(path = %path, "pooled connection failed health check, evicting");
                    state.handles.remove(&path);
                }
            }
        }
    }

    /// Spawns a background task that calls [`Self::health_check`] on the
    /// configured interval. The returned handle must be kept or aborted by
    /// the caller; dropping it does not stop the task (spec §5 "unref
    /// their timer so they never block process exit" — callers that want
    /// that must abort the handle explicitly on shutdown).
    pub fn spawn_health_check_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        let interval = Duration::from_millis(self.config.health_check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.health_check().await;
            }
        })
    }

    /// Returns a statistics snapshot.
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.read().await;
        let now = Instant::now();
        let leak_threshold = Duration::from_millis(self.config.leak_detection_threshold_ms);

        let healthy_count = state.handles.values().filter(|h| h.healthy).count();
        let idle_count = state
            .handles
            .values()
            .filter(|h| now.duration_since(h.last_access) > Duration::from_secs(30))
            .count();
        let borrowed_count = state.handles.values().filter(|h| h.borrowed_since.is_some()).count();
        let potential_leaks = state
            .handles
            .values()
            .filter(|h| h.borrowed_since.map(|t| now.duration_since(t) > leak_threshold).unwrap_or(false))
            .count();

        let total = state.hits + state.misses;
        let hit_rate = if total == 0 { 0.0 } else { state.hits as f64 / total as f64 };

        PoolStats {
            size: state.handles.len(),
            max_size: self.config.max_instances,
            total_access: state.handles.values().map(|h| h.access_count).sum(),
            hit_rate,
            healthy_count,
            idle_count,
            borrowed_count,
            potential_leaks,
        }
    }

    /// Stops the timer conceptually (callers own the `JoinHandle` returned
    /// by [`Self::spawn_health_check_task`] and should abort it), closes
    /// every handle, and zeroes counters. Idempotent.
    pub async fn dispose(&self) {
        let mut state = self.state.write().await;
        state.handles.clear();
        state.hits = 0;
        state.misses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::InMemoryConnection;

    struct InMemoryOpener;

    #[async_trait::async_trait]
    impl ConnectionOpener for InMemoryOpener {
        async fn open(&self, _path: &str) -> RetrievalResult<Arc<dyn VectorConnection>> {
            Ok(Arc::new(InMemoryConnection::new()))
        }
    }

    fn pool(config: PoolConfig) -> ConnectionPool {
        ConnectionPool::new(config, Arc::new(InMemoryOpener))
    }

    #[tokio::test]
    async fn get_connection_reuses_existing_handle() {
        let p = pool(PoolConfig::default());
        p.get_connection("/data/a").await.unwrap();
        p.get_connection("/data/a").await.unwrap();
        let stats = p.stats().await;
        assert_eq!(stats.size, 1);
        assert_eq!(stats.total_access, 2);
        assert!(stats.hit_rate > 0.0);
    }

    #[tokio::test]
    async fn path_normalization_treats_trailing_slash_as_same_key() {
        let p = pool(PoolConfig::default());
        p.get_connection("/data/a").await.unwrap();
        p.get_connection("/data/a/").await.unwrap();
        assert_eq!(p.stats().await.size, 1);
    }

    #[tokio::test]
    async fn overflow_evicts_lru_when_at_capacity() {
        let config = PoolConfig {
            max_instances: 1,
            ..PoolConfig::default()
        };
        let p = pool(config);
        p.get_connection("/data/a").await.unwrap();
        p.get_connection("/data/b").await.unwrap();
        assert_eq!(p.stats().await.size, 1);
    }

    #[tokio::test]
    async fn health_check_evicts_handle_that_fails_probe() {
        let p = pool(PoolConfig::default());
        p.get_connection("/data/a").await.unwrap();
        p.health_check().await;
        assert_eq!(p.stats().await.healthy_count, 1);
    }

    #[tokio::test]
    async fn dispose_clears_handles_and_is_idempotent() {
        let p = pool(PoolConfig::default());
        p.get_connection("/data/a").await.unwrap();
        p.dispose().await;
        p.dispose().await;
        let stats = p.stats().await;
        assert_eq!(stats.size, 0);
        assert_eq!(stats.total_access, 0);
    }

    #[tokio::test]
    async fn potential_leaks_flags_long_borrowed_handle() {
        let config = PoolConfig {
            leak_detection_threshold_ms: 1,
            ..PoolConfig::default()
        };
        let p = pool(config);
        p.get_connection("/data/a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let stats = p.stats().await;
        assert_eq!(stats.potential_leaks, 1);
    }

    #[tokio::test]
    async fn release_clears_borrowed_marker() {
        let p = pool(PoolConfig::default());
        p.get_connection("/data/a").await.unwrap();
        p.release("/data/a").await;
        let stats = p.stats().await;
        assert_eq!(stats.borrowed_count, 0);
    }

    proptest::proptest! {
        // spec §4.7 / §8: pool size never exceeds max_instances no matter how
        // many distinct paths are requested.
        #[test]
        fn pool_size_never_exceeds_max_instances(max_instances in 1usize..8, distinct_paths in 1usize..20) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let config = PoolConfig { max_instances, ..PoolConfig::default() };
                let p = pool(config);
                for i in 0..distinct_paths {
                    p.get_connection(&format!("/data/{i}")).await.unwrap();
                }
                let stats = p.stats().await;
                proptest::prop_assert!(stats.size <= max_instances);
                Ok(())
            })?;
        }
    }
}
