//! Configuration option trees for the retrieval engine, disclosure
//! subsystem, connection pool, and tag matcher.
//!
//! Every default mirrors the documented defaults; `from_env()` overlays
//! `TOOL_RETRIEVAL_*` environment variables on top, following the
//! explicit-field > env-var > documented-default precedence used by the
//! reference stack's `DbPoolConfig::from_env`.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::tag_hierarchy::TagHierarchy;

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

/// Per-method weights used by the unified scoring engine's multi-method
/// blend (spec §4.3 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodWeights {
    /// Weight for dense vector search contributions.
    pub vector: f64,
    /// Weight for lexical keyword search contributions.
    pub keyword: f64,
    /// Weight for semantic (re-labeled vector) search contributions.
    pub semantic: f64,
    /// Weight for tag match contributions.
    pub tag: f64,
}

impl Default for MethodWeights {
    fn default() -> Self {
        Self {
            vector: 0.5,
            keyword: 0.3,
            semantic: 0.2,
            tag: 0.1,
        }
    }
}

/// Top-level retrieval configuration (spec §6 "Retrieval" option group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Per-method weights for the multi-method unified score blend.
    pub weights: MethodWeights,
    /// RRF dampening constant (telemetry only; default 60).
    pub rrf_k: f64,
    /// Minimum unified score to survive filtering.
    pub min_score: f64,
    /// Default result cap when the caller does not supply `limit`.
    pub max_results: usize,
    /// Whether tag matching runs when query tags are supplied.
    pub enable_tag_matching: bool,
    /// Whether keyword (lexical) matching runs.
    pub enable_keyword_matching: bool,
    /// Whether semantic (re-labeled vector) matching runs.
    pub enable_semantic_matching: bool,
    /// Query-result cache TTL in seconds.
    pub cache_ttl_seconds: u64,
    /// Disclosure strategy when no forced level is supplied.
    pub disclosure_strategy: DisclosureStrategy,
    /// Tag hierarchy (levels + aliases) used by the tag matcher.
    pub tag_hierarchy: TagHierarchy,
}

/// Which disclosure strategy the engine falls back to absent a forced level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisclosureStrategy {
    /// Always disclose at METADATA.
    Metadata,
    /// Always disclose at CONTENT.
    Content,
    /// Always disclose at RESOURCES.
    Resources,
    /// Use the per-result decision manager driven by score + token budget.
    Adaptive,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            weights: MethodWeights::default(),
            rrf_k: 60.0,
            min_score: 0.1,
            max_results: 10,
            enable_tag_matching: true,
            enable_keyword_matching: true,
            enable_semantic_matching: true,
            cache_ttl_seconds: 300,
            disclosure_strategy: DisclosureStrategy::Metadata,
            tag_hierarchy: TagHierarchy::default(),
        }
    }
}

impl RetrievalConfig {
    /// Overlay `TOOL_RETRIEVAL_*` environment variables onto the documented
    /// defaults. Does not consult existing field values (call before further
    /// customization if explicit overrides should win).
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            weights: MethodWeights {
                vector: env_f64("TOOL_RETRIEVAL_VECTOR_WEIGHT", defaults.weights.vector),
                keyword: env_f64("TOOL_RETRIEVAL_KEYWORD_WEIGHT", defaults.weights.keyword),
                semantic: env_f64("TOOL_RETRIEVAL_SEMANTIC_WEIGHT", defaults.weights.semantic),
                tag: env_f64("TOOL_RETRIEVAL_TAG_WEIGHT", defaults.weights.tag),
            },
            rrf_k: env_f64("TOOL_RETRIEVAL_RRF_K", defaults.rrf_k),
            min_score: env_f64("TOOL_RETRIEVAL_MIN_SCORE", defaults.min_score),
            max_results: env_usize("TOOL_RETRIEVAL_MAX_RESULTS", defaults.max_results),
            enable_tag_matching: env_bool(
                "TOOL_RETRIEVAL_ENABLE_TAG_MATCHING",
                defaults.enable_tag_matching,
            ),
            enable_keyword_matching: env_bool(
                "TOOL_RETRIEVAL_ENABLE_KEYWORD_MATCHING",
                defaults.enable_keyword_matching,
            ),
            enable_semantic_matching: env_bool(
                "TOOL_RETRIEVAL_ENABLE_SEMANTIC_MATCHING",
                defaults.enable_semantic_matching,
            ),
            cache_ttl_seconds: env_u64("TOOL_RETRIEVAL_CACHE_TTL_SECONDS", defaults.cache_ttl_seconds),
            ..defaults
        }
    }
}

/// Disclosure cache sizing/TTL options (spec §6 "Disclosure V2" option
/// group, `cache` sub-object).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DisclosureCacheConfig {
    /// Whether the disclosure cache is active at all.
    pub enabled: bool,
    /// Maximum number of entries before LRU-by-expiry eviction.
    pub max_size: usize,
    /// Default TTL for METADATA/CONTENT tier entries, in milliseconds.
    pub l1_ttl_ms: u64,
    /// Default TTL for RESOURCES tier entries, in milliseconds.
    pub l2_ttl_ms: u64,
    /// Sweep interval for expired-entry cleanup; 0 disables the sweeper.
    pub cleanup_interval_ms: u64,
}

impl Default for DisclosureCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 2000,
            l1_ttl_ms: 300_000,
            l2_ttl_ms: 300_000,
            cleanup_interval_ms: 300_000,
        }
    }
}

/// Parallel disclosure content loading options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParallelLoadConfig {
    /// Whether disclosure content may be built concurrently across results.
    pub enabled: bool,
    /// Maximum concurrent content-build tasks.
    pub max_concurrency: usize,
}

impl Default for ParallelLoadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: 8,
        }
    }
}

/// Disclosure decision thresholds (spec §4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DisclosureThresholds {
    /// Minimum unified score for CONTENT.
    pub l2: f64,
    /// Minimum unified score for RESOURCES.
    pub l3: f64,
}

impl Default for DisclosureThresholds {
    fn default() -> Self {
        Self { l2: 0.70, l3: 0.85 }
    }
}

/// Top-level disclosure configuration (spec §6 "Disclosure V2" option
/// group).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DisclosureConfig {
    /// Master enable switch for the V2 disclosure pipeline.
    pub enabled: bool,
    /// Score thresholds for CONTENT/RESOURCES.
    pub thresholds: DisclosureThresholds,
    /// Below this per-call token budget the decision is always METADATA.
    pub l1_max_tokens: u64,
    /// Token budget used by adaptive (non-decision) disclosure sizing.
    pub l2_max_tokens: u64,
    /// Disclosure content cache settings.
    pub cache: DisclosureCacheConfig,
    /// Parallel content-loading settings.
    pub parallel_load: ParallelLoadConfig,
}

impl Default for DisclosureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: DisclosureThresholds::default(),
            l1_max_tokens: 120,
            l2_max_tokens: 5000,
            cache: DisclosureCacheConfig::default(),
            parallel_load: ParallelLoadConfig::default(),
        }
    }
}

/// Connection pool configuration (spec §4.7 / §6 "Pool" option group).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of handles kept open at once.
    pub max_instances: usize,
    /// Idle handle time-to-live, in milliseconds.
    pub instance_ttl_ms: u64,
    /// Interval between background health checks, in milliseconds.
    pub health_check_interval_ms: u64,
    /// Minimum number of handles to keep warm.
    pub min_idle: usize,
    /// A handle borrowed longer than this is reported as a potential leak.
    pub leak_detection_threshold_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_instances: 4,
            instance_ttl_ms: 300_000,
            health_check_interval_ms: 60_000,
            min_idle: 1,
            leak_detection_threshold_ms: 300_000,
        }
    }
}

impl PoolConfig {
    /// Overlay `TOOL_RETRIEVAL_POOL_*` environment variables onto defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_instances: env_usize("TOOL_RETRIEVAL_POOL_MAX_INSTANCES", defaults.max_instances),
            instance_ttl_ms: env_u64("TOOL_RETRIEVAL_POOL_INSTANCE_TTL_MS", defaults.instance_ttl_ms),
            health_check_interval_ms: env_u64(
                "TOOL_RETRIEVAL_POOL_HEALTH_CHECK_INTERVAL_MS",
                defaults.health_check_interval_ms,
            ),
            min_idle: env_usize("TOOL_RETRIEVAL_POOL_MIN_IDLE", defaults.min_idle),
            leak_detection_threshold_ms: env_u64(
                "TOOL_RETRIEVAL_POOL_LEAK_DETECTION_THRESHOLD_MS",
                defaults.leak_detection_threshold_ms,
            ),
        }
    }
}

/// Tag matcher configuration (spec §6 "Tag matcher" option group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagMatcherConfig {
    /// Hierarchy levels + alias map.
    pub hierarchy: TagHierarchy,
    /// Minimum score for a tool to count as `matched`.
    pub min_score: f64,
    /// Maximum hierarchy depth considered (defensive bound, not enforced by
    /// the scoring algorithm itself since the hierarchy is caller-supplied).
    pub max_depth: usize,
    /// Whether alias expansion runs at all.
    pub enable_aliases: bool,
}

impl Default for TagMatcherConfig {
    fn default() -> Self {
        Self {
            hierarchy: TagHierarchy::default(),
            min_score: 0.5,
            max_depth: 3,
            enable_aliases: true,
        }
    }
}

/// Arbitrary structured configuration escape hatch, mirroring the reference
/// crate's tolerance of caller-supplied JSON blobs it does not itself
/// interpret (used e.g. to carry driver-specific connection options).
pub type OpaqueOptions = HashMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_config_defaults_match_spec() {
        let cfg = RetrievalConfig::default();
        assert_eq!(cfg.weights.vector, 0.5);
        assert_eq!(cfg.weights.keyword, 0.3);
        assert_eq!(cfg.weights.semantic, 0.2);
        assert_eq!(cfg.weights.tag, 0.1);
        assert_eq!(cfg.rrf_k, 60.0);
        assert_eq!(cfg.min_score, 0.1);
        assert_eq!(cfg.max_results, 10);
        assert_eq!(cfg.cache_ttl_seconds, 300);
    }

    #[test]
    fn disclosure_config_defaults_match_spec() {
        let cfg = DisclosureConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.thresholds.l2, 0.70);
        assert_eq!(cfg.thresholds.l3, 0.85);
        assert_eq!(cfg.l1_max_tokens, 120);
        assert_eq!(cfg.l2_max_tokens, 5000);
        assert_eq!(cfg.cache.max_size, 2000);
        assert_eq!(cfg.cache.l1_ttl_ms, 300_000);
        assert_eq!(cfg.parallel_load.max_concurrency, 8);
    }

    #[test]
    fn pool_config_defaults_match_spec() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.max_instances, 4);
        assert_eq!(cfg.instance_ttl_ms, 300_000);
        assert_eq!(cfg.health_check_interval_ms, 60_000);
        assert_eq!(cfg.leak_detection_threshold_ms, 300_000);
    }

    #[test]
    fn tag_matcher_config_defaults_match_spec() {
        let cfg = TagMatcherConfig::default();
        assert_eq!(cfg.min_score, 0.5);
        assert_eq!(cfg.max_depth, 3);
        assert!(cfg.enable_aliases);
    }

    #[test]
    fn retrieval_config_from_env_overrides() {
        unsafe {
            env::set_var("TOOL_RETRIEVAL_MIN_SCORE", "0.42");
        }
        let cfg = RetrievalConfig::from_env();
        assert_eq!(cfg.min_score, 0.42);
        unsafe {
            env::remove_var("TOOL_RETRIEVAL_MIN_SCORE");
        }
    }

    #[test]
    fn pool_config_from_env_falls_back_to_default() {
        unsafe {
            env::remove_var("TOOL_RETRIEVAL_POOL_MAX_INSTANCES");
        }
        let cfg = PoolConfig::from_env();
        assert_eq!(cfg.max_instances, 4);
    }
}
