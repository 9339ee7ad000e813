//! Tool retrieval core: hybrid dense-vector + lexical-keyword + semantic +
//! hierarchical-tag retrieval, fused via weighted-normalized scoring with
//! RRF telemetry, gated by three-tier progressive disclosure, backed by a
//! query-result cache, a disclosure-content cache, and a pooled,
//! health-checked vector-store connection over an auto-tuned IVF-PQ index.
//!
//! - [`engine::HybridRetrievalEngine`] — the primary entry point
//! - [`fusion`] — unified scoring / RRF-telemetry fusion
//! - [`disclosure`] — progressive disclosure decision + content building
//! - [`tag_hierarchy`] — hierarchical tag matching with alias expansion
//! - [`cache`] — query-result cache and disclosure-content cache
//! - [`vector_store`] / [`vector_index`] — vector-store driver contract and
//!   the adaptive IVF-PQ index manager
//! - [`pool`] — path-keyed, health-checked connection pool
//!
//! Feature flags:
//! - `lancedb-store` — the concrete LanceDB-backed [`vector_store`] driver

#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod disclosure;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod metrics;
pub mod pool;
pub mod tag_hierarchy;
pub mod tool_record;
pub mod vector_index;
pub mod vector_store;

pub use cache::{disclosure_cache_key, query_cache_key, CacheConfig, CacheMetrics, DisclosureCache, QueryCache};
pub use config::{
    DisclosureCacheConfig, DisclosureConfig, DisclosureStrategy, DisclosureThresholds, MethodWeights,
    ParallelLoadConfig, PoolConfig, RetrievalConfig,
};
pub use disclosure::{
    build_content, estimate_tokens, DisclosureContent, DisclosureDecisionManager, DisclosureLevel, DisclosureReason,
};
pub use engine::{
    EmbeddingProvider, HybridRetrievalEngine, IndexVectorSearch, SearchOptions, ToolEnumerator, VectorSearchProvider,
};
pub use error::{RetrievalError, RetrievalResult};
pub use fusion::{fuse_results, FusionConfig, FusionResult, DEFAULT_RRF_K};
pub use metrics::{MethodTiming, QueryMetrics};
pub use pool::{ConnectionOpener, ConnectionPool, PoolStats};
pub use tag_hierarchy::{TagHierarchy, TagMatchResult, TagMatchingEngine};
pub use tool_record::{MethodScore, RetrievalMethod, RetrievalResultItem, ToolId, ToolRecord, ToolType, UnifiedResult};
pub use vector_index::{IndexConfigOptimizer, IndexSearchHit, OptimizedIndexConfig, OptimizerInput, VectorIndexManager};
pub use vector_store::{
    open_in_memory, DistanceType, InMemoryConnection, InMemoryTable, IvfPqConfig, VectorConnection, VectorSearchHit,
    VectorTable,
};

#[cfg(feature = "lancedb-store")]
pub use vector_store::lance::{LanceStoreConnection, LanceStoreTable};
