//! Hybrid retrieval engine (spec §4.1).
//!
//! [`HybridRetrievalEngine`] fans out a query across four independent
//! retrieval signals (dense vector, lexical keyword, semantic, hierarchical
//! tag), fuses them via [`crate::fusion`], applies the three-tier
//! progressive disclosure policy, and caches both the fused result list and
//! the per-result disclosure content. Dense and semantic retrieval are
//! pluggable through [`VectorSearchProvider`] — semantic search is literally
//! the same capability, re-labeled (spec §4.1 "semantic == vector,
//! re-labeled"). Keyword search is pluggable through [`ToolEnumerator`],
//! which scans the full tool set the way the reference crate's lexical
//! engine scans its document source.

use std::cmp::Ordering;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::cache::{disclosure_cache_key, query_cache_key, CacheConfig, DisclosureCache, QueryCache};
use crate::config::{DisclosureConfig, DisclosureStrategy, RetrievalConfig};
use crate::disclosure::{build_content, require_buildable, DisclosureDecisionManager, DisclosureLevel};
use crate::error::{RetrievalError, RetrievalResult};
use crate::fusion::{fuse_results, FusionConfig};
use crate::metrics::{MethodTiming, QueryMetrics};
use crate::tag_hierarchy::TagMatchingEngine;
use crate::tool_record::{RetrievalMethod, RetrievalResultItem, ToolRecord, UnifiedResult};
use crate::vector_index::VectorIndexManager;

/// The pluggable dense-retrieval capability: `(query_text, limit, min_score)
/// → candidates`. Both the vector and semantic signals call this; the
/// engine is what re-labels the method on the returned items (spec §4.1).
#[async_trait]
pub trait VectorSearchProvider: Send + Sync {
    /// Returns up to `limit` nearest candidates scoring at least
    /// `min_score`. The `method` field on returned items is ignored and
    /// overwritten by the caller.
    async fn search(&self, query_text: &str, limit: usize, min_score: f64) -> RetrievalResult<Vec<RetrievalResultItem>>;
}

/// The pluggable full-tool-set scan keyword search needs (spec §4.1
/// "keyword search scans a full tool set via an injected enumerator").
#[async_trait]
pub trait ToolEnumerator: Send + Sync {
    /// Returns every tool currently known to the catalog.
    async fn enumerate(&self) -> RetrievalResult<Vec<ToolRecord>>;
}

/// Converts free text into an embedding vector; the one piece
/// [`IndexVectorSearch`] needs beyond [`VectorIndexManager`] itself.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds `text`, returning a vector matching the index's dimension.
    async fn embed(&self, text: &str) -> RetrievalResult<Vec<f32>>;
}

/// A [`VectorSearchProvider`] grounded directly on [`VectorIndexManager`]:
/// embed the query text, run the nearest-neighbor search, turn distance
/// into a `[0, 1]`-ish raw score (fusion normalizes it regardless).
pub struct IndexVectorSearch {
    index: Arc<VectorIndexManager>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IndexVectorSearch {
    /// Builds a provider over an already-open index and an embedder.
    #[must_use]
    pub fn new(index: Arc<VectorIndexManager>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, embedder }
    }
}

#[async_trait]
impl VectorSearchProvider for IndexVectorSearch {
    async fn search(&self, query_text: &str, limit: usize, min_score: f64) -> RetrievalResult<Vec<RetrievalResultItem>> {
        let vector = self.embedder.embed(query_text).await?;
        let hits = self.index.search(&vector, limit).await?;
        let items = hits
            .into_iter()
            .filter_map(|hit| {
                let score = (1.0 - f64::from(hit.distance)).max(0.0);
                if score < min_score {
                    return None;
                }
                Some(RetrievalResultItem {
                    id: hit.record.id.clone(),
                    score,
                    method: RetrievalMethod::Vector,
                    name: Some(hit.record.name.clone()),
                    description: Some(hit.record.description.clone()),
                    tags: hit.record.tags.clone(),
                    tool_type: Some(hit.record.tool_type),
                    path: hit.record.path.clone(),
                    version: hit.record.version.clone(),
                    metadata: Some(hit.record.metadata.clone()),
                })
            })
            .take(limit)
            .collect();
        Ok(items)
    }
}

/// Per-call search options (spec §4.1 `search` parameters).
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Query-side tags for hierarchical tag matching; empty disables it
    /// regardless of `enable_tag_matching`.
    pub tags: Vec<String>,
    /// Result cap; defaults to [`RetrievalConfig::max_results`].
    pub limit: Option<usize>,
    /// Minimum unified score to survive filtering; defaults to
    /// [`RetrievalConfig::min_score`].
    pub min_score: Option<f64>,
    /// Forces a single disclosure level instead of the configured strategy.
    pub disclosure_level: Option<DisclosureLevel>,
    /// Per-call token budget, consulted by the adaptive disclosure path.
    pub max_tokens: Option<u64>,
}

enum ResolvedDisclosure {
    Fixed(DisclosureLevel),
    Adaptive(u64),
}

/// Fans a query out across vector/keyword/semantic/tag retrieval, fuses,
/// filters, discloses, and caches (spec §4.1).
pub struct HybridRetrievalEngine {
    config: RetrievalConfig,
    disclosure_config: DisclosureConfig,
    vector_search: Arc<dyn VectorSearchProvider>,
    enumerator: Arc<dyn ToolEnumerator>,
    tag_matcher: TagMatchingEngine,
    disclosure_manager: DisclosureDecisionManager,
    query_cache: QueryCache<Vec<UnifiedResult>>,
    disclosure_cache: DisclosureCache,
    last_metrics: RwLock<Option<QueryMetrics>>,
}

fn content_hash(result: &UnifiedResult) -> String {
    let mut hasher = Sha256::new();
    hasher.update(result.id.as_bytes());
    hasher.update(b"|");
    hasher.update(result.name.as_bytes());
    hasher.update(b"|");
    hasher.update(result.description.as_bytes());
    hasher.update(b"|");
    hasher.update(result.version.as_deref().unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

fn empty_timing(method: RetrievalMethod) -> MethodTiming {
    MethodTiming {
        method,
        elapsed: Duration::ZERO,
        candidate_count: 0,
        failed: false,
    }
}

impl HybridRetrievalEngine {
    /// Builds an engine from configuration plus the two injected retrieval
    /// capabilities.
    #[must_use]
    pub fn new(
        config: RetrievalConfig,
        disclosure_config: DisclosureConfig,
        vector_search: Arc<dyn VectorSearchProvider>,
        enumerator: Arc<dyn ToolEnumerator>,
    ) -> Self {
        let tag_matcher = TagMatchingEngine::new(config.tag_hierarchy.clone(), 0.1, true);
        let disclosure_manager = DisclosureDecisionManager::new(&disclosure_config);
        let query_cache = QueryCache::new(CacheConfig {
            ttl: Duration::from_secs(config.cache_ttl_seconds),
            ..CacheConfig::default()
        });
        let disclosure_cache = DisclosureCache::new(disclosure_config.cache);
        Self {
            config,
            disclosure_config,
            vector_search,
            enumerator,
            tag_matcher,
            disclosure_manager,
            query_cache,
            disclosure_cache,
            last_metrics: RwLock::new(None),
        }
    }

    /// Runs the full retrieval/fusion/disclosure pipeline with no
    /// query-result caching.
    pub async fn search(&self, query: &str, options: SearchOptions) -> RetrievalResult<Vec<UnifiedResult>> {
        let (results, metrics) = self.execute(query, &options, false, None).await?;
        self.record_metrics(metrics);
        Ok(results)
    }

    /// Runs the pipeline with query-result caching: an exact cache hit
    /// returns immediately without touching any retrieval signal (spec
    /// §4.1 step 1).
    pub async fn search_with_cache(&self, query: &str, options: SearchOptions) -> RetrievalResult<Vec<UnifiedResult>> {
        let (results, metrics) = self.execute(query, &options, true, None).await?;
        self.record_metrics(metrics);
        Ok(results)
    }

    /// Runs the pipeline with query-result caching and forces the
    /// per-result adaptive disclosure decision driven by `max_tokens`,
    /// which is folded into the cache key (spec §8 open-question
    /// resolution: the disclosure-aware cache key includes the token
    /// budget).
    pub async fn search_with_disclosure(
        &self,
        query: &str,
        options: SearchOptions,
        max_tokens: u64,
    ) -> RetrievalResult<Vec<UnifiedResult>> {
        let (results, metrics) = self.execute(query, &options, true, Some(max_tokens)).await?;
        self.record_metrics(metrics);
        Ok(results)
    }

    /// Returns a snapshot of the most recent call's telemetry.
    #[must_use]
    pub fn get_metrics(&self) -> Option<QueryMetrics> {
        self.last_metrics.read().ok().and_then(|g| g.clone())
    }

    /// Invalidates the query-result cache (epoch bump) and the disclosure
    /// cache.
    pub fn clear_cache(&self) {
        self.query_cache.invalidate_all();
        self.disclosure_cache.dispose();
    }

    /// Tears the engine's caches down and forgets the last metrics
    /// snapshot. Idempotent.
    pub fn dispose(&self) {
        self.clear_cache();
        if let Ok(mut guard) = self.last_metrics.write() {
            *guard = None;
        }
    }

    fn record_metrics(&self, metrics: QueryMetrics) {
        if let Ok(mut guard) = self.last_metrics.write() {
            *guard = Some(metrics);
        }
    }

    fn resolve_disclosure(&self, options: &SearchOptions, forced_adaptive: Option<u64>) -> ResolvedDisclosure {
        if let Some(level) = options.disclosure_level {
            return ResolvedDisclosure::Fixed(level);
        }
        if let Some(max_tokens) = forced_adaptive {
            return ResolvedDisclosure::Adaptive(max_tokens);
        }
        match self.config.disclosure_strategy {
            DisclosureStrategy::Metadata => ResolvedDisclosure::Fixed(DisclosureLevel::Metadata),
            DisclosureStrategy::Content => ResolvedDisclosure::Fixed(DisclosureLevel::Content),
            DisclosureStrategy::Resources => ResolvedDisclosure::Fixed(DisclosureLevel::Resources),
            DisclosureStrategy::Adaptive => {
                ResolvedDisclosure::Adaptive(options.max_tokens.unwrap_or(self.disclosure_config.l2_max_tokens))
            }
        }
    }

    async fn execute(
        &self,
        query: &str,
        options: &SearchOptions,
        use_cache: bool,
        forced_adaptive: Option<u64>,
    ) -> RetrievalResult<(Vec<UnifiedResult>, QueryMetrics)> {
        let started = Instant::now();
        let limit = options.limit.unwrap_or(self.config.max_results);
        let min_score = options.min_score.unwrap_or(self.config.min_score);
        let resolved = self.resolve_disclosure(options, forced_adaptive);

        let disclosure_label = match &resolved {
            ResolvedDisclosure::Fixed(level) => level.to_string(),
            ResolvedDisclosure::Adaptive(max_tokens) => format!("adaptive:{max_tokens}"),
        };
        let cache_key = query_cache_key(
            query,
            &options.tags,
            limit,
            Some(&disclosure_label),
            min_score,
            options.disclosure_level.is_some(),
        );
        let epoch = self.query_cache.current_epoch();

        if use_cache {
            if let Some(cached) = self.query_cache.get(&cache_key, epoch) {
                let metrics = QueryMetrics {
                    methods: Vec::new(),
                    fusion_elapsed: Duration::ZERO,
                    disclosure_elapsed: None,
                    cache_hit: true,
                    disclosure_cache_hit: None,
                    result_count: cached.len(),
                    total_elapsed: started.elapsed(),
                };
                return Ok((cached, metrics));
            }
        }

        let (vector_res, keyword_res, semantic_res, tag_res) = tokio::join!(
            self.run_vector(query, limit, min_score),
            self.run_keyword(query, limit),
            self.run_semantic(query, limit, min_score),
            self.run_tag(query, &options.tags, limit, min_score),
        );
        let (vector_items, vector_timing) = vector_res;
        let (keyword_items, keyword_timing) = keyword_res;
        let (semantic_items, semantic_timing) = semantic_res;
        let (tag_items, tag_timing) = tag_res;

        let fusion_started = Instant::now();
        let fusion_config = FusionConfig {
            weights: self.config.weights,
            rrf_k: self.config.rrf_k,
            min_score,
            limit,
        };
        let fusion_result = fuse_results(&vector_items, &keyword_items, &semantic_items, &tag_items, fusion_config);
        for r in &fusion_result.results {
            if r.unified_score.is_nan() || !(0.0..=1.0).contains(&r.unified_score) {
                return Err(RetrievalError::fusion(
                    "fuse_results",
                    format!("unified_score {} out of range for {}", r.unified_score, r.id),
                    query,
                ));
            }
        }
        let mut results: Vec<UnifiedResult> = fusion_result
            .results
            .into_iter()
            .filter(|r| r.unified_score >= min_score)
            .collect();
        let fusion_elapsed = fusion_started.elapsed();

        let disclosure_started = Instant::now();
        let disclosure_cache_hit = self.apply_disclosure(&mut results, &resolved)?;
        let disclosure_elapsed = disclosure_started.elapsed();

        if use_cache {
            self.query_cache.put(cache_key, results.clone(), epoch);
        }

        let metrics = QueryMetrics {
            methods: vec![vector_timing, keyword_timing, semantic_timing, tag_timing],
            fusion_elapsed,
            disclosure_elapsed: Some(disclosure_elapsed),
            cache_hit: false,
            disclosure_cache_hit: Some(disclosure_cache_hit),
            result_count: results.len(),
            total_elapsed: started.elapsed(),
        };
        Ok((results, metrics))
    }

    fn apply_disclosure(&self, results: &mut [UnifiedResult], resolved: &ResolvedDisclosure) -> RetrievalResult<bool> {
        let mut all_hit = true;
        for r in results.iter_mut() {
            require_buildable(r)?;
            let level = match resolved {
                ResolvedDisclosure::Fixed(level) => *level,
                ResolvedDisclosure::Adaptive(max_tokens) => self.disclosure_manager.decide(r.unified_score, *max_tokens).0,
            };
            let hash = content_hash(r);
            let key = disclosure_cache_key(&r.id, &level.to_string(), Some(&hash));
            if let Some(cached) = self.disclosure_cache.get(&key) {
                r.disclosure = Some(cached);
            } else {
                all_hit = false;
                let content = build_content(r, level);
                self.disclosure_cache.set(key, content.clone());
                r.disclosure = Some(content);
            }
        }
        Ok(all_hit)
    }

    async fn run_vector(&self, query: &str, limit: usize, min_score: f64) -> (Vec<RetrievalResultItem>, MethodTiming) {
        let started = Instant::now();
        match self.vector_search.search(query, limit, min_score).await {
            Ok(items) => {
                let items: Vec<RetrievalResultItem> = items
                    .into_iter()
                    .map(|mut i| {
                        i.method = RetrievalMethod::Vector;
                        i
                    })
                    .collect();
                let timing = MethodTiming {
                    method: RetrievalMethod::Vector,
                    elapsed: started.elapsed(),
                    candidate_count: items.len(),
                    failed: false,
                };
                (items, timing)
            }
            Err(err) => {
                warn!(error = %err, "vector retrieval failed, isolating as empty result");
                (
                    Vec::new(),
                    MethodTiming {
                        method: RetrievalMethod::Vector,
                        elapsed: started.elapsed(),
                        candidate_count: 0,
                        failed: true,
                    },
                )
            }
        }
    }

    /// Semantic search is the same capability as vector search, re-labeled
    /// (spec §4.1).
    async fn run_semantic(&self, query: &str, limit: usize, min_score: f64) -> (Vec<RetrievalResultItem>, MethodTiming) {
        let started = Instant::now();
        if !self.config.enable_semantic_matching {
            return (Vec::new(), empty_timing(RetrievalMethod::Semantic));
        }
        match self.vector_search.search(query, limit, min_score).await {
            Ok(items) => {
                let items: Vec<RetrievalResultItem> = items
                    .into_iter()
                    .map(|mut i| {
                        i.method = RetrievalMethod::Semantic;
                        i
                    })
                    .collect();
                let timing = MethodTiming {
                    method: RetrievalMethod::Semantic,
                    elapsed: started.elapsed(),
                    candidate_count: items.len(),
                    failed: false,
                };
                (items, timing)
            }
            Err(err) => {
                warn!(error = %err, "semantic retrieval failed, isolating as empty result");
                (
                    Vec::new(),
                    MethodTiming {
                        method: RetrievalMethod::Semantic,
                        elapsed: started.elapsed(),
                        candidate_count: 0,
                        failed: true,
                    },
                )
            }
        }
    }

    async fn run_keyword(&self, query: &str, limit: usize) -> (Vec<RetrievalResultItem>, MethodTiming) {
        let started = Instant::now();
        if !self.config.enable_keyword_matching {
            return (Vec::new(), empty_timing(RetrievalMethod::Keyword));
        }

        let terms: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_owned).collect();
        if terms.is_empty() {
            return (Vec::new(), empty_timing(RetrievalMethod::Keyword));
        }

        match self.enumerator.enumerate().await {
            Ok(tools) => {
                let mut items: Vec<RetrievalResultItem> = tools
                    .iter()
                    .filter_map(|tool| {
                        let name_desc = format!("{} {}", tool.name, tool.description).to_lowercase();
                        let tags_joined = tool.tags.join(" ").to_lowercase();
                        let matched_for_inclusion =
                            terms.iter().filter(|t| name_desc.contains(t.as_str()) || tags_joined.contains(t.as_str())).count();
                        if matched_for_inclusion == 0 {
                            return None;
                        }
                        let matched = terms.iter().filter(|t| name_desc.contains(t.as_str())).count();
                        let score = matched as f64 / terms.len() as f64;
                        Some(RetrievalResultItem {
                            id: tool.id.clone(),
                            score,
                            method: RetrievalMethod::Keyword,
                            name: Some(tool.name.clone()),
                            description: Some(tool.description.clone()),
                            tags: tool.tags.clone(),
                            tool_type: Some(tool.tool_type),
                            path: tool.path.clone(),
                            version: tool.version.clone(),
                            metadata: Some(tool.metadata.clone()),
                        })
                    })
                    .collect();
                items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
                items.truncate(limit);
                let timing = MethodTiming {
                    method: RetrievalMethod::Keyword,
                    elapsed: started.elapsed(),
                    candidate_count: items.len(),
                    failed: false,
                };
                (items, timing)
            }
            Err(err) => {
                warn!(error = %err, "keyword retrieval failed, isolating as empty result");
                (
                    Vec::new(),
                    MethodTiming {
                        method: RetrievalMethod::Keyword,
                        elapsed: started.elapsed(),
                        candidate_count: 0,
                        failed: true,
                    },
                )
            }
        }
    }

    async fn run_tag(&self, query: &str, query_tags: &[String], limit: usize, min_score: f64) -> (Vec<RetrievalResultItem>, MethodTiming) {
        let started = Instant::now();
        if !self.config.enable_tag_matching || query_tags.is_empty() {
            return (Vec::new(), empty_timing(RetrievalMethod::Tag));
        }

        let candidate_limit = limit.saturating_mul(2);
        match self.vector_search.search(query, candidate_limit, 0.1).await {
            Ok(candidates) => {
                let matches = self.tag_matcher.match_tags(query_tags, &candidates);
                let mut items: Vec<RetrievalResultItem> = candidates
                    .into_iter()
                    .zip(matches)
                    .filter(|(_, m)| m.matched && m.score >= min_score)
                    .map(|(mut item, m)| {
                        item.method = RetrievalMethod::Tag;
                        item.score = m.score;
                        item
                    })
                    .collect();
                items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
                items.truncate(limit);
                let timing = MethodTiming {
                    method: RetrievalMethod::Tag,
                    elapsed: started.elapsed(),
                    candidate_count: items.len(),
                    failed: false,
                };
                (items, timing)
            }
            Err(err) => {
                warn!(error = %err, "tag retrieval failed, isolating as empty result");
                (
                    Vec::new(),
                    MethodTiming {
                        method: RetrievalMethod::Tag,
                        elapsed: started.elapsed(),
                        candidate_count: 0,
                        failed: true,
                    },
                )
            }
        }
    }
}
