//! Criterion benchmarks for the hot paths of the retrieval pipeline:
//! fusion, tag matching, the query-result cache, and disclosure content
//! building.

use std::hint::black_box;
use std::sync::Arc;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, Criterion};
use tool_retrieval_core::{
    build_content, disclosure_cache_key, fuse_results, query_cache_key, CacheConfig, DisclosureCache, DisclosureConfig,
    DisclosureLevel, FusionConfig, HybridRetrievalEngine, MethodWeights, QueryCache, RetrievalConfig, RetrievalMethod,
    RetrievalResult, RetrievalResultItem, SearchOptions, TagHierarchy, TagMatchingEngine, ToolEnumerator, ToolRecord,
    ToolType, UnifiedResult, VectorSearchProvider,
};

fn candidate(id: usize, method: RetrievalMethod, score: f64, tool_type: ToolType) -> RetrievalResultItem {
    RetrievalResultItem {
        id: format!("tool-{id}"),
        score,
        method,
        name: Some(format!("tool {id}")),
        description: Some(format!("does thing number {id}")),
        tags: vec![format!("category:group-{}", id % 7)],
        tool_type: Some(tool_type),
        path: None,
        version: Some("1.0.0".to_owned()),
        metadata: Some(serde_json::json!({"parameters": [{"name": "path"}]})),
    }
}

fn synthetic_method_list(n: usize, method: RetrievalMethod) -> Vec<RetrievalResultItem> {
    (0..n)
        .map(|i| {
            let tool_type = match i % 3 {
                0 => ToolType::Skill,
                1 => ToolType::Mcp,
                _ => ToolType::Builtin,
            };
            candidate(i, method, 1.0 - (i as f64 / n as f64), tool_type)
        })
        .collect()
}

fn bench_fuse_results(c: &mut Criterion) {
    let vector = synthetic_method_list(500, RetrievalMethod::Vector);
    let keyword = synthetic_method_list(300, RetrievalMethod::Keyword);
    let semantic = synthetic_method_list(400, RetrievalMethod::Semantic);
    let tag = synthetic_method_list(150, RetrievalMethod::Tag);
    let config = FusionConfig {
        weights: MethodWeights::default(),
        rrf_k: 60.0,
        min_score: 0.1,
        limit: 20,
    };

    c.bench_function("fuse_results_four_methods_500_candidates", |b| {
        b.iter(|| {
            let result = fuse_results(
                black_box(&vector),
                black_box(&keyword),
                black_box(&semantic),
                black_box(&tag),
                config,
            );
            black_box(result.results.len());
        });
    });
}

fn bench_tag_matching(c: &mut Criterion) {
    let engine = TagMatchingEngine::new(TagHierarchy::default(), 0.1, true);
    let candidates = synthetic_method_list(1_000, RetrievalMethod::Tag);
    let query_tags = vec!["cat:group-3".to_owned(), "tag:extra".to_owned()];

    c.bench_function("tag_matching_1000_candidates", |b| {
        b.iter(|| {
            let matches = engine.match_tags(black_box(&query_tags), black_box(&candidates));
            black_box(matches.len());
        });
    });
}

fn bench_query_cache_roundtrip(c: &mut Criterion) {
    let cache: QueryCache<Vec<UnifiedResult>> = QueryCache::new(CacheConfig::default());
    let epoch = cache.current_epoch();

    c.bench_function("query_cache_key_and_put_1000_queries", |b| {
        b.iter(|| {
            for i in 0..1_000 {
                let key = query_cache_key(&format!("query {i}"), &[], 10, Some("METADATA"), 0.1, false);
                cache.put(black_box(key), Vec::new(), epoch);
            }
        });
    });
}

fn bench_disclosure_build_content(c: &mut Criterion) {
    let results: Vec<UnifiedResult> = (0..200)
        .map(|i| UnifiedResult {
            id: format!("tool-{i}"),
            name: format!("tool {i}"),
            description: "a tool with a moderately long description for token estimation".to_owned(),
            unified_score: 0.9,
            scores: std::collections::HashMap::new(),
            tags: vec!["category:file".to_owned()],
            tool_type: ToolType::Skill,
            path: Some(format!("/tools/{i}")),
            version: Some("1.0.0".to_owned()),
            metadata: Some(serde_json::json!({
                "parameters": [{"name": "path", "type": "string"}],
                "scripts": ["run.sh"],
                "dependencies": ["requests"],
            })),
            disclosure: None,
        })
        .collect();

    c.bench_function("build_content_resources_level_200_results", |b| {
        b.iter(|| {
            for r in &results {
                black_box(build_content(black_box(r), DisclosureLevel::Resources));
            }
        });
    });
}

fn bench_disclosure_cache(c: &mut Criterion) {
    let cache = DisclosureCache::new(DisclosureConfig::default().cache);
    let content = build_content(
        &UnifiedResult {
            id: "t".to_owned(),
            name: "t".to_owned(),
            description: "desc".to_owned(),
            unified_score: 0.9,
            scores: std::collections::HashMap::new(),
            tags: vec![],
            tool_type: ToolType::Skill,
            path: None,
            version: None,
            metadata: None,
            disclosure: None,
        },
        DisclosureLevel::Metadata,
    );

    c.bench_function("disclosure_cache_set_get_1000", |b| {
        b.iter(|| {
            for i in 0..1_000 {
                let key = disclosure_cache_key(&format!("tool-{i}"), "METADATA", None);
                cache.set(key.clone(), content.clone());
                black_box(cache.get(&key));
            }
        });
    });
}

struct BenchVectorSearch {
    items: Vec<RetrievalResultItem>,
}

#[async_trait]
impl VectorSearchProvider for BenchVectorSearch {
    async fn search(&self, _query_text: &str, limit: usize, min_score: f64) -> RetrievalResult<Vec<RetrievalResultItem>> {
        Ok(self.items.iter().filter(|i| i.score >= min_score).take(limit).cloned().collect())
    }
}

struct BenchEnumerator {
    tools: Vec<ToolRecord>,
}

#[async_trait]
impl ToolEnumerator for BenchEnumerator {
    async fn enumerate(&self) -> RetrievalResult<Vec<ToolRecord>> {
        Ok(self.tools.clone())
    }
}

fn bench_engine_search_end_to_end(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let vector_items = synthetic_method_list(200, RetrievalMethod::Vector);
    let tools: Vec<ToolRecord> = (0..200)
        .map(|i| ToolRecord {
            id: format!("tool-{i}"),
            name: format!("tool {i}"),
            description: "does a thing with files and networks".to_owned(),
            tags: vec![format!("category:group-{}", i % 7)],
            path: None,
            version: Some("1.0.0".to_owned()),
            source: None,
            tool_type: ToolType::Skill,
            metadata: serde_json::json!({}),
            vector: vec![0.0; 4],
            indexed_at: 0,
        })
        .collect();
    let engine = HybridRetrievalEngine::new(
        RetrievalConfig::default(),
        DisclosureConfig::default(),
        Arc::new(BenchVectorSearch { items: vector_items }),
        Arc::new(BenchEnumerator { tools }),
    );

    c.bench_function("engine_search_with_cache_200_candidates", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let result = engine.search_with_cache(black_box("thing"), SearchOptions::default()).await.unwrap();
                black_box(result.len());
            });
        });
    });
}

criterion_group!(
    benches,
    bench_fuse_results,
    bench_tag_matching,
    bench_query_cache_roundtrip,
    bench_disclosure_build_content,
    bench_disclosure_cache,
    bench_engine_search_end_to_end,
);
criterion_main!(benches);
