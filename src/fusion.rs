//! Unified scoring / fusion engine (spec §4.3).
//!
//! Fuses four independently-ranked per-method candidate lists (vector,
//! keyword, semantic, tag) into one unified, deduplicated, diversity-
//! re-ranked list. RRF contributions are retained per item for telemetry,
//! but the unified score itself is a min-max-normalized weighted blend, not
//! a pure RRF sum — see [`fuse_results`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::MethodWeights;
use crate::tool_record::{MethodScore, RetrievalMethod, RetrievalResultItem, ToolType, UnifiedResult};

/// Default RRF dampening constant (telemetry only).
pub const DEFAULT_RRF_K: f64 = 60.0;

/// The largest consecutive-pair score gap above which the multi-method
/// adaptive filter cuts the list (spec §4.3 step 7).
const MAX_GAP_CUTOFF: f64 = 0.3;

/// Single-method adaptive filter threshold: original max/min ratio above
/// which low-scoring survivors are dropped (spec §4.3 step 7).
const SINGLE_METHOD_SPREAD_CUTOFF: f64 = 10.0;

/// Configuration consumed by one [`fuse_results`] call; echoed back on the
/// [`FusionResult`] for reproducibility.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Per-method weights for the multi-method blend.
    pub weights: MethodWeights,
    /// RRF dampening constant.
    pub rrf_k: f64,
    /// Minimum unified score survivors must meet after fusion.
    pub min_score: f64,
    /// Result cap applied by the diversity re-ranking pass.
    pub limit: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weights: MethodWeights::default(),
            rrf_k: DEFAULT_RRF_K,
            min_score: 0.1,
            limit: 10,
        }
    }
}

/// Per-method min-max normalizes a ranked list's scores to `[0, 1]`. When
/// every score is equal (range = 0), every entry becomes `1.0` (spec §4.3
/// step 2).
fn normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range <= f64::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

struct MethodList<'a> {
    method: RetrievalMethod,
    items: &'a [RetrievalResultItem],
    normalized: Vec<f64>,
}

fn index_by_id(items: &[RetrievalResultItem]) -> HashMap<&str, usize> {
    items.iter().enumerate().map(|(i, it)| (it.id.as_str(), i)).collect()
}

/// The result of fusing four per-method lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResult {
    /// The fused, deduplicated, diversity-reranked unified list.
    pub results: Vec<UnifiedResult>,
    /// The config snapshot used to produce this result.
    pub config: FusionConfig,
    /// Wall-clock time spent in CPU-only fusion (never suspends).
    #[serde(skip)]
    pub elapsed: Duration,
    /// `union_size - final_size`.
    pub deduplicated_count: usize,
}

/// Fuses the four per-method ranked lists into a single unified list (spec
/// §4.3 `fuse_results`).
#[must_use]
pub fn fuse_results(
    vector: &[RetrievalResultItem],
    keyword: &[RetrievalResultItem],
    semantic: &[RetrievalResultItem],
    tag: &[RetrievalResultItem],
    config: FusionConfig,
) -> FusionResult {
    let started = Instant::now();

    let lists = [
        MethodList {
            method: RetrievalMethod::Vector,
            items: vector,
            normalized: normalize(&vector.iter().map(|i| i.score).collect::<Vec<_>>()),
        },
        MethodList {
            method: RetrievalMethod::Keyword,
            items: keyword,
            normalized: normalize(&keyword.iter().map(|i| i.score).collect::<Vec<_>>()),
        },
        MethodList {
            method: RetrievalMethod::Semantic,
            items: semantic,
            normalized: normalize(&semantic.iter().map(|i| i.score).collect::<Vec<_>>()),
        },
        MethodList {
            method: RetrievalMethod::Tag,
            items: tag,
            normalized: normalize(&tag.iter().map(|i| i.score).collect::<Vec<_>>()),
        },
    ];

    // Step 1: union of ids, preserving first-seen carry-through metadata.
    let mut order: Vec<String> = Vec::new();
    let mut carry: HashMap<String, &RetrievalResultItem> = HashMap::new();
    for list in &lists {
        for item in list.items {
            if !carry.contains_key(&item.id) {
                order.push(item.id.clone());
                carry.insert(item.id.clone(), item);
            }
        }
    }

    let indices: Vec<HashMap<&str, usize>> = lists.iter().map(|l| index_by_id(l.items)).collect();

    // Steps 3-4: per-id, per-method rank/normalized_score/rrf.
    let mut scores_by_id: HashMap<String, HashMap<RetrievalMethod, MethodScore>> = HashMap::new();
    let active_methods = lists.iter().filter(|l| !l.items.is_empty()).count();
    for id in &order {
        let mut per_method = HashMap::new();
        for (list_idx, list) in lists.iter().enumerate() {
            let entry = indices[list_idx].get(id.as_str()).map(|&pos| {
                let rank = (pos + 1) as u32;
                let normalized_score = list.normalized[pos];
                let rrf_contribution = 1.0 / (config.rrf_k + f64::from(rank));
                MethodScore {
                    rank,
                    normalized_score,
                    rrf_contribution,
                }
            });
            per_method.insert(list.method, entry.unwrap_or_default());
        }
        scores_by_id.insert(id.clone(), per_method);
    }

    // Step 5: unified score.
    let weight_of = |m: RetrievalMethod| -> f64 {
        match m {
            RetrievalMethod::Vector => config.weights.vector,
            RetrievalMethod::Keyword => config.weights.keyword,
            RetrievalMethod::Semantic => config.weights.semantic,
            RetrievalMethod::Tag => config.weights.tag,
        }
    };
    let weight_sum: f64 = RetrievalMethod::all().iter().map(|&m| weight_of(m)).sum();

    let mut unified: Vec<UnifiedResult> = order
        .iter()
        .map(|id| {
            let per_method = &scores_by_id[id];
            let unified_score = if active_methods <= 1 {
                per_method.values().map(|s| s.normalized_score).fold(0.0, f64::max)
            } else {
                let weighted: f64 = RetrievalMethod::all()
                    .iter()
                    .map(|&m| per_method[&m].normalized_score * weight_of(m))
                    .sum();
                if weight_sum > 0.0 {
                    weighted / weight_sum
                } else {
                    0.0
                }
            };

            let item = carry[id];
            UnifiedResult {
                id: id.clone(),
                name: item.name.clone().unwrap_or_default(),
                description: item.description.clone().unwrap_or_default(),
                unified_score,
                scores: per_method.clone(),
                tags: item.tags.clone(),
                tool_type: item.tool_type.unwrap_or(ToolType::Builtin),
                path: item.path.clone(),
                version: item.version.clone(),
                metadata: item.metadata.clone(),
                disclosure: None,
            }
        })
        .collect();

    // Step 6: sort descending by unified_score.
    unified.sort_by(|a, b| b.unified_score.partial_cmp(&a.unified_score).unwrap_or(std::cmp::Ordering::Equal));

    // Step 7: adaptive filtering.
    let union_size = unified.len();
    if active_methods >= 2 {
        if let Some(cut_at) = largest_gap_cut_index(&unified) {
            unified.truncate(cut_at);
        }
    } else if active_methods == 1 {
        let contributing = lists.iter().find(|l| !l.items.is_empty());
        if let Some(list) = contributing {
            let raw_max = list.items.iter().map(|i| i.score).fold(f64::NEG_INFINITY, f64::max);
            let raw_min = list.items.iter().map(|i| i.score).fold(f64::INFINITY, f64::min);
            let spread_triggers = raw_min > 0.0 && raw_max / raw_min > SINGLE_METHOD_SPREAD_CUTOFF;
            if spread_triggers {
                unified.retain(|r| r.unified_score >= config.min_score);
            }
        }
    }

    // Step 8: dedup by id (first occurrence wins) — the union-building pass
    // above already guarantees uniqueness, so this is a no-op safeguard.
    let mut seen = std::collections::HashSet::new();
    unified.retain(|r| seen.insert(r.id.clone()));

    // Step 9: diversity re-ranking.
    let final_list = diversify(unified, config.limit);

    FusionResult {
        deduplicated_count: union_size.saturating_sub(final_list.len()),
        results: final_list,
        config,
        elapsed: started.elapsed(),
    }
}

/// Finds the first index after the largest consecutive-pair gap, i.e. the
/// cut point such that everything before (and including) the gap survives
/// (spec §4.3 step 7, multi-method case).
fn largest_gap_cut_index(sorted_desc: &[UnifiedResult]) -> Option<usize> {
    if sorted_desc.len() < 2 {
        return None;
    }
    let mut max_gap = 0.0;
    let mut cut_at = sorted_desc.len();
    for i in 0..sorted_desc.len() - 1 {
        let gap = sorted_desc[i].unified_score - sorted_desc[i + 1].unified_score;
        if gap > max_gap {
            max_gap = gap;
            cut_at = i + 1;
        }
    }
    if max_gap > MAX_GAP_CUTOFF {
        Some(cut_at)
    } else {
        None
    }
}

/// Re-ranks a deduplicated, score-sorted list for `tool_type` diversity
/// (spec §4.3 step 9): while the selection is shorter than `limit / 2`,
/// prefer introducing an unseen tool type; once that half fills, append the
/// remainder in score order up to `limit`; finally re-sort by score desc.
fn diversify(sorted_desc: Vec<UnifiedResult>, limit: usize) -> Vec<UnifiedResult> {
    if limit == 0 || sorted_desc.is_empty() {
        return sorted_desc.into_iter().take(limit).collect();
    }

    let half = limit / 2;
    let mut selected: Vec<UnifiedResult> = Vec::new();
    let mut seen_types = std::collections::HashSet::new();
    let mut remaining: Vec<UnifiedResult> = Vec::new();

    for item in sorted_desc {
        if selected.len() < half && seen_types.insert(item.tool_type) {
            selected.push(item);
        } else {
            remaining.push(item);
        }
    }

    for item in remaining {
        if selected.len() >= limit {
            break;
        }
        selected.push(item);
    }

    selected.sort_by(|a, b| b.unified_score.partial_cmp(&a.unified_score).unwrap_or(std::cmp::Ordering::Equal));
    selected.truncate(limit);
    selected
}
