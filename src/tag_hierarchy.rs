//! Hierarchical tag matching (spec §4.2).
//!
//! A [`TagHierarchy`] declares an ordered set of level names (most general
//! first) plus short aliases for them. [`TagMatchingEngine`] scores how well
//! a tool's tags align with a caller's query tags under that hierarchy.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::tool_record::{RetrievalResultItem, ToolRecord};

/// An ordered hierarchy of tag levels plus alias shorthands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagHierarchy {
    /// Level names, most general to most specific.
    pub levels: Vec<String>,
    /// Short alias → canonical level name.
    pub aliases: BTreeMap<String, String>,
}

impl Default for TagHierarchy {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert("cat".to_owned(), "category".to_owned());
        aliases.insert("subcat".to_owned(), "subcategory".to_owned());
        Self {
            levels: vec!["category".into(), "subcategory".into(), "tag".into()],
            aliases,
        }
    }
}

impl TagHierarchy {
    fn is_canonical_level(&self, s: &str) -> bool {
        self.levels.iter().any(|l| l == s)
    }

    fn canonical_for_alias(&self, s: &str) -> Option<&str> {
        self.aliases.get(s).map(String::as_str)
    }

    fn aliases_for_canonical<'a>(&'a self, canonical: &'a str) -> impl Iterator<Item = &'a str> {
        self.aliases
            .iter()
            .filter(move |(_, v)| v == canonical)
            .map(|(k, _)| k.as_str())
    }

    /// Splits a tag into its `(level_or_alias, value)` parts if it contains
    /// a `prefix:value` colon, else `None`.
    fn split_prefix(tag: &str) -> Option<(&str, &str)> {
        tag.split_once(':')
    }

    /// Expands a single tag into the deduplicated set of equivalent forms
    /// under this hierarchy's aliases (spec §4.2 "Alias expansion").
    #[must_use]
    pub fn expand_aliases(&self, tag: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        out.insert(tag.to_owned());

        if let Some((prefix, value)) = Self::split_prefix(tag) {
            if let Some(canonical) = self.canonical_for_alias(prefix) {
                out.insert(format!("{canonical}:{value}"));
            } else if self.is_canonical_level(prefix) {
                for alias in self.aliases_for_canonical(prefix) {
                    out.insert(format!("{alias}:{value}"));
                }
            }
        } else if let Some(canonical) = self.canonical_for_alias(tag) {
            out.insert(canonical.to_owned());
        } else if self.is_canonical_level(tag) {
            for alias in self.aliases_for_canonical(tag) {
                out.insert(alias.to_owned());
            }
        }

        out
    }

    /// Resolves the level name for a bare or `prefix:value` tag: the
    /// canonical level if the prefix is one or maps to one via alias,
    /// otherwise the default `"tag"` level.
    #[must_use]
    pub fn level_for_tag(&self, tag: &str) -> String {
        let prefix = Self::split_prefix(tag).map(|(p, _)| p).unwrap_or(tag);
        if self.is_canonical_level(prefix) {
            prefix.to_owned()
        } else if let Some(canonical) = self.canonical_for_alias(prefix) {
            canonical.to_owned()
        } else {
            "tag".to_owned()
        }
    }
}

/// The outcome of matching one tool's tags against a set of query tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagMatchResult {
    /// Tool id.
    pub id: String,
    /// Overall averaged score across query tags.
    pub score: f64,
    /// Whether the score meets the configured minimum.
    pub matched: bool,
    /// The tool-side tag of the best-scoring pair, if any.
    pub tag: Option<String>,
    /// The hierarchy level of that best tag.
    pub level: Option<String>,
    /// The query-side tag the best match was expanded from, when alias
    /// expansion was what produced the match.
    pub expanded_from: Option<String>,
}

/// Scores alignment between query tags and tool tags under a hierarchy.
pub struct TagMatchingEngine {
    hierarchy: TagHierarchy,
    min_score: f64,
    enable_aliases: bool,
}

fn pair_score(hierarchy: &TagHierarchy, a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let same_level = hierarchy.level_for_tag(a) == hierarchy.level_for_tag(b);
    if same_level && a.to_ascii_lowercase() == b.to_ascii_lowercase() {
        return 0.8;
    }
    if a.starts_with(b) || b.starts_with(a) {
        return 0.6;
    }
    0.0
}

impl TagMatchingEngine {
    /// Builds an engine over the given hierarchy with the given minimum
    /// score threshold.
    #[must_use]
    pub fn new(hierarchy: TagHierarchy, min_score: f64, enable_aliases: bool) -> Self {
        Self {
            hierarchy,
            min_score,
            enable_aliases,
        }
    }

    fn candidate_forms(&self, tag: &str) -> BTreeSet<String> {
        if self.enable_aliases {
            self.hierarchy.expand_aliases(tag)
        } else {
            let mut s = BTreeSet::new();
            s.insert(tag.to_owned());
            s
        }
    }

    /// Scores one tool's tags against the query tags (spec §4.2 "Per-query-
    /// tag matching"). Empty `query_tags` always yields a zero, unmatched
    /// result (spec §8 testable property).
    #[must_use]
    pub fn match_single_tool(&self, tool_id: &str, tool_tags: &[String], query_tags: &[String]) -> TagMatchResult {
        if query_tags.is_empty() {
            return TagMatchResult {
                id: tool_id.to_owned(),
                score: 0.0,
                matched: false,
                tag: None,
                level: None,
                expanded_from: None,
            };
        }

        let tool_forms: Vec<(String, BTreeSet<String>)> = tool_tags
            .iter()
            .map(|t| (t.clone(), self.candidate_forms(t)))
            .collect();

        let mut total = 0.0;
        let mut best_overall: Option<(f64, String, Option<String>)> = None;

        for qtag in query_tags {
            let qforms = self.candidate_forms(qtag);
            let mut best_for_qtag = 0.0_f64;
            let mut best_tool_tag: Option<String> = None;
            let mut best_expanded_from: Option<String> = None;

            for (tool_tag, tforms) in &tool_forms {
                for qform in &qforms {
                    for tform in tforms {
                        let s = pair_score(&self.hierarchy, qform, tform);
                        if s > best_for_qtag {
                            best_for_qtag = s;
                            best_tool_tag = Some(tool_tag.clone());
                            best_expanded_from = if qform != qtag { Some(qtag.clone()) } else { None };
                        }
                    }
                }
            }

            total += best_for_qtag;

            if best_overall.as_ref().map(|(s, ..)| best_for_qtag > *s).unwrap_or(true) {
                if let Some(tag) = &best_tool_tag {
                    best_overall = Some((best_for_qtag, tag.clone(), best_expanded_from.clone()));
                }
            }
        }

        let score = total / query_tags.len() as f64;
        let (tag, level, expanded_from) = match best_overall {
            Some((_, tag, expanded_from)) => {
                let level = self.hierarchy.level_for_tag(&tag);
                (Some(tag), Some(level), expanded_from)
            }
            None => (None, None, None),
        };

        TagMatchResult {
            id: tool_id.to_owned(),
            score,
            matched: score >= self.min_score,
            tag,
            level,
            expanded_from,
        }
    }

    /// Scores a tool record against query tags.
    #[must_use]
    pub fn match_single_record(&self, tool: &ToolRecord, query_tags: &[String]) -> TagMatchResult {
        self.match_single_tool(&tool.id, &tool.tags, query_tags)
    }

    /// Scores every candidate against the query tags (spec §4.2
    /// `match_tags`).
    #[must_use]
    pub fn match_tags(&self, query_tags: &[String], candidates: &[RetrievalResultItem]) -> Vec<TagMatchResult> {
        candidates
            .iter()
            .map(|c| self.match_single_tool(&c.id, &c.tags, query_tags))
            .collect()
    }

    /// The bare `calculate_tag_score` operation from spec §4.2, exposed
    /// standalone for callers that only need the number.
    #[must_use]
    pub fn calculate_tag_score(&self, tool_tags: &[String], query_tags: &[String]) -> f64 {
        self.match_single_tool("", tool_tags, query_tags).score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> TagHierarchy {
        TagHierarchy::default()
    }

    #[test]
    fn empty_query_tags_never_match() {
        let engine = TagMatchingEngine::new(hierarchy(), 0.5, true);
        let result = engine.match_single_tool("t1", &["category:file".into()], &[]);
        assert!(!result.matched);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn alias_expansion_seed_scenario() {
        // spec §8 seed scenario 5
        let engine = TagMatchingEngine::new(hierarchy(), 0.5, true);
        let result = engine.match_single_tool("t1", &["category:file".into()], &["cat:file".into()]);
        assert_eq!(result.score, 1.0);
        assert!(result.matched);
        assert_eq!(result.expanded_from.as_deref(), Some("cat:file"));
        assert_eq!(result.level.as_deref(), Some("category"));
    }

    #[test]
    fn exact_match_scores_one() {
        let engine = TagMatchingEngine::new(hierarchy(), 0.5, true);
        let result = engine.match_single_tool("t1", &["file".into()], &["file".into()]);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn same_level_case_insensitive_scores_point_eight() {
        let engine = TagMatchingEngine::new(hierarchy(), 0.5, true);
        let result = engine.match_single_tool("t1", &["category:File".into()], &["category:file".into()]);
        assert_eq!(result.score, 0.8);
    }

    #[test]
    fn prefix_match_scores_point_six() {
        let engine = TagMatchingEngine::new(hierarchy(), 0.5, true);
        let result = engine.match_single_tool("t1", &["filesystem".into()], &["file".into()]);
        assert_eq!(result.score, 0.6);
    }

    #[test]
    fn no_match_scores_zero() {
        let engine = TagMatchingEngine::new(hierarchy(), 0.5, true);
        let result = engine.match_single_tool("t1", &["network".into()], &["file".into()]);
        assert_eq!(result.score, 0.0);
        assert!(!result.matched);
    }

    #[test]
    fn overall_score_averages_across_query_tags() {
        let engine = TagMatchingEngine::new(hierarchy(), 0.5, true);
        let result = engine.match_single_tool("t1", &["file".into()], &["file".into(), "network".into()]);
        assert_eq!(result.score, 0.5);
    }

    #[test]
    fn expand_aliases_bare_canonical_yields_alias() {
        let h = hierarchy();
        let expanded = h.expand_aliases("category");
        assert!(expanded.contains("category"));
        assert!(expanded.contains("cat"));
    }

    #[test]
    fn expand_aliases_bare_alias_yields_canonical() {
        let h = hierarchy();
        let expanded = h.expand_aliases("cat");
        assert!(expanded.contains("cat"));
        assert!(expanded.contains("category"));
    }

    #[test]
    fn expand_aliases_unrelated_token_is_identity() {
        let h = hierarchy();
        let expanded = h.expand_aliases("file");
        assert_eq!(expanded.len(), 1);
        assert!(expanded.contains("file"));
    }

    #[test]
    fn disabled_aliases_prevents_cross_form_matches() {
        let engine = TagMatchingEngine::new(hierarchy(), 0.5, false);
        let result = engine.match_single_tool("t1", &["category:file".into()], &["cat:file".into()]);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn match_tags_scores_each_candidate() {
        let engine = TagMatchingEngine::new(hierarchy(), 0.5, true);
        let candidates = vec![
            RetrievalResultItem {
                id: "a".into(),
                score: 0.0,
                method: crate::tool_record::RetrievalMethod::Tag,
                name: None,
                description: None,
                tags: vec!["file".into()],
                tool_type: None,
                path: None,
                version: None,
                metadata: None,
            },
            RetrievalResultItem {
                id: "b".into(),
                score: 0.0,
                method: crate::tool_record::RetrievalMethod::Tag,
                name: None,
                description: None,
                tags: vec!["network".into()],
                tool_type: None,
                path: None,
                version: None,
                metadata: None,
            },
        ];
        let results = engine.match_tags(&["file".into()], &candidates);
        assert_eq!(results.len(), 2);
        assert!(results[0].matched);
        assert!(!results[1].matched);
    }

    #[test]
    fn calculate_tag_score_matches_match_single_tool() {
        let engine = TagMatchingEngine::new(hierarchy(), 0.5, true);
        let score = engine.calculate_tag_score(&["file".into()], &["file".into()]);
        assert_eq!(score, 1.0);
    }
}
