//! Tool record and per-method/unified result models (spec §3 "Data Model").
//!
//! These are the unit of retrieval: a row in the vector table, the
//! ephemeral per-method candidate produced by one retrieval signal, and the
//! unified, fused result handed to the disclosure pipeline.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Stable identifier for a tool record.
pub type ToolId = String;

/// The origin enumeration a tool record commits to; also the diversity axis
/// used by the unified scoring engine's re-ranking pass (spec §4.3 step 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// A packaged skill.
    Skill,
    /// A Model Context Protocol tool.
    Mcp,
    /// A builtin, always-available tool.
    Builtin,
}

impl std::fmt::Display for ToolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skill => write!(f, "skill"),
            Self::Mcp => write!(f, "mcp"),
            Self::Builtin => write!(f, "builtin"),
        }
    }
}

/// A tool/skill metadata row as stored in the vector table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Stable identifier, unique within the table.
    pub id: ToolId,
    /// Display name.
    pub name: String,
    /// Human-readable description, also embedded to produce `vector`.
    pub description: String,
    /// Ordered tags; entries may be bare tokens or `level:value` pairs.
    pub tags: Vec<String>,
    /// Filesystem or module path, when the tool maps to one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    /// Semver-ish version string.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    /// Origin identifier (e.g. package or registry name).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
    /// Which enumeration the tool belongs to.
    pub tool_type: ToolType,
    /// Opaque structured metadata; never assume a fixed shape (spec §9
    /// "Dynamically-typed metadata").
    pub metadata: serde_json::Value,
    /// Dense embedding; must have exactly the table's declared dimension.
    pub vector: Vec<f32>,
    /// Microseconds since epoch at index time.
    pub indexed_at: i64,
}

impl ToolRecord {
    /// Returns the vector's dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Which retrieval signal produced a [`RetrievalResultItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Dense vector nearest-neighbor search.
    Vector,
    /// Lexical keyword term-overlap search.
    Keyword,
    /// Vector search re-labeled as the semantic signal.
    Semantic,
    /// Hierarchical tag matching.
    Tag,
}

impl RetrievalMethod {
    /// All four methods, in the canonical order used for per-method score
    /// tables in the fusion engine.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [Self::Vector, Self::Keyword, Self::Semantic, Self::Tag]
    }

    /// The method's default weight in the multi-method unified-score blend.
    #[must_use]
    pub const fn default_weight(self) -> f64 {
        match self {
            Self::Vector => 0.5,
            Self::Keyword => 0.3,
            Self::Semantic => 0.2,
            Self::Tag => 0.1,
        }
    }
}

impl std::fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vector => write!(f, "vector"),
            Self::Keyword => write!(f, "keyword"),
            Self::Semantic => write!(f, "semantic"),
            Self::Tag => write!(f, "tag"),
        }
    }
}

/// A single per-method retrieval candidate, ephemeral for the duration of
/// one query. Carries enough of the tool's fields through that downstream
/// fusion/disclosure stages never need to re-fetch the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResultItem {
    /// The tool id this candidate refers to.
    pub id: ToolId,
    /// The method-specific score (scale varies by method).
    pub score: f64,
    /// Which method produced this candidate.
    pub method: RetrievalMethod,
    /// Carried-through name, to avoid a second fetch.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    /// Carried-through description.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    /// Carried-through tags.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    /// Carried-through tool type.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_type: Option<ToolType>,
    /// Carried-through path.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    /// Carried-through version.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    /// Carried-through metadata, needed by the disclosure content builder.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
}

/// Per-method score and rank bookkeeping retained on a [`UnifiedResult`] for
/// telemetry (spec §4.3 step 4).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MethodScore {
    /// 1-based rank within that method's list; 0 if the method did not
    /// return this id.
    pub rank: u32,
    /// Min-max normalized score within that method's list; 0 if absent.
    pub normalized_score: f64,
    /// Reciprocal-rank-fusion contribution, `1 / (k + rank)`, 0 if absent.
    pub rrf_contribution: f64,
}

/// The fused, post-scoring result handed to the disclosure pipeline (spec
/// §3 "Unified result").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResult {
    /// Tool id.
    pub id: ToolId,
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// The fused score in `[0, 1]`.
    pub unified_score: f64,
    /// Per-method score/rank telemetry, keyed by method.
    pub scores: HashMap<RetrievalMethod, MethodScore>,
    /// Tags.
    pub tags: Vec<String>,
    /// Tool type (diversity axis).
    pub tool_type: ToolType,
    /// Path, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    /// Version, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    /// Opaque metadata, carried through for disclosure content building.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
    /// The disclosure payload, populated once disclosure has been applied.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub disclosure: Option<crate::disclosure::DisclosureContent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_type_display() {
        assert_eq!(ToolType::Skill.to_string(), "skill");
        assert_eq!(ToolType::Mcp.to_string(), "mcp");
        assert_eq!(ToolType::Builtin.to_string(), "builtin");
    }

    #[test]
    fn tool_type_serde_snake_case() {
        assert_eq!(serde_json::to_string(&ToolType::Mcp).unwrap(), "\"mcp\"");
    }

    #[test]
    fn retrieval_method_default_weights_match_spec() {
        assert_eq!(RetrievalMethod::Vector.default_weight(), 0.5);
        assert_eq!(RetrievalMethod::Keyword.default_weight(), 0.3);
        assert_eq!(RetrievalMethod::Semantic.default_weight(), 0.2);
        assert_eq!(RetrievalMethod::Tag.default_weight(), 0.1);
    }

    #[test]
    fn tool_record_dimension() {
        let rec = ToolRecord {
            id: "t1".into(),
            name: "Tool".into(),
            description: "desc".into(),
            tags: vec!["category:file".into()],
            path: None,
            version: None,
            source: None,
            tool_type: ToolType::Skill,
            metadata: serde_json::json!({}),
            vector: vec![0.1, 0.2, 0.3],
            indexed_at: 1,
        };
        assert_eq!(rec.dimension(), 3);
    }

    #[test]
    fn unified_result_serde_roundtrip() {
        let mut scores = HashMap::new();
        scores.insert(
            RetrievalMethod::Vector,
            MethodScore {
                rank: 1,
                normalized_score: 1.0,
                rrf_contribution: 1.0 / 61.0,
            },
        );
        let result = UnifiedResult {
            id: "t1".into(),
            name: "Tool".into(),
            description: "desc".into(),
            unified_score: 0.9,
            scores,
            tags: vec![],
            tool_type: ToolType::Skill,
            path: None,
            version: None,
            metadata: None,
            disclosure: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: UnifiedResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "t1");
        assert_eq!(back.unified_score, 0.9);
    }

    #[test]
    fn retrieval_method_all_order() {
        assert_eq!(
            RetrievalMethod::all(),
            [
                RetrievalMethod::Vector,
                RetrievalMethod::Keyword,
                RetrievalMethod::Semantic,
                RetrievalMethod::Tag,
            ]
        );
    }
}
