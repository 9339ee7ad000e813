//! Progressive disclosure: decision manager + content builder (spec §4.4,
//! §4.5). The disclosure *cache* lives in [`crate::cache`] alongside the
//! query-result cache, since both share the same LRU+TTL shape.

use serde::{Deserialize, Serialize};

use crate::config::{DisclosureConfig, DisclosureThresholds};
use crate::error::{RetrievalError, RetrievalResult};
use crate::tool_record::UnifiedResult;

/// The three progressive disclosure tiers (spec GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisclosureLevel {
    /// Identity only: name, description, token count.
    Metadata,
    /// Callable contract: + schemas, parameters, examples.
    Content,
    /// Implementation and dependencies: + scripts, dependencies, resources.
    Resources,
}

impl std::fmt::Display for DisclosureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metadata => write!(f, "METADATA"),
            Self::Content => write!(f, "CONTENT"),
            Self::Resources => write!(f, "RESOURCES"),
        }
    }
}

/// Why the decision manager chose a given level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisclosureReason {
    /// `max_tokens < 500` dominates all score cases.
    Always,
    /// Score met a configured threshold.
    Threshold,
    /// Score fell below threshold; chosen to respect the token budget.
    TokenBudget,
}

/// One example pair extracted from tool metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureExample {
    /// Example input, when derivable.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input: Option<serde_json::Value>,
    /// Example output, when derivable.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output: Option<serde_json::Value>,
}

/// One coerced parameter descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter type, defaulting to `"string"`.
    #[serde(default = "default_param_type")]
    pub r#type: String,
    /// Whether the parameter is required.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub required: Option<bool>,
    /// Parameter description.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

fn default_param_type() -> String {
    "string".to_owned()
}

/// One coerced script descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureScript {
    /// Script name, defaulting to `"script"`.
    #[serde(default = "default_script_name")]
    pub name: String,
    /// Script language, defaulting to `"javascript"`.
    #[serde(default = "default_script_language")]
    pub language: String,
    /// Script content.
    pub content: String,
}

fn default_script_name() -> String {
    "script".to_owned()
}

fn default_script_language() -> String {
    "javascript".to_owned()
}

/// One coerced dependency descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureDependency {
    /// Dependency name.
    pub name: String,
    /// Version constraint, defaulting to `"*"`.
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "*".to_owned()
}

/// One coerced resource descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureResource {
    /// Resource kind (e.g. `"file"`).
    pub r#type: String,
    /// Resource path.
    pub path: String,
    /// Human-readable description.
    pub description: String,
}

/// The materialized payload for one `(tool, level)` pair (spec §3
/// "Disclosure content").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureContent {
    /// Which level this payload was built at.
    pub level: DisclosureLevel,
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Estimated token count for the populated fields.
    pub token_count: u64,
    /// CONTENT+ field.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_schema: Option<serde_json::Value>,
    /// CONTENT+ field.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_schema: Option<serde_json::Value>,
    /// CONTENT+ field.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parameters: Vec<DisclosureParameter>,
    /// CONTENT+ field.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub examples: Vec<DisclosureExample>,
    /// RESOURCES+ field.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub scripts: Vec<DisclosureScript>,
    /// RESOURCES+ field.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub dependencies: Vec<DisclosureDependency>,
    /// RESOURCES+ field.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub resources: Vec<DisclosureResource>,
    /// Tool version, carried through for cache-key hashing.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    /// Tool author, when present in metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub author: Option<String>,
    /// Tool tags.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
}

/// Estimates a token count for a piece of text (spec §4.5 "Token
/// estimate"): `ceil(len/4)`, 0 for empty/absent.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    ((text.len() as u64) + 3) / 4
}

fn estimate_tokens_json(value: &serde_json::Value) -> u64 {
    if value.is_null() {
        return 0;
    }
    estimate_tokens(&value.to_string())
}

fn estimate_tokens_joined(items: &[String]) -> u64 {
    if items.is_empty() {
        return 0;
    }
    estimate_tokens(&items.join(", "))
}

/// Decides the disclosure level for one result (spec §4.4,
/// `DisclosureDecisionManager`).
pub struct DisclosureDecisionManager {
    thresholds: DisclosureThresholds,
}

impl DisclosureDecisionManager {
    /// Token budget below which the decision is always METADATA regardless
    /// of score (spec §4.4).
    pub const TOKEN_BUDGET_FLOOR: u64 = 500;

    /// Builds a decision manager from disclosure config.
    #[must_use]
    pub fn new(config: &DisclosureConfig) -> Self {
        Self {
            thresholds: config.thresholds,
        }
    }

    /// Decides the level for one result in O(1) (spec §4.4 decision table).
    #[must_use]
    pub fn decide(&self, score: f64, max_tokens: u64) -> (DisclosureLevel, DisclosureReason) {
        if max_tokens < Self::TOKEN_BUDGET_FLOOR {
            return (DisclosureLevel::Metadata, DisclosureReason::Always);
        }
        if score >= self.thresholds.l3 {
            return (DisclosureLevel::Resources, DisclosureReason::Threshold);
        }
        if score >= self.thresholds.l2 {
            return (DisclosureLevel::Content, DisclosureReason::Threshold);
        }
        (DisclosureLevel::Metadata, DisclosureReason::TokenBudget)
    }
}

fn probe<'a>(metadata: &'a serde_json::Value, keys: &[&str]) -> Option<&'a serde_json::Value> {
    keys.iter().find_map(|k| metadata.get(k)).filter(|v| !v.is_null())
}

fn probe_string(metadata: &serde_json::Value, key: &str) -> Option<String> {
    metadata.get(key).and_then(|v| v.as_str()).map(str::to_owned)
}

fn coerce_examples(value: &serde_json::Value) -> Vec<DisclosureExample> {
    let Some(arr) = value.as_array() else {
        return Vec::new();
    };
    arr.iter()
        .map(|elem| {
            if let Some(s) = elem.as_str() {
                DisclosureExample {
                    input: Some(serde_json::Value::String(s.to_owned())),
                    output: Some(serde_json::Value::String(s.to_owned())),
                }
            } else if let Some(obj) = elem.as_object() {
                DisclosureExample {
                    input: obj.get("input").cloned(),
                    output: obj.get("output").cloned(),
                }
            } else {
                DisclosureExample {
                    input: Some(elem.clone()),
                    output: Some(elem.clone()),
                }
            }
        })
        .collect()
}

fn coerce_parameters(value: &serde_json::Value) -> Vec<DisclosureParameter> {
    let Some(arr) = value.as_array() else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|elem| {
            if let Some(obj) = elem.as_object() {
                let name = obj.get("name").and_then(|v| v.as_str())?.to_owned();
                Some(DisclosureParameter {
                    name,
                    r#type: obj
                        .get("type")
                        .and_then(|v| v.as_str())
                        .map(str::to_owned)
                        .unwrap_or_else(default_param_type),
                    required: obj.get("required").and_then(|v| v.as_bool()),
                    description: obj.get("description").and_then(|v| v.as_str()).map(str::to_owned),
                })
            } else {
                elem.as_str().map(|name| DisclosureParameter {
                    name: name.to_owned(),
                    r#type: default_param_type(),
                    required: None,
                    description: None,
                })
            }
        })
        .collect()
}

fn coerce_scripts(value: &serde_json::Value) -> Vec<DisclosureScript> {
    let Some(arr) = value.as_array() else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|elem| {
            if let Some(obj) = elem.as_object() {
                let content = obj.get("content").and_then(|v| v.as_str())?.to_owned();
                Some(DisclosureScript {
                    name: obj
                        .get("name")
                        .and_then(|v| v.as_str())
                        .map(str::to_owned)
                        .unwrap_or_else(default_script_name),
                    language: obj
                        .get("language")
                        .and_then(|v| v.as_str())
                        .map(str::to_owned)
                        .unwrap_or_else(default_script_language),
                    content,
                })
            } else {
                elem.as_str().map(|content| DisclosureScript {
                    name: default_script_name(),
                    language: default_script_language(),
                    content: content.to_owned(),
                })
            }
        })
        .collect()
}

fn coerce_dependencies(value: &serde_json::Value) -> Vec<DisclosureDependency> {
    let Some(arr) = value.as_array() else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|elem| {
            if let Some(obj) = elem.as_object() {
                let name = obj.get("name").and_then(|v| v.as_str())?.to_owned();
                Some(DisclosureDependency {
                    name,
                    version: obj
                        .get("version")
                        .and_then(|v| v.as_str())
                        .map(str::to_owned)
                        .unwrap_or_else(default_version),
                })
            } else {
                elem.as_str().map(|name| DisclosureDependency {
                    name: name.to_owned(),
                    version: default_version(),
                })
            }
        })
        .collect()
}

fn coerce_resources(value: &serde_json::Value, path: Option<&str>) -> Vec<DisclosureResource> {
    if let Some(arr) = value.as_array() {
        if !arr.is_empty() {
            return arr
                .iter()
                .filter_map(|elem| {
                    if let Some(obj) = elem.as_object() {
                        let p = obj.get("path").and_then(|v| v.as_str())?.to_owned();
                        Some(DisclosureResource {
                            r#type: obj
                                .get("type")
                                .and_then(|v| v.as_str())
                                .unwrap_or("file")
                                .to_owned(),
                            description: obj
                                .get("description")
                                .and_then(|v| v.as_str())
                                .unwrap_or(&p)
                                .to_owned(),
                            path: p,
                        })
                    } else {
                        elem.as_str().map(|p| DisclosureResource {
                            r#type: "file".to_owned(),
                            path: p.to_owned(),
                            description: p.to_owned(),
                        })
                    }
                })
                .collect();
        }
    }
    path.map(|p| {
        vec![DisclosureResource {
            r#type: "file".to_owned(),
            path: p.to_owned(),
            description: p.to_owned(),
        }]
    })
    .unwrap_or_default()
}

/// Builds disclosure content at a given level from a unified result (spec
/// §4.5 content builder + extraction rules).
#[must_use]
pub fn build_content(result: &UnifiedResult, level: DisclosureLevel) -> DisclosureContent {
    let empty = serde_json::Value::Null;
    let metadata = result.metadata.as_ref().unwrap_or(&empty);

    let mut content = DisclosureContent {
        level,
        name: result.name.clone(),
        description: result.description.clone(),
        token_count: estimate_tokens(&result.name) + estimate_tokens(&result.description),
        input_schema: None,
        output_schema: None,
        parameters: Vec::new(),
        examples: Vec::new(),
        scripts: Vec::new(),
        dependencies: Vec::new(),
        resources: Vec::new(),
        version: result.version.clone(),
        author: probe_string(metadata, "author"),
        tags: result.tags.clone(),
    };

    if level == DisclosureLevel::Metadata {
        return content;
    }

    let input_schema = probe(metadata, &["inputSchema", "parameters", "input"]).cloned();
    let output_schema = probe(metadata, &["outputSchema", "output"]).cloned();
    let examples = probe(metadata, &["examples", "example"]).map(coerce_examples).unwrap_or_default();
    let parameters = probe(metadata, &["parameters", "inputs", "args"]).map(coerce_parameters).unwrap_or_default();

    content.token_count += input_schema.as_ref().map(estimate_tokens_json).unwrap_or(0);
    content.input_schema = input_schema;
    content.output_schema = output_schema;
    content.parameters = parameters;
    content.examples = examples;

    if level == DisclosureLevel::Content {
        return content;
    }

    let scripts = probe(metadata, &["scripts", "code"]).map(coerce_scripts).unwrap_or_default();
    let dependencies = probe(metadata, &["dependencies", "packages", "requires"]).map(coerce_dependencies).unwrap_or_default();
    let resources_raw = probe(metadata, &["resources", "relatedFiles", "dependencies"]);
    let resources = resources_raw
        .map(|v| coerce_resources(v, result.path.as_deref()))
        .unwrap_or_else(|| coerce_resources(&serde_json::Value::Null, result.path.as_deref()));

    let script_names: Vec<String> = scripts.iter().map(|s| s.name.clone()).collect();
    let dependency_names: Vec<String> = dependencies.iter().map(|d| d.name.clone()).collect();
    let resource_paths: Vec<String> = resources.iter().map(|r| r.path.clone()).collect();

    content.token_count += content.output_schema.as_ref().map(estimate_tokens_json).unwrap_or(0);
    content.token_count += estimate_tokens_joined(&script_names);
    content.token_count += estimate_tokens_joined(&dependency_names);
    content.token_count += estimate_tokens_joined(&resource_paths);

    content.scripts = scripts;
    content.dependencies = dependencies;
    content.resources = resources;

    content
}

/// Applies a single, uniform disclosure level to every result
/// (`apply_disclosure`).
pub fn apply_disclosure(results: &mut [UnifiedResult], level: DisclosureLevel) {
    for r in results.iter_mut() {
        r.disclosure = Some(build_content(r, level));
    }
}

/// Sums METADATA-tier token estimates across results (stopping once
/// `max_tokens` is exceeded) and picks a single level for the whole batch
/// (spec §4.5 "Adaptive level selection").
#[must_use]
pub fn adaptive_level_for_batch(results: &[UnifiedResult], max_tokens: u64, prefer_metadata_below: u64) -> DisclosureLevel {
    let mut total = 0u64;
    for r in results {
        if total > max_tokens {
            break;
        }
        total += estimate_tokens(&r.name) + estimate_tokens(&r.description);
    }
    if total <= prefer_metadata_below {
        DisclosureLevel::Metadata
    } else if (total as f64) <= 0.7 * max_tokens as f64 {
        DisclosureLevel::Content
    } else {
        DisclosureLevel::Resources
    }
}

/// Applies the batch-adaptive (non-per-result-decision) disclosure path.
pub fn apply_adaptive_disclosure(results: &mut [UnifiedResult], max_tokens: u64) {
    let level = adaptive_level_for_batch(results, max_tokens, 500);
    apply_disclosure(results, level);
}

/// Validates that a content-build invariant holds, surfacing a
/// `DISCLOSURE_ERROR` if a result has neither name nor description (the one
/// way the content builder can fail per spec §7).
pub fn require_buildable(result: &UnifiedResult) -> RetrievalResult<()> {
    if result.name.is_empty() && result.description.is_empty() {
        return Err(RetrievalError::disclosure(
            "build_content",
            format!("result {} has no name or description to disclose", result.id),
        ));
    }
    Ok(())
}
