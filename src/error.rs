//! Error types for the retrieval subsystem

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

/// Result type alias for retrieval operations
pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur during hybrid retrieval, fusion, disclosure, or
/// index/pool management.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Invalid or inconsistent configuration (also used for fusion-time
    /// failures per the error taxonomy).
    #[error("config error during {operation}: {message}")]
    Config {
        /// Human-readable message.
        message: String,
        /// The operation that failed.
        operation: String,
        /// Structured detail map (e.g. the offending query).
        detail: HashMap<String, Value>,
    },

    /// Dense vector search failed.
    #[error("vector search error during {operation}: {message}")]
    VectorSearch {
        /// Human-readable message.
        message: String,
        /// The operation that failed.
        operation: String,
        /// Structured detail map.
        detail: HashMap<String, Value>,
    },

    /// Lexical keyword search failed.
    #[error("keyword search error during {operation}: {message}")]
    KeywordSearch {
        /// Human-readable message.
        message: String,
        /// The operation that failed.
        operation: String,
        /// Structured detail map.
        detail: HashMap<String, Value>,
    },

    /// Semantic (re-labeled vector) search failed.
    #[error("semantic match error during {operation}: {message}")]
    SemanticMatch {
        /// Human-readable message.
        message: String,
        /// The operation that failed.
        operation: String,
        /// Structured detail map.
        detail: HashMap<String, Value>,
    },

    /// Tag matching failed.
    #[error("tag match error during {operation}: {message}")]
    TagMatch {
        /// Human-readable message.
        message: String,
        /// The operation that failed.
        operation: String,
        /// Structured detail map.
        detail: HashMap<String, Value>,
    },

    /// Fusion of per-method lists failed.
    #[error("fusion error during {operation}: {message}")]
    Fusion {
        /// Human-readable message.
        message: String,
        /// The operation that failed.
        operation: String,
        /// Structured detail map (includes the original query).
        detail: HashMap<String, Value>,
    },

    /// Disclosure decision, cache, or content build failed.
    #[error("disclosure error during {operation}: {message}")]
    Disclosure {
        /// Human-readable message.
        message: String,
        /// The operation that failed.
        operation: String,
        /// Structured detail map.
        detail: HashMap<String, Value>,
    },

    /// Query-result or disclosure cache failed.
    #[error("cache error during {operation}: {message}")]
    Cache {
        /// Human-readable message.
        message: String,
        /// The operation that failed.
        operation: String,
        /// Structured detail map.
        detail: HashMap<String, Value>,
    },

    /// An unrecoverable vector-store driver error (recoverable schema/
    /// dimension mismatches are handled internally and never reach here).
    #[error("vector db error during {operation}: {message}")]
    VectorDb {
        /// Human-readable message.
        message: String,
        /// The operation that failed.
        operation: String,
        /// Structured detail map.
        detail: HashMap<String, Value>,
    },
}

impl RetrievalError {
    /// Returns the error kind string from the taxonomy (for structured logs
    /// and JSON responses).
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG_ERROR",
            Self::VectorSearch { .. } => "VECTOR_SEARCH_ERROR",
            Self::KeywordSearch { .. } => "KEYWORD_SEARCH_ERROR",
            Self::SemanticMatch { .. } => "SEMANTIC_MATCH_ERROR",
            Self::TagMatch { .. } => "TAG_MATCH_ERROR",
            Self::Fusion { .. } => "FUSION_ERROR",
            Self::Disclosure { .. } => "DISCLOSURE_ERROR",
            Self::Cache { .. } => "CACHE_ERROR",
            Self::VectorDb { .. } => "VECTOR_DB_ERROR",
        }
    }

    /// Per-method retrieval errors never propagate to the caller (spec §7);
    /// this flags the kinds the engine is allowed to swallow after logging.
    #[must_use]
    pub const fn is_per_method_retrieval_error(&self) -> bool {
        matches!(
            self,
            Self::VectorSearch { .. }
                | Self::KeywordSearch { .. }
                | Self::SemanticMatch { .. }
                | Self::TagMatch { .. }
        )
    }

    /// The operation label this error was raised for.
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::Config { operation, .. }
            | Self::VectorSearch { operation, .. }
            | Self::KeywordSearch { operation, .. }
            | Self::SemanticMatch { operation, .. }
            | Self::TagMatch { operation, .. }
            | Self::Fusion { operation, .. }
            | Self::Disclosure { operation, .. }
            | Self::Cache { operation, .. }
            | Self::VectorDb { operation, .. } => operation,
        }
    }

    /// Structured detail map attached to the error.
    #[must_use]
    pub fn detail(&self) -> &HashMap<String, Value> {
        match self {
            Self::Config { detail, .. }
            | Self::VectorSearch { detail, .. }
            | Self::KeywordSearch { detail, .. }
            | Self::SemanticMatch { detail, .. }
            | Self::TagMatch { detail, .. }
            | Self::Fusion { detail, .. }
            | Self::Disclosure { detail, .. }
            | Self::Cache { detail, .. }
            | Self::VectorDb { detail, .. } => detail,
        }
    }

    pub(crate) fn fusion(operation: impl Into<String>, message: impl Into<String>, query: &str) -> Self {
        let mut detail = HashMap::new();
        detail.insert("query".to_owned(), Value::String(query.to_owned()));
        Self::Fusion {
            message: message.into(),
            operation: operation.into(),
            detail,
        }
    }

    pub(crate) fn disclosure(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Disclosure {
            message: message.into(),
            operation: operation.into(),
            detail: HashMap::new(),
        }
    }

    pub(crate) fn vector_db(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::VectorDb {
            message: message.into(),
            operation: operation.into(),
            detail: HashMap::new(),
        }
    }

    pub(crate) fn cache(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            operation: operation.into(),
            detail: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_mapping() {
        let cases: Vec<(RetrievalError, &str)> = vec![
            (
                RetrievalError::fusion("fuse_results", "no candidates", "q"),
                "FUSION_ERROR",
            ),
            (
                RetrievalError::disclosure("get_disclosure", "cache poisoned"),
                "DISCLOSURE_ERROR",
            ),
            (
                RetrievalError::vector_db("open_table", "schema mismatch"),
                "VECTOR_DB_ERROR",
            ),
        ];
        for (err, expected) in &cases {
            assert_eq!(err.error_type(), *expected);
        }
    }

    #[test]
    fn per_method_retrieval_classification() {
        let mut detail = HashMap::new();
        detail.insert("q".to_owned(), Value::String("x".to_owned()));
        let vector_err = RetrievalError::VectorSearch {
            message: "timeout".into(),
            operation: "vector_search".into(),
            detail: detail.clone(),
        };
        assert!(vector_err.is_per_method_retrieval_error());

        let fusion_err = RetrievalError::fusion("fuse_results", "bad", "q");
        assert!(!fusion_err.is_per_method_retrieval_error());
    }

    #[test]
    fn display_non_empty() {
        let err = RetrievalError::fusion("fuse_results", "boom", "hello world");
        assert!(!err.to_string().is_empty());
        assert_eq!(err.detail()["query"], Value::String("hello world".into()));
        assert_eq!(err.operation(), "fuse_results");
    }
}
