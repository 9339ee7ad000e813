//! Per-query retrieval metrics (spec §4.1 engine telemetry).
//!
//! Deliberately small: one timing/outcome snapshot per `search` call,
//! enough to answer "where did the time go and did the cache help"
//! without reproducing the reference crate's two-tier refinement
//! dashboard, which has no counterpart in this spec.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tool_record::RetrievalMethod;

/// Elapsed time for one retrieval method's fan-out task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MethodTiming {
    /// Which method this timing covers.
    pub method: RetrievalMethod,
    /// Wall-clock time spent, including any suspension.
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// Number of candidates the method returned.
    pub candidate_count: usize,
    /// Whether the method failed and was isolated to an empty list (spec
    /// §4.1 "per-method failure isolation").
    pub failed: bool,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(duration.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// A snapshot of one `search`/`search_with_cache`/`search_with_disclosure`
/// call's timing and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMetrics {
    /// Per-method fan-out timings.
    pub methods: Vec<MethodTiming>,
    /// Time spent in the CPU-only fusion step.
    #[serde(with = "duration_millis")]
    pub fusion_elapsed: Duration,
    /// Time spent building/applying disclosure content, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[serde(with = "duration_millis_opt")]
    pub disclosure_elapsed: Option<Duration>,
    /// Whether the query-result cache was hit.
    pub cache_hit: bool,
    /// Whether the disclosure-content cache was hit for every result
    /// (`None` when disclosure was not requested).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub disclosure_cache_hit: Option<bool>,
    /// Total result count returned to the caller.
    pub result_count: usize,
    /// Total wall-clock time for the whole call.
    #[serde(with = "duration_millis")]
    pub total_elapsed: Duration,
}

mod duration_millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(duration.map(|d| d.as_millis()).unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

impl QueryMetrics {
    /// Total time spent across all method fan-out tasks (may exceed
    /// `total_elapsed` since methods run concurrently).
    #[must_use]
    pub fn methods_elapsed_sum(&self) -> Duration {
        self.methods.iter().map(|m| m.elapsed).sum()
    }

    /// Whether any per-method retrieval failed and was isolated.
    #[must_use]
    pub fn had_method_failure(&self) -> bool {
        self.methods.iter().any(|m| m.failed)
    }
}
