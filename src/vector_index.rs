//! Vector table lifecycle manager and IVF-PQ parameter optimizer (spec
//! §4.6).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RetrievalError, RetrievalResult};
use crate::tool_record::ToolRecord;
use crate::vector_store::{DistanceType, IvfPqConfig, VectorConnection, VectorSearchHit, VectorTable};

/// Speed-vs-accuracy dial consumed by [`IndexConfigOptimizer::optimize`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerInput {
    /// Current row count.
    pub row_count: u64,
    /// Vector dimension.
    pub dimension: usize,
    /// Desired recall in `[0, 1]`.
    pub target_recall: f64,
}

/// An optimized IVF-PQ config plus its telemetry-only estimated recall
/// (spec §4.6 "Estimated recall").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptimizedIndexConfig {
    /// The chosen build parameters.
    pub config: IvfPqConfig,
    /// Telemetry-only recall estimate, clamped to `[0.7, 0.99]`.
    pub estimated_recall: f64,
}

/// Deterministically derives IVF-PQ parameters from row count, dimension,
/// and target recall (spec §4.6 partition/sub-vector/bits/iteration
/// tables).
pub struct IndexConfigOptimizer;

impl IndexConfigOptimizer {
    fn partition_count(row_count: u64) -> usize {
        let n = row_count as f64;
        if row_count < 10_000 {
            (32.0_f64).max((n.sqrt() * 2.0).round()) as usize
        } else if row_count < 100_000 {
            ((n / 100.0).round() as usize).min(512)
        } else if row_count < 1_000_000 {
            ((n.sqrt() * 5.0).round() as usize).min(1_024)
        } else {
            ((n / 500.0).round() as usize).min(2_048)
        }
    }

    fn sub_vector_count(dimension: usize) -> usize {
        let lower = (dimension / 8).max(8);
        let upper = (dimension / 4).min(256).max(lower);
        let raw = (dimension as f64 / 6.0).round() as usize;
        raw.clamp(lower, upper)
    }

    fn bits(target_recall: f64) -> u8 {
        if target_recall >= 0.9 {
            8
        } else {
            4
        }
    }

    fn max_iterations(target_recall: f64) -> u32 {
        if target_recall >= 0.95 {
            50
        } else if target_recall >= 0.9 {
            35
        } else {
            20
        }
    }

    fn estimated_recall(row_count: u64, partitions: usize, sub_vectors: usize, bits: u8, target_recall: f64) -> f64 {
        let bit_factor = if bits == 8 { 1.0 } else { 0.92 };
        let sqrt_n = (row_count as f64).sqrt().max(1.0);
        let partition_factor = (partitions as f64 / sqrt_n * 2.0).min(1.0);
        let sub_vector_factor = (sub_vectors as f64 / 64.0).min(1.0);
        let blend = (bit_factor * 0.4 + partition_factor * 0.35 + sub_vector_factor * 0.25) * target_recall;
        blend.clamp(0.7, 0.99)
    }

    /// Chooses IVF-PQ parameters for the given scale/recall target.
    #[must_use]
    pub fn optimize(input: OptimizerInput) -> OptimizedIndexConfig {
        let num_partitions = Self::partition_count(input.row_count);
        let num_sub_vectors = Self::sub_vector_count(input.dimension);
        let num_bits = Self::bits(input.target_recall);
        let max_iterations = Self::max_iterations(input.target_recall);
        let estimated_recall = Self::estimated_recall(input.row_count, num_partitions, num_sub_vectors, num_bits, input.target_recall);

        OptimizedIndexConfig {
            config: IvfPqConfig {
                num_partitions,
                num_sub_vectors,
                num_bits,
                max_iterations,
                distance_type: DistanceType::Cosine,
            },
            estimated_recall,
        }
    }
}

/// A vector search candidate carried out of the index manager, before it is
/// turned into a [`crate::tool_record::RetrievalResultItem`].
#[derive(Debug, Clone)]
pub struct IndexSearchHit {
    /// Matched tool record.
    pub record: ToolRecord,
    /// Raw distance under the manager's configured metric.
    pub distance: f32,
}

/// Owns the vector table's lifecycle: open-or-create, dimension
/// compatibility, schema migration, bulk mutation, and search (spec §4.6).
pub struct VectorIndexManager {
    connection: Arc<dyn VectorConnection>,
    table_name: String,
    dimension: usize,
    distance_type: DistanceType,
    table: tokio::sync::RwLock<Option<Arc<dyn VectorTable>>>,
}

impl VectorIndexManager {
    /// Builds a manager bound to one table name and dimension.
    #[must_use]
    pub fn new(connection: Arc<dyn VectorConnection>, table_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            connection,
            table_name: table_name.into(),
            dimension,
            distance_type: DistanceType::Cosine,
            table: tokio::sync::RwLock::new(None),
        }
    }

    /// Opens the table, creating it if absent, and recreates it if the
    /// on-disk dimension or schema disagrees with configuration (spec §4.6
    /// "dimension compatibility check" / "schema migration").
    pub async fn ensure_open(&self) -> RetrievalResult<Arc<dyn VectorTable>> {
        {
            let guard = self.table.read().await;
            if let Some(table) = guard.as_ref() {
                return Ok(table.clone());
            }
        }

        let names = self.connection.table_names().await?;
        let table = if names.contains(&self.table_name) {
            let existing = self.connection.open_table(&self.table_name).await?;
            if existing.dimension() != self.dimension {
                warn!(
                    table = %self.table_name,
                    found = existing.dimension(),
                    expected = self.dimension,
                    "vector table dimension mismatch, recreating"
                );
                self.connection.drop_table(&self.table_name).await?;
                self.connection.create_table(&self.table_name, self.dimension).await?
            } else if let Err(err) = existing.probe_schema(self.dimension).await {
                info!(table = %self.table_name, %err, "schema probe failed, recreating table");
                self.connection.drop_table(&self.table_name).await?;
                self.connection.create_table(&self.table_name, self.dimension).await?
            } else {
                existing
            }
        } else {
            self.connection.create_table(&self.table_name, self.dimension).await?
        };

        *self.table.write().await = Some(table.clone());
        Ok(table)
    }

    /// Inserts records in bulk after validating dimensions.
    pub async fn insert(&self, records: Vec<ToolRecord>) -> RetrievalResult<()> {
        let table = self.ensure_open().await?;
        table.add(records).await
    }

    /// Deletes by a driver-specific filter expression.
    pub async fn delete(&self, filter_expr: &str) -> RetrievalResult<()> {
        let table = self.ensure_open().await?;
        table.delete(filter_expr).await
    }

    /// Current row count.
    pub async fn count(&self) -> RetrievalResult<usize> {
        let table = self.ensure_open().await?;
        table.count_rows().await
    }

    /// Rebuilds the index using the optimizer's recommended parameters for
    /// the current row count and a target recall.
    pub async fn optimize_and_build_index(&self, target_recall: f64) -> RetrievalResult<OptimizedIndexConfig> {
        let table = self.ensure_open().await?;
        let row_count = table.count_rows().await? as u64;
        let optimized = IndexConfigOptimizer::optimize(OptimizerInput {
            row_count,
            dimension: self.dimension,
            target_recall,
        });
        debug!(?optimized, "rebuilding vector index");
        table.create_index(optimized.config).await?;
        Ok(optimized)
    }

    /// Searches for the nearest `limit` rows, requesting `2 × limit`
    /// candidates from the driver so downstream score-threshold filters
    /// have headroom (spec §4.6 "requests `2 × limit` rows").
    pub async fn search(&self, query_vector: &[f32], limit: usize) -> RetrievalResult<Vec<IndexSearchHit>> {
        if query_vector.len() != self.dimension {
            return Err(RetrievalError::vector_db(
                "search",
                format!("query dimension {} does not match index dimension {}", query_vector.len(), self.dimension),
            ));
        }
        let table = self.ensure_open().await?;
        let hits: Vec<VectorSearchHit> = table.nearest_to(query_vector, self.distance_type, limit.saturating_mul(2)).await?;
        Ok(hits
            .into_iter()
            .map(|h| IndexSearchHit {
                record: h.record,
                distance: h.distance,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_record::ToolType;
    use crate::vector_store::InMemoryConnection;

    fn record(id: &str, vector: Vec<f32>) -> ToolRecord {
        ToolRecord {
            id: id.into(),
            name: id.into(),
            description: "desc".into(),
            tags: vec![],
            path: None,
            version: None,
            source: None,
            tool_type: ToolType::Skill,
            metadata: serde_json::json!({}),
            vector,
            indexed_at: 0,
        }
    }

    #[test]
    fn partition_count_matches_scale_table() {
        assert_eq!(IndexConfigOptimizer::partition_count(5_000), 141); // max(32, round(sqrt(5000)*2))
        assert!(IndexConfigOptimizer::partition_count(50_000) <= 512);
        assert!(IndexConfigOptimizer::partition_count(500_000) <= 1_024);
        assert!(IndexConfigOptimizer::partition_count(5_000_000) <= 2_048);
    }

    #[test]
    fn sub_vector_count_respects_bounds() {
        let count = IndexConfigOptimizer::sub_vector_count(384);
        let lower = (384 / 8).max(8);
        let upper = (384 / 4).min(256);
        assert!(count >= lower && count <= upper);
    }

    #[test]
    fn bits_and_iterations_follow_recall_thresholds() {
        assert_eq!(IndexConfigOptimizer::bits(0.95), 8);
        assert_eq!(IndexConfigOptimizer::bits(0.5), 4);
        assert_eq!(IndexConfigOptimizer::max_iterations(0.96), 50);
        assert_eq!(IndexConfigOptimizer::max_iterations(0.91), 35);
        assert_eq!(IndexConfigOptimizer::max_iterations(0.5), 20);
    }

    #[test]
    fn estimated_recall_is_clamped() {
        let optimized = IndexConfigOptimizer::optimize(OptimizerInput {
            row_count: 1_000_000,
            dimension: 384,
            target_recall: 0.99,
        });
        assert!((0.7..=0.99).contains(&optimized.estimated_recall));
        assert_eq!(optimized.config.distance_type, DistanceType::Cosine);
    }

    #[tokio::test]
    async fn ensure_open_creates_then_reuses_table() {
        let conn: Arc<dyn VectorConnection> = Arc::new(InMemoryConnection::new());
        let manager = VectorIndexManager::new(conn, "tools", 3);
        let table1 = manager.ensure_open().await.unwrap();
        let table2 = manager.ensure_open().await.unwrap();
        assert_eq!(table1.dimension(), table2.dimension());
    }

    #[tokio::test]
    async fn insert_count_delete_round_trip() {
        let conn: Arc<dyn VectorConnection> = Arc::new(InMemoryConnection::new());
        let manager = VectorIndexManager::new(conn, "tools", 2);
        manager.insert(vec![record("a", vec![1.0, 0.0])]).await.unwrap();
        assert_eq!(manager.count().await.unwrap(), 1);
        manager.delete("id = 'a'").await.unwrap();
        assert_eq!(manager.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_requests_double_limit_from_driver() {
        let conn: Arc<dyn VectorConnection> = Arc::new(InMemoryConnection::new());
        let manager = VectorIndexManager::new(conn, "tools", 2);
        manager
            .insert(vec![record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0]), record("c", vec![0.9, 0.1])])
            .await
            .unwrap();
        let hits = manager.search(&[1.0, 0.0], 1).await.unwrap();
        assert!(hits.len() <= 2);
        assert_eq!(hits[0].record.id, "a");
    }

    #[tokio::test]
    async fn search_rejects_dimension_mismatch() {
        let conn: Arc<dyn VectorConnection> = Arc::new(InMemoryConnection::new());
        let manager = VectorIndexManager::new(conn, "tools", 2);
        let err = manager.search(&[1.0, 0.0, 0.0], 1).await.unwrap_err();
        assert_eq!(err.error_type(), "VECTOR_DB_ERROR");
    }

    #[tokio::test]
    async fn optimize_and_build_index_uses_row_count() {
        let conn: Arc<dyn VectorConnection> = Arc::new(InMemoryConnection::new());
        let manager = VectorIndexManager::new(conn, "tools", 2);
        manager.insert(vec![record("a", vec![1.0, 0.0])]).await.unwrap();
        let optimized = manager.optimize_and_build_index(0.9).await.unwrap();
        assert_eq!(optimized.config.num_bits, 8);
    }

    proptest::proptest! {
        // spec §4.6: IVF-PQ parameters stay within their documented bounds
        // for any scale/dimension/recall target the optimizer can see.
        #[test]
        fn optimized_params_stay_in_bounds(
            row_count in 0u64..5_000_000,
            dimension in 8usize..2048,
            target_recall in 0.0f64..1.0,
        ) {
            let optimized = IndexConfigOptimizer::optimize(OptimizerInput { row_count, dimension, target_recall });
            proptest::prop_assert!(optimized.config.num_partitions >= 1);
            proptest::prop_assert!(optimized.config.num_partitions <= 2_048);
            let lower = (dimension / 8).max(8);
            let upper = (dimension / 4).min(256).max(lower);
            proptest::prop_assert!(optimized.config.num_sub_vectors >= lower);
            proptest::prop_assert!(optimized.config.num_sub_vectors <= upper);
            proptest::prop_assert!(optimized.config.num_bits == 4 || optimized.config.num_bits == 8);
            proptest::prop_assert!((0.7..=0.99).contains(&optimized.estimated_recall));
        }
    }
}
