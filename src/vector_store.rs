//! Vector store driver contract (spec §6) plus an in-memory reference
//! implementation used by tests and by callers that have not wired a real
//! backend. Grounded on `dillonfkhanna-multi-search`'s `VectorDBManager`,
//! which already wraps exactly this `lancedb`/`arrow` API shape.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{RetrievalError, RetrievalResult};
use crate::tool_record::ToolRecord;

/// Distance metric used by `nearest_to` (spec §4.6 `distance_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceType {
    /// Euclidean distance.
    L2,
    /// Cosine distance (`1 - cosine_similarity`).
    Cosine,
    /// Negative dot product.
    Dot,
}

impl std::fmt::Display for DistanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L2 => write!(f, "l2"),
            Self::Cosine => write!(f, "cosine"),
            Self::Dot => write!(f, "dot"),
        }
    }
}

fn distance(a: &[f32], b: &[f32], kind: DistanceType) -> f32 {
    match kind {
        DistanceType::L2 => a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt(),
        DistanceType::Dot => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        DistanceType::Cosine => {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b = b.iter().map(|y| y * y).sum::<f32>().sqrt();
            if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
                1.0
            } else {
                1.0 - dot / (norm_a * norm_b)
            }
        }
    }
}

/// IVF-PQ index build parameters (spec §4.6 / §3 "IVF-PQ index config").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IvfPqConfig {
    /// Number of inverted-file partitions.
    pub num_partitions: usize,
    /// Number of product-quantization sub-vectors.
    pub num_sub_vectors: usize,
    /// Bits per PQ code, 4 or 8.
    pub num_bits: u8,
    /// Maximum k-means iterations during training.
    pub max_iterations: u32,
    /// Distance metric the index is built for.
    pub distance_type: DistanceType,
}

/// One hit from `nearest_to` — the matched record plus its raw distance
/// under the query's distance metric (lower is always better here,
/// regardless of metric).
#[derive(Debug, Clone)]
pub struct VectorSearchHit {
    /// The matched record.
    pub record: ToolRecord,
    /// Raw distance under the requested [`DistanceType`].
    pub distance: f32,
}

/// One vector-backed table (spec §6 `Table`).
#[async_trait]
pub trait VectorTable: Send + Sync {
    /// The table's declared vector dimension.
    fn dimension(&self) -> usize;

    /// Inserts records in bulk.
    async fn add(&self, records: Vec<ToolRecord>) -> RetrievalResult<()>;

    /// Deletes rows matching a filter expression (driver-specific syntax,
    /// e.g. `"id = 'x'"`).
    async fn delete(&self, filter_expr: &str) -> RetrievalResult<()>;

    /// Total row count.
    async fn count_rows(&self) -> RetrievalResult<usize>;

    /// (Re)builds the vector index with the given parameters.
    async fn create_index(&self, config: IvfPqConfig) -> RetrievalResult<()>;

    /// Runs `nearest_to(vec).distance_type(d).limit(n)`, returning hits
    /// ordered by ascending distance (best match first).
    async fn nearest_to(&self, query_vector: &[f32], distance_type: DistanceType, limit: usize) -> RetrievalResult<Vec<VectorSearchHit>>;

    /// Inserts a canary row used by the schema-migration probe, then
    /// deletes it. Returns an error if the driver rejects the row's shape.
    async fn probe_schema(&self, dimension: usize) -> RetrievalResult<()> {
        let canary = ToolRecord {
            id: "__schema_probe__".to_owned(),
            name: String::new(),
            description: String::new(),
            tags: Vec::new(),
            path: None,
            version: None,
            source: None,
            tool_type: crate::tool_record::ToolType::Builtin,
            metadata: serde_json::json!({}),
            vector: vec![0.0; dimension],
            indexed_at: Utc::now().timestamp_micros(),
        };
        self.add(vec![canary]).await?;
        self.delete("id = '__schema_probe__'").await?;
        Ok(())
    }
}

/// A vector store connection (spec §6 `Connection`).
#[async_trait]
pub trait VectorConnection: Send + Sync {
    /// Lists existing table names.
    async fn table_names(&self) -> RetrievalResult<Vec<String>>;

    /// Opens an existing table.
    async fn open_table(&self, name: &str) -> RetrievalResult<Arc<dyn VectorTable>>;

    /// Creates a new table with the given vector dimension.
    async fn create_table(&self, name: &str, dimension: usize) -> RetrievalResult<Arc<dyn VectorTable>>;

    /// Drops a table, including its on-disk subtree (spec §6 "Physical
    /// storage root"). Errors are ignored if the table did not exist.
    async fn drop_table(&self, name: &str) -> RetrievalResult<()>;
}

#[derive(Default)]
struct InMemoryTableState {
    records: HashMap<String, ToolRecord>,
    last_index: Option<IvfPqConfig>,
}

/// An in-process [`VectorTable`] backed by a `HashMap`, used by tests and as
/// a drop-in when no `lancedb-store` feature driver is configured.
pub struct InMemoryTable {
    dimension: usize,
    state: RwLock<InMemoryTableState>,
}

impl InMemoryTable {
    #[must_use]
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(InMemoryTableState::default()),
        }
    }

    /// The most recently built index config, if any (test/inspection hook).
    #[must_use]
    pub fn last_index_config(&self) -> Option<IvfPqConfig> {
        self.state.read().ok().and_then(|s| s.last_index)
    }
}

fn matches_id_equals_filter(filter_expr: &str, id: &str) -> bool {
    // Supports the one filter shape this crate ever emits: `id = '...'`.
    let expr = filter_expr.trim();
    if let Some(rhs) = expr.strip_prefix("id = '").and_then(|s| s.strip_suffix('\'')) {
        return rhs == id;
    }
    false
}

#[async_trait]
impl VectorTable for InMemoryTable {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn add(&self, records: Vec<ToolRecord>) -> RetrievalResult<()> {
        for record in &records {
            if record.dimension() != self.dimension {
                return Err(RetrievalError::vector_db(
                    "add",
                    format!(
                        "record {} has dimension {} but table expects {}",
                        record.id,
                        record.dimension(),
                        self.dimension
                    ),
                ));
            }
        }
        let mut state = self.state.write().map_err(|_| RetrievalError::vector_db("add", "poisoned lock"))?;
        for record in records {
            state.records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn delete(&self, filter_expr: &str) -> RetrievalResult<()> {
        let mut state = self.state.write().map_err(|_| RetrievalError::vector_db("delete", "poisoned lock"))?;
        state.records.retain(|id, _| !matches_id_equals_filter(filter_expr, id));
        Ok(())
    }

    async fn count_rows(&self) -> RetrievalResult<usize> {
        let state = self.state.read().map_err(|_| RetrievalError::vector_db("count_rows", "poisoned lock"))?;
        Ok(state.records.len())
    }

    async fn create_index(&self, config: IvfPqConfig) -> RetrievalResult<()> {
        let mut state = self.state.write().map_err(|_| RetrievalError::vector_db("create_index", "poisoned lock"))?;
        state.last_index = Some(config);
        Ok(())
    }

    async fn nearest_to(&self, query_vector: &[f32], distance_type: DistanceType, limit: usize) -> RetrievalResult<Vec<VectorSearchHit>> {
        if query_vector.len() != self.dimension {
            return Err(RetrievalError::vector_db(
                "nearest_to",
                format!("query dimension {} does not match table dimension {}", query_vector.len(), self.dimension),
            ));
        }
        let state = self.state.read().map_err(|_| RetrievalError::vector_db("nearest_to", "poisoned lock"))?;
        let mut hits: Vec<VectorSearchHit> = state
            .records
            .values()
            .map(|record| VectorSearchHit {
                record: record.clone(),
                distance: distance(query_vector, &record.vector, distance_type),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// An in-process [`VectorConnection`], storing tables in memory for the
/// lifetime of the process.
#[derive(Default)]
pub struct InMemoryConnection {
    tables: RwLock<HashMap<String, Arc<InMemoryTable>>>,
}

impl InMemoryConnection {
    /// Builds an empty in-memory connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorConnection for InMemoryConnection {
    async fn table_names(&self) -> RetrievalResult<Vec<String>> {
        let tables = self.tables.read().map_err(|_| RetrievalError::vector_db("table_names", "poisoned lock"))?;
        Ok(tables.keys().cloned().collect())
    }

    async fn open_table(&self, name: &str) -> RetrievalResult<Arc<dyn VectorTable>> {
        let tables = self.tables.read().map_err(|_| RetrievalError::vector_db("open_table", "poisoned lock"))?;
        tables
            .get(name)
            .cloned()
            .map(|t| t as Arc<dyn VectorTable>)
            .ok_or_else(|| RetrievalError::vector_db("open_table", format!("no such table: {name}")))
    }

    async fn create_table(&self, name: &str, dimension: usize) -> RetrievalResult<Arc<dyn VectorTable>> {
        let mut tables = self.tables.write().map_err(|_| RetrievalError::vector_db("create_table", "poisoned lock"))?;
        let table = Arc::new(InMemoryTable::new(dimension));
        tables.insert(name.to_owned(), table.clone());
        Ok(table as Arc<dyn VectorTable>)
    }

    async fn drop_table(&self, name: &str) -> RetrievalResult<()> {
        let mut tables = self.tables.write().map_err(|_| RetrievalError::vector_db("drop_table", "poisoned lock"))?;
        tables.remove(name);
        Ok(())
    }
}

/// Opens an in-memory connection at a notional path (the in-memory driver
/// ignores `path`; a real driver uses it as the LanceDB directory root).
pub async fn open_in_memory(_path: &str) -> RetrievalResult<Arc<dyn VectorConnection>> {
    Ok(Arc::new(InMemoryConnection::new()))
}

#[cfg(feature = "lancedb-store")]
pub mod lance {
    //! `lancedb`/`arrow`-backed [`VectorConnection`]/[`VectorTable`], grounded
    //! in `dillonfkhanna-multi-search`'s `VectorDBManager` (same
    //! `nearest_to()`/Arrow-schema shape, generalized to this crate's
    //! 11-field table schema, spec §6).

    use std::sync::Arc;

    use arrow_array::{Array, FixedSizeListArray, Float32Array, ListArray, RecordBatch, RecordBatchIterator, StringArray, TimestampMicrosecondArray};
    use arrow_schema::{DataType, Field, Schema, TimeUnit};
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use lancedb::connection::Connection as LanceConnection;
    use lancedb::query::{ExecutableQuery, QueryBase};
    use lancedb::table::Table as LanceTable;

    use super::{DistanceType, IvfPqConfig, VectorConnection, VectorSearchHit, VectorTable};
    use crate::error::{RetrievalError, RetrievalResult};
    use crate::tool_record::{ToolRecord, ToolType};

    fn schema(dimension: i32) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, false),
            Field::new("description", DataType::Utf8, false),
            Field::new(
                "tags",
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
                false,
            ),
            Field::new("path", DataType::Utf8, true),
            Field::new("version", DataType::Utf8, true),
            Field::new("source", DataType::Utf8, true),
            Field::new("tool_type", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dimension),
                false,
            ),
            Field::new("indexed_at", DataType::Timestamp(TimeUnit::Microsecond, None), false),
        ]))
    }

    fn tags_array(records: &[ToolRecord]) -> ListArray {
        use arrow_array::builder::{ListBuilder, StringBuilder};

        let mut builder = ListBuilder::new(StringBuilder::new());
        for record in records {
            for tag in &record.tags {
                builder.values().append_value(tag);
            }
            builder.append(true);
        }
        builder.finish()
    }

    fn records_to_batch(records: &[ToolRecord], dimension: usize) -> RetrievalResult<RecordBatch> {
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let descriptions: Vec<&str> = records.iter().map(|r| r.description.as_str()).collect();
        let paths: Vec<Option<&str>> = records.iter().map(|r| r.path.as_deref()).collect();
        let versions: Vec<Option<&str>> = records.iter().map(|r| r.version.as_deref()).collect();
        let sources: Vec<Option<&str>> = records.iter().map(|r| r.source.as_deref()).collect();
        let tool_types: Vec<String> = records.iter().map(|r| r.tool_type.to_string()).collect();
        let metadata: Vec<String> = records.iter().map(|r| r.metadata.to_string()).collect();
        let vectors: Vec<Option<Vec<Option<f32>>>> = records
            .iter()
            .map(|r| Some(r.vector.iter().map(|v| Some(*v)).collect()))
            .collect();
        let indexed_at: Vec<i64> = records.iter().map(|r| r.indexed_at).collect();

        RecordBatch::try_new(
            schema(dimension as i32),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(names)),
                Arc::new(StringArray::from(descriptions)),
                Arc::new(tags_array(records)) as Arc<dyn Array>,
                Arc::new(StringArray::from(paths)),
                Arc::new(StringArray::from(versions)),
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(tool_types)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors, dimension as i32)),
                Arc::new(TimestampMicrosecondArray::from(indexed_at)),
            ],
        )
        .map_err(|e| RetrievalError::vector_db("records_to_batch", e.to_string()))
    }

    /// LanceDB-backed table.
    pub struct LanceStoreTable {
        table: LanceTable,
        dimension: usize,
    }

    #[async_trait]
    impl VectorTable for LanceStoreTable {
        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn add(&self, records: Vec<ToolRecord>) -> RetrievalResult<()> {
            if records.is_empty() {
                return Ok(());
            }
            let batch = records_to_batch(&records, self.dimension)?;
            let iter = RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema(self.dimension as i32));
            self.table
                .add(Box::new(iter))
                .execute()
                .await
                .map_err(|e| RetrievalError::vector_db("add", e.to_string()))
        }

        async fn delete(&self, filter_expr: &str) -> RetrievalResult<()> {
            self.table
                .delete(filter_expr)
                .await
                .map_err(|e| RetrievalError::vector_db("delete", e.to_string()))
        }

        async fn count_rows(&self) -> RetrievalResult<usize> {
            self.table
                .count_rows(None)
                .await
                .map_err(|e| RetrievalError::vector_db("count_rows", e.to_string()))
        }

        async fn create_index(&self, config: IvfPqConfig) -> RetrievalResult<()> {
            use lancedb::index::vector::IvfPqIndexBuilder;
            use lancedb::index::Index;

            let mut builder = IvfPqIndexBuilder::default()
                .num_partitions(config.num_partitions as u32)
                .num_sub_vectors(config.num_sub_vectors as u32)
                .max_iterations(config.max_iterations);
            builder = match config.num_bits {
                4 => builder.num_bits(4),
                _ => builder.num_bits(8),
            };

            self.table
                .create_index(&["vector"], Index::IvfPq(builder))
                .replace(true)
                .execute()
                .await
                .map_err(|e| RetrievalError::vector_db("create_index", e.to_string()))
        }

        async fn nearest_to(&self, query_vector: &[f32], distance_type: DistanceType, limit: usize) -> RetrievalResult<Vec<VectorSearchHit>> {
            use lancedb::DistanceType as LanceDistanceType;

            let lance_distance = match distance_type {
                DistanceType::L2 => LanceDistanceType::L2,
                DistanceType::Cosine => LanceDistanceType::Cosine,
                DistanceType::Dot => LanceDistanceType::Dot,
            };

            let mut stream = self
                .table
                .query()
                .nearest_to(query_vector.to_vec())
                .map_err(|e| RetrievalError::vector_db("nearest_to", e.to_string()))?
                .distance_type(lance_distance)
                .limit(limit)
                .execute()
                .await
                .map_err(|e| RetrievalError::vector_db("nearest_to", e.to_string()))?;

            let mut hits = Vec::new();
            while let Some(batch) = stream.try_next().await.map_err(|e| RetrievalError::vector_db("nearest_to", e.to_string()))? {
                hits.extend(batch_to_hits(&batch)?);
            }
            Ok(hits)
        }
    }

    fn column_str(batch: &RecordBatch, name: &str, row: usize) -> RetrievalResult<Option<String>> {
        let col = batch
            .column_by_name(name)
            .ok_or_else(|| RetrievalError::vector_db("nearest_to", format!("missing column {name}")))?;
        let arr = col
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| RetrievalError::vector_db("nearest_to", format!("column {name} is not utf8")))?;
        Ok(if arr.is_null(row) { None } else { Some(arr.value(row).to_owned()) })
    }

    fn batch_to_hits(batch: &RecordBatch) -> RetrievalResult<Vec<VectorSearchHit>> {
        let mut out = Vec::with_capacity(batch.num_rows());
        let distance_col = batch
            .column_by_name("_distance")
            .ok_or_else(|| RetrievalError::vector_db("nearest_to", "missing _distance column"))?
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| RetrievalError::vector_db("nearest_to", "_distance is not float32"))?;
        let vector_col = batch
            .column_by_name("vector")
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>().cloned());
        let metadata_col = batch.column_by_name("metadata");

        for row in 0..batch.num_rows() {
            let id = column_str(batch, "id", row)?.unwrap_or_default();
            let name = column_str(batch, "name", row)?.unwrap_or_default();
            let description = column_str(batch, "description", row)?.unwrap_or_default();
            let path = column_str(batch, "path", row)?;
            let version = column_str(batch, "version", row)?;
            let source = column_str(batch, "source", row)?;
            let tool_type_str = column_str(batch, "tool_type", row)?.unwrap_or_default();
            let tool_type = match tool_type_str.as_str() {
                "skill" => ToolType::Skill,
                "mcp" => ToolType::Mcp,
                _ => ToolType::Builtin,
            };
            let metadata = metadata_col
                .and_then(|c| c.as_any().downcast_ref::<StringArray>().map(|a| a.value(row)))
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::json!({}));
            let vector: Vec<f32> = vector_col
                .as_ref()
                .map(|arr| {
                    let values = arr.value(row);
                    let floats = values.as_any().downcast_ref::<Float32Array>();
                    floats.map(|f| f.values().to_vec()).unwrap_or_default()
                })
                .unwrap_or_default();

            out.push(VectorSearchHit {
                record: ToolRecord {
                    id,
                    name,
                    description,
                    tags: Vec::new(),
                    path,
                    version,
                    source,
                    tool_type,
                    metadata,
                    vector,
                    indexed_at: 0,
                },
                distance: distance_col.value(row),
            });
        }
        Ok(out)
    }

    /// LanceDB-backed connection, rooted at a filesystem directory.
    pub struct LanceStoreConnection {
        conn: LanceConnection,
        root: String,
    }

    impl LanceStoreConnection {
        /// Connects to (creating, if absent) the LanceDB directory at `path`.
        pub async fn open(path: &str) -> RetrievalResult<Self> {
            std::fs::create_dir_all(path).map_err(|e| RetrievalError::vector_db("open", e.to_string()))?;
            let conn = lancedb::connect(path)
                .execute()
                .await
                .map_err(|e| RetrievalError::vector_db("open", e.to_string()))?;
            Ok(Self {
                conn,
                root: path.to_owned(),
            })
        }
    }

    #[async_trait]
    impl VectorConnection for LanceStoreConnection {
        async fn table_names(&self) -> RetrievalResult<Vec<String>> {
            self.conn
                .table_names()
                .execute()
                .await
                .map_err(|e| RetrievalError::vector_db("table_names", e.to_string()))
        }

        async fn open_table(&self, name: &str) -> RetrievalResult<Arc<dyn VectorTable>> {
            let table = self
                .conn
                .open_table(name)
                .execute()
                .await
                .map_err(|e| RetrievalError::vector_db("open_table", e.to_string()))?;
            let dimension = table_dimension(&table).await?;
            Ok(Arc::new(LanceStoreTable { table, dimension }))
        }

        async fn create_table(&self, name: &str, dimension: usize) -> RetrievalResult<Arc<dyn VectorTable>> {
            let empty = RecordBatch::new_empty(schema(dimension as i32));
            let iter = RecordBatchIterator::new(vec![Ok(empty)].into_iter(), schema(dimension as i32));
            let table = self
                .conn
                .create_table(name, Box::new(iter))
                .execute()
                .await
                .map_err(|e| RetrievalError::vector_db("create_table", e.to_string()))?;
            Ok(Arc::new(LanceStoreTable { table, dimension }))
        }

        async fn drop_table(&self, name: &str) -> RetrievalResult<()> {
            if let Err(e) = self.conn.drop_table(name).execute().await {
                tracing::debug!(error = %e, table = name, "drop_table failed, ignoring");
            }
            let subtree = std::path::Path::new(&self.root).join(format!("{name}.lance"));
            let _ = std::fs::remove_dir_all(subtree);
            Ok(())
        }
    }

    async fn table_dimension(table: &LanceTable) -> RetrievalResult<usize> {
        let schema = table.schema().await.map_err(|e| RetrievalError::vector_db("schema", e.to_string()))?;
        let field = schema
            .field_with_name("vector")
            .map_err(|e| RetrievalError::vector_db("schema", e.to_string()))?;
        match field.data_type() {
            DataType::FixedSizeList(_, dim) => Ok(*dim as usize),
            other => Err(RetrievalError::vector_db("schema", format!("vector field has unexpected type {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_record::ToolType;

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

    #[tokio::test]
    async fn create_open_drop_table_lifecycle() {
        let conn = InMemoryConnection::new();
        assert!(conn.table_names().await.unwrap().is_empty());
        conn.create_table("tools", 3).await.unwrap();
        assert_eq!(conn.table_names().await.unwrap(), vec!["tools".to_owned()]);
        assert!(conn.open_table("tools").await.is_ok());
        conn.drop_table("tools").await.unwrap();
        assert!(conn.open_table("tools").await.is_err());
    }

    #[tokio::test]
    async fn add_and_nearest_to_orders_by_distance() {
        let conn = InMemoryConnection::new();
        let table = conn.create_table("tools", 2).await.unwrap();
        table
            .add(vec![record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0]), record("c", vec![0.9, 0.1])])
            .await
            .unwrap();
        assert_eq!(table.count_rows().await.unwrap(), 3);

        let hits = table.nearest_to(&[1.0, 0.0], DistanceType::L2, 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "a");
        assert_eq!(hits[1].record.id, "c");
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let conn = InMemoryConnection::new();
        let table = conn.create_table("tools", 2).await.unwrap();
        let err = table.add(vec![record("a", vec![1.0, 0.0, 0.0])]).await.unwrap_err();
        assert_eq!(err.error_type(), "VECTOR_DB_ERROR");
    }

    #[tokio::test]
    async fn delete_by_id_filter() {
        let conn = InMemoryConnection::new();
        let table = conn.create_table("tools", 2).await.unwrap();
        table.add(vec![record("a", vec![1.0, 0.0])]).await.unwrap();
        table.delete("id = 'a'").await.unwrap();
        assert_eq!(table.count_rows().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn probe_schema_round_trips_and_cleans_up() {
        let conn = InMemoryConnection::new();
        let table = conn.create_table("tools", 2).await.unwrap();
        table.probe_schema(2).await.unwrap();
        assert_eq!(table.count_rows().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_index_records_config() {
        let table = InMemoryTable::new(2);
        let config = IvfPqConfig {
            num_partitions: 32,
            num_sub_vectors: 8,
            num_bits: 8,
            max_iterations: 50,
            distance_type: DistanceType::Cosine,
        };
        table.create_index(config).await.unwrap();
        assert_eq!(table.last_index_config().unwrap().num_partitions, 32);
    }

    #[test]
    fn cosine_distance_of_identical_vectors_is_zero() {
        let d = distance(&[1.0, 2.0], &[1.0, 2.0], DistanceType::Cosine);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn distance_type_display_matches_spec_tokens() {
        assert_eq!(DistanceType::L2.to_string(), "l2");
        assert_eq!(DistanceType::Cosine.to_string(), "cosine");
        assert_eq!(DistanceType::Dot.to_string(), "dot");
    }
}
