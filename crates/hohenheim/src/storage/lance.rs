use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};
use tracing::{debug, info, warn};

use super::{IndexHit, VectorIndex, cosine_similarity};
use crate::error::{HohenheimError, Result};
use crate::memory::types::{Metadata, MemoryRecord, RecordId, RecordKind};

const RECORDS_TABLE: &str = "long_term_records";

/// LanceDB-backed persistent index
pub struct LanceIndex {
    table: Table,
    dimension: i32,
}

impl LanceIndex {
    /// Connect to (or create) the store under `path`.
    ///
    /// An existing table whose embedding width differs from `dimension` is
    /// rejected rather than silently mixed.
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        let dimension = i32::try_from(dimension).map_err(|_| {
            HohenheimError::Config(format!("Embedding dimension {dimension} is too large"))
        })?;

        std::fs::create_dir_all(path)?;
        let uri = path
            .to_str()
            .ok_or_else(|| HohenheimError::StorageUnavailable("Invalid path encoding".to_string()))?;

        let connection = lancedb::connect(uri).execute().await.map_err(|e| {
            HohenheimError::StorageUnavailable(format!("Failed to connect to LanceDB: {e}"))
        })?;

        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to list tables: {e}")))?;

        let table = if names.iter().any(|n| n == RECORDS_TABLE) {
            let table = connection
                .open_table(RECORDS_TABLE)
                .execute()
                .await
                .map_err(|e| {
                    HohenheimError::StorageUnavailable(format!("Failed to open records table: {e}"))
                })?;
            Self::check_dimension(&table, dimension).await?;
            debug!(path = %path.display(), "Opened existing long-term table");
            table
        } else {
            let schema = Self::records_schema(dimension);
            let batch = Self::create_empty_batch(schema.clone(), dimension)?;
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            let table = connection
                .create_table(RECORDS_TABLE, Box::new(batches))
                .execute()
                .await
                .map_err(|e| {
                    HohenheimError::StorageUnavailable(format!(
                        "Failed to create records table: {e}"
                    ))
                })?;
            info!(path = %path.display(), "Created long-term table");
            table
        };

        Ok(Self { table, dimension })
    }

    async fn check_dimension(table: &Table, expected: i32) -> Result<()> {
        let schema = table
            .schema()
            .await
            .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to read schema: {e}")))?;
        let field = schema.field_with_name("embedding").map_err(|e| {
            HohenheimError::StorageUnavailable(format!("Records table has no embedding column: {e}"))
        })?;
        match field.data_type() {
            DataType::FixedSizeList(_, size) if *size == expected => Ok(()),
            other => Err(HohenheimError::StorageUnavailable(format!(
                "Records table embedding type {other:?} does not match dimension {expected}"
            ))),
        }
    }

    fn records_schema(dimension: i32) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new(
                "timestamp",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("importance", DataType::Float32, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ]))
    }

    fn create_empty_batch(schema: Arc<Schema>, dimension: i32) -> Result<RecordBatch> {
        let empty_strings: Vec<&str> = vec![];
        let empty_embeddings: Vec<Option<Vec<Option<f32>>>> = vec![];

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(TimestampMicrosecondArray::from(Vec::<i64>::new()).with_timezone("UTC")),
                Arc::new(Float32Array::from(Vec::<f32>::new())),
                Arc::new(StringArray::from(empty_strings)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<
                    arrow_array::types::Float32Type,
                    _,
                    _,
                >(empty_embeddings, dimension)),
            ],
        )
        .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to create empty batch: {e}")))
    }

    fn record_to_batch(&self, id: RecordId, vector: &[f32], record: &MemoryRecord) -> Result<RecordBatch> {
        if vector.len() != self.dimension as usize {
            return Err(HohenheimError::StorageUnavailable(format!(
                "Embedding has {} dimensions, index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let id = id.to_string();
        let metadata = serde_json::to_string(&record.metadata)?;
        let embeddings: Vec<Option<Vec<Option<f32>>>> =
            vec![Some(vector.iter().map(|&v| Some(v)).collect())];

        RecordBatch::try_new(
            Self::records_schema(self.dimension),
            vec![
                Arc::new(StringArray::from(vec![id.as_str()])),
                Arc::new(StringArray::from(vec![record.kind.as_str()])),
                Arc::new(StringArray::from(vec![record.content.as_str()])),
                Arc::new(
                    TimestampMicrosecondArray::from(vec![record.timestamp.timestamp_micros()])
                        .with_timezone("UTC"),
                ),
                Arc::new(Float32Array::from(vec![record.importance])),
                Arc::new(StringArray::from(vec![metadata.as_str()])),
                Arc::new(FixedSizeListArray::from_iter_primitive::<
                    arrow_array::types::Float32Type,
                    _,
                    _,
                >(embeddings, self.dimension)),
            ],
        )
        .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to create RecordBatch: {e}")))
    }

    fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<T>())
            .ok_or_else(|| HohenheimError::StorageUnavailable(format!("Failed to get {name} column")))
    }

    /// Convert an Arrow row back to a record
    fn batch_to_record(batch: &RecordBatch, row: usize) -> Result<MemoryRecord> {
        let ids = Self::column::<StringArray>(batch, "id")?;
        let kinds = Self::column::<StringArray>(batch, "kind")?;
        let contents = Self::column::<StringArray>(batch, "content")?;
        let timestamps = Self::column::<TimestampMicrosecondArray>(batch, "timestamp")?;
        let importances = Self::column::<Float32Array>(batch, "importance")?;
        let metadata = Self::column::<StringArray>(batch, "metadata")?;
        let embeddings = Self::column::<FixedSizeListArray>(batch, "embedding")?;

        let id: RecordId = ids
            .value(row)
            .parse()
            .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to parse id: {e}")))?;
        let kind: RecordKind = kinds
            .value(row)
            .parse()
            .map_err(HohenheimError::StorageUnavailable)?;
        let timestamp = Utc
            .timestamp_micros(timestamps.value(row))
            .single()
            .ok_or_else(|| {
                HohenheimError::StorageUnavailable("Failed to parse timestamp".to_string())
            })?;
        let metadata: Metadata = serde_json::from_str(metadata.value(row)).map_err(|e| {
            HohenheimError::StorageUnavailable(format!("Failed to parse metadata: {e}"))
        })?;

        if embeddings.is_null(row) {
            return Err(HohenheimError::StorageUnavailable(
                "Row has no embedding".to_string(),
            ));
        }
        let embedding_list = embeddings.value(row);
        let values = embedding_list
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| {
                HohenheimError::StorageUnavailable("Failed to get embedding values".to_string())
            })?;
        let embedding: Vec<f32> = (0..values.len()).map(|i| values.value(i)).collect();

        Ok(MemoryRecord {
            id,
            kind,
            content: contents.value(row).to_string(),
            timestamp,
            importance: importances.value(row),
            metadata,
            embedding: Some(embedding),
        })
    }

    /// Decode every row, skipping rows that fail to decode
    fn decode_batches(batches: &[RecordBatch]) -> Vec<MemoryRecord> {
        let mut records = Vec::new();
        for batch in batches {
            for row in 0..batch.num_rows() {
                match Self::batch_to_record(batch, row) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(row, error = %e, "Skipping undecodable long-term row"),
                }
            }
        }
        records
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn upsert(&self, id: RecordId, vector: &[f32], payload: &MemoryRecord) -> Result<()> {
        let batch = self.record_to_batch(id, vector, payload)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let mut merge = self.table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(batches))
            .await
            .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to upsert record: {e}")))?;

        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let stream = self
            .table
            .query()
            .nearest_to(vector)
            .map_err(|e| {
                HohenheimError::StorageUnavailable(format!("Failed to create vector query: {e}"))
            })?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to execute search: {e}")))?;

        let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(|e| {
            HohenheimError::StorageUnavailable(format!("Failed to collect search results: {e}"))
        })?;

        let mut hits: Vec<IndexHit> = Self::decode_batches(&batches)
            .into_iter()
            .map(|record| {
                let score = record
                    .embedding
                    .as_deref()
                    .map_or(0.0, |e| cosine_similarity(vector, e));
                IndexHit {
                    id: record.id,
                    score,
                    record,
                }
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }

    async fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>> {
        let stream = self
            .table
            .query()
            .only_if(format!("id = '{id}'"))
            .limit(1)
            .execute()
            .await
            .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to query record: {e}")))?;

        let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(|e| {
            HohenheimError::StorageUnavailable(format!("Failed to collect query results: {e}"))
        })?;

        for batch in &batches {
            if batch.num_rows() > 0 {
                return Self::batch_to_record(batch, 0).map(Some);
            }
        }
        Ok(None)
    }

    async fn update_importance(&self, id: RecordId, importance: f32) -> Result<bool> {
        let result = self
            .table
            .update()
            .only_if(format!("id = '{id}'"))
            .column("importance", format!("{importance}"))
            .execute()
            .await
            .map_err(|e| {
                HohenheimError::StorageUnavailable(format!("Failed to update importance: {e}"))
            })?;

        Ok(result.rows_updated > 0)
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        if self.get(id).await?.is_none() {
            return Ok(false);
        }
        self.table
            .delete(&format!("id = '{id}'"))
            .await
            .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to delete record: {e}")))?;
        Ok(true)
    }

    async fn count(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to count rows: {e}")))
    }

    async fn list(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let stream = self
            .table
            .query()
            .limit(limit)
            .execute()
            .await
            .map_err(|e| HohenheimError::StorageUnavailable(format!("Failed to list records: {e}")))?;

        let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(|e| {
            HohenheimError::StorageUnavailable(format!("Failed to collect records: {e}"))
        })?;

        Ok(Self::decode_batches(&batches))
    }

    fn name(&self) -> &'static str {
        "lance"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Append a row as-is, bypassing the validation in `upsert`
    async fn append_raw(index: &LanceIndex, batch: RecordBatch) {
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        index.table.add(Box::new(batches)).execute().await.unwrap();
    }

    fn with_column(batch: &RecordBatch, index: usize, value: &str) -> RecordBatch {
        let mut columns = batch.columns().to_vec();
        columns[index] = Arc::new(StringArray::from(vec![value]));
        RecordBatch::try_new(batch.schema(), columns).unwrap()
    }

    #[tokio::test]
    async fn test_corrupted_rows_are_skipped() {
        let dir = tempdir().unwrap();
        let index = LanceIndex::open(&dir.path().join("vector_db"), 2).await.unwrap();

        let good = MemoryRecord::new(RecordKind::Fact, "intact");
        index.upsert(good.id, &[1.0, 0.0], &good).await.unwrap();

        let bad_kind = MemoryRecord::new(RecordKind::Fact, "bad kind");
        let batch = index.record_to_batch(bad_kind.id, &[1.0, 0.0], &bad_kind).unwrap();
        append_raw(&index, with_column(&batch, 1, "bogus")).await;

        let bad_metadata = MemoryRecord::new(RecordKind::Fact, "bad metadata");
        let batch = index
            .record_to_batch(bad_metadata.id, &[0.9, 0.1], &bad_metadata)
            .unwrap();
        append_raw(&index, with_column(&batch, 5, "{not json")).await;

        assert_eq!(index.count().await.unwrap(), 3);

        let listed = index.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, good.id);

        let hits = index.query(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.content, "intact");
    }
}
