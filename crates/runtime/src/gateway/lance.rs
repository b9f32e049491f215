//! Embedded LanceDB vector backend.
//!
//! Zero-config: one Lance table per collection under the runtime's
//! `memory/` directory. No external services. Compiled behind the
//! `vector-lancedb` feature; the in-memory store covers the rest.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use tokio::sync::RwLock;

use crate::gateway::protocol::SearchHit;
use crate::gateway::store::{MemoryRecord, VectorStore};
use crate::gateway::GatewayError;

pub struct LanceStore {
    db: lancedb::Connection,
    dimension: usize,
    tables: RwLock<HashMap<String, lancedb::Table>>,
}

fn storage_err(context: &str, e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Storage(format!("{context}: {e}"))
}

impl LanceStore {
    pub async fn open(data_path: PathBuf, dimension: usize) -> Result<Self, GatewayError> {
        std::fs::create_dir_all(&data_path)
            .map_err(|e| storage_err("create lance data dir", e))?;
        let db = lancedb::connect(data_path.to_str().unwrap_or("./memory"))
            .execute()
            .await
            .map_err(|e| storage_err("connect to lancedb", e))?;
        Ok(Self {
            db,
            dimension,
            tables: RwLock::new(HashMap::new()),
        })
    }

    fn build_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                true,
            ),
            Field::new("metadata_json", DataType::Utf8, true),
            Field::new("created_at", DataType::Int64, true),
        ]))
    }

    async fn table(&self, collection: &str) -> Result<lancedb::Table, GatewayError> {
        if let Some(table) = self.tables.read().await.get(collection) {
            return Ok(table.clone());
        }

        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| storage_err("list lance tables", e))?;

        let table = if names.contains(&collection.to_string()) {
            self.db
                .open_table(collection)
                .execute()
                .await
                .map_err(|e| storage_err("open lance table", e))?
        } else {
            let schema = self.build_schema();
            let empty = RecordBatch::new_empty(schema.clone());
            let batches = RecordBatchIterator::new(vec![Ok(empty)], schema);
            self.db
                .create_table(collection, Box::new(batches))
                .execute()
                .await
                .map_err(|e| storage_err("create lance table", e))?
        };

        self.tables
            .write()
            .await
            .insert(collection.to_string(), table.clone());
        Ok(table)
    }

    fn make_batch(
        &self,
        schema: &Arc<Schema>,
        records: &[MemoryRecord],
        vectors: &[Vec<f32>],
    ) -> Result<RecordBatch, GatewayError> {
        for vector in vectors {
            if vector.len() != self.dimension {
                return Err(GatewayError::Storage(format!(
                    "dimension mismatch: expected {}, got {}",
                    self.dimension,
                    vector.len()
                )));
            }
        }

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let metadata: Vec<String> = records.iter().map(|r| r.metadata.to_string()).collect();
        let created: Vec<i64> = records.iter().map(|r| r.created_at as i64).collect();

        let vector_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            vectors
                .iter()
                .map(|v| Some(v.iter().map(|x| Some(*x)).collect::<Vec<_>>())),
            self.dimension as i32,
        );

        RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(vector_array),
                Arc::new(StringArray::from(
                    metadata.iter().map(String::as_str).collect::<Vec<_>>(),
                )),
                Arc::new(Int64Array::from(created)),
            ],
        )
        .map_err(|e| storage_err("build record batch", e))
    }

    fn record_from_batch(batch: &RecordBatch, row: usize) -> Option<MemoryRecord> {
        let id_col = batch
            .column_by_name("id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())?;
        let text_col = batch
            .column_by_name("text")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())?;
        let meta_col = batch
            .column_by_name("metadata_json")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let created_col = batch
            .column_by_name("created_at")
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>());

        let metadata = meta_col
            .filter(|col| !col.is_null(row))
            .map(|col| {
                serde_json::from_str(col.value(row)).unwrap_or(serde_json::Value::Null)
            })
            .unwrap_or(serde_json::Value::Null);

        Some(MemoryRecord {
            id: id_col.value(row).to_string(),
            text: text_col.value(row).to_string(),
            metadata,
            created_at: created_col
                .filter(|col| !col.is_null(row))
                .map(|col| col.value(row) as f64)
                .unwrap_or(0.0),
        })
    }

    fn id_predicate(ids: &[String]) -> String {
        let quoted: Vec<String> = ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect();
        format!("id IN ({})", quoted.join(", "))
    }
}

#[async_trait]
impl VectorStore for LanceStore {
    async fn upsert(
        &self,
        collection: &str,
        records: &[MemoryRecord],
        vectors: &[Vec<f32>],
    ) -> Result<(), GatewayError> {
        if records.is_empty() {
            return Ok(());
        }
        let table = self.table(collection).await?;

        // Upsert = delete matching ids, then append.
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        table
            .delete(&Self::id_predicate(&ids))
            .await
            .map_err(|e| storage_err("delete before upsert", e))?;

        let schema = self.build_schema();
        let batch = self.make_batch(&schema, records, vectors)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| storage_err("append records", e))?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, GatewayError> {
        let table = self.table(collection).await?;
        let batches = table
            .vector_search(vector.to_vec())
            .map_err(|e| storage_err("build vector search", e))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| storage_err("vector search", e))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| storage_err("collect search results", e))?;

        let mut hits = Vec::new();
        for batch in &batches {
            let distance_col = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            for row in 0..batch.num_rows() {
                if let Some(record) = Self::record_from_batch(batch, row) {
                    let distance = distance_col
                        .filter(|col| !col.is_null(row))
                        .map(|col| col.value(row) as f64)
                        .unwrap_or(1.0);
                    hits.push(SearchHit {
                        id: record.id,
                        text: record.text,
                        distance,
                        metadata: record.metadata,
                    });
                }
            }
        }
        Ok(hits)
    }

    async fn get(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<MemoryRecord>, GatewayError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table(collection).await?;
        let batches = table
            .query()
            .only_if(Self::id_predicate(ids))
            .limit(ids.len())
            .execute()
            .await
            .map_err(|e| storage_err("get by id", e))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| storage_err("collect get results", e))?;

        let mut records = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                if let Some(record) = Self::record_from_batch(batch, row) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize, GatewayError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = self.table(collection).await?;
        let before = table
            .count_rows(None)
            .await
            .map_err(|e| storage_err("count before delete", e))?;
        table
            .delete(&Self::id_predicate(ids))
            .await
            .map_err(|e| storage_err("delete records", e))?;
        let after = table
            .count_rows(None)
            .await
            .map_err(|e| storage_err("count after delete", e))?;
        Ok(before.saturating_sub(after))
    }

    async fn count(&self, collection: &str) -> Result<usize, GatewayError> {
        let table = self.table(collection).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| storage_err("count rows", e))
    }
}
