//! Vector store seam and the in-process brute-force backend.
//!
//! The gateway talks to its vector index through [`VectorStore`] so the
//! embedded Lance backend and the in-memory store used by tests are
//! interchangeable. Embeddings come from an [`Embedder`]; the default is
//! a deterministic feature-hashing embedder, with the real model treated
//! as an external collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::errsig::fnv1a_64;
use crate::gateway::protocol::SearchHit;
use crate::gateway::GatewayError;

/// One stored row: id, scrubbed text and free-form metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: f64,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        collection: &str,
        records: &[MemoryRecord],
        vectors: &[Vec<f32>],
    ) -> Result<(), GatewayError>;

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, GatewayError>;

    async fn get(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<MemoryRecord>, GatewayError>;

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize, GatewayError>;

    async fn count(&self, collection: &str) -> Result<usize, GatewayError>;
}

/// Text → vector seam.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic feature-hashing embedder: tokens and token bigrams are
/// hashed into a fixed number of buckets, signs taken from the hash, the
/// result L2-normalised. Not a language model — but stable, fast, and
/// good enough for near-duplicate recall.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut bump = |feature: &str| {
            let hash = fnv1a_64(feature);
            let index = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        };

        for token in &tokens {
            bump(token);
        }
        for pair in tokens.windows(2) {
            bump(&format!("{} {}", pair[0], pair[1]));
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

/// Cosine distance between two vectors (1 − cosine similarity).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b)) as f64
}

/// Brute-force in-memory backend: the test double, and the fallback when
/// the embedded Lance backend is compiled out.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<(MemoryRecord, Vec<f32>)>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(
        &self,
        collection: &str,
        records: &[MemoryRecord],
        vectors: &[Vec<f32>],
    ) -> Result<(), GatewayError> {
        if records.len() != vectors.len() {
            return Err(GatewayError::Storage(
                "records/vectors length mismatch".to_string(),
            ));
        }
        let mut collections = self.collections.write().await;
        let rows = collections.entry(collection.to_string()).or_default();
        for (record, vector) in records.iter().zip(vectors) {
            rows.retain(|(existing, _)| existing.id != record.id);
            rows.push((record.clone(), vector.clone()));
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, GatewayError> {
        let collections = self.collections.read().await;
        let Some(rows) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|(record, stored)| SearchHit {
                id: record.id.clone(),
                text: record.text.clone(),
                distance: cosine_distance(vector, stored),
                metadata: record.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<MemoryRecord>, GatewayError> {
        let collections = self.collections.read().await;
        let Some(rows) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(record, _)| ids.contains(&record.id))
            .map(|(record, _)| record.clone())
            .collect())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize, GatewayError> {
        let mut collections = self.collections.write().await;
        let Some(rows) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|(record, _)| !ids.contains(&record.id));
        Ok(before - rows.len())
    }

    async fn count(&self, collection: &str) -> Result<usize, GatewayError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map(|r| r.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::unix_now;
    use serde_json::json;

    fn record(id: &str, text: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            text: text.to_string(),
            metadata: json!({}),
            created_at: unix_now(),
        }
    }

    #[test]
    fn embedder_is_deterministic_and_normalised() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("connection refused on startup");
        let b = embedder.embed("connection refused on startup");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_text_is_closer_than_unrelated() {
        let embedder = HashEmbedder::new(256);
        let base = embedder.embed("database connection timeout in pool");
        let near = embedder.embed("database connection timeout");
        let far = embedder.embed("render the settings page with css");
        assert!(cosine_distance(&base, &near) < cosine_distance(&base, &far));
    }

    #[tokio::test]
    async fn upsert_query_round_trip() {
        let store = MemoryVectorStore::new();
        let embedder = HashEmbedder::new(64);
        let records = vec![record("a", "rust borrow checker"), record("b", "css flexbox")];
        let vectors: Vec<_> = records.iter().map(|r| embedder.embed(&r.text)).collect();
        store.upsert("knowledge", &records, &vectors).await.unwrap();

        let hits = store
            .query("knowledge", &embedder.embed("rust borrow checker"), 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].distance < 0.1);
    }

    #[tokio::test]
    async fn upsert_replaces_same_id() {
        let store = MemoryVectorStore::new();
        let embedder = HashEmbedder::new(64);
        let first = vec![record("a", "old text")];
        let vectors = vec![embedder.embed("old text")];
        store.upsert("knowledge", &first, &vectors).await.unwrap();

        let second = vec![record("a", "new text")];
        let vectors = vec![embedder.embed("new text")];
        store.upsert("knowledge", &second, &vectors).await.unwrap();

        assert_eq!(store.count("knowledge").await.unwrap(), 1);
        let got = store.get("knowledge", &["a".to_string()]).await.unwrap();
        assert_eq!(got[0].text, "new text");
    }

    #[tokio::test]
    async fn delete_reports_removed_rows() {
        let store = MemoryVectorStore::new();
        let embedder = HashEmbedder::new(64);
        let records = vec![record("a", "one"), record("b", "two")];
        let vectors: Vec<_> = records.iter().map(|r| embedder.embed(&r.text)).collect();
        store.upsert("knowledge", &records, &vectors).await.unwrap();

        let removed = store
            .delete("knowledge", &["a".to_string(), "zz".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count("knowledge").await.unwrap(), 1);
    }
}
