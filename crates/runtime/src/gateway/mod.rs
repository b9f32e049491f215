//! The memory gateway: a long-lived single-writer process behind a Unix
//! domain socket.
//!
//! It owns the vector store and the FTS5 companion outright — no other
//! process opens them for writing — and serves short-lived
//! one-request-per-connection JSON exchanges. Any handler error becomes
//! `{ok: false, error}`; the server itself never dies from a bad request.

pub mod cache;
pub mod client;
pub mod fts;
#[cfg(feature = "vector-lancedb")]
pub mod lance;
pub mod protocol;
pub mod store;

use serde_json::{json, Value};
use std::io::Write as _;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

use crate::config::{WardenConfig, WardenPaths};
use crate::scrub::scrub;
use crate::state::sideband;
use crate::types::{unix_now, Observation};
use cache::SearchCache;
use fts::FtsIndex;
use protocol::{Request, Response, SearchHit, COLLECTIONS, MAX_RESPONSE_BYTES};
use store::{Embedder, HashEmbedder, MemoryRecord, VectorStore};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),
    #[error("gateway error: {0}")]
    Remote(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Gateway {
    paths: WardenPaths,
    store: Box<dyn VectorStore>,
    embedder: Box<dyn Embedder>,
    fts: FtsIndex,
    cache: SearchCache,
}

impl Gateway {
    /// Open with the default backend: embedded Lance when compiled in,
    /// the in-memory store otherwise.
    pub async fn open(paths: WardenPaths, config: &WardenConfig) -> Result<Self, GatewayError> {
        let embedder: Box<dyn Embedder> = Box::new(HashEmbedder::new(config.vector_dimension));
        let store = Self::default_store(&paths, config).await?;
        Self::with_store(paths, store, embedder)
    }

    #[cfg(feature = "vector-lancedb")]
    async fn default_store(
        paths: &WardenPaths,
        config: &WardenConfig,
    ) -> Result<Box<dyn VectorStore>, GatewayError> {
        Ok(Box::new(
            lance::LanceStore::open(paths.data_dir(), config.vector_dimension).await?,
        ))
    }

    #[cfg(not(feature = "vector-lancedb"))]
    async fn default_store(
        _paths: &WardenPaths,
        _config: &WardenConfig,
    ) -> Result<Box<dyn VectorStore>, GatewayError> {
        Ok(Box::new(store::MemoryVectorStore::new()))
    }

    /// Wire an explicit backend (tests use the in-memory store).
    pub fn with_store(
        paths: WardenPaths,
        store: Box<dyn VectorStore>,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self, GatewayError> {
        let fts = FtsIndex::open(&paths.fts_db())?;
        Ok(Self {
            paths,
            store,
            embedder,
            fts,
            cache: SearchCache::default(),
        })
    }

    /// Accept loop. Requests are served one at a time; the gateway is the
    /// only writer, so serialising writes here is the whole point.
    pub async fn serve(&self) -> Result<(), GatewayError> {
        let socket_path = self.paths.gateway_socket();
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        if let Some(dir) = socket_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let listener = UnixListener::bind(&socket_path)?;
        tracing::info!(socket = %socket_path.display(), "memory gateway listening");

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    if let Err(e) = self.handle_connection(stream).await {
                        tracing::warn!(error = %e, "connection handling failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: UnixStream) -> Result<(), GatewayError> {
        let mut reader = BufReader::new(&mut stream).take(MAX_RESPONSE_BYTES as u64);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        if line.trim().is_empty() {
            return Ok(());
        }

        let response = match serde_json::from_str::<Request>(line.trim()) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => Response::failure(format!("malformed request: {e}")),
        };

        let mut payload = serde_json::to_string(&response)
            .unwrap_or_else(|_| r#"{"ok":false,"error":"encode failure"}"#.to_string());
        if payload.len() > MAX_RESPONSE_BYTES {
            payload = serde_json::to_string(&Response::failure("response exceeded 10 MB"))
                .unwrap_or_default();
        }
        payload.push('\n');
        stream.write_all(payload.as_bytes()).await?;
        Ok(())
    }

    /// Route one request. Errors never escape as panics or socket drops.
    pub async fn dispatch(&self, request: Request) -> Response {
        let method = request.method.clone();
        match self.handle(request).await {
            Ok(result) => Response::success(result),
            Err(e) => {
                tracing::warn!(method, error = %e, "request failed");
                Response::failure(e.to_string())
            }
        }
    }

    async fn handle(&self, request: Request) -> Result<Value, GatewayError> {
        let collection = request.collection().to_string();
        if request.collection.is_some() && !COLLECTIONS.contains(&collection.as_str()) {
            return Err(GatewayError::Protocol(format!(
                "unknown collection: {collection}"
            )));
        }
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "ping" => Ok(json!("pong")),
            "count" => Ok(json!(self.store.count(&collection).await?)),
            "query" => self.handle_query(&collection, &params).await,
            "get" => self.handle_get(&collection, &params).await,
            "upsert" => self.handle_upsert(&collection, &params).await,
            "delete" => self.handle_delete(&collection, &params).await,
            "auto_remember" => self.handle_auto_remember(&params).await,
            "flush_queue" => self.handle_flush_queue().await,
            "backup" => self.handle_backup().await,
            other => Err(GatewayError::Protocol(format!("unknown method: {other}"))),
        }
    }

    async fn handle_query(
        &self,
        collection: &str,
        params: &Value,
    ) -> Result<Value, GatewayError> {
        let query = params.get("query").and_then(Value::as_str).unwrap_or("");
        let n_results = params
            .get("n_results")
            .and_then(Value::as_u64)
            .unwrap_or(5)
            .clamp(1, 50) as usize;
        let keyword = params.get("mode").and_then(Value::as_str) == Some("keyword");

        // Answering a memory query refreshes the cross-process freshness
        // signal, even on an empty result.
        let _ = sideband::write_sideband(&self.paths.sideband_file(), unix_now());

        if query.trim().is_empty() {
            return Ok(json!({"hits": []}));
        }

        let mode = if keyword { "keyword" } else { "semantic" };
        let key = SearchCache::make_key(
            query,
            &[
                ("collection", collection),
                ("n", &n_results.to_string()),
                ("mode", mode),
            ],
        );
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let hits: Vec<SearchHit> = if keyword {
            self.fts
                .search(collection, query, n_results)
                .await?
                .into_iter()
                .enumerate()
                .map(|(rank, (id, text))| SearchHit {
                    id,
                    text,
                    distance: rank as f64 * 0.1,
                    metadata: Value::Null,
                })
                .collect()
        } else {
            let vector = self.embedder.embed(query);
            self.store.query(collection, &vector, n_results).await?
        };

        let result = json!({ "hits": hits });
        self.cache.put(key, result.clone());
        Ok(result)
    }

    async fn handle_get(&self, collection: &str, params: &Value) -> Result<Value, GatewayError> {
        let ids = string_list(params.get("ids"));
        let records = self.store.get(collection, &ids).await?;
        Ok(json!({ "records": records }))
    }

    async fn handle_upsert(
        &self,
        collection: &str,
        params: &Value,
    ) -> Result<Value, GatewayError> {
        let raw = params
            .get("records")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::Protocol("upsert requires records".to_string()))?;

        let mut records = Vec::with_capacity(raw.len());
        let mut vectors = Vec::with_capacity(raw.len());
        for item in raw {
            let text = item
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::Protocol("record missing text".to_string()))?;
            let scrubbed = scrub(text).into_owned();
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let record = MemoryRecord {
                id,
                text: scrubbed.clone(),
                metadata: item.get("metadata").cloned().unwrap_or(Value::Null),
                created_at: unix_now(),
            };
            vectors.push(self.embedder.embed(&scrubbed));
            records.push(record);
        }

        self.store.upsert(collection, &records, &vectors).await?;
        for record in &records {
            self.fts.upsert(collection, &record.id, &record.text).await?;
        }
        self.cache.invalidate();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        Ok(json!({"upserted": records.len(), "ids": ids}))
    }

    async fn handle_delete(
        &self,
        collection: &str,
        params: &Value,
    ) -> Result<Value, GatewayError> {
        let ids = string_list(params.get("ids"));
        let deleted = self.store.delete(collection, &ids).await?;
        self.fts.delete(&ids).await?;
        self.cache.invalidate();
        Ok(json!({ "deleted": deleted }))
    }

    async fn handle_auto_remember(&self, params: &Value) -> Result<Value, GatewayError> {
        let content = params
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Protocol("auto_remember requires content".to_string()))?;
        let context = params.get("context").and_then(Value::as_str).unwrap_or("");
        let tags = params.get("tags").and_then(Value::as_str).unwrap_or("");

        let scrubbed = scrub(content).into_owned();
        let preview: String = scrubbed.chars().take(80).collect();
        let record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            text: scrubbed,
            metadata: json!({
                "context": context,
                "tags": tags,
                "source": "auto_remember",
                "preview": preview,
            }),
            created_at: unix_now(),
        };
        let vector = self.embedder.embed(&record.text);
        self.store
            .upsert("knowledge", std::slice::from_ref(&record), &[vector])
            .await?;
        self.fts.upsert("knowledge", &record.id, &record.text).await?;
        self.cache.invalidate();
        Ok(json!({"id": record.id}))
    }

    /// Drain the capture queue: rename to a work file, batch-upsert into
    /// `observations`, delete the work file on success. Partial failures
    /// leave it in place for the next drain.
    async fn handle_flush_queue(&self) -> Result<Value, GatewayError> {
        let queue_path = self.paths.capture_queue();
        let work_path = queue_path.with_extension("jsonl.work");

        if !work_path.exists() {
            if !queue_path.exists() {
                return Ok(json!({"flushed": 0}));
            }
            std::fs::rename(&queue_path, &work_path)?;
        }

        let raw = std::fs::read_to_string(&work_path)?;
        let mut groups: std::collections::HashMap<String, (Vec<MemoryRecord>, Vec<Vec<f32>>)> =
            std::collections::HashMap::new();
        for line in raw.lines() {
            let Ok(value) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            // Lines carry an optional collection override; everything
            // else lands in `observations`.
            let collection = value
                .get("collection")
                .and_then(Value::as_str)
                .filter(|c| COLLECTIONS.contains(c))
                .unwrap_or("observations")
                .to_string();
            let Ok(obs) = serde_json::from_value::<Observation>(value) else {
                continue;
            };
            let fields = obs
                .key_fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            let text = scrub(&format!("[{}] {} {}", obs.tool, obs.outcome, fields)).into_owned();
            let record = MemoryRecord {
                id: obs
                    .obs_hash
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                text,
                metadata: serde_json::to_value(&obs).unwrap_or(Value::Null),
                created_at: obs.ts,
            };
            let group = groups.entry(collection).or_default();
            group.1.push(self.embedder.embed(&record.text));
            group.0.push(record);
        }

        let mut flushed = 0usize;
        for (collection, (records, vectors)) in &groups {
            self.store.upsert(collection, records, vectors).await?;
            for record in records {
                self.fts.upsert(collection, &record.id, &record.text).await?;
            }
            flushed += records.len();
        }
        std::fs::remove_file(&work_path)?;
        self.cache.invalidate();
        Ok(json!({ "flushed": flushed }))
    }

    /// Snapshot the FTS database (gzip) and report collection counts.
    async fn handle_backup(&self) -> Result<Value, GatewayError> {
        let backup_dir = self.paths.base_dir.join("backups");
        std::fs::create_dir_all(&backup_dir)?;

        let stamp = chrono::Local::now().format("%Y-%m-%d_%H%M%S");
        let snapshot = backup_dir.join(format!("fts-{stamp}.sqlite3"));
        self.fts.backup_to(&snapshot).await?;

        let gz_path = backup_dir.join(format!("fts-{stamp}.sqlite3.gz"));
        let data = std::fs::read(&snapshot)?;
        let file = std::fs::File::create(&gz_path)?;
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(&data)?;
        encoder.finish()?;
        std::fs::remove_file(&snapshot)?;

        let mut counts = serde_json::Map::new();
        for collection in COLLECTIONS {
            counts.insert(
                collection.to_string(),
                json!(self.store.count(collection).await.unwrap_or(0)),
            );
        }
        Ok(json!({
            "path": gz_path.to_string_lossy(),
            "counts": Value::Object(counts),
        }))
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Build a gateway backed by the in-memory store under `base`, for tests
/// and for environments without the embedded backend.
pub fn in_memory(base: &Path, dimension: usize) -> Result<Gateway, GatewayError> {
    Gateway::with_store(
        WardenPaths::at(base),
        Box::new(store::MemoryVectorStore::new()),
        Box::new(HashEmbedder::new(dimension)),
    )
}
