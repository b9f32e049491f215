//! UDS client used by hooks, mentors and the session lifecycle.
//!
//! Short-lived connections, one request per connection, hard deadline on
//! every call. Connection trouble and timeouts map to
//! [`GatewayError::WorkerUnavailable`] and feed the gateway circuit
//! breaker; callers fall back (empty results or disk queueing).

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::gateway::protocol::{Request, Response, SearchHit, MAX_RESPONSE_BYTES};
use crate::gateway::GatewayError;
use crate::state::breaker::CircuitBreaker;

pub struct GatewayClient {
    socket_path: PathBuf,
    timeout: Duration,
    breaker: Option<CircuitBreaker>,
}

impl GatewayClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
            breaker: None,
        }
    }

    /// Attach breaker accounting (service `memory_gateway`).
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Quick reachability probe without a full request.
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    async fn exchange(&self, request: &Request) -> Result<Value, GatewayError> {
        let unavailable =
            |detail: String| GatewayError::WorkerUnavailable(detail);

        let io = async {
            let mut stream = UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| unavailable(format!("connect: {e}")))?;

            let mut line = serde_json::to_string(request)
                .map_err(|e| GatewayError::Protocol(format!("encode: {e}")))?;
            line.push('\n');
            stream
                .write_all(line.as_bytes())
                .await
                .map_err(|e| unavailable(format!("send: {e}")))?;

            let mut reader = BufReader::new(stream).take(MAX_RESPONSE_BYTES as u64 + 1);
            let mut buf = String::new();
            reader
                .read_line(&mut buf)
                .await
                .map_err(|e| unavailable(format!("recv: {e}")))?;
            if buf.is_empty() {
                return Err(unavailable("empty response".to_string()));
            }
            if buf.len() > MAX_RESPONSE_BYTES {
                return Err(GatewayError::Protocol("response exceeded 10 MB".to_string()));
            }
            let response: Response = serde_json::from_str(buf.trim())
                .map_err(|e| GatewayError::Protocol(format!("decode: {e}")))?;
            if response.ok {
                Ok(response.result.unwrap_or(Value::Null))
            } else {
                Err(GatewayError::Remote(
                    response.error.unwrap_or_else(|| "unknown error".to_string()),
                ))
            }
        };

        let result = match tokio::time::timeout(self.timeout, io).await {
            Ok(result) => result,
            Err(_) => Err(unavailable(format!(
                "deadline of {:?} expired",
                self.timeout
            ))),
        };

        if let Some(breaker) = &self.breaker {
            match &result {
                Ok(_) | Err(GatewayError::Remote(_)) => breaker.record_success(),
                Err(GatewayError::WorkerUnavailable(_)) => breaker.record_failure(),
                Err(_) => {}
            }
        }
        result
    }

    pub async fn ping(&self) -> Result<(), GatewayError> {
        self.exchange(&Request::new("ping")).await.map(|_| ())
    }

    pub async fn count(&self, collection: &str) -> Result<usize, GatewayError> {
        let result = self
            .exchange(&Request::new("count").with_collection(collection))
            .await?;
        Ok(result.as_u64().unwrap_or(0) as usize)
    }

    /// Semantic search. An empty query returns no hits without touching
    /// the socket.
    pub async fn query(
        &self,
        collection: &str,
        query: &str,
        n_results: usize,
    ) -> Result<Vec<SearchHit>, GatewayError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let result = self
            .exchange(
                &Request::new("query")
                    .with_collection(collection)
                    .with_params(json!({"query": query, "n_results": n_results})),
            )
            .await?;
        let hits = result.get("hits").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(hits).unwrap_or_default())
    }

    pub async fn upsert(
        &self,
        collection: &str,
        records: Value,
    ) -> Result<Value, GatewayError> {
        self.exchange(
            &Request::new("upsert")
                .with_collection(collection)
                .with_params(json!({ "records": records })),
        )
        .await
    }

    pub async fn delete(&self, collection: &str, ids: &[String]) -> Result<Value, GatewayError> {
        self.exchange(
            &Request::new("delete")
                .with_collection(collection)
                .with_params(json!({ "ids": ids })),
        )
        .await
    }

    pub async fn auto_remember(
        &self,
        content: &str,
        context: &str,
        tags: &str,
    ) -> Result<Value, GatewayError> {
        self.exchange(&Request::new("auto_remember").with_params(json!({
            "content": content,
            "context": context,
            "tags": tags,
        })))
        .await
    }

    pub async fn flush_queue(&self) -> Result<Value, GatewayError> {
        self.exchange(&Request::new("flush_queue")).await
    }

    pub async fn backup(&self) -> Result<Value, GatewayError> {
        self.exchange(&Request::new("backup")).await
    }
}
