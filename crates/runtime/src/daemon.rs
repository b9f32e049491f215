//! Daemon fast-path for the gate pipeline.
//!
//! A resident process keeps the pipeline warm behind a UDS and answers
//! raw hook input with `{exit_code, stdout, stderr}`. The pre-tool shim
//! decides daemon-vs-inline per call through the `gate_daemon` circuit
//! breaker; after three consecutive failures the fast path is skipped
//! for thirty seconds. There is no fallback from inline to daemon.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::config::{WardenConfig, WardenPaths};
use crate::gateway::protocol::MAX_RESPONSE_BYTES;
use crate::state::breaker::{BreakerPolicy, CircuitBreaker};

pub const BREAKER_SERVICE: &str = "gate_daemon";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonReply {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

pub fn daemon_breaker(paths: &WardenPaths) -> CircuitBreaker {
    CircuitBreaker::new(&paths.breaker_dir(), BREAKER_SERVICE, BreakerPolicy::default())
}

/// Serve the warm pipeline. Each connection carries one raw hook input
/// line and receives one reply line.
pub async fn serve(paths: WardenPaths, config: WardenConfig) -> anyhow::Result<()> {
    let socket_path = paths.daemon_socket();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    if let Some(dir) = socket_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!(socket = %socket_path.display(), "gate daemon listening");

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "daemon accept failed");
                continue;
            }
        };
        if let Err(e) = handle_connection(stream, &paths, &config).await {
            tracing::warn!(error = %e, "daemon connection failed");
        }
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    paths: &WardenPaths,
    config: &WardenConfig,
) -> anyhow::Result<()> {
    let mut reader = BufReader::new(&mut stream).take(MAX_RESPONSE_BYTES as u64);
    let mut raw = String::new();
    reader.read_line(&mut raw).await?;

    let (exit_code, stdout, stderr) = crate::hooks::pre_tool_inline(raw.trim(), paths, config).await;
    let reply = DaemonReply {
        exit_code,
        stdout,
        stderr,
    };
    let mut payload = serde_json::to_string(&reply)?;
    payload.push('\n');
    stream.write_all(payload.as_bytes()).await?;
    Ok(())
}

/// Shim side: try the daemon, or return `None` so the caller evaluates
/// inline. Failures (refused, timeout, bad reply) are recorded against
/// the breaker.
pub async fn try_daemon(
    paths: &WardenPaths,
    timeout: Duration,
    raw: &str,
) -> Option<DaemonReply> {
    let socket_path = paths.daemon_socket();
    if !socket_path.exists() {
        return None;
    }
    let breaker = daemon_breaker(paths);
    if breaker.is_open() {
        tracing::debug!("gate daemon breaker open, using inline fallback");
        return None;
    }

    let exchange = async {
        let mut stream = UnixStream::connect(&socket_path).await.ok()?;
        let mut line = raw.to_string();
        line.push('\n');
        stream.write_all(line.as_bytes()).await.ok()?;

        let mut reader = BufReader::new(stream).take(MAX_RESPONSE_BYTES as u64);
        let mut buf = String::new();
        reader.read_line(&mut buf).await.ok()?;
        serde_json::from_str::<DaemonReply>(buf.trim()).ok()
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Some(reply)) => {
            breaker.record_success();
            Some(reply)
        }
        Ok(None) | Err(_) => {
            breaker.record_failure();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_socket_falls_back_without_breaker_damage() {
        let tmp = TempDir::new().unwrap();
        let paths = WardenPaths::at(tmp.path());
        let reply = try_daemon(&paths, Duration::from_millis(100), "{}").await;
        assert!(reply.is_none());
        assert!(!daemon_breaker(&paths).is_open());
    }

    #[tokio::test]
    async fn dead_socket_records_failures_until_breaker_opens() {
        let tmp = TempDir::new().unwrap();
        let paths = WardenPaths::at(tmp.path());
        // A socket path that exists but nothing listens on.
        std::fs::write(paths.daemon_socket(), b"").unwrap();

        for _ in 0..3 {
            let reply = try_daemon(&paths, Duration::from_millis(100), "{}").await;
            assert!(reply.is_none());
        }
        assert!(daemon_breaker(&paths).is_open());

        // While open the fast path is skipped outright.
        let reply = try_daemon(&paths, Duration::from_millis(100), "{}").await;
        assert!(reply.is_none());
    }
}
