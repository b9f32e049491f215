//! Auto-remember: a small allow-list of events worth persisting without
//! being asked (proven fixes, session handoffs).
//!
//! Critical events try the gateway immediately; anything else — and any
//! failure — lands in a disk queue the gateway drains at session start.
//! Capped per session so a noisy loop can't flood the knowledge store.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::gateway::client::GatewayClient;
use crate::state::SessionState;
use crate::types::unix_now;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRememberEvent {
    pub content: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub tags: String,
    pub timestamp: f64,
}

fn enqueue_to_disk(queue_path: &Path, event: &AutoRememberEvent) -> std::io::Result<()> {
    if let Some(dir) = queue_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut line = serde_json::to_string(event)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(queue_path)?
        .write_all(line.as_bytes())
}

/// Queue (or immediately save) an auto-remember event.
///
/// Fail-open all the way down: rate-limit hits and IO trouble just drop
/// the event.
pub async fn remember(
    queue_path: &Path,
    state: &mut SessionState,
    max_per_session: u32,
    client: Option<&GatewayClient>,
    content: &str,
    context: &str,
    tags: &str,
    critical: bool,
) {
    if state.auto_remember_count >= max_per_session {
        return;
    }
    state.auto_remember_count += 1;

    let event = AutoRememberEvent {
        content: content.to_string(),
        context: context.to_string(),
        tags: tags.to_string(),
        timestamp: unix_now(),
    };

    if critical {
        if let Some(client) = client {
            if client
                .auto_remember(&event.content, &event.context, &event.tags)
                .await
                .is_ok()
            {
                return;
            }
            // Gateway unreachable: fall through to the disk queue.
        }
    }

    if let Err(e) = enqueue_to_disk(queue_path, &event) {
        tracing::debug!(error = %e, "auto-remember enqueue failed");
    }
}

/// Read and remove the queued events (used by the session-start drain).
pub fn drain_queue(queue_path: &Path) -> Vec<AutoRememberEvent> {
    let Ok(raw) = std::fs::read_to_string(queue_path) else {
        return Vec::new();
    };
    let events: Vec<AutoRememberEvent> = raw
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    let _ = std::fs::remove_file(queue_path);
    events
}
