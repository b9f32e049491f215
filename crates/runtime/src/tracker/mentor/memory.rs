//! Memory mentor: look up historical context for the current action.
//!
//! Builds a short query from the active error pattern, the file being
//! touched, the command prefix and the current strategy, then asks the
//! gateway. A hit within the cosine-distance threshold is written into
//! the mentor state fields for the hindsight gate to surface.
//! Completely fail-open: a dead gateway just returns `None`.

use serde_json::json;
use std::path::Path;

use crate::gateway::client::GatewayClient;
use crate::state::SessionState;
use crate::types::HookEvent;

const RELEVANCE_THRESHOLD: f64 = 0.5;
const MATCH_DOC_CAP: usize = 500;
const CONTEXT_CAP: usize = 500;

/// Compose the search query from whatever context is available.
pub fn build_query(event: &HookEvent, state: &SessionState) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(failure) = &state.recent_test_failure {
        if !failure.pattern.is_empty() {
            parts.push(format!("error: {}", failure.pattern));
        }
    }
    if let Some(file_path) = event.file_path() {
        if let Some(basename) = Path::new(file_path).file_name().and_then(|n| n.to_str()) {
            parts.push(basename.to_string());
        }
    }
    if event.tool_name == "Bash" {
        if let Some(command) = event.command() {
            parts.push(command.chars().take(100).collect());
        }
    }
    if !state.current_strategy_id.is_empty() {
        parts.push(format!("strategy: {}", state.current_strategy_id));
    }

    parts.truncate(3);
    parts.join(" ")
}

/// Query the gateway for historical context; write mentor fields on a
/// sufficiently close match.
pub async fn evaluate(
    client: &GatewayClient,
    event: &HookEvent,
    state: &mut SessionState,
) -> Option<String> {
    let query = build_query(event, state);
    if query.is_empty() {
        return None;
    }

    let hits = client.query("knowledge", &query, 3).await.ok()?;
    let best = hits
        .into_iter()
        .min_by(|a, b| a.distance.total_cmp(&b.distance))?;
    if best.distance > RELEVANCE_THRESHOLD {
        return None;
    }

    let doc: String = best.text.chars().take(MATCH_DOC_CAP).collect();
    let context: String = format!(
        "Historical match (distance={:.3}): {}",
        best.distance,
        best.text.chars().take(200).collect::<String>()
    )
    .chars()
    .take(CONTEXT_CAP)
    .collect();

    state.mentor_memory_match = Some(json!({
        "id": best.id,
        "document": doc,
        "distance": best.distance,
        "query": query.chars().take(200).collect::<String>(),
    }));
    state.mentor_historical_context = context.clone();

    Some(context)
}
