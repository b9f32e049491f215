//! Post-tool tracker: the state machine run after every tool call.
//!
//! Order matters and follows the evidence chain: counters, verification
//! state, error detection, observation capture, auto-remember, mentor
//! modules. The caller persists the state once at the end.

pub mod auto_remember;
pub mod errors;
pub mod mentor;
pub mod observations;
pub mod verification;

use std::sync::OnceLock;

use crate::config::{WardenConfig, WardenPaths};
use crate::gateway::client::GatewayClient;
use crate::state::live::LiveState;
use crate::state::SessionState;
use crate::types::{canonical_path, HookEvent};

/// Shared collaborators for one tracker run.
pub struct TrackerDeps<'a> {
    pub config: &'a WardenConfig,
    pub paths: &'a WardenPaths,
    pub live: &'a LiveState,
    pub client: Option<&'a GatewayClient>,
}

fn token_encoder() -> Option<&'static tiktoken_rs::CoreBPE> {
    static ENCODER: OnceLock<Option<tiktoken_rs::CoreBPE>> = OnceLock::new();
    ENCODER
        .get_or_init(|| tiktoken_rs::cl100k_base().ok())
        .as_ref()
}

/// Rough token count for the call's payload; a cheap bytes/4 heuristic
/// when the encoder is unavailable.
fn estimate_tokens(event: &HookEvent) -> u64 {
    let mut text = serde_json::to_string(&event.tool_input).unwrap_or_default();
    text.push_str(&verification::response_output(event.tool_response.as_ref()));
    let text: String = text.chars().take(8000).collect();
    match token_encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(&text).len() as u64,
        None => (text.len() / 4) as u64,
    }
}

/// Process one post-tool event against `state`. Returns advisory lines
/// for stderr. Persisting the mutated state is the caller's job.
pub async fn handle_post_tool(
    event: &HookEvent,
    state: &mut SessionState,
    deps: &TrackerDeps<'_>,
) -> Vec<String> {
    // 1. Counters.
    state.tool_call_count += 1;
    *state
        .tool_call_counts
        .entry(event.tool_name.clone())
        .or_insert(0) += 1;
    state.estimated_tokens += estimate_tokens(event);

    // 2. Verification state machine.
    let fix_was_unsaved = state.unsaved_fix.is_some();
    match event.tool_name.as_str() {
        "Bash" => {
            if let Some(command) = event.command() {
                verification::record_shell(
                    state,
                    command,
                    event.tool_response.as_ref(),
                    &deps.config.broad_test_commands,
                );
            }
        }
        "Edit" | "Write" | "NotebookEdit" => {
            if let Some(file_path) = event.file_path() {
                verification::record_edit(state, file_path);
            }
        }
        "Read" => {
            if let Some(file_path) = event.file_path() {
                state.record_file_read(canonical_path(file_path));
            }
        }
        _ => {}
    }

    // 3. Error detection over shell output.
    if event.tool_name == "Bash" {
        let output = verification::response_output(event.tool_response.as_ref());
        if !output.is_empty() {
            errors::detect_errors(state, event.command().unwrap_or(""), &output);
        }
    }

    // 4. Observation capture.
    observations::capture(&deps.paths.capture_queue(), event, state);

    // 5. Auto-remember the allow-listed moments: a freshly proven fix is
    //    critical knowledge; a handoff document is session context.
    if !fix_was_unsaved {
        if let Some(fix) = state.unsaved_fix.clone() {
            let content = format!(
                "Fix verified for '{}': {}",
                fix.pattern, state.last_test_command
            );
            auto_remember::remember(
                &deps.paths.auto_remember_queue(),
                state,
                deps.config.max_auto_remember_per_session,
                deps.client,
                &content,
                "test went green while fixing this error",
                "fix_outcome",
                true,
            )
            .await;
        }
    }
    if event.tool_name == "Write" {
        if let Some(file_path) = event.file_path() {
            if file_path.ends_with("HANDOFF.md") {
                let content: String = event
                    .written_content()
                    .unwrap_or("")
                    .chars()
                    .take(500)
                    .collect();
                auto_remember::remember(
                    &deps.paths.auto_remember_queue(),
                    state,
                    deps.config.max_auto_remember_per_session,
                    deps.client,
                    &content,
                    "session handoff",
                    "handoff",
                    false,
                )
                .await;
            }
        }
    }

    // 6. Mentor modules.
    mentor::run_all(event, state, deps.live, deps.client).await
}
