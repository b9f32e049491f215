//! Mentor modules: advisory analysis run after each tool call.
//!
//! Each module is fail-open and writes only its designated state fields;
//! the hindsight gate reads them on the next pre-tool pass. Modules are
//! individually toggled through the live-state document.

pub mod analytics;
pub mod chains;
pub mod memory;

use crate::gateway::client::GatewayClient;
use crate::state::live::LiveState;
use crate::state::SessionState;
use crate::types::HookEvent;

/// Run the enabled mentor modules. Any advisory messages produced are
/// returned for the caller to emit on stderr.
pub async fn run_all(
    event: &HookEvent,
    state: &mut SessionState,
    live: &LiveState,
    client: Option<&GatewayClient>,
) -> Vec<String> {
    let mut messages = Vec::new();

    // A new tool call starts a fresh warn cycle for the hindsight gate.
    state.mentor_warned_this_cycle = false;

    if live.outcome_chains_enabled() {
        if let Some(verdict) = chains::evaluate(state) {
            if !verdict.message.is_empty() {
                messages.push(format!("[MENTOR] {}", verdict.message));
            }
            if verdict.score < 0.5 {
                state.mentor_last_score = verdict.score;
                state.mentor_last_verdict = verdict.pattern.clone();
                state.mentor_escalation_count += 1;
            } else {
                state.mentor_last_score = verdict.score;
                state.mentor_last_verdict = "proceed".to_string();
                state.mentor_escalation_count = 0;
            }
        }
    }

    if live.mentor_memory_enabled() {
        if let Some(client) = client {
            if memory::evaluate(client, event, state).await.is_some() {
                // Context is surfaced by the hindsight gate, not here.
            }
        }
    }

    if live.analytics_enabled() {
        if let Some(nudge) = analytics::evaluate(event, state) {
            messages.push(format!("[MENTOR] {nudge}"));
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn disabled_toggles_touch_nothing() {
        let mut state = SessionState::new("main");
        state.tool_call_count = 20;
        state.tool_call_counts.insert("Bash".into(), 20);
        let event = HookEvent {
            session_id: "main".into(),
            hook_event_name: "PostToolUse".into(),
            tool_name: "Bash".into(),
            tool_input: json!({"command": "ls"}),
            tool_response: None,
        };
        let live = LiveState::default();
        let messages = run_all(&event, &mut state, &live, None).await;
        assert!(messages.is_empty());
        assert!(state.mentor_chain_pattern.is_empty());
    }

    #[tokio::test]
    async fn stuck_pattern_escalates_mentor_state() {
        let mut state = SessionState::new("main");
        state.tool_call_count = 20;
        state.tool_call_counts.insert("Grep".into(), 19);
        state.tool_call_counts.insert("Read".into(), 1);
        let event = HookEvent {
            session_id: "main".into(),
            hook_event_name: "PostToolUse".into(),
            tool_name: "Grep".into(),
            tool_input: json!({"pattern": "x"}),
            tool_response: None,
        };
        let live = LiveState {
            mentor_all: true,
            ..Default::default()
        };
        let messages = run_all(&event, &mut state, &live, None).await;
        assert!(!messages.is_empty());
        assert_eq!(state.mentor_escalation_count, 1);
        assert!(state.mentor_last_score < 0.5);
    }
}
