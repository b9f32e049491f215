//! Analytics mentor: nudge toward the right analytics tool when
//! framework-owned paths are edited, plus a periodic session summary.
//! Nudges are throttled per suggestion type so they inform instead of
//! nag.

use crate::state::SessionState;
use crate::types::{unix_now, HookEvent};

/// Per-type throttle windows, seconds.
const PATH_NUDGE_THROTTLE: f64 = 900.0; // 15 minutes
const SUMMARY_THROTTLE: f64 = 1200.0; // 20 minutes
const SUMMARY_EVERY_CALLS: u64 = 50;

struct PathSuggestion {
    marker: &'static str,
    suggestion_type: &'static str,
    tool: &'static str,
}

const PATH_SUGGESTIONS: &[PathSuggestion] = &[
    PathSuggestion {
        marker: "migrations/",
        suggestion_type: "migration",
        tool: "mcp__analytics__schema_report",
    },
    PathSuggestion {
        marker: "workflows/",
        suggestion_type: "ci",
        tool: "mcp__analytics__pipeline_health",
    },
    PathSuggestion {
        marker: "templates/",
        suggestion_type: "frontend",
        tool: "mcp__analytics__page_metrics",
    },
];

fn throttled(state: &SessionState, suggestion_type: &str, window: f64, now: f64) -> bool {
    state
        .analytics_last_nudge
        .get(suggestion_type)
        .map(|last| now - last < window)
        .unwrap_or(false)
}

/// Produce at most one nudge for this event, or `None`.
pub fn evaluate(event: &HookEvent, state: &mut SessionState) -> Option<String> {
    let now = unix_now();

    if event.is_mutation_tool() {
        if let Some(file_path) = event.file_path() {
            for suggestion in PATH_SUGGESTIONS {
                if file_path.contains(suggestion.marker)
                    && !throttled(state, suggestion.suggestion_type, PATH_NUDGE_THROTTLE, now)
                {
                    state
                        .analytics_last_nudge
                        .insert(suggestion.suggestion_type.to_string(), now);
                    return Some(format!(
                        "Editing {} — consider running {} afterwards.",
                        suggestion.marker, suggestion.tool
                    ));
                }
            }
        }
    }

    if state.tool_call_count > 0
        && state.tool_call_count % SUMMARY_EVERY_CALLS == 0
        && !throttled(state, "session_summary", SUMMARY_THROTTLE, now)
    {
        state
            .analytics_last_nudge
            .insert("session_summary".to_string(), now);
        let edits: u64 = ["Edit", "Write", "NotebookEdit"]
            .iter()
            .map(|t| state.tool_call_counts.get(*t).copied().unwrap_or(0))
            .sum();
        let errors: u32 = state.error_pattern_counts.values().sum();
        return Some(format!(
            "Session summary: {} tool calls, {edits} edits, {} pending verification, \
             {errors} error hits.",
            state.tool_call_count,
            state.pending_verification.len()
        ));
    }

    None
}
