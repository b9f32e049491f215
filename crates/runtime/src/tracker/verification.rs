//! Verification state machine driven by post-tool events.
//!
//! Edits accumulate in `pending_verification`; shell commands discharge
//! them. A recognised test invocation refreshes the test-freshness facts,
//! a broad test run clears everything, and any successful command clears
//! the specific files it mentions.

use serde_json::Value;
use std::path::Path;

use crate::state::{SessionState, TestFailure, UnsavedFix};
use crate::tracker::errors::extract_error_pattern;
use crate::types::unix_now;

/// Substrings that identify a test-framework invocation.
const TEST_COMMAND_MARKERS: &[&str] = &[
    "pytest",
    "cargo test",
    "npm test",
    "go test",
    "make test",
    "python -m unittest",
    "python3 -m unittest",
    "tox",
    "jest",
    "mix test",
];

pub fn is_test_command(command: &str) -> bool {
    TEST_COMMAND_MARKERS.iter().any(|m| command.contains(m))
}

/// Whether `command` is one of the configured broad-test commands that
/// reset all pending verification.
pub fn is_broad_test_command(command: &str, broad_list: &[String]) -> bool {
    let trimmed = command.trim();
    broad_list
        .iter()
        .any(|b| trimmed == b || trimmed.starts_with(&format!("{b} ")))
}

/// Exit code from a Bash tool response, if present.
pub fn response_exit_code(tool_response: Option<&Value>) -> Option<i64> {
    let response = tool_response?;
    response
        .get("exit_code")
        .or_else(|| response.get("exitCode"))
        .or_else(|| response.get("code"))
        .and_then(Value::as_i64)
}

/// Combined stdout + stderr of a tool response (either a string or an
/// object with `stdout`/`stderr` fields).
pub fn response_output(tool_response: Option<&Value>) -> String {
    match tool_response {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => {
            let stdout = map.get("stdout").and_then(Value::as_str).unwrap_or("");
            let stderr = map.get("stderr").and_then(Value::as_str).unwrap_or("");
            format!("{stdout}{stderr}")
        }
        _ => String::new(),
    }
}

/// Record an Edit/Write/NotebookEdit: the file joins the pending list and
/// its streak grows until a verify-event clears it.
pub fn record_edit(state: &mut SessionState, file_path: &str) {
    if !state.pending_verification.iter().any(|p| p == file_path) {
        state.pending_verification.push(file_path.to_string());
    }
    *state.edit_streak.entry(file_path.to_string()).or_insert(0) += 1;
    state
        .verification_scores
        .insert(file_path.to_string(), 0.0);
}

/// Process a shell command result against the verification state.
pub fn record_shell(
    state: &mut SessionState,
    command: &str,
    tool_response: Option<&Value>,
    broad_list: &[String],
) {
    let exit_code = response_exit_code(tool_response);
    let succeeded = exit_code.map(|c| c == 0).unwrap_or(true);
    let now = unix_now();

    if is_test_command(command) {
        state.last_test_run = now;
        state.last_test_command = command.chars().take(200).collect();
        state.last_test_exit_code = exit_code;

        if !succeeded {
            let output = response_output(tool_response);
            state.recent_test_failure = Some(TestFailure {
                pattern: extract_error_pattern(&output),
                timestamp: now,
            });
            state.fixing_error = true;
        } else if state.fixing_error {
            // The fix is proven; the save-fix gate holds new work until
            // the outcome is recorded.
            let pattern = state
                .recent_test_failure
                .take()
                .map(|f| f.pattern)
                .unwrap_or_else(|| "unknown".to_string());
            state.unsaved_fix = Some(UnsavedFix {
                pattern,
                verified_at: now,
            });
            state.fixing_error = false;
        }
    }

    if succeeded && is_broad_test_command(command, broad_list) {
        state.pending_verification.clear();
        state.edit_streak.clear();
        state.session_test_baseline = true;
        for score in state.verification_scores.values_mut() {
            *score = 1.0;
        }
        return;
    }

    // Any command clears the specific files it mentions: fully on
    // success, half-credit on failure.
    let mentioned: Vec<String> = state
        .pending_verification
        .iter()
        .filter(|p| {
            let basename = Path::new(p.as_str())
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(p.as_str());
            command.contains(basename)
        })
        .cloned()
        .collect();
    for file in mentioned {
        if succeeded {
            state.pending_verification.retain(|p| *p != file);
            state.edit_streak.remove(&file);
            state.verification_scores.insert(file, 1.0);
        } else {
            state.verification_scores.insert(file, 0.5);
        }
    }
}
