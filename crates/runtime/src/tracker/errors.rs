//! Error detection over shell output.
//!
//! Scans stdout+stderr for a fixed ordered signature list; at most one
//! entry is recorded per call. Repeats of the same pattern within 60
//! seconds collapse into one window entry (cap 50 unique patterns,
//! oldest evicted).

use crate::state::{ErrorEntry, ErrorWindow, SessionState};
use crate::types::unix_now;

const DEDUP_WINDOW_SECS: f64 = 60.0;
const MAX_WINDOWS: usize = 50;

/// Signatures checked when classifying a failing test run.
const ERROR_SIGS: &[&str] = &[
    "Traceback",
    "SyntaxError:",
    "ImportError:",
    "ModuleNotFoundError:",
    "TypeError:",
    "ValueError:",
    "KeyError:",
    "AttributeError:",
    "AssertionError:",
    "NameError:",
    "FAILED",
    "npm ERR!",
    "fatal:",
    "error[E",
    "panicked at",
];

/// Signatures checked on every Bash call for the unlogged-error buffer.
const ERROR_PATTERNS: &[&str] = &[
    "Traceback",
    "SyntaxError:",
    "ImportError:",
    "ModuleNotFoundError:",
    "Permission denied",
    "npm ERR!",
    "fatal:",
    "error[E",
    "FAILED",
    "panicked at",
    "command not found",
    "No such file or directory",
    "ConnectionRefusedError",
    "OSError:",
];

/// First matching signature in `output`, or `"unknown"`.
pub fn extract_error_pattern(output: &str) -> String {
    ERROR_SIGS
        .iter()
        .find(|sig| output.contains(*sig))
        .map(|sig| sig.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Same-pattern windowed dedup: repeats within 60 s bump the existing
/// window instead of adding entries.
pub fn deduplicate_error_window(state: &mut SessionState, pattern: &str) {
    let now = unix_now();
    for window in state.error_windows.iter_mut() {
        if window.pattern == pattern && now - window.last_seen <= DEDUP_WINDOW_SECS {
            window.last_seen = now;
            window.count += 1;
            return;
        }
    }
    if state.error_windows.len() >= MAX_WINDOWS {
        state
            .error_windows
            .sort_by(|a, b| a.last_seen.total_cmp(&b.last_seen));
        state.error_windows.remove(0);
    }
    state.error_windows.push(ErrorWindow {
        pattern: pattern.to_string(),
        first_seen: now,
        last_seen: now,
        count: 1,
    });
}

/// Scan shell output for error signatures; records at most one entry.
pub fn detect_errors(state: &mut SessionState, command: &str, output: &str) {
    for pattern in ERROR_PATTERNS {
        if output.contains(pattern) {
            state.unlogged_errors.push(ErrorEntry {
                pattern: pattern.to_string(),
                command: command.chars().take(200).collect(),
                timestamp: unix_now(),
            });
            *state
                .error_pattern_counts
                .entry(pattern.to_string())
                .or_insert(0) += 1;
            deduplicate_error_window(state, pattern);
            break;
        }
    }
}
