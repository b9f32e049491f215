//! Observation capture: compress each tool call to its salient fields and
//! append it to the JSONL capture queue.
//!
//! Near-duplicates are suppressed by hashing a tool-specific key and
//! checking the last 20 queue lines. Every 50th call the queue cap is
//! enforced with priority-aware compaction. Capture is best-effort:
//! every failure is swallowed.

use serde_json::Value;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::errsig::fnv1a_hash;
use crate::state::SessionState;
use crate::types::{unix_now, HookEvent, Observation, Priority};

pub const MAX_QUEUE_LINES: usize = 500;
const HIGH_KEEP: usize = 150;
const COMPACT_TARGET: usize = 300;
const MIN_TAIL: usize = 50;
const DEDUP_WINDOW_LINES: usize = 20;

const CAPTURABLE_TOOLS: &[&str] = &[
    "Bash",
    "Edit",
    "Write",
    "NotebookEdit",
    "Read",
    "Glob",
    "Grep",
    "Skill",
    "WebSearch",
    "WebFetch",
    "Task",
];

fn truncated(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Deduplication key from the tool's salient inputs. Edits include a
/// short content hash so distinct edits to one file are not collapsed.
pub fn observation_key(tool_name: &str, tool_input: &Value) -> String {
    let get = |key: &str| tool_input.get(key).and_then(Value::as_str).unwrap_or("");
    match tool_name {
        "Bash" => format!("Bash:{}", truncated(get("command"), 200)),
        "Read" => format!("Read:{}", get("file_path")),
        "Edit" | "Write" => {
            let fp = get("file_path");
            let snippet = if tool_name == "Edit" {
                truncated(get("old_string"), 100)
            } else {
                truncated(get("content"), 100)
            };
            if snippet.is_empty() {
                format!("{tool_name}:{fp}")
            } else {
                format!("{tool_name}:{fp}:{}", fnv1a_hash(&snippet))
            }
        }
        "Glob" => format!("Glob:{}", get("pattern")),
        "Grep" => format!("Grep:{}:{}", get("pattern"), get("path")),
        "WebSearch" => format!("WebSearch:{}", truncated(get("query"), 100)),
        "WebFetch" => format!("WebFetch:{}", get("url")),
        _ => tool_name.to_string(),
    }
}

fn outcome_of(event: &HookEvent) -> (String, Priority) {
    let exit = crate::tracker::verification::response_exit_code(event.tool_response.as_ref());
    match exit {
        Some(0) => ("ok".to_string(), priority_for(&event.tool_name, false)),
        Some(code) => (format!("exit:{code}"), Priority::High),
        None => {
            let output = crate::tracker::verification::response_output(event.tool_response.as_ref());
            if output.contains("Error") || output.contains("error:") {
                ("error".to_string(), Priority::High)
            } else {
                ("ok".to_string(), priority_for(&event.tool_name, false))
            }
        }
    }
}

fn priority_for(tool_name: &str, errored: bool) -> Priority {
    if errored {
        return Priority::High;
    }
    match tool_name {
        "Edit" | "Write" | "NotebookEdit" | "Bash" => Priority::Med,
        _ => Priority::Low,
    }
}

/// Compress one event to an observation record.
pub fn compress(event: &HookEvent) -> Observation {
    let mut key_fields = HashMap::new();
    let get = |key: &str| {
        event
            .tool_input
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    };
    match event.tool_name.as_str() {
        "Bash" => {
            if let Some(command) = get("command") {
                key_fields.insert("command".into(), truncated(&command, 200));
            }
        }
        "Edit" | "Write" | "NotebookEdit" => {
            if let Some(fp) = event.file_path() {
                key_fields.insert("file_path".into(), fp.to_string());
            }
            if let Some(content) = event.written_content() {
                key_fields.insert("content_hash".into(), fnv1a_hash(&truncated(content, 100)));
            }
        }
        "Read" => {
            if let Some(fp) = get("file_path") {
                key_fields.insert("file_path".into(), fp);
            }
        }
        "Glob" | "Grep" => {
            if let Some(pattern) = get("pattern") {
                key_fields.insert("pattern".into(), pattern);
            }
        }
        "WebSearch" => {
            if let Some(query) = get("query") {
                key_fields.insert("query".into(), truncated(&query, 100));
            }
        }
        "WebFetch" => {
            if let Some(url) = get("url") {
                key_fields.insert("url".into(), url);
            }
        }
        _ => {}
    }

    let (outcome, priority) = outcome_of(event);
    Observation {
        tool: event.tool_name.clone(),
        ts: unix_now(),
        session_id: event.session_id.clone(),
        key_fields,
        outcome,
        priority,
        obs_hash: None,
    }
}

/// Whether `hash` appears in the last 20 lines of the queue. Fail-open:
/// errors read as "not a duplicate".
pub fn is_recent_duplicate(queue_path: &Path, hash: &str) -> bool {
    let Ok(raw) = std::fs::read_to_string(queue_path) else {
        return false;
    };
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines.len().saturating_sub(DEDUP_WINDOW_LINES);
    lines[start..].iter().any(|line| {
        serde_json::from_str::<Value>(line)
            .ok()
            .and_then(|obs| {
                obs.get("_obs_hash")
                    .and_then(Value::as_str)
                    .map(|h| h == hash)
            })
            .unwrap_or(false)
    })
}

/// Capture one observation. Never propagates errors; the capture queue is
/// best-effort evidence, not a dependency.
pub fn capture(queue_path: &Path, event: &HookEvent, state: &SessionState) {
    if !CAPTURABLE_TOOLS.contains(&event.tool_name.as_str()) {
        return;
    }
    let key = observation_key(&event.tool_name, &event.tool_input);
    let hash = fnv1a_hash(&key);
    if is_recent_duplicate(queue_path, &hash) {
        return;
    }

    let mut obs = compress(event);
    obs.obs_hash = Some(hash);

    let append = || -> std::io::Result<()> {
        if let Some(dir) = queue_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut line = serde_json::to_string(&obs)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(queue_path)?
            .write_all(line.as_bytes())
    };
    if let Err(e) = append() {
        tracing::debug!(error = %e, "observation capture failed");
        return;
    }

    if state.tool_call_count % 50 == 0 {
        cap_queue(queue_path);
    }
}

/// Priority-aware compaction: keep the last 150 high-priority lines plus
/// the most recent others up to 300 total (tail floor of 50).
pub fn cap_queue(queue_path: &Path) {
    let compact = || -> std::io::Result<()> {
        let raw = std::fs::read_to_string(queue_path)?;
        let lines: Vec<&str> = raw.lines().collect();
        if lines.len() <= MAX_QUEUE_LINES {
            return Ok(());
        }

        let mut high = Vec::new();
        let mut rest = Vec::new();
        for line in &lines {
            let is_high = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|obs| {
                    obs.get("priority")
                        .and_then(Value::as_str)
                        .map(|p| p == "high")
                })
                .unwrap_or(false);
            if is_high {
                high.push(*line);
            } else {
                rest.push(*line);
            }
        }

        let high_start = high.len().saturating_sub(HIGH_KEEP);
        let high = &high[high_start..];
        let budget = COMPACT_TARGET.saturating_sub(high.len()).max(MIN_TAIL);
        let rest_start = rest.len().saturating_sub(budget);
        let rest = &rest[rest_start..];

        let dir = queue_path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        for line in high.iter().chain(rest.iter()) {
            writeln!(tmp, "{line}")?;
        }
        tmp.flush()?;
        tmp.persist(queue_path)?;
        Ok(())
    };
    if let Err(e) = compact() {
        tracing::debug!(error = %e, "queue compaction failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn read_event(path: &str) -> HookEvent {
        HookEvent {
            session_id: "main".into(),
            hook_event_name: "PostToolUse".into(),
            tool_name: "Read".into(),
            tool_input: json!({"file_path": path}),
            tool_response: Some(json!({"ok": true})),
        }
    }

    #[test]
    fn duplicate_read_grows_queue_by_one() {
        let tmp = TempDir::new().unwrap();
        let queue = tmp.path().join(".capture_queue.jsonl");
        let state = SessionState::new("main");
        let event = read_event("/x/foo.py");

        capture(&queue, &event, &state);
        capture(&queue, &event, &state);

        let raw = std::fs::read_to_string(&queue).unwrap();
        assert_eq!(raw.lines().count(), 1);
    }

    #[test]
    fn distinct_edits_to_one_file_are_kept() {
        let tmp = TempDir::new().unwrap();
        let queue = tmp.path().join(".capture_queue.jsonl");
        let state = SessionState::new("main");
        for old in ["fn a()", "fn b()"] {
            let event = HookEvent {
                session_id: "main".into(),
                hook_event_name: "PostToolUse".into(),
                tool_name: "Edit".into(),
                tool_input: json!({"file_path": "/x/a.rs", "old_string": old, "new_string": "y"}),
                tool_response: Some(json!({"ok": true})),
            };
            capture(&queue, &event, &state);
        }
        let raw = std::fs::read_to_string(&queue).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn duplicate_outside_window_is_captured_again() {
        let tmp = TempDir::new().unwrap();
        let queue = tmp.path().join(".capture_queue.jsonl");
        let state = SessionState::new("main");
        capture(&queue, &read_event("/x/target.py"), &state);
        // Push the first capture out of the 20-line dedup window.
        for i in 0..25 {
            capture(&queue, &read_event(&format!("/x/f{i}.py")), &state);
        }
        capture(&queue, &read_event("/x/target.py"), &state);
        let raw = std::fs::read_to_string(&queue).unwrap();
        assert_eq!(raw.lines().count(), 27);
    }

    #[test]
    fn failing_bash_is_high_priority() {
        let event = HookEvent {
            session_id: "main".into(),
            hook_event_name: "PostToolUse".into(),
            tool_name: "Bash".into(),
            tool_input: json!({"command": "cargo test"}),
            tool_response: Some(json!({"exit_code": 101, "stderr": "boom"})),
        };
        let obs = compress(&event);
        assert_eq!(obs.priority, Priority::High);
        assert_eq!(obs.outcome, "exit:101");
    }

    #[test]
    fn compaction_prefers_high_priority() {
        let tmp = TempDir::new().unwrap();
        let queue = tmp.path().join(".capture_queue.jsonl");
        let mut lines = String::new();
        for i in 0..400 {
            lines.push_str(&format!(
                "{{\"tool\":\"Read\",\"ts\":{i},\"session_id\":\"main\",\"priority\":\"low\",\"outcome\":\"ok\"}}\n"
            ));
        }
        for i in 0..200 {
            lines.push_str(&format!(
                "{{\"tool\":\"Bash\",\"ts\":{i},\"session_id\":\"main\",\"priority\":\"high\",\"outcome\":\"exit:1\"}}\n"
            ));
        }
        std::fs::write(&queue, lines).unwrap();

        cap_queue(&queue);
        let raw = std::fs::read_to_string(&queue).unwrap();
        let kept: Vec<&str> = raw.lines().collect();
        assert!(kept.len() <= COMPACT_TARGET);
        let high_kept = kept.iter().filter(|l| l.contains("\"high\"")).count();
        assert_eq!(high_kept, HIGH_KEEP);
    }

    #[test]
    fn untracked_tools_are_not_captured() {
        let tmp = TempDir::new().unwrap();
        let queue = tmp.path().join(".capture_queue.jsonl");
        let state = SessionState::new("main");
        let event = HookEvent {
            tool_name: "TodoWrite".into(),
            ..read_event("/x")
        };
        capture(&queue, &event, &state);
        assert!(!queue.exists());
    }
}
