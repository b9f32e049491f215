//! End-to-end pipeline scenarios, driven through the same inline entry
//! point the pre-tool hook uses.

use serde_json::{json, Value};
use tempfile::TempDir;

use warden_runtime::state::live::LiveState;
use warden_runtime::tracker::{self, TrackerDeps};
use warden_runtime::types::unix_now;
use warden_runtime::{hooks, GateContext, HookEvent, SessionState, StateStore, WardenConfig, WardenPaths};

fn pre_tool_raw(session: &str, tool: &str, input: Value) -> String {
    json!({
        "session_id": session,
        "hook_event_name": "PreToolUse",
        "tool_name": tool,
        "tool_input": input,
    })
    .to_string()
}

async fn decide(raw: &str, paths: &WardenPaths, config: &WardenConfig) -> (Option<Value>, String) {
    let (code, stdout, stderr) = hooks::pre_tool_inline(raw, paths, config).await;
    assert_eq!(code, 0, "hooks always exit 0");
    let decision = if stdout.trim().is_empty() {
        None
    } else {
        Some(serde_json::from_str(stdout.trim()).unwrap())
    };
    (decision, stderr)
}

fn deny_reason(decision: &Value) -> String {
    assert_eq!(decision["hookSpecificOutput"]["permissionDecision"], "deny");
    decision["hookSpecificOutput"]["reason"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn unread_edit_is_denied_by_the_first_gate() {
    let tmp = TempDir::new().unwrap();
    let paths = WardenPaths::at(tmp.path());
    paths.ensure_dirs().unwrap();
    let config = WardenConfig::default();

    let target = tmp.path().join("foo.py");
    std::fs::write(&target, "x = 1").unwrap();

    let raw = pre_tool_raw(
        "main",
        "Edit",
        json!({"file_path": target.to_str().unwrap(), "new_string": "x = 2"}),
    );
    let (decision, _) = decide(&raw, &paths, &config).await;
    let reason = deny_reason(&decision.unwrap());
    assert!(reason.starts_with("[GATE 1: READ BEFORE EDIT] BLOCKED"));
}

#[tokio::test]
async fn related_read_substitutes_for_the_target() {
    let tmp = TempDir::new().unwrap();
    let paths = WardenPaths::at(tmp.path());
    paths.ensure_dirs().unwrap();
    let config = WardenConfig::default();
    let store = StateStore::new(paths.clone());

    let source = tmp.path().join("foo.py");
    let test_file = tmp.path().join("test_foo.py");
    std::fs::write(&source, "x = 1").unwrap();
    std::fs::write(&test_file, "assert True").unwrap();

    store
        .update("main", |state| {
            state.files_read.push(source.to_str().unwrap().to_string());
            state.memory_last_queried = unix_now();
            state.session_test_baseline = true;
        })
        .unwrap();

    // Editing the test file after reading the source: the stem-normalised
    // match carries it through the read gate (test files are exempt from
    // the rest).
    let raw = pre_tool_raw(
        "main",
        "Edit",
        json!({"file_path": test_file.to_str().unwrap(), "new_string": "assert 1"}),
    );
    let (decision, _) = decide(&raw, &paths, &config).await;
    assert!(decision.is_none(), "expected allow, got {decision:?}");
}

#[tokio::test]
async fn deploy_without_tests_is_denied_with_category() {
    let tmp = TempDir::new().unwrap();
    let paths = WardenPaths::at(tmp.path());
    paths.ensure_dirs().unwrap();
    let config = WardenConfig::default();

    let raw = pre_tool_raw("main", "Bash", json!({"command": "git push origin main"}));
    let (decision, _) = decide(&raw, &paths, &config).await;
    let reason = deny_reason(&decision.unwrap());
    assert!(reason.contains("git production"));
}

#[tokio::test]
async fn runaway_call_rate_is_denied() {
    let tmp = TempDir::new().unwrap();
    let paths = WardenPaths::at(tmp.path());
    paths.ensure_dirs().unwrap();
    let config = WardenConfig::default();
    let store = StateStore::new(paths.clone());

    let now = unix_now();
    store
        .update("main", |state| {
            state.rate_window_timestamps = (0..61).map(|i| now - (i as f64 * 0.4)).collect();
        })
        .unwrap();

    let raw = pre_tool_raw("main", "Glob", json!({"pattern": "**/*.rs"}));
    let (decision, _) = decide(&raw, &paths, &config).await;
    let reason = deny_reason(&decision.unwrap());
    assert!(reason.contains("calls/min"));
}

#[tokio::test]
async fn repeated_observation_grows_queue_by_one() {
    let tmp = TempDir::new().unwrap();
    let paths = WardenPaths::at(tmp.path());
    paths.ensure_dirs().unwrap();
    let config = WardenConfig::default();
    let live = LiveState::default();
    let mut state = SessionState::new("main");
    let deps = TrackerDeps {
        config: &config,
        paths: &paths,
        live: &live,
        client: None,
    };

    let event: HookEvent = serde_json::from_value(json!({
        "session_id": "main",
        "hook_event_name": "PostToolUse",
        "tool_name": "Read",
        "tool_input": {"file_path": "/x/foo.py"},
        "tool_response": {"ok": true},
    }))
    .unwrap();

    tracker::handle_post_tool(&event, &mut state, &deps).await;
    tracker::handle_post_tool(&event, &mut state, &deps).await;

    let raw = std::fs::read_to_string(paths.capture_queue()).unwrap();
    assert_eq!(raw.lines().count(), 1);
}

#[tokio::test]
async fn gateway_down_is_fail_open_for_allowed_calls() {
    let tmp = TempDir::new().unwrap();
    let paths = WardenPaths::at(tmp.path());
    paths.ensure_dirs().unwrap();
    let config = WardenConfig::default();
    let store = StateStore::new(paths.clone());

    let target = tmp.path().join("app.py");
    std::fs::write(&target, "x = 1").unwrap();
    store
        .update("main", |state| {
            state.files_read.push(target.to_str().unwrap().to_string());
            state.memory_last_queried = unix_now();
            state.session_test_baseline = true;
        })
        .unwrap();
    let mentor_before = store.load("main").mentor_historical_context.clone();

    // No gateway socket exists anywhere under this runtime dir.
    assert!(!paths.gateway_socket().exists());

    let raw = pre_tool_raw(
        "main",
        "Edit",
        json!({"file_path": target.to_str().unwrap(), "new_string": "x = 2"}),
    );
    let (decision, _) = decide(&raw, &paths, &config).await;
    assert!(decision.is_none(), "expected allow, got {decision:?}");
    assert_eq!(store.load("main").mentor_historical_context, mentor_before);
}

#[tokio::test]
async fn gates_on_disjoint_fields_commute() {
    let tmp = TempDir::new().unwrap();
    let paths = WardenPaths::at(tmp.path());
    paths.ensure_dirs().unwrap();
    let config = WardenConfig::default();
    let live = LiveState::default();

    // The deploy gate reads test-freshness fields; the no-destroy gate
    // reads only the command. Their verdicts must not depend on order,
    // so a command matching neither is allowed regardless of which state
    // fields are populated.
    let event: HookEvent = serde_json::from_value(json!({
        "session_id": "main",
        "hook_event_name": "PreToolUse",
        "tool_name": "Bash",
        "tool_input": {"command": "cargo build"},
    }))
    .unwrap();

    let mut fresh = SessionState::new("main");
    let ctx = GateContext::new(&event, &config, &paths, &live);
    let a = warden_runtime::evaluate_gates(&ctx, &mut fresh);

    let mut seasoned = SessionState::new("main");
    seasoned.last_test_run = unix_now();
    seasoned.last_test_exit_code = Some(0);
    let b = warden_runtime::evaluate_gates(&ctx, &mut seasoned);

    assert!(a.decision.is_none());
    assert!(b.decision.is_none());
}
