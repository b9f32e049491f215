//! Hook entry shells.
//!
//! The host must always see either a valid decision or silence: every
//! entry point here absorbs its own failures and reports exit 0, except
//! where the pre-tool shim propagates a daemon's reported code.

use serde_json::{json, Value};

use crate::audit::{AuditLog, AuditRecord};
use crate::config::{WardenConfig, WardenPaths};
use crate::gates;
use crate::gateway::client::GatewayClient;
use crate::state::breaker::{BreakerPolicy, CircuitBreaker};
use crate::state::live::LiveState;
use crate::state::StateStore;
use crate::tracker::{self, TrackerDeps};
use crate::types::HookEvent;

fn gateway_client(paths: &WardenPaths, config: &WardenConfig) -> GatewayClient {
    GatewayClient::new(paths.gateway_socket(), config.gateway_timeout).with_breaker(
        CircuitBreaker::new(
            &paths.breaker_dir(),
            "memory_gateway",
            BreakerPolicy::default(),
        ),
    )
}

/// Inline pre-tool evaluation: parse, run the pipeline, persist, audit.
/// Returns `(exit_code, stdout, stderr)`; the daemon serves the same
/// function over its socket.
pub async fn pre_tool_inline(
    raw: &str,
    paths: &WardenPaths,
    config: &WardenConfig,
) -> (i32, String, String) {
    let Ok(event) = serde_json::from_str::<HookEvent>(raw) else {
        // Unparseable input: fail open, no decision.
        return (0, String::new(), String::new());
    };

    let live = LiveState::load(&paths.live_state_file());
    let store = StateStore::new(paths.clone());
    let mut stderr = String::new();

    // Lock trouble fails open: the host must never be blocked by us.
    let Ok(mut lock) = store.session_lock(&event.session_id) else {
        return (0, String::new(), stderr);
    };
    let Ok(guard) = lock.exclusive() else {
        return (0, String::new(), stderr);
    };

    // Evaluate under the lock so pipeline mutations and the save form one
    // read → mutate → replace cycle.
    let mut state = store.load(&event.session_id);
    let ctx = gates::GateContext::new(&event, config, paths, &live);
    let outcome = gates::evaluate(&ctx, &mut state);
    if let Err(e) = store.save(&state) {
        stderr.push_str(&format!("[WARDEN] state save failed: {e}\n"));
    }
    drop(guard);

    for warning in &outcome.warnings {
        stderr.push_str(&warning.message);
        stderr.push('\n');
    }

    let audit = AuditLog::new(paths.audit_dir());
    let mut record = AuditRecord::new(&event.session_id, &event.tool_name, outcome.decision_label());
    if outcome.decision.is_some() {
        record.gate_name = Some(outcome.result.gate_name.clone());
        record.message = Some(outcome.result.message.clone());
    }
    record.duration_ms = outcome.result.duration_ms;
    audit.append(&record);

    let stdout = outcome
        .decision
        .as_ref()
        .and_then(|decision| serde_json::to_string(decision).ok())
        .map(|mut s| {
            s.push('\n');
            s
        })
        .unwrap_or_default();

    (0, stdout, stderr)
}

/// Full pre-tool entry: daemon fast path when available, inline
/// otherwise. Returns the process exit code after writing stdout/stderr.
pub async fn pre_tool_entry(raw: &str) -> i32 {
    let paths = WardenPaths::resolve();
    let config = WardenConfig::load(&paths).unwrap_or_default();

    if let Some(reply) = crate::daemon::try_daemon(&paths, config.daemon_timeout, raw).await {
        print!("{}", reply.stdout);
        eprint!("{}", reply.stderr);
        // The only case where a non-zero code escapes: propagating the
        // daemon's reported code.
        return reply.exit_code;
    }

    let (code, stdout, stderr) = pre_tool_inline(raw, &paths, &config).await;
    print!("{stdout}");
    eprint!("{stderr}");
    code
}

/// Post-tool entry: all effects are side effects (state, queue, audit);
/// there is no stdout contract.
pub async fn post_tool_entry(raw: &str) -> i32 {
    let paths = WardenPaths::resolve();
    let config = WardenConfig::load(&paths).unwrap_or_default();

    let Ok(event) = serde_json::from_str::<HookEvent>(raw) else {
        return 0;
    };

    let live = LiveState::load(&paths.live_state_file());
    let store = StateStore::new(paths.clone());
    let client = gateway_client(&paths, &config);

    let Ok(mut lock) = store.session_lock(&event.session_id) else {
        return 0;
    };
    let Ok(_guard) = lock.exclusive() else {
        return 0;
    };
    let mut state = store.load(&event.session_id);

    let deps = TrackerDeps {
        config: &config,
        paths: &paths,
        live: &live,
        client: Some(&client),
    };
    let messages = tracker::handle_post_tool(&event, &mut state, &deps).await;
    for message in messages {
        eprintln!("{message}");
    }

    if let Err(e) = store.save(&state) {
        eprintln!("[WARDEN] state save failed: {e}");
    }
    0
}

const SAFE_TOOLS: &[&str] = &["Read", "Glob", "Grep", "WebFetch", "WebSearch"];

const SAFE_COMMAND_PREFIXES: &[&str] = &[
    "git status",
    "git diff",
    "git log",
    "git branch",
    "git show",
    "git stash list",
    "ls",
    "pwd",
    "cat",
    "head",
    "tail",
    "wc",
    "date",
    "whoami",
    "which",
    "echo",
    "env",
    "pytest",
    "cargo test",
    "cargo check",
    "npm test",
    "go test",
    "find . -name",
    "find . -type",
    "grep -r",
    "grep -rn",
    "ps aux",
    "df -h",
    "du -sh",
    "curl -I",
    "curl --head",
    "file",
    "stat",
];

/// Permission auto-approval, deny-before-allow. Returns the decision
/// document, or `None` to fall through to the user prompt.
pub fn permission_decision(raw: &str) -> Option<Value> {
    let event: HookEvent = serde_json::from_str(raw).ok()?;

    let decision = |behavior: &str, message: Option<&str>| {
        let mut body = json!({ "behavior": behavior });
        if let Some(message) = message {
            body["message"] = json!(message);
        }
        json!({
            "hookSpecificOutput": {
                "hookEventName": "PermissionRequest",
                "decision": body,
            }
        })
    };

    if event.tool_name == "Bash" {
        let command = event.command().unwrap_or("").trim().to_string();

        // Deny patterns come first so a dangerous command can never be
        // auto-approved by a later allow rule.
        if let Some(reason) = gates::match_destructive(&command) {
            return Some(decision("deny", Some(reason)));
        }

        for prefix in SAFE_COMMAND_PREFIXES {
            if command == *prefix || command.starts_with(&format!("{prefix} ")) {
                return Some(decision("allow", None));
            }
        }

        let tokens: Vec<&str> = command.split_whitespace().collect();
        if tokens.len() == 2 && (tokens[1] == "--version" || tokens[1] == "-V") {
            return Some(decision("allow", None));
        }

        return None;
    }

    if SAFE_TOOLS.contains(&event.tool_name.as_str()) {
        return Some(decision("allow", None));
    }

    None
}
