//! Gate 11 (quality): progressive confidence check before new work.
//!
//! Two signals: no test run this session, and unverified edits while not
//! actively fixing an error. Each signal warns once per session; the
//! third attempt on the same target file blocks. Re-edits of files
//! already pending verification are iteration and pass.

use std::path::Path;

use crate::gates::exemptions::is_exempt_full;
use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier};

pub const NAME: &str = "GATE 11: CONFIDENCE CHECK";

const MAX_WARNINGS: u32 = 2;

fn failed_signals(state: &SessionState) -> Vec<String> {
    let mut failures = Vec::new();
    if !state.session_test_baseline {
        failures.push("no test run this session".to_string());
    }
    // Unverified edits are expected while fixing a known failure; the
    // proof gate still bounds how many can accumulate.
    if !state.pending_verification.is_empty() && !state.fixing_error {
        failures.push(format!(
            "{} file(s) with unverified edits",
            state.pending_verification.len()
        ));
    }
    failures
}

pub struct ConfidenceCheck;

impl Gate for ConfidenceCheck {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tier(&self) -> GateTier {
        GateTier::Quality
    }

    fn check(&self, ctx: &GateContext, state: &mut SessionState) -> GateResult {
        if !ctx.event.is_pre_tool() || !ctx.event.is_mutation_tool() {
            return GateResult::pass(NAME);
        }
        let file_path = ctx.event.file_path().unwrap_or("").to_string();
        if is_exempt_full(&file_path, &ctx.paths.skills_dir()) {
            return GateResult::pass(NAME);
        }
        if state.pending_verification.iter().any(|p| p == &file_path) {
            return GateResult::pass(NAME);
        }

        let failures = failed_signals(state);
        if failures.is_empty() {
            state.confidence_warnings_per_file.remove(&file_path);
            return GateResult::pass(NAME);
        }

        let count = state
            .confidence_warnings_per_file
            .entry(file_path.clone())
            .or_insert(0);
        *count += 1;
        let attempts = *count;
        let failure_str = failures.join("; ");

        if attempts > MAX_WARNINGS {
            let basename = Path::new(&file_path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&file_path);
            return GateResult::block(
                NAME,
                format!(
                    "[{NAME}] BLOCKED: Low confidence ({failure_str}). Run a Bash command \
                     (e.g. cargo test) to set a test baseline and clear pending \
                     verification. ({attempts} attempts on {basename} — exceeded \
                     {MAX_WARNINGS} warning limit)"
                ),
            );
        }

        // Warn once per signal per session; repeats pass silently.
        let new_failures: Vec<_> = failures
            .iter()
            .filter(|f| !state.confidence_warned_signals.contains(*f))
            .cloned()
            .collect();
        if new_failures.is_empty() {
            return GateResult::pass(NAME);
        }
        for failure in &failures {
            if !state.confidence_warned_signals.contains(failure) {
                state.confidence_warned_signals.push(failure.clone());
            }
        }
        GateResult::warn(
            NAME,
            format!(
                "[{NAME}] WARNING ({attempts}/{MAX_WARNINGS}): Low confidence \
                 ({failure_str}). Consider running tests or verifying pending edits first."
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WardenConfig, WardenPaths};
    use crate::state::live::LiveState;
    use crate::types::{Escalation, HookEvent};
    use serde_json::json;

    fn run(path: &str, state: &mut SessionState) -> GateResult {
        let paths = WardenPaths::at("/tmp/warden-test");
        let config = WardenConfig::default();
        let live = LiveState::default();
        let event = HookEvent {
            session_id: "main".into(),
            hook_event_name: "PreToolUse".into(),
            tool_name: "Edit".into(),
            tool_input: json!({"file_path": path}),
            tool_response: None,
        };
        let ctx = GateContext::new(&event, &config, &paths, &live);
        ConfidenceCheck.check(&ctx, state)
    }

    #[test]
    fn warns_then_blocks_on_third_attempt() {
        let mut state = SessionState::new("main");
        let first = run("/x/new.rs", &mut state);
        assert_eq!(first.escalation, Escalation::Warn);
        let second = run("/x/new.rs", &mut state);
        assert!(!second.blocked);
        let third = run("/x/new.rs", &mut state);
        assert!(third.blocked);
        assert!(third.message.contains("3 attempts"));
    }

    #[test]
    fn baseline_plus_clean_pending_passes() {
        let mut state = SessionState::new("main");
        state.session_test_baseline = true;
        assert!(!run("/x/new.rs", &mut state).blocked);
        assert!(state.confidence_warnings_per_file.is_empty());
    }

    #[test]
    fn pending_files_are_iteration_not_new_work() {
        let mut state = SessionState::new("main");
        state.pending_verification.push("/x/wip.rs".into());
        assert_eq!(run("/x/wip.rs", &mut state).escalation, Escalation::Allow);
    }

    #[test]
    fn fixing_error_suppresses_pending_signal() {
        let mut state = SessionState::new("main");
        state.session_test_baseline = true;
        state.fixing_error = true;
        state.pending_verification.push("/x/wip.rs".into());
        assert!(!run("/x/other.rs", &mut state).blocked);
    }

    #[test]
    fn repeated_signals_warn_only_once() {
        let mut state = SessionState::new("main");
        assert_eq!(run("/x/a.rs", &mut state).escalation, Escalation::Warn);
        // Different file, same signal set: silent pass (still counted).
        assert_eq!(run("/x/b.rs", &mut state).escalation, Escalation::Allow);
    }
}
