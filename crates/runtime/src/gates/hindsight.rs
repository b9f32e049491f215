//! Gate 16 (advisory): reads mentor signals written by the post-tool
//! tracker and blocks only on sustained poor quality.
//!
//! Stays out of other gates' territory: never reads
//! `pending_verification`/`edit_streak` (proof gate) and defers to the
//! causal-chain gate whenever `fixing_error` is set. Off unless the
//! hindsight toggle (or `mentor_all`) is enabled.

use crate::gates::exemptions::is_exempt_standard;
use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier, Severity};

pub const NAME: &str = "GATE 16: HINDSIGHT";

const SCORE_BLOCK_THRESHOLD: f64 = 0.3;
const ESCALATION_BLOCK_THRESHOLD: u32 = 2;
const CHAIN_SCORE_WARN_THRESHOLD: f64 = 0.3;

pub struct Hindsight;

impl Gate for Hindsight {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tier(&self) -> GateTier {
        GateTier::Advisory
    }

    fn check(&self, ctx: &GateContext, state: &mut SessionState) -> GateResult {
        if !ctx.event.is_pre_tool() || !ctx.event.is_mutation_tool() {
            return GateResult::pass(NAME);
        }
        if !ctx.live.hindsight_enabled() {
            return GateResult::pass(NAME);
        }
        if state.fixing_error {
            return GateResult::pass(NAME);
        }
        let file_path = ctx.event.file_path().unwrap_or("");
        if is_exempt_standard(file_path, &ctx.paths.skills_dir()) {
            return GateResult::pass(NAME);
        }

        if state.mentor_last_score < SCORE_BLOCK_THRESHOLD
            && state.mentor_escalation_count >= ESCALATION_BLOCK_THRESHOLD
        {
            return GateResult::block(
                NAME,
                format!(
                    "[{NAME}] BLOCKED: Mentor score critically low ({:.2}) with {} \
                     consecutive escalations. Last verdict: {}. Run tests, verify your \
                     approach, or check memory for prior solutions.",
                    state.mentor_last_score,
                    state.mentor_escalation_count,
                    state.mentor_last_verdict
                ),
            )
            .with_severity(Severity::Error);
        }

        if state.mentor_chain_score < CHAIN_SCORE_WARN_THRESHOLD && !state.mentor_warned_this_cycle
        {
            let pattern = if state.mentor_chain_pattern.is_empty() {
                "unknown"
            } else {
                state.mentor_chain_pattern.as_str()
            };
            state.mentor_warned_this_cycle = true;
            return GateResult::warn(
                NAME,
                format!(
                    "[{NAME}] WARNING: Outcome chain score low ({:.2}, pattern: {pattern}). \
                     Consider changing approach.",
                    state.mentor_chain_score
                ),
            );
        }

        if state.mentor_memory_match.is_some()
            && !state.mentor_historical_context.is_empty()
            && !state.mentor_warned_this_cycle
        {
            state.mentor_warned_this_cycle = true;
            return GateResult::warn(
                NAME,
                format!("[{NAME}] INFO: {}", state.mentor_historical_context),
            );
        }

        GateResult::pass(NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WardenConfig, WardenPaths};
    use crate::state::live::LiveState;
    use crate::types::{Escalation, HookEvent};
    use serde_json::json;

    fn run(state: &mut SessionState, live: &LiveState) -> GateResult {
        let paths = WardenPaths::at("/tmp/warden-test");
        let config = WardenConfig::default();
        let event = HookEvent {
            session_id: "main".into(),
            hook_event_name: "PreToolUse".into(),
            tool_name: "Edit".into(),
            tool_input: json!({"file_path": "/x/app.rs"}),
            tool_response: None,
        };
        let ctx = GateContext::new(&event, &config, &paths, live);
        Hindsight.check(&ctx, state)
    }

    fn enabled() -> LiveState {
        LiveState {
            mentor_hindsight_gate: true,
            ..Default::default()
        }
    }

    #[test]
    fn disabled_toggle_means_pass() {
        let mut state = SessionState::new("main");
        state.mentor_last_score = 0.0;
        state.mentor_escalation_count = 5;
        assert!(!run(&mut state, &LiveState::default()).blocked);
    }

    #[test]
    fn sustained_low_score_blocks() {
        let mut state = SessionState::new("main");
        state.mentor_last_score = 0.2;
        state.mentor_escalation_count = 2;
        state.mentor_last_verdict = "escalate".into();
        let result = run(&mut state, &enabled());
        assert!(result.blocked);
        assert!(result.message.contains("escalate"));
    }

    #[test]
    fn low_score_without_escalations_does_not_block() {
        let mut state = SessionState::new("main");
        state.mentor_last_score = 0.2;
        state.mentor_escalation_count = 1;
        assert!(!run(&mut state, &enabled()).blocked);
    }

    #[test]
    fn low_chain_score_warns_once_per_cycle() {
        let mut state = SessionState::new("main");
        state.mentor_chain_score = 0.2;
        state.mentor_chain_pattern = "churn".into();
        let first = run(&mut state, &enabled());
        assert_eq!(first.escalation, Escalation::Warn);
        assert!(first.message.contains("churn"));
        let second = run(&mut state, &enabled());
        assert_eq!(second.escalation, Escalation::Allow);
    }

    #[test]
    fn fixing_error_defers_to_causal_chain_gate() {
        let mut state = SessionState::new("main");
        state.mentor_last_score = 0.0;
        state.mentor_escalation_count = 9;
        state.fixing_error = true;
        assert!(!run(&mut state, &enabled()).blocked);
    }
}
