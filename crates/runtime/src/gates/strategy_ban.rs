//! Gate 8 (quality): never repeat a strategy the fix history has banned.

use crate::gates::exemptions::is_exempt_standard;
use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier};

pub const NAME: &str = "GATE 8: STRATEGY BAN";

pub struct StrategyBan;

impl Gate for StrategyBan {
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
        if state.current_strategy_id.is_empty() {
            return GateResult::pass(NAME);
        }
        let file_path = ctx.event.file_path().unwrap_or("");
        if is_exempt_standard(file_path, &ctx.paths.skills_dir()) {
            return GateResult::pass(NAME);
        }

        if state
            .banned_strategies
            .iter()
            .any(|banned| banned == &state.current_strategy_id)
        {
            return GateResult::block(
                NAME,
                format!(
                    "[{NAME}] BLOCKED: Strategy '{}' already failed for this error \
                     (recorded in fix history). Pick a different approach and update \
                     current_strategy_id before editing.",
                    state.current_strategy_id
                ),
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
    use crate::types::HookEvent;
    use serde_json::json;

    fn run(state: &mut SessionState) -> GateResult {
        let paths = WardenPaths::at("/tmp/warden-test");
        let config = WardenConfig::default();
        let live = LiveState::default();
        let event = HookEvent {
            session_id: "main".into(),
            hook_event_name: "PreToolUse".into(),
            tool_name: "Edit".into(),
            tool_input: json!({"file_path": "/x/app.rs"}),
            tool_response: None,
        };
        let ctx = GateContext::new(&event, &config, &paths, &live);
        StrategyBan.check(&ctx, state)
    }

    #[test]
    fn banned_strategy_is_denied() {
        let mut state = SessionState::new("main");
        state.current_strategy_id = "bump-timeout".into();
        state.banned_strategies.push("bump-timeout".into());
        let result = run(&mut state);
        assert!(result.blocked);
        assert!(result.message.contains("bump-timeout"));
    }

    #[test]
    fn fresh_strategy_is_allowed() {
        let mut state = SessionState::new("main");
        state.current_strategy_id = "add-retry".into();
        state.banned_strategies.push("bump-timeout".into());
        assert!(!run(&mut state).blocked);
    }

    #[test]
    fn no_active_strategy_passes() {
        let mut state = SessionState::new("main");
        state.banned_strategies.push("bump-timeout".into());
        assert!(!run(&mut state).blocked);
    }
}
