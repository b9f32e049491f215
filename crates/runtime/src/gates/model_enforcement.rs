//! Gate 9 (quality): sub-agent spawns may only name approved models.

use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier};

pub const NAME: &str = "GATE 9: MODEL ENFORCEMENT";

pub struct ModelEnforcement;

impl Gate for ModelEnforcement {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tier(&self) -> GateTier {
        GateTier::Quality
    }

    fn check(&self, ctx: &GateContext, _state: &mut SessionState) -> GateResult {
        if !ctx.event.is_pre_tool() || ctx.event.tool_name != "Task" {
            return GateResult::pass(NAME);
        }
        // Empty allow-list disables the check.
        if ctx.config.allowed_task_models.is_empty() {
            return GateResult::pass(NAME);
        }
        let Some(model) = ctx.event.tool_input.get("model").and_then(|v| v.as_str()) else {
            return GateResult::pass(NAME);
        };

        if ctx
            .config
            .allowed_task_models
            .iter()
            .any(|allowed| allowed == model)
        {
            return GateResult::pass(NAME);
        }

        GateResult::block(
            NAME,
            format!(
                "[{NAME}] BLOCKED: Model '{model}' is not on the allowed list ({}). Use \
                 one of the approved models or drop the model override.",
                ctx.config.allowed_task_models.join(", ")
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WardenConfig, WardenPaths};
    use crate::state::live::LiveState;
    use crate::types::HookEvent;
    use serde_json::json;

    fn run(input: serde_json::Value, config: &WardenConfig) -> GateResult {
        let paths = WardenPaths::at("/tmp/warden-test");
        let live = LiveState::default();
        let event = HookEvent {
            session_id: "main".into(),
            hook_event_name: "PreToolUse".into(),
            tool_name: "Task".into(),
            tool_input: input,
            tool_response: None,
        };
        let ctx = GateContext::new(&event, config, &paths, &live);
        ModelEnforcement.check(&ctx, &mut SessionState::new("main"))
    }

    #[test]
    fn empty_allow_list_passes_everything() {
        let config = WardenConfig::default();
        assert!(!run(json!({"model": "anything"}), &config).blocked);
    }

    #[test]
    fn disallowed_model_is_blocked() {
        let config = WardenConfig {
            allowed_task_models: vec!["sonnet".into(), "haiku".into()],
            ..Default::default()
        };
        let result = run(json!({"model": "opus"}), &config);
        assert!(result.blocked);
        assert!(result.message.contains("opus"));
        assert!(!run(json!({"model": "haiku"}), &config).blocked);
    }

    #[test]
    fn missing_model_field_passes() {
        let config = WardenConfig {
            allowed_task_models: vec!["sonnet".into()],
            ..Default::default()
        };
        assert!(!run(json!({"subagent_type": "builder"}), &config).blocked);
    }
}
