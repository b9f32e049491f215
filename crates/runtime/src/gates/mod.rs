//! The pre-tool gate pipeline.
//!
//! Gates are evaluated in a fixed registered order against the session
//! state; the first `block` or `ask` result terminates the pipeline.
//! Warnings are collected and emitted but never short-circuit. The rate
//! limiter runs last so earlier blocks don't inflate its window.
//!
//! Crash containment is tiered: a panicking safety gate fails closed
//! (deny), a panicking quality or advisory gate is logged and treated as
//! allow.

pub mod exemptions;

mod canary;
mod causal_chain;
mod code_quality;
mod confidence;
mod critical_file;
mod hindsight;
mod injection_defense;
mod memory_first;
mod model_enforcement;
mod no_destroy;
mod proof_before_fixed;
mod rate_limit;
mod read_before_edit;
mod save_fix;
mod strategy_ban;
mod test_before_deploy;
mod workspace_isolation;

pub use no_destroy::match_destructive;

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use crate::config::{WardenConfig, WardenPaths};
use crate::state::live::LiveState;
use crate::state::SessionState;
use crate::types::{unix_now, Escalation, GateResult, GateTier, HookDecision, HookEvent, Severity};

/// Everything a gate may look at besides the mutable session state.
pub struct GateContext<'a> {
    pub event: &'a HookEvent,
    pub config: &'a WardenConfig,
    pub paths: &'a WardenPaths,
    pub live: &'a LiveState,
    pub now: f64,
}

impl<'a> GateContext<'a> {
    pub fn new(
        event: &'a HookEvent,
        config: &'a WardenConfig,
        paths: &'a WardenPaths,
        live: &'a LiveState,
    ) -> Self {
        Self {
            event,
            config,
            paths,
            live,
            now: unix_now(),
        }
    }
}

/// A single policy module.
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;
    fn tier(&self) -> GateTier;
    fn check(&self, ctx: &GateContext, state: &mut SessionState) -> GateResult;
}

/// The registered order is the single source of truth. Safety first, then
/// quality, rate limit last.
pub fn registry() -> Vec<Box<dyn Gate>> {
    vec![
        Box::new(read_before_edit::ReadBeforeEdit),
        Box::new(no_destroy::NoDestroy),
        Box::new(test_before_deploy::TestBeforeDeploy),
        Box::new(memory_first::MemoryFirst),
        Box::new(proof_before_fixed::ProofBeforeFixed),
        Box::new(save_fix::SaveFix),
        Box::new(critical_file::CriticalFileGuard),
        Box::new(strategy_ban::StrategyBan),
        Box::new(model_enforcement::ModelEnforcement),
        Box::new(workspace_isolation::WorkspaceIsolation),
        Box::new(confidence::ConfidenceCheck),
        Box::new(causal_chain::CausalChain),
        Box::new(code_quality::CodeQuality),
        Box::new(injection_defense::InjectionDefense),
        Box::new(canary::Canary),
        Box::new(hindsight::Hindsight),
        Box::new(rate_limit::RateLimit),
    ]
}

/// Folded outcome of one pipeline run.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// The host-facing decision, when a gate blocked or asked.
    pub decision: Option<HookDecision>,
    /// The terminating result (or a synthetic allow when nothing fired).
    pub result: GateResult,
    /// Advisory warnings collected along the way, in gate order.
    pub warnings: Vec<GateResult>,
}

impl PipelineOutcome {
    pub fn decision_label(&self) -> &'static str {
        match self.result.escalation {
            Escalation::Block => "deny",
            Escalation::Ask => "ask",
            _ => "allow",
        }
    }
}

/// Evaluate every registered gate in order against `state`.
///
/// State mutations made by gates (rate window appends, warning counters)
/// stay in `state`; persisting them once at the end of the hook is the
/// caller's job.
pub fn evaluate(ctx: &GateContext, state: &mut SessionState) -> PipelineOutcome {
    let mut warnings = Vec::new();

    for gate in registry() {
        let started = Instant::now();
        let checked = std::panic::catch_unwind(AssertUnwindSafe(|| gate.check(ctx, state)));
        let mut result = match checked {
            Ok(result) => result,
            Err(_) if gate.tier() == GateTier::Safety => GateResult::block(
                gate.name(),
                format!("[{}] BLOCKED: gate crashed; failing closed.", gate.name()),
            )
            .with_severity(Severity::Critical),
            Err(_) => {
                tracing::warn!(gate = gate.name(), "gate crashed; treating as allow");
                GateResult::pass(gate.name())
            }
        };
        result.duration_ms = Some(started.elapsed().as_secs_f64() * 1000.0);

        match result.escalation {
            Escalation::Block | Escalation::Ask => {
                let decision = result.to_hook_decision();
                return PipelineOutcome {
                    decision,
                    result,
                    warnings,
                };
            }
            Escalation::Warn => warnings.push(result),
            Escalation::Allow => {}
        }
    }

    PipelineOutcome {
        decision: None,
        result: GateResult::pass("pipeline"),
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HookEvent;
    use serde_json::json;
    use tempfile::TempDir;

    fn pre_tool_event(tool: &str, input: serde_json::Value) -> HookEvent {
        HookEvent {
            session_id: "main".into(),
            hook_event_name: "PreToolUse".into(),
            tool_name: tool.into(),
            tool_input: input,
            tool_response: None,
        }
    }

    #[test]
    fn registry_order_is_fixed() {
        let names: Vec<_> = registry().iter().map(|g| g.name()).collect();
        assert_eq!(names.first().copied(), Some("GATE 1: READ BEFORE EDIT"));
        assert_eq!(names.last().copied(), Some("GATE 17: RATE LIMIT"));
        assert_eq!(names.len(), 17);
    }

    #[test]
    fn benign_read_is_allowed() {
        let tmp = TempDir::new().unwrap();
        let paths = crate::config::WardenPaths::at(tmp.path());
        let config = WardenConfig::default();
        let live = LiveState::default();
        let event = pre_tool_event("Read", json!({"file_path": "/x/foo.rs"}));
        let ctx = GateContext::new(&event, &config, &paths, &live);
        let mut state = SessionState::new("main");

        let outcome = evaluate(&ctx, &mut state);
        assert!(outcome.decision.is_none());
        assert_eq!(outcome.decision_label(), "allow");
    }

    #[test]
    fn first_block_terminates_pipeline() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("foo.rs");
        std::fs::write(&source, "fn main() {}").unwrap();

        let paths = crate::config::WardenPaths::at(tmp.path());
        let config = WardenConfig::default();
        let live = LiveState::default();
        let event = pre_tool_event(
            "Edit",
            json!({"file_path": source.to_str().unwrap(), "new_string": "x"}),
        );
        let ctx = GateContext::new(&event, &config, &paths, &live);
        let mut state = SessionState::new("main");

        let outcome = evaluate(&ctx, &mut state);
        assert_eq!(outcome.decision_label(), "deny");
        assert_eq!(outcome.result.gate_name, "GATE 1: READ BEFORE EDIT");
        // Rate limit never ran, so the window stays empty.
        assert!(state.rate_window_timestamps.is_empty());
    }
}
