//! Gate 12 (quality): a known test failure means fix history must be
//! consulted before editing code. This feeds the strategy-ban gate with
//! data about what has already been tried.

use crate::gates::exemptions::is_exempt_standard;
use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier, Severity};

pub const NAME: &str = "GATE 12: CAUSAL CHAIN";

pub struct CausalChain;

impl Gate for CausalChain {
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
        let Some(failure) = state.recent_test_failure.clone() else {
            return GateResult::pass(NAME);
        };
        if !state.fixing_error {
            return GateResult::pass(NAME);
        }
        let file_path = ctx.event.file_path().unwrap_or("");
        if is_exempt_standard(file_path, &ctx.paths.skills_dir()) {
            return GateResult::pass(NAME);
        }

        let freshness = state.tune(
            "causal_chain",
            "fix_history_freshness",
            ctx.config.fix_history_freshness.as_secs_f64(),
        );
        let age = if state.fix_history_queried > 0.0 {
            ctx.now - state.fix_history_queried
        } else {
            f64::INFINITY
        };
        if age <= freshness {
            return GateResult::pass(NAME);
        }

        let failure_age = (ctx.now - failure.timestamp) as i64;
        GateResult::block(
            NAME,
            format!(
                "[{NAME}] BLOCKED: Test failure detected ({}, {failure_age}s ago) but \
                 query_fix_history() not called. Call query_fix_history(\"{}\") before \
                 editing code to check what strategies have been tried.",
                failure.pattern, failure.pattern
            ),
        )
        .with_severity(Severity::Error)
    }
}
