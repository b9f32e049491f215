//! Gate 15 (safety): tripwire tokens.
//!
//! The runtime plants a canary token that no legitimate workflow ever
//! touches. Any tool input referencing the token prefix or the canary
//! file is treated as exfiltration and denied unconditionally.

use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier, Severity};

pub const NAME: &str = "GATE 15: CANARY";

pub const CANARY_TOKEN_PREFIX: &str = "WRDN-CANARY-";
pub const CANARY_BASENAME: &str = ".warden_canary";

fn trips(text: &str) -> bool {
    text.contains(CANARY_TOKEN_PREFIX) || text.contains(CANARY_BASENAME)
}

pub struct Canary;

impl Gate for Canary {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tier(&self) -> GateTier {
        GateTier::Safety
    }

    fn check(&self, ctx: &GateContext, _state: &mut SessionState) -> GateResult {
        if !ctx.event.is_pre_tool() {
            return GateResult::pass(NAME);
        }
        let raw = serde_json::to_string(&ctx.event.tool_input).unwrap_or_default();
        if trips(&raw) {
            return GateResult::block(
                NAME,
                format!(
                    "[{NAME}] BLOCKED: Input references the canary tripwire. No workflow \
                     legitimately touches it; this call is treated as exfiltration."
                ),
            )
            .with_severity(Severity::Critical);
        }
        GateResult::pass(NAME)
    }
}
