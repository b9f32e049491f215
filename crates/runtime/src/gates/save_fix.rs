//! Gate 6 (quality): a proven fix must be recorded before moving on.
//!
//! The tracker sets `unsaved_fix` when a test passes while `fixing_error`
//! was active, and clears it when the outcome is written to memory.
//! Until then, edits to files other than the one just fixed are denied so
//! the fix knowledge doesn't evaporate with the session.

use crate::gates::exemptions::is_exempt_standard;
use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier};

pub const NAME: &str = "GATE 6: SAVE FIX";

/// How long an unsaved fix may linger before the gate stops nagging; after
/// this it is assumed abandoned and dropped.
const UNSAVED_FIX_TTL_SECS: f64 = 3600.0;

pub struct SaveFix;

impl Gate for SaveFix {
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
        let Some(unsaved) = state.unsaved_fix.clone() else {
            return GateResult::pass(NAME);
        };

        if ctx.now - unsaved.verified_at > UNSAVED_FIX_TTL_SECS {
            state.unsaved_fix = None;
            return GateResult::pass(NAME);
        }

        // A memory write after the fix was proven counts as recorded.
        if state.memory_last_queried > unsaved.verified_at {
            state.unsaved_fix = None;
            return GateResult::pass(NAME);
        }

        let file_path = ctx.event.file_path().unwrap_or("");
        if is_exempt_standard(file_path, &ctx.paths.skills_dir()) {
            return GateResult::pass(NAME);
        }

        // Touching the file that was part of the fix is still iteration.
        if state.pending_verification.iter().any(|p| p == file_path) {
            return GateResult::pass(NAME);
        }

        GateResult::block(
            NAME,
            format!(
                "[{NAME}] BLOCKED: A fix for '{}' passed its test but was never recorded. \
                 Call remember_this() with what worked before starting new work.",
                unsaved.pattern
            ),
        )
    }
}
