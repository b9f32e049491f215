//! Gate 10 (quality): two sessions must not edit the same file at once.
//!
//! Reads the shared claims file; an edit is rejected while another
//! non-`main` session holds a live claim on the target. Solo sessions are
//! exempt. Claims-file trouble is fail-open: the gate warns and lets the
//! edit through.

use crate::gates::{Gate, GateContext};
use crate::state::claims;
use crate::state::SessionState;
use crate::types::{canonical_path, GateResult, GateTier};

pub const NAME: &str = "GATE 10: WORKSPACE ISOLATION";

pub struct WorkspaceIsolation;

impl Gate for WorkspaceIsolation {
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
        // Solo work needs no isolation.
        if state.session_id == "main" {
            return GateResult::pass(NAME);
        }
        let Some(file_path) = ctx.event.file_path() else {
            return GateResult::pass(NAME);
        };
        let target = canonical_path(file_path);

        let all = claims::read_claims(&ctx.paths.claims_file());
        if let Some(claim) = all.get(&target).or_else(|| all.get(file_path)) {
            if claim.session_id != state.session_id {
                let age_minutes = ((ctx.now - claim.claimed_at) / 60.0) as i64;
                return GateResult::block(
                    NAME,
                    format!(
                        "[{NAME}] BLOCKED: File '{file_path}' is currently being edited by \
                         session '{}' (claimed {age_minutes}m ago). Wait for the other agent \
                         to finish or work on a different file.",
                        claim.session_id
                    ),
                );
            }
        }

        // Record our own claim so other sessions see this edit coming.
        if !claims::claim(&ctx.paths.claims_file(), &target, &state.session_id) {
            eprintln!("[{NAME}] WARNING: could not record file claim (lock contention)");
        }
        GateResult::pass(NAME)
    }
}
