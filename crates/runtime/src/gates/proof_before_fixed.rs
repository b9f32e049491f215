//! Gate 5 (quality): edits must be proven before moving on.
//!
//! Tracks `pending_verification` and `edit_streak`. Same-file iteration is
//! allowed up to a streak limit; accumulating unverified edits across
//! files blocks, with partially-verified files counting half.

use std::path::Path;

use crate::gates::exemptions::{is_exempt_base, is_test_file};
use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier};

pub const NAME: &str = "GATE 5: PROOF BEFORE FIXED";

const WARN_STREAK: u32 = 3;
const BLOCK_STREAK: u32 = 5;
const BLOCK_THRESHOLD: f64 = 3.0;

fn file_basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

pub struct ProofBeforeFixed;

impl Gate for ProofBeforeFixed {
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
        let Some(file_path) = ctx.event.file_path() else {
            return GateResult::pass(NAME);
        };
        if is_exempt_base(file_path, &ctx.paths.skills_dir()) {
            return GateResult::pass(NAME);
        }
        // Editing tests is itself verification work.
        if is_test_file(file_path) {
            return GateResult::pass(NAME);
        }

        let streak = state.edit_streak.get(file_path).copied().unwrap_or(0);
        if streak >= BLOCK_STREAK {
            return GateResult::block(
                NAME,
                format!(
                    "[{NAME}] BLOCKED: {} edited {} times without verification. Run any \
                     Bash command (test, script, or check) to reset and continue.",
                    file_basename(file_path),
                    streak + 1
                ),
            );
        }
        if streak >= WARN_STREAK {
            eprintln!(
                "[{NAME}] WARNING: {} edited {} times without verification. Run any Bash \
                 command (test, lint, script) to verify and reset the counter.",
                file_basename(file_path),
                streak + 1
            );
        }

        // Iterating on the same pending file is fine; only other files'
        // unverified edits count, partial scores at half weight.
        let pending_other: Vec<&String> = state
            .pending_verification
            .iter()
            .filter(|p| p.as_str() != file_path)
            .collect();
        let effective_unverified: f64 = pending_other
            .iter()
            .map(|p| {
                if state.verification_scores.get(*p).copied().unwrap_or(0.0) > 0.0 {
                    0.5
                } else {
                    1.0
                }
            })
            .sum();

        let block_at = state.tune("proof_before_fixed", "block_threshold", BLOCK_THRESHOLD);
        if effective_unverified >= block_at {
            let file_list = pending_other
                .iter()
                .take(5)
                .map(|p| file_basename(p))
                .collect::<Vec<_>>()
                .join(", ");
            return GateResult::block(
                NAME,
                format!(
                    "[{NAME}] BLOCKED: {} files with unverified edits ({file_list}). Run any \
                     Bash command (tests, a script, a check) to verify and clear pending files.",
                    pending_other.len()
                ),
            );
        }

        GateResult::pass(NAME)
    }
}
