//! Gate 4 (quality): code edits and task spawning require a recent memory
//! query. This is what turns the agent from an amnesiac into a system
//! that checks its own history before changing things.

use std::path::Path;

use crate::gates::exemptions::is_exempt_base;
use crate::gates::{Gate, GateContext};
use crate::state::sideband;
use crate::state::SessionState;
use crate::types::{GateResult, GateTier};

pub const NAME: &str = "GATE 4: MEMORY FIRST";

const GATED_TOOLS: &[&str] = &["Edit", "Write", "NotebookEdit", "Task"];

/// Read-only sub-agent types never edit files.
const READ_ONLY_AGENTS: &[&str] = &["researcher", "Explore"];

pub struct MemoryFirst;

impl Gate for MemoryFirst {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tier(&self) -> GateTier {
        GateTier::Quality
    }

    fn check(&self, ctx: &GateContext, state: &mut SessionState) -> GateResult {
        if !ctx.event.is_pre_tool() || !GATED_TOOLS.contains(&ctx.event.tool_name.as_str()) {
            return GateResult::pass(NAME);
        }

        if ctx.event.tool_name == "Task" {
            let subagent = ctx
                .event
                .tool_input
                .get("subagent_type")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if READ_ONLY_AGENTS.contains(&subagent) {
                return GateResult::pass(NAME);
            }
        }

        let file_path = ctx.event.file_path().unwrap_or("");
        if !file_path.is_empty() && is_exempt_base(file_path, &ctx.paths.skills_dir()) {
            let basename = Path::new(file_path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(file_path)
                .to_string();
            *state.memory_gate_exemptions.entry(basename).or_insert(0) += 1;
            return GateResult::pass(NAME);
        }

        let last_query = sideband::memory_last_queried(state, ctx.paths);

        // New-file Writes are exempt from the staleness window as long as
        // memory was queried at least once this session; research → compose
        // → Write must not loop on staleness.
        if ctx.event.tool_name == "Write"
            && !file_path.is_empty()
            && !Path::new(file_path).exists()
            && last_query > 0.0
        {
            return GateResult::pass(NAME);
        }

        let base_window = if ctx.event.tool_name == "Write" {
            ctx.config.write_freshness.as_secs_f64()
        } else {
            ctx.config.memory_freshness.as_secs_f64()
        };
        let window = state.tune("memory_first", "freshness_window", base_window);
        let elapsed = ctx.now - last_query;
        if elapsed > window {
            let msg = if last_query == 0.0 {
                format!(
                    "[{NAME}] BLOCKED: Query memory before editing. Use search_knowledge() \
                     to check for existing knowledge about what you're changing."
                )
            } else {
                format!(
                    "[{NAME}] BLOCKED: Memory last queried {} min ago. Query memory again \
                     before editing (stale knowledge window).",
                    (elapsed / 60.0) as i64
                )
            };
            return GateResult::block(NAME, msg);
        }

        GateResult::pass(NAME)
    }
}
