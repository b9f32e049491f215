//! Gate 2 (safety): deny destructive shell commands outright.

use regex::Regex;
use std::sync::OnceLock;

use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier, Severity};

pub const NAME: &str = "GATE 2: NO DESTROY";

struct DenyRule {
    pattern: Regex,
    reason: &'static str,
}

// Shared with the permission auto-approver, which checks these before any
// allow logic.
fn rules() -> &'static Vec<DenyRule> {
    static RULES: OnceLock<Vec<DenyRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let table: [(&str, &str); 14] = [
            (r"\brm\s+-[a-z]*r[a-z]*f|\brm\s+-[a-z]*f[a-z]*r", "recursive force delete"),
            (r"\brm\s+-r\s+/(?:\s|$)", "recursive delete at root"),
            (r"\bgit\s+reset\s+--hard\b", "git reset --hard discards work"),
            (r"\bgit\s+clean\s+-[a-z]*f", "git clean -f deletes untracked files"),
            (r"\bgit\s+push\s+(?:--force\b|-f\b)", "force push rewrites remote history"),
            (r"\bdd\s+if=", "raw disk write"),
            (r"\bmkfs\b", "filesystem format"),
            (r">\s*/dev/sd", "writing to a block device"),
            (r":\(\)\{.*:\|:&\s*\};:", "fork bomb"),
            (r"\bchmod\s+-?R?\s*777\b", "chmod 777"),
            (r"(?i)\bDROP\s+(?:TABLE|DATABASE)\b", "destructive SQL"),
            (r"(?i)\bTRUNCATE\s+TABLE\b", "destructive SQL"),
            (r"\bcurl\b[^\n|]*\|\s*(?:ba)?sh\b", "curl piped to a shell"),
            (r"\bsudo\s+rm\b", "privileged delete"),
        ];
        table
            .iter()
            .map(|(pattern, reason)| DenyRule {
                pattern: Regex::new(pattern).unwrap(),
                reason,
            })
            .collect()
    })
}

/// First destructive rule matching `command`, if any.
pub fn match_destructive(command: &str) -> Option<&'static str> {
    rules()
        .iter()
        .find(|rule| rule.pattern.is_match(command))
        .map(|rule| rule.reason)
}

pub struct NoDestroy;

impl Gate for NoDestroy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tier(&self) -> GateTier {
        GateTier::Safety
    }

    fn check(&self, ctx: &GateContext, _state: &mut SessionState) -> GateResult {
        if !ctx.event.is_pre_tool() || ctx.event.tool_name != "Bash" {
            return GateResult::pass(NAME);
        }
        let Some(command) = ctx.event.command() else {
            return GateResult::pass(NAME);
        };

        match match_destructive(command) {
            Some(reason) => GateResult::block(
                NAME,
                format!(
                    "[{NAME}] BLOCKED: {reason}. If this is really intended, run it \
                     manually outside the agent."
                ),
            )
            .with_severity(Severity::Critical),
            None => GateResult::pass(NAME),
        }
    }
}
