//! Gate 13 (quality): scan content being written for secrets, debug
//! artifacts and convention violations.
//!
//! Progressive: escalating violations warn three times per file, the
//! fourth blocks. A clean edit resets the file's counter. The TODO
//! pattern warns but never escalates.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::gates::exemptions::is_exempt_full;
use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier};

pub const NAME: &str = "GATE 13: CODE QUALITY";

const MAX_WARNINGS: u32 = 3;

const CODE_EXTENSIONS: &[&str] = &["py", "js", "ts", "tsx", "jsx", "go", "rs", "java", "rb", "sh"];

struct QualityPattern {
    name: &'static str,
    regex: Regex,
    escalates: bool,
}

fn quality_patterns() -> &'static Vec<QualityPattern> {
    static PATTERNS: OnceLock<Vec<QualityPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            QualityPattern {
                name: "secret-in-code",
                regex: Regex::new(
                    r#"(?i)(api_key|api_secret|password|secret_key|access_token|private_key)\s*=\s*["'][^"']{8,}["']"#,
                )
                .unwrap(),
                escalates: true,
            },
            QualityPattern {
                name: "debug-print",
                regex: Regex::new(
                    r"(?m)^\s*(print\(|console\.log\(|debugger;|dbg!\(|import pdb|breakpoint\(\))",
                )
                .unwrap(),
                escalates: true,
            },
            QualityPattern {
                name: "broad-except",
                regex: Regex::new(r"except\s*:|except\s+Exception\s*:").unwrap(),
                escalates: true,
            },
            QualityPattern {
                name: "todo-fixme",
                regex: Regex::new(r"(?i)\b(TODO|FIXME|HACK|XXX)\b").unwrap(),
                escalates: false,
            },
        ]
    })
}

/// One match per pattern is enough; returns `(name, line, escalates)`.
fn scan_content(content: &str) -> Vec<(&'static str, usize, bool)> {
    let mut violations = Vec::new();
    for pattern in quality_patterns() {
        for (i, line) in content.lines().enumerate() {
            if pattern.regex.is_match(line) {
                violations.push((pattern.name, i + 1, pattern.escalates));
                break;
            }
        }
    }
    violations
}

pub struct CodeQuality;

impl Gate for CodeQuality {
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
        let file_path = ctx.event.file_path().unwrap_or("").to_string();
        if is_exempt_full(&file_path, &ctx.paths.skills_dir()) {
            return GateResult::pass(NAME);
        }
        let is_code = Path::new(&file_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| CODE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_code {
            return GateResult::pass(NAME);
        }

        let content = ctx.event.written_content().unwrap_or("");
        if content.trim().is_empty() {
            return GateResult::pass(NAME);
        }

        let violations = scan_content(content);
        if violations.is_empty() {
            state.code_quality_warnings_per_file.remove(&file_path);
            return GateResult::pass(NAME);
        }

        let escalating = violations.iter().any(|v| v.2);
        let count = {
            let entry = state
                .code_quality_warnings_per_file
                .entry(file_path.clone())
                .or_insert(0);
            if escalating {
                *entry += 1;
            }
            *entry
        };

        let detail = violations
            .iter()
            .map(|(name, line, _)| format!("{name} (line {line})"))
            .collect::<Vec<_>>()
            .join(", ");
        let basename = Path::new(&file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&file_path);

        if escalating && count > MAX_WARNINGS {
            return GateResult::block(
                NAME,
                format!(
                    "[{NAME}] BLOCKED: Code quality issues: {detail}. ({count} violations on \
                     {basename} — exceeded {MAX_WARNINGS} warning limit). Re-edit without the \
                     violation to clear."
                ),
            );
        }

        GateResult::warn(
            NAME,
            format!("[{NAME}] WARNING ({count}/{MAX_WARNINGS}): {detail} in {basename}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WardenConfig, WardenPaths};
    use crate::state::live::LiveState;
    use crate::types::{Escalation, HookEvent};
    use serde_json::json;

    fn run(content: &str, state: &mut SessionState) -> GateResult {
        let paths = WardenPaths::at("/tmp/warden-test");
        let config = WardenConfig::default();
        let live = LiveState::default();
        let event = HookEvent {
            session_id: "main".into(),
            hook_event_name: "PreToolUse".into(),
            tool_name: "Write".into(),
            tool_input: json!({"file_path": "/x/app.py", "content": content}),
            tool_response: None,
        };
        let ctx = GateContext::new(&event, &config, &paths, &live);
        CodeQuality.check(&ctx, state)
    }

    #[test]
    fn hardcoded_secret_warns_with_line_number() {
        let mut state = SessionState::new("main");
        let result = run("api_key = \"sk_live_0123456789\"\n", &mut state);
        assert_eq!(result.escalation, Escalation::Warn);
        assert!(result.message.contains("secret-in-code (line 1)"));
    }

    #[test]
    fn fourth_escalating_violation_blocks() {
        let mut state = SessionState::new("main");
        let bad = "print(debug_value)\n";
        for _ in 0..3 {
            assert!(!run(bad, &mut state).blocked);
        }
        let result = run(bad, &mut state);
        assert!(result.blocked);
        assert!(result.message.contains("exceeded 3 warning limit"));
    }

    #[test]
    fn clean_edit_resets_counter() {
        let mut state = SessionState::new("main");
        let bad = "print(debug_value)\n";
        run(bad, &mut state);
        run(bad, &mut state);
        run("x = 1\n", &mut state);
        assert!(!state
            .code_quality_warnings_per_file
            .contains_key("/x/app.py"));
        assert!(!run(bad, &mut state).blocked);
    }

    #[test]
    fn todo_marker_warns_but_never_escalates() {
        let mut state = SessionState::new("main");
        for _ in 0..6 {
            let result = run("# TODO: wire up retries\nx = 1\n", &mut state);
            assert!(!result.blocked);
        }
    }

    #[test]
    fn non_code_files_are_skipped() {
        let paths = WardenPaths::at("/tmp/warden-test");
        let config = WardenConfig::default();
        let live = LiveState::default();
        let event = HookEvent {
            session_id: "main".into(),
            hook_event_name: "PreToolUse".into(),
            tool_name: "Write".into(),
            tool_input: json!({"file_path": "/x/notes.md", "content": "password = \"12345678\""}),
            tool_response: None,
        };
        let ctx = GateContext::new(&event, &config, &paths, &live);
        let result = CodeQuality.check(&ctx, &mut SessionState::new("main"));
        assert_eq!(result.escalation, Escalation::Allow);
    }
}
