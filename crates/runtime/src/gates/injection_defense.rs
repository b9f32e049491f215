//! Gate 14 (safety): reject tool inputs carrying prompt-injection
//! payloads — override phrasing, hidden HTML instructions, or invisible
//! control characters smuggled into commands and file content.

use regex::Regex;
use std::sync::OnceLock;

use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier, Severity};

pub const NAME: &str = "GATE 14: INJECTION DEFENSE";

struct InjectionPattern {
    regex: Regex,
    label: &'static str,
}

fn injection_patterns() -> &'static Vec<InjectionPattern> {
    static PATTERNS: OnceLock<Vec<InjectionPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: [(&str, &str); 5] = [
            (
                r"(?i)ignore\s+(?:all\s+)?previous\s+instructions",
                "instruction override",
            ),
            (
                r"(?i)disregard\s+(?:all\s+)?(?:prior|previous|above)",
                "instruction override",
            ),
            (
                r"(?i)you\s+are\s+now\s+(?:in\s+)?(?:developer|jailbreak|dan)\s*mode",
                "mode escape",
            ),
            (
                r"(?i)<!--.*(?:instruction|ignore|system\s+prompt).*-->",
                "hidden HTML instruction",
            ),
            (
                "[\u{200b}\u{200c}\u{200d}\u{2060}\u{202a}\u{202b}\u{202c}\u{202d}\u{202e}]",
                "invisible control characters",
            ),
        ];
        table
            .iter()
            .map(|(pattern, label)| InjectionPattern {
                regex: Regex::new(pattern).unwrap(),
                label,
            })
            .collect()
    })
}

fn scan(text: &str) -> Option<&'static str> {
    injection_patterns()
        .iter()
        .find(|p| p.regex.is_match(text))
        .map(|p| p.label)
}

pub struct InjectionDefense;

impl Gate for InjectionDefense {
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
        let mut texts: Vec<&str> = Vec::new();
        if let Some(command) = ctx.event.command() {
            texts.push(command);
        }
        if let Some(content) = ctx.event.written_content() {
            texts.push(content);
        }
        if let Some(prompt) = ctx.event.tool_input.get("prompt").and_then(|v| v.as_str()) {
            texts.push(prompt);
        }

        for text in texts {
            if let Some(label) = scan(text) {
                return GateResult::block(
                    NAME,
                    format!(
                        "[{NAME}] BLOCKED: Input contains a prompt-injection marker \
                         ({label}). Strip the suspicious content before retrying."
                    ),
                )
                .with_severity(Severity::Critical);
            }
        }
        GateResult::pass(NAME)
    }
}
