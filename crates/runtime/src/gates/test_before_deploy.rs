//! Gate 3 (safety): deny deploy-shaped commands unless tests ran recently
//! and passed.

use regex::Regex;
use std::sync::OnceLock;

use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier};

pub const NAME: &str = "GATE 3: TEST BEFORE DEPLOY";

struct DeployPattern {
    pattern: Regex,
    category: &'static str,
}

fn deploy_patterns() -> &'static Vec<DeployPattern> {
    static PATTERNS: OnceLock<Vec<DeployPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: [(&str, &str); 24] = [
            (r"(?i)\bscp\b.*\b\d+\.\d+\.\d+\.\d+\b", "remote copy"),
            (r"(?i)\bscp\b.*@.*:", "remote copy"),
            (r"(?i)\brsync\b.*:", "remote sync"),
            (r"(?i)\bdocker\s+push\b", "container"),
            (r"(?i)\bkubectl\s+(?:apply|rollout)\b", "kubernetes"),
            (
                r"(?i)\bgit\s+push\b.*\b(?:main|master|prod|production)\b",
                "git production",
            ),
            (r"(?i)\bssh\b.*deploy", "remote deploy"),
            (r"(?i)\bfab\s+deploy\b", "fabric"),
            (r"(?i)\bansible-playbook\b", "ansible"),
            (r"(?i)\bcaprover\b", "caprover"),
            (r"(?i)\bheroku\s+push\b", "heroku"),
            (r"(?i)\bfly\s+deploy\b", "fly.io"),
            (r"(?i)\bnpm\s+publish\b", "package publish"),
            (r"(?i)\bcargo\s+publish\b", "package publish"),
            (r"(?i)\btwine\s+upload\b", "package publish"),
            (r"(?i)\bgcloud\s+(?:app\s+deploy|run\s+deploy)\b", "gcloud"),
            (r"(?i)\baws\s+s3\s+sync\b", "aws"),
            (r"(?i)\bhelm\s+(?:upgrade|install)\b", "helm"),
            (r"(?i)\bterraform\s+apply\b", "terraform"),
            (r"(?i)\bpulumi\s+up\b", "pulumi"),
            (r"(?i)\bserverless\s+deploy\b", "serverless"),
            (r"(?i)\bcdk\s+deploy\b", "aws cdk"),
            (r"(?i)\b(?:npm\s+run|yarn)\s+deploy\b", "npm deploy"),
            (r"(?i)\bvercel\b.*--prod\b", "vercel"),
        ];
        table
            .iter()
            .map(|(pattern, category)| DeployPattern {
                pattern: Regex::new(pattern).unwrap(),
                category,
            })
            .collect()
    })
}

/// Suggest a test command from what this session last ran.
fn detect_test_framework(state: &SessionState) -> Option<&'static str> {
    let last = state.last_test_command.as_str();
    for (needle, framework) in [
        ("pytest", "pytest"),
        ("npm test", "npm test"),
        ("cargo test", "cargo test"),
        ("go test", "go test"),
        ("make test", "make test"),
    ] {
        if last.contains(needle) {
            return Some(framework);
        }
    }
    if state.tool_call_counts.get("Bash").copied().unwrap_or(0) > 0 {
        return Some("cargo test");
    }
    None
}

pub struct TestBeforeDeploy;

impl Gate for TestBeforeDeploy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tier(&self) -> GateTier {
        GateTier::Safety
    }

    fn check(&self, ctx: &GateContext, state: &mut SessionState) -> GateResult {
        if !ctx.event.is_pre_tool() || ctx.event.tool_name != "Bash" {
            return GateResult::pass(NAME);
        }
        let Some(command) = ctx.event.command() else {
            return GateResult::pass(NAME);
        };

        let Some(category) = deploy_patterns()
            .iter()
            .find(|p| p.pattern.is_match(command))
            .map(|p| p.category)
        else {
            return GateResult::pass(NAME);
        };

        let window = ctx.config.test_freshness.as_secs_f64();
        let elapsed = ctx.now - state.last_test_run;
        if elapsed > window {
            let hint = detect_test_framework(state)
                .map(|f| format!(" Try: {f}"))
                .unwrap_or_default();
            let msg = if state.last_test_run > 0.0 {
                format!(
                    "[{NAME}] BLOCKED: Deploy ({category}) attempted but tests last ran \
                     {} minutes ago. Run tests before deploying.{hint}",
                    (elapsed / 60.0) as i64
                )
            } else {
                format!(
                    "[{NAME}] BLOCKED: Deploy ({category}) attempted but no tests have \
                     been run this session. Run tests before deploying.{hint}"
                )
            };
            return GateResult::block(NAME, msg);
        }

        if let Some(code) = state.last_test_exit_code {
            if code != 0 {
                return GateResult::block(
                    NAME,
                    format!(
                        "[{NAME}] BLOCKED: Deploy ({category}) attempted but last test run \
                         failed (exit code: {code}). Fix tests before deploying."
                    ),
                );
            }
        }

        GateResult::pass(NAME)
    }
}
