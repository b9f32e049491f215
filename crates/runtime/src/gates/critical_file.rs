//! Gate 7: high-risk files require a recent memory query before editing.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::gates::{Gate, GateContext};
use crate::state::sideband;
use crate::state::SessionState;
use crate::types::{GateResult, GateTier, Severity};

pub const NAME: &str = "GATE 7: CRITICAL FILE GUARD";

const MEMORY_WINDOW_SECS: f64 = 300.0;

struct CriticalPattern {
    pattern: Regex,
    category: &'static str,
}

fn critical_patterns() -> &'static Vec<CriticalPattern> {
    static PATTERNS: OnceLock<Vec<CriticalPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: [(&str, &str); 22] = [
            (r"(?i)(models|schema|migration).*\.(py|rs|sql)$", "Database models"),
            (r"(?i)(auth|login|session|jwt|oauth).*\.(py|rs|go|ts|js)$", "Authentication"),
            (r"(?i)(payment|billing|stripe|charge).*\.(py|rs|go|ts|js)$", "Payment processing"),
            (r"\.env$", "Environment variables"),
            (r"(?i)docker-compose.*\.ya?ml$", "Docker orchestration"),
            (r"Dockerfile$", "Docker build"),
            (r"\.github/workflows/.*\.ya?ml$", "CI/CD pipeline"),
            (r"(?i)(nginx|apache|caddy).*\.conf$", "Web server config"),
            (r"(?i)(settings|config)\.(py|rs|toml)$", "App settings"),
            (r"requirements\.txt$", "Python dependencies"),
            (r"package\.json$", "Node dependencies"),
            (r"Cargo\.toml$", "Rust dependencies"),
            (r"\.ssh/", "SSH directory"),
            (r"authorized_keys$", "SSH authorized keys"),
            (r"id_(rsa|ed25519|ecdsa|dsa)(\.pub)?$", "SSH key files"),
            (r"sudoers", "Sudo configuration"),
            (r"crontab$|cron\.d/", "Cron schedule"),
            (r"\.(pem|key)$", "Key material"),
            (r"\.pgpass$", "PostgreSQL password file"),
            (r"\.aws/credentials$", "AWS credentials"),
            (r"\.(netrc|npmrc|pypirc)$", "Auth token files"),
            // Self-protection: the runtime's own state and policy files.
            (r"\.warden/(warden\.toml|live_state\.json|state/)", "Warden runtime files"),
        ];
        table
            .iter()
            .map(|(pattern, category)| CriticalPattern {
                pattern: Regex::new(pattern).unwrap(),
                category,
            })
            .collect()
    })
}

pub struct CriticalFileGuard;

impl Gate for CriticalFileGuard {
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

        let Some(category) = critical_patterns()
            .iter()
            .find(|p| p.pattern.is_match(file_path))
            .map(|p| p.category)
        else {
            return GateResult::pass(NAME);
        };

        let elapsed = ctx.now - sideband::memory_last_queried(state, ctx.paths);
        if elapsed > MEMORY_WINDOW_SECS {
            let basename = Path::new(file_path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(file_path);
            return GateResult::block(
                NAME,
                format!(
                    "[{NAME}] BLOCKED: '{basename}' is a critical file ({category}). Query \
                     memory about this file/component before editing. Use search_knowledge() \
                     first."
                ),
            )
            .with_severity(Severity::Critical);
        }

        GateResult::pass(NAME)
    }
}
