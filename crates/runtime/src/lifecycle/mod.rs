//! Session lifecycle: boot and shutdown glue.
//!
//! Start: rotate audit logs, verify the integrity baseline, drain the
//! auto-remember queue into the gateway, run the two boot queries
//! (project context + behavioural corrections) and inject the merged
//! results into the host's boot context, then stamp the sideband file.
//! End: write a handoff digest and clear transient locks.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

use crate::audit::AuditLog;
use crate::config::{WardenConfig, WardenPaths};
use crate::gateway::client::GatewayClient;
use crate::gateway::protocol::SearchHit;
use crate::state::breaker::{BreakerPolicy, CircuitBreaker};
use crate::state::live::LiveState;
use crate::state::{claims, sideband, StateStore};
use crate::tracker::auto_remember;
use crate::types::unix_now;

const CORRECTION_QUERY: &str = "behavioral correction critical mistake rules priority";
const MIN_RELEVANCE: f64 = 0.3;
const CORRECTION_MIN_RELEVANCE: f64 = 0.25;
const PREVIEW_CHARS: usize = 58;

/// What the boot sequence did, for the host's boot context and logs.
#[derive(Debug, Default)]
pub struct BootReport {
    pub injected: Vec<String>,
    pub rotated: u32,
    pub flushed: u64,
    pub drained: usize,
    pub integrity_warnings: Vec<String>,
}

fn boot_client(paths: &WardenPaths, config: &WardenConfig) -> GatewayClient {
    GatewayClient::new(paths.gateway_socket(), config.gateway_timeout).with_breaker(
        CircuitBreaker::new(
            &paths.breaker_dir(),
            "memory_gateway",
            BreakerPolicy::default(),
        ),
    )
}

/// Compose the project-context query from the live-state document.
fn project_query(live: &LiveState) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !live.project.is_empty() {
        parts.push(live.project.clone());
    }
    if !live.feature.is_empty() {
        parts.push(live.feature.clone());
    }
    if !live.what_was_done.is_empty() {
        parts.push(live.what_was_done.chars().take(200).collect());
    }
    if !live.next_steps.is_empty() {
        parts.push(
            live.next_steps
                .join(" ")
                .chars()
                .take(200)
                .collect::<String>(),
        );
    }
    if parts.is_empty() {
        parts.push("recent session activity".to_string());
    }
    parts.join(" ").chars().take(500).collect()
}

fn format_hit(hit: &SearchHit, correction: bool) -> String {
    let preview = hit
        .metadata
        .get("preview")
        .and_then(|v| v.as_str())
        .unwrap_or(hit.text.as_str());
    let mut display: String = preview.chars().take(PREVIEW_CHARS).collect();
    if preview.chars().count() > PREVIEW_CHARS {
        display.push_str("..");
    }
    if correction {
        format!("[CORRECTION] {display}")
    } else {
        let id8: String = hit.id.chars().take(8).collect();
        format!("[{id8}] {display}")
    }
}

async fn inject_memories(
    client: &GatewayClient,
    live: &LiveState,
) -> Vec<String> {
    let Ok(count) = client.count("knowledge").await else {
        return Vec::new();
    };
    if count == 0 {
        return Vec::new();
    }

    let mut seen = std::collections::HashSet::new();
    let mut injected = Vec::new();

    if let Ok(hits) = client
        .query("knowledge", &project_query(live), 5.min(count))
        .await
    {
        for hit in hits {
            if 1.0 - hit.distance < MIN_RELEVANCE {
                continue;
            }
            if seen.insert(hit.id.clone()) {
                injected.push(format_hit(&hit, false));
            }
        }
    }

    if let Ok(hits) = client.query("knowledge", CORRECTION_QUERY, 3.min(count)).await {
        for hit in hits {
            if 1.0 - hit.distance < CORRECTION_MIN_RELEVANCE {
                continue;
            }
            if seen.insert(hit.id.clone()) {
                injected.push(format_hit(&hit, true));
            }
        }
    }

    injected
}

fn sha256_file(path: &Path) -> Option<String> {
    let data = std::fs::read(path).ok()?;
    Some(hex::encode(Sha256::digest(&data)))
}

/// SHA-256 baseline over the binary and config. First run writes the
/// baseline; later runs warn (never fail) on drift.
fn check_integrity(paths: &WardenPaths) -> Vec<String> {
    let mut current: HashMap<String, String> = HashMap::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(hash) = sha256_file(&exe) {
            current.insert("binary".to_string(), hash);
        }
    }
    if let Some(hash) = sha256_file(&paths.config_file()) {
        current.insert("config".to_string(), hash);
    }

    let baseline_path = paths.integrity_file();
    let Ok(raw) = std::fs::read_to_string(&baseline_path) else {
        if let Ok(serialized) = serde_json::to_string_pretty(&current) {
            let _ = std::fs::write(&baseline_path, serialized);
        }
        return Vec::new();
    };
    let baseline: HashMap<String, String> = serde_json::from_str(&raw).unwrap_or_default();

    baseline
        .iter()
        .filter(|(name, hash)| current.get(*name).map(|h| h != *hash).unwrap_or(false))
        .map(|(name, _)| format!("[INTEGRITY] WARNING: {name} changed since last baseline"))
        .collect()
}

/// Run the boot sequence for `session_id`.
pub async fn session_start(
    paths: &WardenPaths,
    config: &WardenConfig,
    session_id: &str,
) -> BootReport {
    let mut report = BootReport::default();
    if let Err(e) = paths.ensure_dirs() {
        tracing::warn!(error = %e, "could not create runtime dirs");
        return report;
    }

    let summary = AuditLog::new(paths.audit_dir()).rotate(false);
    report.rotated = summary.compressed;

    report.integrity_warnings = check_integrity(paths);

    // Touch the state document so the session exists on disk.
    let store = StateStore::new(paths.clone());
    let state = store.load(session_id);
    let _ = store.save(&state);

    let client = boot_client(paths, config);
    if client.socket_exists() {
        if let Ok(result) = client.flush_queue().await {
            report.flushed = result
                .get("flushed")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
        }

        // Drain queued auto-remember events; anything that fails to land
        // goes back on the queue for next boot.
        let queued = auto_remember::drain_queue(&paths.auto_remember_queue());
        for event in &queued {
            if client
                .auto_remember(&event.content, &event.context, &event.tags)
                .await
                .is_ok()
            {
                report.drained += 1;
            } else {
                let line = serde_json::to_string(event).unwrap_or_default();
                let _ = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(paths.auto_remember_queue())
                    .and_then(|mut f| std::io::Write::write_all(&mut f, format!("{line}\n").as_bytes()));
            }
        }

        let live = LiveState::load(&paths.live_state_file());
        report.injected = inject_memories(&client, &live).await;
    }

    // Auto-injection counts as a memory query.
    let _ = sideband::write_sideband(&paths.sideband_file(), unix_now());
    report
}

/// Shutdown: handoff digest, clear pending verification, release claims.
pub fn session_end(paths: &WardenPaths, session_id: &str) {
    let store = StateStore::new(paths.clone());
    let result = store.update(session_id, |state| {
        let digest = json!({
            "session_id": state.session_id.clone(),
            "ended_at": unix_now(),
            "session_start": state.session_start,
            "tool_call_count": state.tool_call_count,
            "tool_call_counts": state.tool_call_counts.clone(),
            "estimated_tokens": state.estimated_tokens,
            "error_pattern_counts": state.error_pattern_counts.clone(),
            "files_touched": state.pending_verification.clone(),
            "test_baseline": state.session_test_baseline,
            "last_test_command": state.last_test_command.clone(),
        });
        state.pending_verification.clear();
        digest
    });

    match result {
        Ok(digest) => {
            if let Ok(serialized) = serde_json::to_string_pretty(&digest) {
                let _ = std::fs::write(paths.handoff_file(session_id), serialized);
            }
        }
        Err(e) => tracing::warn!(error = %e, "handoff digest failed"),
    }

    claims::release_session(&paths.claims_file(), session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn boot_without_gateway_still_rotates_and_stamps_sideband() {
        let tmp = TempDir::new().unwrap();
        let paths = WardenPaths::at(tmp.path());
        paths.ensure_dirs().unwrap();
        std::fs::write(paths.audit_dir().join("2020-01-01.jsonl"), "{}\n").unwrap();

        let config = WardenConfig::default();
        let report = session_start(&paths, &config, "main").await;

        assert_eq!(report.rotated, 1);
        assert!(report.injected.is_empty());
        assert!(sideband::read_sideband(&paths.sideband_file()) > 0.0);
        assert!(paths.state_file("main").exists());
    }

    #[tokio::test]
    async fn session_end_writes_digest_and_clears_pending() {
        let tmp = TempDir::new().unwrap();
        let paths = WardenPaths::at(tmp.path());
        paths.ensure_dirs().unwrap();

        let store = StateStore::new(paths.clone());
        store
            .update("alpha", |state| {
                state.tool_call_count = 12;
                state.pending_verification.push("/x/wip.rs".into());
            })
            .unwrap();
        claims::claim(&paths.claims_file(), "/x/wip.rs", "alpha");

        session_end(&paths, "alpha");

        let digest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(paths.handoff_file("alpha")).unwrap())
                .unwrap();
        assert_eq!(digest["tool_call_count"], 12);
        assert_eq!(digest["files_touched"][0], "/x/wip.rs");

        assert!(store.load("alpha").pending_verification.is_empty());
        assert!(claims::read_claims(&paths.claims_file()).is_empty());
    }

    #[test]
    fn integrity_baseline_bootstraps_then_detects_drift() {
        let tmp = TempDir::new().unwrap();
        let paths = WardenPaths::at(tmp.path());
        paths.ensure_dirs().unwrap();
        std::fs::write(paths.config_file(), "a = 1\n").unwrap();

        // First run creates the baseline silently.
        assert!(check_integrity(&paths).is_empty());
        assert!(paths.integrity_file().exists());

        std::fs::write(paths.config_file(), "a = 2\n").unwrap();
        let warnings = check_integrity(&paths);
        assert!(warnings.iter().any(|w| w.contains("config")));
    }

    #[test]
    fn project_query_falls_back_when_live_state_is_empty() {
        assert_eq!(project_query(&LiveState::default()), "recent session activity");
        let live = LiveState {
            project: "billing".into(),
            feature: "invoice retries".into(),
            ..Default::default()
        };
        assert_eq!(project_query(&live), "billing invoice retries");
    }
}
