//! File claims for multi-agent coordination.
//!
//! A single JSON document maps edited paths to the session that claimed
//! them. Access goes through a non-blocking exclusive lock; when the lock
//! cannot be taken the caller proceeds (fail-open) and the workspace gate
//! only warns. Claims older than 30 minutes are stale and ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::types::unix_now;

/// Claims older than this are ignored and cleaned up.
pub const STALE_THRESHOLD_SECS: f64 = 1800.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claim {
    pub session_id: String,
    pub claimed_at: f64,
}

fn lock_file(path: &Path) -> std::io::Result<fd_lock::RwLock<std::fs::File>> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    Ok(fd_lock::RwLock::new(file))
}

fn read_unlocked(path: &Path) -> HashMap<String, Claim> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn drop_stale(claims: &mut HashMap<String, Claim>, now: f64) {
    claims.retain(|_, claim| now - claim.claimed_at < STALE_THRESHOLD_SECS);
}

/// Read current (non-stale) claims. Errors read as "no claims" — the
/// caller must not be blocked by a broken claims file.
pub fn read_claims(path: &Path) -> HashMap<String, Claim> {
    let mut lock = match lock_file(path) {
        Ok(lock) => lock,
        Err(_) => return HashMap::new(),
    };
    let claims = match lock.try_read() {
        Ok(_guard) => read_unlocked(path),
        // Lock contention: fail open with the unlocked read.
        Err(_) => read_unlocked(path),
    };
    let mut claims = claims;
    drop_stale(&mut claims, unix_now());
    claims
}

/// Record a claim for `file_path` by `session_id`. Returns false when the
/// lock could not be taken (fail-open: the edit proceeds unclaimed).
pub fn claim(path: &Path, file_path: &str, session_id: &str) -> bool {
    let mut lock = match lock_file(path) {
        Ok(lock) => lock,
        Err(_) => return false,
    };
    let guard = match lock.try_write() {
        Ok(guard) => guard,
        Err(_) => return false,
    };
    let mut claims = read_unlocked(path);
    let now = unix_now();
    drop_stale(&mut claims, now);
    claims.insert(
        file_path.to_string(),
        Claim {
            session_id: session_id.to_string(),
            claimed_at: now,
        },
    );
    let ok = write_claims(path, &claims).is_ok();
    drop(guard);
    ok
}

/// Drop every claim owned by `session_id` (session end / stop cleanup).
pub fn release_session(path: &Path, session_id: &str) {
    let mut lock = match lock_file(path) {
        Ok(lock) => lock,
        Err(_) => return,
    };
    let Ok(_guard) = lock.try_write() else {
        return;
    };
    let mut claims = read_unlocked(path);
    claims.retain(|_, claim| claim.session_id != session_id);
    let _ = write_claims(path, &claims);
}

fn write_claims(path: &Path, claims: &HashMap<String, Claim>) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, claims)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}
