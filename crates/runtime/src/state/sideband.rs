//! Sideband memory-freshness signal.
//!
//! A one-field JSON file written atomically by whichever process answers a
//! memory query. It exists so short-lived hook processes can see "memory
//! was just queried" even when the query went through a different process
//! (or the gateway is down). Gates read the max of the session-state field
//! and this file.

use crate::config::WardenPaths;
use crate::state::SessionState;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Sideband {
    timestamp: f64,
}

/// Read the sideband timestamp; 0.0 when absent or unreadable.
pub fn read_sideband(path: &Path) -> f64 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<Sideband>(&raw).ok())
        .map(|s| s.timestamp)
        .unwrap_or(0.0)
}

/// Atomically write a fresh sideband timestamp.
pub fn write_sideband(path: &Path, timestamp: f64) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, &Sideband { timestamp })?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

/// Effective "memory last queried" for gating: session state vs. the
/// cross-process sideband file, whichever is newer.
pub fn memory_last_queried(state: &SessionState, paths: &WardenPaths) -> f64 {
    state
        .memory_last_queried
        .max(read_sideband(&paths.sideband_file()))
}
