//! Session state: the per-session JSON document every other component
//! reads and mutates.
//!
//! Writes go through a lock → read → mutate → temp-file → rename cycle so
//! a crash mid-write leaves the previous good document intact. Unknown
//! fields on disk are ignored and missing fields take defaults, so the
//! schema can evolve without corrupting old sessions.

pub mod breaker;
pub mod claims;
pub mod live;
pub mod sideband;

use crate::config::WardenPaths;
use crate::types::unix_now;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One detected-but-unreported error occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEntry {
    pub pattern: String,
    #[serde(default)]
    pub command: String,
    pub timestamp: f64,
}

/// 60-second dedup window for one error pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorWindow {
    pub pattern: String,
    pub first_seen: f64,
    pub last_seen: f64,
    pub count: u32,
}

/// The most recent failing test run, kept while a fix is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestFailure {
    pub pattern: String,
    pub timestamp: f64,
}

/// A fix that passed its test but whose outcome has not been recorded yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnsavedFix {
    pub pattern: String,
    pub verified_at: f64,
}

fn one() -> f64 {
    1.0
}

fn default_verdict() -> String {
    "proceed".to_string()
}

/// Per-session runtime state. Serialized as a flat JSON document; every
/// field is defaulted so partially-written or older documents still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub session_id: String,
    pub session_start: f64,

    /// Canonicalised paths read this session.
    pub files_read: Vec<String>,
    /// Edited files not yet proven by a subsequent shell command, in edit
    /// order.
    pub pending_verification: Vec<String>,
    /// file → 0.0 (unverified), 0.5 (partial) or 1.0 (verified).
    pub verification_scores: HashMap<String, f64>,
    /// file → consecutive edits since the last verify-event.
    pub edit_streak: HashMap<String, u32>,

    pub tool_call_count: u64,
    pub tool_call_counts: HashMap<String, u64>,
    pub estimated_tokens: u64,
    /// Bounded deque of recent call timestamps for the rate limiter.
    pub rate_window_timestamps: Vec<f64>,

    pub last_test_run: f64,
    pub last_test_exit_code: Option<i64>,
    pub last_test_command: String,
    pub session_test_baseline: bool,

    pub unlogged_errors: Vec<ErrorEntry>,
    pub error_pattern_counts: HashMap<String, u32>,
    pub error_windows: Vec<ErrorWindow>,

    pub recent_test_failure: Option<TestFailure>,
    /// Epoch seconds of the last fix-history query (0 = never).
    pub fix_history_queried: f64,
    pub fixing_error: bool,
    pub current_strategy_id: String,
    pub banned_strategies: Vec<String>,
    pub unsaved_fix: Option<UnsavedFix>,

    pub auto_remember_count: u32,
    /// basename → exemption count, kept for observability.
    pub memory_gate_exemptions: HashMap<String, u32>,
    pub confidence_warnings_per_file: HashMap<String, u32>,
    pub confidence_warned_signals: Vec<String>,
    pub code_quality_warnings_per_file: HashMap<String, u32>,

    /// Epoch seconds of the last memory query seen by this process. Gates
    /// take the max of this and the sideband file.
    pub memory_last_queried: f64,

    #[serde(default = "one")]
    pub mentor_last_score: f64,
    #[serde(default = "default_verdict")]
    pub mentor_last_verdict: String,
    pub mentor_escalation_count: u32,
    #[serde(default = "one")]
    pub mentor_chain_score: f64,
    pub mentor_chain_pattern: String,
    pub mentor_memory_match: Option<Value>,
    pub mentor_historical_context: String,
    pub mentor_warned_this_cycle: bool,
    /// suggestion type → epoch seconds of the last analytics nudge.
    pub analytics_last_nudge: HashMap<String, f64>,

    /// gate key → field → numeric override (thresholds, windows).
    pub gate_tune_overrides: HashMap<String, HashMap<String, f64>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new("main")
    }
}

impl SessionState {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            session_start: unix_now(),
            files_read: Vec::new(),
            pending_verification: Vec::new(),
            verification_scores: HashMap::new(),
            edit_streak: HashMap::new(),
            tool_call_count: 0,
            tool_call_counts: HashMap::new(),
            estimated_tokens: 0,
            rate_window_timestamps: Vec::new(),
            last_test_run: 0.0,
            last_test_exit_code: None,
            last_test_command: String::new(),
            session_test_baseline: false,
            unlogged_errors: Vec::new(),
            error_pattern_counts: HashMap::new(),
            error_windows: Vec::new(),
            recent_test_failure: None,
            fix_history_queried: 0.0,
            fixing_error: false,
            current_strategy_id: String::new(),
            banned_strategies: Vec::new(),
            unsaved_fix: None,
            auto_remember_count: 0,
            memory_gate_exemptions: HashMap::new(),
            confidence_warnings_per_file: HashMap::new(),
            confidence_warned_signals: Vec::new(),
            code_quality_warnings_per_file: HashMap::new(),
            memory_last_queried: 0.0,
            mentor_last_score: 1.0,
            mentor_last_verdict: "proceed".to_string(),
            mentor_escalation_count: 0,
            mentor_chain_score: 1.0,
            mentor_chain_pattern: String::new(),
            mentor_memory_match: None,
            mentor_historical_context: String::new(),
            mentor_warned_this_cycle: false,
            analytics_last_nudge: HashMap::new(),
            gate_tune_overrides: HashMap::new(),
        }
    }

    /// Numeric tuning override for a gate, falling back to `default`.
    pub fn tune(&self, gate_key: &str, field: &str, default: f64) -> f64 {
        self.gate_tune_overrides
            .get(gate_key)
            .and_then(|fields| fields.get(field))
            .copied()
            .unwrap_or(default)
    }

    pub fn record_file_read(&mut self, canonical_path: String) {
        if !self.files_read.contains(&canonical_path) {
            self.files_read.push(canonical_path);
        }
    }
}

/// Advisory lock for one session's state document. Hold the guard across
/// the whole read → mutate → save cycle.
pub struct SessionLock {
    inner: fd_lock::RwLock<File>,
}

impl SessionLock {
    pub fn exclusive(&mut self) -> Result<fd_lock::RwLockWriteGuard<'_, File>, StateError> {
        Ok(self.inner.write()?)
    }
}

/// Disk-backed store for session state documents.
#[derive(Debug, Clone)]
pub struct StateStore {
    paths: WardenPaths,
}

impl StateStore {
    pub fn new(paths: WardenPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &WardenPaths {
        &self.paths
    }

    /// Acquire the per-session advisory lock file.
    pub fn session_lock(&self, session_id: &str) -> Result<SessionLock, StateError> {
        std::fs::create_dir_all(self.paths.state_dir())?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.paths.session_lock(session_id))?;
        Ok(SessionLock {
            inner: fd_lock::RwLock::new(file),
        })
    }

    /// Load the session document. A missing file yields fresh defaults; a
    /// corrupt one is replaced by defaults with a warning (state corruption
    /// must never block the host).
    pub fn load(&self, session_id: &str) -> SessionState {
        let path = self.paths.state_file(session_id);
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<SessionState>(&raw) {
                Ok(mut state) => {
                    state.session_id = session_id.to_string();
                    state
                }
                Err(e) => {
                    tracing::warn!(
                        session_id,
                        error = %e,
                        "corrupt state document, starting from defaults"
                    );
                    SessionState::new(session_id)
                }
            },
            Err(_) => SessionState::new(session_id),
        }
    }

    /// Persist atomically: write to a temp file in the same directory,
    /// then rename over the target.
    pub fn save(&self, state: &SessionState) -> Result<(), StateError> {
        let dir = self.paths.state_dir();
        std::fs::create_dir_all(&dir)?;
        let path = self.paths.state_file(&state.session_id);
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer(&mut tmp, state)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| StateError::Io(e.error))?;
        Ok(())
    }

    /// Lock, load, mutate, save. The lock is held for the whole cycle so
    /// racing tasks in the same session cannot tear the document.
    pub fn update<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> Result<T, StateError> {
        let mut lock = self.session_lock(session_id)?;
        let _guard = lock.exclusive()?;
        let mut state = self.load(session_id);
        let out = f(&mut state);
        self.save(&state)?;
        Ok(out)
    }
}
