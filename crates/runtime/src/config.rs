//! Configuration for the Warden runtime.
//!
//! Defaults work with zero configuration: everything lives under
//! `~/.warden` (override with `WARDEN_HOME`). A `warden.toml` in that
//! directory is merged over the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Filesystem layout of the runtime directory.
#[derive(Debug, Clone)]
pub struct WardenPaths {
    pub base_dir: PathBuf,
}

impl WardenPaths {
    /// Resolve the runtime directory: `$WARDEN_HOME`, else `~/.warden`.
    pub fn resolve() -> Self {
        let base_dir = std::env::var_os("WARDEN_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".warden")
            });
        Self { base_dir }
    }

    pub fn at(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Create the directories the runtime writes into.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.base_dir.clone(),
            self.state_dir(),
            self.audit_dir(),
            self.breaker_dir(),
            self.data_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("warden.toml")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base_dir.join("state")
    }

    pub fn state_file(&self, session_id: &str) -> PathBuf {
        self.state_dir().join(format!("{}.json", sanitize(session_id)))
    }

    pub fn session_lock(&self, session_id: &str) -> PathBuf {
        self.state_dir().join(format!("{}.lock", sanitize(session_id)))
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.base_dir.join("audit")
    }

    pub fn breaker_dir(&self) -> PathBuf {
        self.base_dir.join("breakers")
    }

    /// Vector store data directory (one Lance table per collection).
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("memory")
    }

    pub fn fts_db(&self) -> PathBuf {
        self.data_dir().join("fts.sqlite3")
    }

    pub fn gateway_socket(&self) -> PathBuf {
        self.base_dir.join(".memory.sock")
    }

    pub fn daemon_socket(&self) -> PathBuf {
        self.base_dir.join(".gates.sock")
    }

    pub fn capture_queue(&self) -> PathBuf {
        self.base_dir.join(".capture_queue.jsonl")
    }

    pub fn auto_remember_queue(&self) -> PathBuf {
        self.base_dir.join(".auto_remember_queue.jsonl")
    }

    pub fn claims_file(&self) -> PathBuf {
        self.base_dir.join(".file_claims.json")
    }

    pub fn sideband_file(&self) -> PathBuf {
        self.base_dir.join(".memory_last_queried")
    }

    pub fn live_state_file(&self) -> PathBuf {
        self.base_dir.join("live_state.json")
    }

    pub fn handoff_file(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("handoff_{}.json", sanitize(session_id)))
    }

    pub fn integrity_file(&self) -> PathBuf {
        self.base_dir.join("integrity.json")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.base_dir.join("skills")
    }
}

fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Tunable thresholds and allow-lists. Everything has a default matching
/// the shipped policy; `warden.toml` overrides individual fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Memory query freshness window for Edit/NotebookEdit/Task.
    #[serde(with = "humantime_serde")]
    pub memory_freshness: Duration,
    /// Memory query freshness window for Write (composition takes longer).
    #[serde(with = "humantime_serde")]
    pub write_freshness: Duration,
    /// How fresh a test run must be before a deploy command is allowed.
    #[serde(with = "humantime_serde")]
    pub test_freshness: Duration,
    /// How fresh a fix-history query must be during active error fixing.
    #[serde(with = "humantime_serde")]
    pub fix_history_freshness: Duration,
    /// Gateway RPC socket timeout.
    #[serde(with = "humantime_serde")]
    pub gateway_timeout: Duration,
    /// Daemon fast-path timeout (must stay under the host's hook budget).
    #[serde(with = "humantime_serde")]
    pub daemon_timeout: Duration,
    /// Commands that count as a full test-suite run and clear all pending
    /// verification state.
    pub broad_test_commands: Vec<String>,
    /// Models a `Task` call may name. Empty list disables the check.
    pub allowed_task_models: Vec<String>,
    /// Embedding dimension for the vector store.
    pub vector_dimension: usize,
    /// Maximum auto-remember events per session.
    pub max_auto_remember_per_session: u32,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            memory_freshness: Duration::from_secs(300),
            write_freshness: Duration::from_secs(600),
            test_freshness: Duration::from_secs(1800),
            fix_history_freshness: Duration::from_secs(300),
            gateway_timeout: Duration::from_secs(2),
            daemon_timeout: Duration::from_secs(4),
            broad_test_commands: vec![
                "pytest".to_string(),
                "python -m pytest".to_string(),
                "python3 -m pytest".to_string(),
                "cargo test".to_string(),
                "npm test".to_string(),
                "go test ./...".to_string(),
                "make test".to_string(),
            ],
            allowed_task_models: Vec::new(),
            vector_dimension: 384,
            max_auto_remember_per_session: 10,
        }
    }
}

impl WardenConfig {
    /// Load the config file under `paths`, falling back to defaults when
    /// the file is absent.
    pub fn load(paths: &WardenPaths) -> Result<Self, ConfigError> {
        Self::load_from(&paths.config_file())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}
