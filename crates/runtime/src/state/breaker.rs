//! Per-service circuit breakers shared across short-lived processes.
//!
//! Each service gets one JSON record under `breakers/`, replaced
//! atomically on every transition so any shim process sees the same view.
//! CLOSED → OPEN after `failure_threshold` consecutive failures; OPEN →
//! HALF_OPEN after `recovery_timeout`; HALF_OPEN → CLOSED after
//! `success_threshold` consecutive successes (a failure re-opens).

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::types::unix_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BreakerState {
    #[default]
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "HALF_OPEN")]
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BreakerRecord {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_at: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub success_threshold: u32,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_secs: 30.0,
            success_threshold: 1,
        }
    }
}

/// Handle to one named breaker record on disk.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    path: PathBuf,
    policy: BreakerPolicy,
}

impl CircuitBreaker {
    pub fn new(breaker_dir: &Path, service: &str, policy: BreakerPolicy) -> Self {
        Self {
            path: breaker_dir.join(format!("{service}.json")),
            policy,
        }
    }

    fn read(&self) -> BreakerRecord {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn write(&self, record: &BreakerRecord) {
        let write = || -> std::io::Result<()> {
            let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            serde_json::to_writer(&mut tmp, record)?;
            tmp.flush()?;
            tmp.persist(&self.path)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!(path = %self.path.display(), error = %e, "breaker write failed");
        }
    }

    /// Current state, promoting OPEN to HALF_OPEN once the recovery
    /// timeout has elapsed.
    pub fn state(&self) -> BreakerState {
        let record = self.read();
        match record.state {
            BreakerState::Open
                if unix_now() - record.opened_at >= self.policy.recovery_timeout_secs =>
            {
                BreakerState::HalfOpen
            }
            other => other,
        }
    }

    /// Whether the protected call should be skipped entirely.
    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn record_success(&self) {
        let mut record = self.read();
        match self.state() {
            BreakerState::HalfOpen => {
                record.consecutive_successes += 1;
                record.consecutive_failures = 0;
                if record.consecutive_successes >= self.policy.success_threshold {
                    record = BreakerRecord::default();
                } else {
                    record.state = BreakerState::HalfOpen;
                }
            }
            _ => {
                record = BreakerRecord::default();
            }
        }
        self.write(&record);
    }

    pub fn record_failure(&self) {
        let mut record = self.read();
        record.consecutive_successes = 0;
        record.consecutive_failures += 1;
        if record.consecutive_failures >= self.policy.failure_threshold
            || self.state() == BreakerState::HalfOpen
        {
            record.state = BreakerState::Open;
            record.opened_at = unix_now();
        }
        self.write(&record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn breaker(tmp: &TempDir, policy: BreakerPolicy) -> CircuitBreaker {
        CircuitBreaker::new(tmp.path(), "gate_daemon", policy)
    }

    #[test]
    fn starts_closed() {
        let tmp = TempDir::new().unwrap();
        let cb = breaker(&tmp, BreakerPolicy::default());
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(!cb.is_open());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let tmp = TempDir::new().unwrap();
        let cb = breaker(&tmp, BreakerPolicy::default());
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn half_open_after_recovery_then_closes_on_success() {
        let tmp = TempDir::new().unwrap();
        let cb = breaker(
            &tmp,
            BreakerPolicy {
                failure_threshold: 1,
                recovery_timeout_secs: 0.0,
                success_threshold: 1,
            },
        );
        cb.record_failure();
        // Zero recovery timeout: immediately probe-able.
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn failure_during_half_open_reopens() {
        let tmp = TempDir::new().unwrap();
        let cb = breaker(
            &tmp,
            BreakerPolicy {
                failure_threshold: 3,
                recovery_timeout_secs: 0.0,
                success_threshold: 1,
            },
        );
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_failure();
        // opened_at was refreshed, so with a real timeout this would be
        // OPEN; with zero timeout it is immediately probe-able again.
        assert_eq!(cb.read().state, BreakerState::Open);
    }

    #[test]
    fn records_are_shared_across_handles() {
        let tmp = TempDir::new().unwrap();
        let policy = BreakerPolicy {
            failure_threshold: 1,
            recovery_timeout_secs: 9999.0,
            success_threshold: 1,
        };
        breaker(&tmp, policy).record_failure();
        assert!(breaker(&tmp, policy).is_open());
    }
}
