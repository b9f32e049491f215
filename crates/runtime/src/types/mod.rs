//! Core types shared by the gate pipeline, the post-tool tracker and the
//! memory gateway: hook event payloads, gate results, host-facing decisions
//! and observation records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Epoch seconds as `f64`, matching the on-disk state documents.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn default_session_id() -> String {
    "main".to_string()
}

/// Canonical form of a path for `files_read` comparisons: resolve
/// symlinks when the file exists, otherwise normalise lexically.
pub fn canonical_path(path: &str) -> String {
    match std::fs::canonicalize(path) {
        Ok(real) => real.to_string_lossy().into_owned(),
        Err(_) => normalize_lexically(path),
    }
}

fn normalize_lexically(path: &str) -> String {
    use std::path::Component;
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in std::path::Path::new(path).components() {
        match component {
            Component::RootDir => absolute = true,
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() && !absolute {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::Prefix(prefix) => parts.push(prefix.as_os_str().to_string_lossy().into_owned()),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// One hook invocation as delivered by the host on stdin.
///
/// The same shape covers pre-tool and post-tool events; `tool_response` is
/// only present on the post-tool side.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HookEvent {
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default)]
    pub hook_event_name: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<Value>,
}

impl HookEvent {
    pub fn is_pre_tool(&self) -> bool {
        self.hook_event_name == "PreToolUse"
    }

    /// Target file path for Edit/Write/NotebookEdit inputs.
    pub fn file_path(&self) -> Option<&str> {
        self.tool_input
            .get("file_path")
            .or_else(|| self.tool_input.get("notebook_path"))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    }

    /// Shell command for Bash inputs.
    pub fn command(&self) -> Option<&str> {
        self.tool_input.get("command").and_then(Value::as_str)
    }

    /// Content being written, per tool (`new_string`, `content`, `new_source`).
    pub fn written_content(&self) -> Option<&str> {
        let key = match self.tool_name.as_str() {
            "Edit" => "new_string",
            "Write" => "content",
            "NotebookEdit" => "new_source",
            _ => return None,
        };
        self.tool_input.get(key).and_then(Value::as_str)
    }

    pub fn is_mutation_tool(&self) -> bool {
        matches!(self.tool_name.as_str(), "Edit" | "Write" | "NotebookEdit")
    }
}

/// Gate classification. Tier 1 fails closed inside its own logic; tiers 2
/// and 3 fail open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateTier {
    Safety,
    Quality,
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warn,
    Error,
    Critical,
}

/// Graduated escalation of a gate result. Only `Block` and `Ask` translate
/// to host-level decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Escalation {
    #[default]
    Allow,
    Warn,
    Ask,
    Block,
}

/// Outcome of a single gate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub blocked: bool,
    pub message: String,
    pub gate_name: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    pub escalation: Escalation,
}

impl GateResult {
    pub fn pass(gate_name: &str) -> Self {
        Self {
            blocked: false,
            message: String::new(),
            gate_name: gate_name.to_string(),
            severity: Severity::Info,
            duration_ms: None,
            metadata: HashMap::new(),
            escalation: Escalation::Allow,
        }
    }

    pub fn block(gate_name: &str, message: impl Into<String>) -> Self {
        Self {
            blocked: true,
            message: message.into(),
            gate_name: gate_name.to_string(),
            severity: Severity::Error,
            duration_ms: None,
            metadata: HashMap::new(),
            escalation: Escalation::Block,
        }
    }

    pub fn warn(gate_name: &str, message: impl Into<String>) -> Self {
        Self {
            blocked: false,
            message: message.into(),
            gate_name: gate_name.to_string(),
            severity: Severity::Warn,
            duration_ms: None,
            metadata: HashMap::new(),
            escalation: Escalation::Warn,
        }
    }

    pub fn ask(gate_name: &str, message: impl Into<String>) -> Self {
        Self {
            blocked: false,
            message: message.into(),
            gate_name: gate_name.to_string(),
            severity: Severity::Warn,
            duration_ms: None,
            metadata: HashMap::new(),
            escalation: Escalation::Ask,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warn && !self.blocked
    }

    /// Host-facing decision for this result, if any. `Warn` and `Allow`
    /// produce no hook output and the tool call proceeds.
    pub fn to_hook_decision(&self) -> Option<HookDecision> {
        match self.escalation {
            Escalation::Block => Some(HookDecision::deny(&self.message)),
            Escalation::Ask => Some(HookDecision::ask()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Deny,
    Ask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSpecificOutput {
    #[serde(rename = "permissionDecision")]
    pub permission_decision: PermissionDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The JSON document written to stdout when a pre-tool decision is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDecision {
    #[serde(rename = "hookSpecificOutput")]
    pub hook_specific_output: HookSpecificOutput,
}

impl HookDecision {
    pub fn deny(reason: &str) -> Self {
        Self {
            hook_specific_output: HookSpecificOutput {
                permission_decision: PermissionDecision::Deny,
                reason: Some(reason.to_string()),
            },
        }
    }

    pub fn ask() -> Self {
        Self {
            hook_specific_output: HookSpecificOutput {
                permission_decision: PermissionDecision::Ask,
                reason: None,
            },
        }
    }
}

/// Retention priority of an observation in the capture queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Med,
    Low,
}

/// Compressed record of one tool call, appended as a single JSONL line to
/// the capture queue and later drained into the `observations` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub tool: String,
    pub ts: f64,
    pub session_id: String,
    #[serde(default)]
    pub key_fields: HashMap<String, String>,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(rename = "_obs_hash", skip_serializing_if = "Option::is_none")]
    pub obs_hash: Option<String>,
}
