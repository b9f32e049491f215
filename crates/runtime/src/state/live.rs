//! LIVE_STATE toggles and boot context.
//!
//! A hand-edited JSON document holding boolean feature toggles consumed by
//! the mentor system plus free-form context strings used by the boot
//! queries. Unrecognised keys are ignored.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LiveState {
    pub mentor_hindsight_gate: bool,
    /// Master switch: turns every mentor module on.
    pub mentor_all: bool,
    pub mentor_outcome_chains: bool,
    pub mentor_memory: bool,
    pub mentor_analytics: bool,
    pub tg_mirror_messages: bool,

    // Boot context, composed into the project-context query at start.
    pub project: String,
    pub feature: String,
    pub what_was_done: String,
    pub next_steps: Vec<String>,
}

impl LiveState {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn hindsight_enabled(&self) -> bool {
        self.mentor_hindsight_gate || self.mentor_all
    }

    pub fn outcome_chains_enabled(&self) -> bool {
        self.mentor_outcome_chains || self.mentor_all
    }

    pub fn mentor_memory_enabled(&self) -> bool {
        self.mentor_memory || self.mentor_all
    }

    pub fn analytics_enabled(&self) -> bool {
        self.mentor_analytics || self.mentor_all
    }
}
