//! Engine settings with YAML load/save.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Tunable knobs for the scheduler and repair loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Main-loop idle poll interval in milliseconds; deadlock re-checks and
    /// throttled checkpoint flushes happen at this cadence.
    pub poll_ms: u64,
    /// Minimum interval between throttled checkpoint writes, in milliseconds.
    /// Terminal-state writes ignore this.
    pub checkpoint_interval_ms: u64,
    /// Maximum number of repair rounds before a failed run is final.
    pub max_repair_rounds: u32,
    /// How many forced re-prompts a capability-violating action gets.
    pub capability_reprompts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            poll_ms: 100,
            checkpoint_interval_ms: 2_000,
            max_repair_rounds: 3,
            capability_reprompts: 1,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        serde_yaml::from_str(&content).map_err(|e| format!("bad settings file: {}", e))
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content =
            serde_yaml::to_string(self).map_err(|e| format!("cannot serialize settings: {}", e))?;
        std::fs::write(path, content).map_err(|e| format!("cannot write {}: {}", path.display(), e))
    }
}
