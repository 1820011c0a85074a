//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime knobs for the page engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fallback poll interval for title enforcement, in milliseconds
    pub poll_interval_ms: u64,

    /// Move a matched rule into the first-evaluated slot of the stored list
    pub promote_on_match: bool,

    /// Only evaluate rules on `http`/`https` pages
    pub web_only: bool,

    /// Reapply a tab's last applied rule on the next page view of that tab
    pub restore_on_reload: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            promote_on_match: false,
            web_only: true,
            restore_on_reload: true,
        }
    }
}

impl EngineConfig {
    /// Poll interval, clamped to at least one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
