//! Analysis run settings.

use serde::{Deserialize, Serialize};

/// Upper bound on stages; progress is reported in whole percents.
pub const MAX_STAGES: u8 = 99;

/// Settings for the staged analysis run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisSettings {
    /// Number of evenly spaced progress stages before completion.
    pub stages: u8,
    /// Pause before each stage, in milliseconds.
    pub stage_delay_ms: u64,
    /// Language used when a request omits one.
    pub default_language: String,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            stages: 3,
            stage_delay_ms: 500,
            default_language: "english".to_string(),
        }
    }
}
