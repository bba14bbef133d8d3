//! Simulated analyzer used until a real backend is wired in.
//!
//! Emits `stages` evenly spaced progress reports (25/50/75 for three stages),
//! pausing `delay` before each one. The pause is a `tokio` timer, so a run
//! never occupies a worker thread while it waits.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use triage_core::messages::AnalysisRequest;
use triage_settings::AnalysisSettings;

use crate::analyzer::{Analyzer, Stage, StageStream};
use crate::errors::AnalysisResult;

/// Paced, always-successful analyzer.
#[derive(Clone, Debug)]
pub struct SimulatedAnalyzer {
    stages: u8,
    delay: Duration,
}

impl SimulatedAnalyzer {
    /// Create an analyzer with an explicit stage count and delay.
    pub fn new(stages: u8, delay: Duration) -> Self {
        Self {
            stages: stages.max(1),
            delay,
        }
    }

    /// Build from analysis settings.
    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        Self::new(
            settings.stages,
            Duration::from_millis(settings.stage_delay_ms),
        )
    }

    /// Progress values this analyzer reports, in order.
    pub fn progress_points(&self) -> Vec<u8> {
        (1..=self.stages)
            .map(|i| evenly_spaced(i, self.stages))
            .collect()
    }
}

impl Default for SimulatedAnalyzer {
    fn default() -> Self {
        Self::from_settings(&AnalysisSettings::default())
    }
}

/// Percentage after stage `i` of `stages`, leaving room for completion.
#[allow(clippy::cast_possible_truncation)]
fn evenly_spaced(i: u8, stages: u8) -> u8 {
    (u16::from(i) * 100 / (u16::from(stages) + 1)) as u8
}

#[async_trait]
impl Analyzer for SimulatedAnalyzer {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult<StageStream> {
        debug!(
            language = %request.language,
            symptoms_len = request.symptoms.len(),
            stages = self.stages,
            "starting simulated analysis"
        );
        let points = self.progress_points();
        let delay = self.delay;
        Ok(Box::pin(async_stream::stream! {
            for progress in points {
                tokio::time::sleep(delay).await;
                yield Ok(Stage::at(progress));
            }
        }))
    }
}
