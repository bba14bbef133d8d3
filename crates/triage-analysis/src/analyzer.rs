//! The analyzer contract.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use triage_core::messages::AnalysisRequest;

use crate::errors::{AnalysisError, AnalysisResult};

/// One unit of incremental progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Percentage complete after this stage.
    pub progress: u8,
    /// Optional stage output forwarded to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Stage {
    /// Stage with progress only.
    pub fn at(progress: u8) -> Self {
        Self {
            progress,
            detail: None,
        }
    }
}

/// Boxed lazy stage sequence returned by [`Analyzer::analyze`].
///
/// An `Err` item ends the run; items after it are never polled.
pub type StageStream = Pin<Box<dyn Stream<Item = Result<Stage, AnalysisError>> + Send>>;

/// Produces the staged output for one analysis request.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Start an analysis. Stages are produced lazily as the stream is polled.
    async fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult<StageStream>;
}
