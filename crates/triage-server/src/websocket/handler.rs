//! Inbound frame dispatch.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;
use triage_core::messages::ClientMessage;
use triage_core::Result;

use super::connection::ClientConnection;
use crate::boundary::ErrorBoundary;
use crate::emitter::{RunOutcome, TaskProgressEmitter};

/// Work started by an inbound frame.
#[derive(Debug)]
pub enum Dispatched {
    /// A spawned analysis run. Resolves to `None` if the run itself faulted
    /// outside the emitter's own handling.
    AnalysisRun(JoinHandle<Option<RunOutcome>>),
}

/// Decodes inbound frames and starts the requested work.
pub struct MessageHandler {
    emitter: Arc<TaskProgressEmitter>,
    boundary: Arc<ErrorBoundary>,
    default_language: String,
}

impl MessageHandler {
    /// Create a handler.
    pub fn new(
        emitter: Arc<TaskProgressEmitter>,
        boundary: Arc<ErrorBoundary>,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            emitter,
            boundary,
            default_language: default_language.into(),
        }
    }

    /// Handle one text frame from `connection`.
    ///
    /// Analysis runs are spawned so the caller can keep reading frames. A
    /// frame that does not decode is returned as an error for the caller's
    /// boundary to report.
    pub fn handle(&self, text: &str, connection: &Arc<ClientConnection>) -> Result<Dispatched> {
        let message = ClientMessage::parse(text)?;
        debug!(connection_id = %connection.id, message = message.name(), "dispatching message");

        match message {
            ClientMessage::StartAnalysis(params) => {
                let request = params.into_request(&self.default_language);
                let emitter = Arc::clone(&self.emitter);
                let boundary = Arc::clone(&self.boundary);
                let origin = Arc::clone(connection);
                let run = tokio::spawn(async move {
                    let principal = origin.principal();
                    boundary
                        .guard(principal, async {
                            Ok(emitter.start_task(principal, request, Some(&origin)).await)
                        })
                        .await
                });
                Ok(Dispatched::AnalysisRun(run))
            }
        }
    }
}
