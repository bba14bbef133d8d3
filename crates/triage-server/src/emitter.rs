//! Staged analysis runs reported as room broadcasts.
//!
//! A run reports `started`, then one `processing` event per analyzer stage,
//! then exactly one terminal event: `analysis_complete` on success or
//! `error{message: "Analysis failed"}` on any fault. A fault while starting
//! the analyzer, an `Err` stage, and a panic while polling are all handled
//! here and never escape [`TaskProgressEmitter::start_task`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures::{FutureExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tracing::{Instrument, debug, error, info, info_span, warn};
use triage_analysis::Analyzer;
use triage_core::clock::RunClock;
use triage_core::events::{
    ANALYSIS_FAILED_MESSAGE, ANALYSIS_FINISHED_MESSAGE, ANALYSIS_STARTED_MESSAGE,
    AUTH_REQUIRED_MESSAGE, AnalysisUpdate, CompletionStatus, Event, EventPayload,
};
use triage_core::messages::AnalysisRequest;
use triage_core::{PrincipalId, RunId, TriageError};
use triage_settings::UnauthenticatedReply;

use crate::metrics::{ANALYSIS_RUNS_ACTIVE, ANALYSIS_RUNS_TOTAL, ANALYSIS_RUN_DURATION_SECONDS};
use crate::websocket::connection::ClientConnection;
use crate::websocket::rooms::RoomRegistry;

/// How a call to [`TaskProgressEmitter::start_task`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// All stages ran; `analysis_complete` was sent.
    Completed,
    /// The run faulted; `error{Analysis failed}` was sent.
    Failed,
    /// No principal; no work was done.
    Rejected,
}

impl RunOutcome {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

struct TaskRun {
    id: RunId,
    principal: PrincipalId,
    stages_done: usize,
    clock: RunClock,
    started_at: Instant,
}

impl TaskRun {
    fn new(principal: PrincipalId) -> Self {
        Self {
            id: RunId::new(),
            principal,
            stages_done: 0,
            clock: RunClock::new(),
            started_at: Instant::now(),
        }
    }

    fn emit(&mut self, rooms: &RoomRegistry, payload: EventPayload) -> usize {
        let event = self.clock.stamp(payload);
        rooms.broadcast(&self.principal, &event)
    }
}

/// Runs analyses and reports progress to the requesting principal's room.
pub struct TaskProgressEmitter {
    rooms: Arc<RoomRegistry>,
    analyzer: Arc<dyn Analyzer>,
    unauthenticated_reply: UnauthenticatedReply,
    active_runs: AtomicUsize,
}

impl TaskProgressEmitter {
    /// Create an emitter.
    pub fn new(
        rooms: Arc<RoomRegistry>,
        analyzer: Arc<dyn Analyzer>,
        unauthenticated_reply: UnauthenticatedReply,
    ) -> Self {
        Self {
            rooms,
            analyzer,
            unauthenticated_reply,
            active_runs: AtomicUsize::new(0),
        }
    }

    /// Runs currently in flight.
    pub fn active_runs(&self) -> usize {
        self.active_runs.load(Ordering::Relaxed)
    }

    /// Run one analysis for `principal`.
    ///
    /// `origin` is the connection that asked; it only matters when there is
    /// no principal and the reply policy is `unicast`.
    pub async fn start_task(
        &self,
        principal: Option<&PrincipalId>,
        request: AnalysisRequest,
        origin: Option<&ClientConnection>,
    ) -> RunOutcome {
        let Some(principal) = principal.filter(|p| !p.is_empty()) else {
            self.reject_unauthenticated(origin);
            counter!(ANALYSIS_RUNS_TOTAL, "outcome" => RunOutcome::Rejected.as_str()).increment(1);
            return RunOutcome::Rejected;
        };

        let run = TaskRun::new(principal.clone());
        let span = info_span!("analysis_run", run_id = %run.id, %principal, analyzer = self.analyzer.name());
        self.execute(run, request).instrument(span).await
    }

    async fn execute(&self, mut run: TaskRun, request: AnalysisRequest) -> RunOutcome {
        let _ = self.active_runs.fetch_add(1, Ordering::Relaxed);
        gauge!(ANALYSIS_RUNS_ACTIVE).increment(1.0);
        info!(language = %request.language, "analysis started");

        let _ = run.emit(
            &self.rooms,
            EventPayload::AnalysisUpdate(AnalysisUpdate::Started {
                message: ANALYSIS_STARTED_MESSAGE.into(),
            }),
        );

        let driven = AssertUnwindSafe(self.drive(&mut run, &request))
            .catch_unwind()
            .await;
        let fault = match driven {
            Ok(Ok(())) => None,
            Ok(Err(fault)) => Some(fault),
            Err(panic) => Some(TriageError::from_panic(panic.as_ref())),
        };

        let outcome = match fault {
            None => {
                let _ = run.emit(
                    &self.rooms,
                    EventPayload::AnalysisComplete {
                        status: CompletionStatus::Complete,
                        message: ANALYSIS_FINISHED_MESSAGE.into(),
                    },
                );
                info!(stages = run.stages_done, "analysis finished");
                RunOutcome::Completed
            }
            Some(fault) => {
                error!(stages = run.stages_done, code = fault.code(), error = %fault, "analysis failed");
                let _ = run.emit(
                    &self.rooms,
                    EventPayload::Error {
                        message: ANALYSIS_FAILED_MESSAGE.into(),
                        details: Some(fault.to_string()),
                    },
                );
                RunOutcome::Failed
            }
        };

        let _ = self.active_runs.fetch_sub(1, Ordering::Relaxed);
        gauge!(ANALYSIS_RUNS_ACTIVE).decrement(1.0);
        counter!(ANALYSIS_RUNS_TOTAL, "outcome" => outcome.as_str()).increment(1);
        histogram!(ANALYSIS_RUN_DURATION_SECONDS).record(run.started_at.elapsed().as_secs_f64());
        outcome
    }

    async fn drive(&self, run: &mut TaskRun, request: &AnalysisRequest) -> Result<(), TriageError> {
        let mut stages = self
            .analyzer
            .analyze(request)
            .await
            .map_err(TriageError::computation)?;

        while let Some(item) = stages.next().await {
            let stage = item.map_err(TriageError::computation)?;
            run.stages_done += 1;
            debug!(stage = run.stages_done, progress = stage.progress, "stage finished");
            let _ = run.emit(
                &self.rooms,
                EventPayload::AnalysisUpdate(AnalysisUpdate::Processing {
                    progress: stage.progress,
                    detail: stage.detail,
                }),
            );
        }
        Ok(())
    }

    fn reject_unauthenticated(&self, origin: Option<&ClientConnection>) {
        match (self.unauthenticated_reply, origin) {
            (UnauthenticatedReply::Unicast, Some(conn)) => {
                let sent = conn.send_event(&Event::error(AUTH_REQUIRED_MESSAGE, None));
                warn!(connection_id = %conn.id, sent, "analysis requested without principal");
            }
            _ => warn!("analysis requested without principal, dropping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use triage_analysis::{AnalysisError, AnalysisResult, SimulatedAnalyzer, Stage, StageStream};
    use triage_core::ConnectionId;

    /// Yields `ok_stages` stages, then fails or panics.
    struct Faulty {
        ok_stages: u8,
        panic: bool,
    }

    #[async_trait]
    impl Analyzer for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        async fn analyze(&self, _request: &AnalysisRequest) -> AnalysisResult<StageStream> {
            let ok_stages = self.ok_stages;
            let panic = self.panic;
            Ok(Box::pin(async_stream::stream! {
                for i in 1..=ok_stages {
                    yield Ok(Stage::at(i * 25));
                }
                if panic {
                    panic!("model crashed");
                } else {
                    yield Err(AnalysisError::Stage {
                        stage: usize::from(ok_stages) + 1,
                        message: "classifier failed".into(),
                    });
                }
            }))
        }
    }

    struct Unavailable;

    #[async_trait]
    impl Analyzer for Unavailable {
        fn name(&self) -> &str {
            "unavailable"
        }

        async fn analyze(&self, _request: &AnalysisRequest) -> AnalysisResult<StageStream> {
            Err(AnalysisError::Unavailable("no backend".into()))
        }
    }

    struct Fixture {
        emitter: TaskProgressEmitter,
        conn: Arc<ClientConnection>,
        rx: mpsc::Receiver<Arc<String>>,
    }

    fn fixture(analyzer: Arc<dyn Analyzer>, reply: UnauthenticatedReply) -> Fixture {
        let rooms = Arc::new(RoomRegistry::new());
        let (tx, rx) = mpsc::channel(64);
        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
        let _ = rooms.join(&alice(), &conn);
        Fixture {
            emitter: TaskProgressEmitter::new(rooms, analyzer, reply),
            conn,
            rx,
        }
    }

    fn alice() -> PrincipalId {
        PrincipalId::from("alice")
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::new("cough", "english")
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<Event> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|frame| Event::from_json(&frame).unwrap())
            .collect()
    }

    fn describe(event: &Event) -> String {
        match &event.payload {
            EventPayload::AnalysisUpdate(AnalysisUpdate::Started { .. }) => "started".into(),
            EventPayload::AnalysisUpdate(AnalysisUpdate::Processing { progress, .. }) => {
                format!("processing({progress})")
            }
            EventPayload::AnalysisComplete { .. } => "complete".into(),
            EventPayload::Error { message, .. } => format!("error({message})"),
            EventPayload::ConnectionResponse { .. } => "connection".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn successful_run_sequence() {
        let mut f = fixture(
            Arc::new(SimulatedAnalyzer::new(3, Duration::from_millis(500))),
            UnauthenticatedReply::Drop,
        );
        let outcome = f.emitter.start_task(Some(&alice()), request(), None).await;
        assert_eq!(outcome, RunOutcome::Completed);

        let events = drain(&mut f.rx);
        let seq: Vec<_> = events.iter().map(describe).collect();
        assert_eq!(
            seq,
            ["started", "processing(25)", "processing(50)", "processing(75)", "complete"]
        );
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(f.emitter.active_runs(), 0);
    }

    #[tokio::test]
    async fn stage_error_ends_with_single_failure() {
        let mut f = fixture(
            Arc::new(Faulty { ok_stages: 1, panic: false }),
            UnauthenticatedReply::Drop,
        );
        let outcome = f.emitter.start_task(Some(&alice()), request(), None).await;
        assert_eq!(outcome, RunOutcome::Failed);

        let events = drain(&mut f.rx);
        let seq: Vec<_> = events.iter().map(describe).collect();
        assert_eq!(seq, ["started", "processing(25)", "error(Analysis failed)"]);
        match &events[2].payload {
            EventPayload::Error { details, .. } => {
                assert_eq!(details.as_deref(), Some("stage 2 failed: classifier failed"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn panic_while_polling_is_contained() {
        let mut f = fixture(
            Arc::new(Faulty { ok_stages: 2, panic: true }),
            UnauthenticatedReply::Drop,
        );
        let outcome = f.emitter.start_task(Some(&alice()), request(), None).await;
        assert_eq!(outcome, RunOutcome::Failed);

        let seq: Vec<_> = drain(&mut f.rx).iter().map(describe).collect();
        assert_eq!(
            seq,
            ["started", "processing(25)", "processing(50)", "error(Analysis failed)"]
        );
        assert_eq!(f.emitter.active_runs(), 0);
    }

    #[tokio::test]
    async fn failure_to_start_is_reported() {
        let mut f = fixture(Arc::new(Unavailable), UnauthenticatedReply::Drop);
        let outcome = f.emitter.start_task(Some(&alice()), request(), None).await;
        assert_eq!(outcome, RunOutcome::Failed);
        let seq: Vec<_> = drain(&mut f.rx).iter().map(describe).collect();
        assert_eq!(seq, ["started", "error(Analysis failed)"]);
    }

    #[tokio::test]
    async fn missing_principal_is_dropped_by_default() {
        let mut f = fixture(Arc::new(SimulatedAnalyzer::new(1, Duration::ZERO)), UnauthenticatedReply::Drop);
        let outcome = f.emitter.start_task(None, request(), Some(f.conn.as_ref())).await;
        assert_eq!(outcome, RunOutcome::Rejected);
        assert!(drain(&mut f.rx).is_empty());
    }

    #[tokio::test]
    async fn blank_principal_counts_as_missing() {
        let mut f = fixture(Arc::new(SimulatedAnalyzer::new(1, Duration::ZERO)), UnauthenticatedReply::Drop);
        let blank = PrincipalId::from("  ");
        let outcome = f.emitter.start_task(Some(&blank), request(), None).await;
        assert_eq!(outcome, RunOutcome::Rejected);
        assert!(drain(&mut f.rx).is_empty());
    }

    #[tokio::test]
    async fn missing_principal_unicast_reply() {
        let mut f = fixture(Arc::new(SimulatedAnalyzer::new(1, Duration::ZERO)), UnauthenticatedReply::Unicast);
        let outcome = f.emitter.start_task(None, request(), Some(f.conn.as_ref())).await;
        assert_eq!(outcome, RunOutcome::Rejected);
        let seq: Vec<_> = drain(&mut f.rx).iter().map(describe).collect();
        assert_eq!(seq, ["error(Authentication required)"]);
    }

    #[tokio::test]
    async fn other_principals_see_nothing() {
        let mut f = fixture(Arc::new(SimulatedAnalyzer::new(3, Duration::ZERO)), UnauthenticatedReply::Drop);
        let bob = PrincipalId::from("bob");
        let outcome = f.emitter.start_task(Some(&bob), request(), None).await;
        assert_eq!(outcome, RunOutcome::Completed);
        assert!(drain(&mut f.rx).is_empty());
    }
}
