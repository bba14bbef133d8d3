//! Last-resort fault routing for event handlers.
//!
//! Every inbound-event handler runs inside [`ErrorBoundary::guard`]. A
//! returned error or a panic is logged, counted, and reported to the
//! principal's room as `error{message: "An error occurred", details}`.
//! Without a principal there is no room, so the fault is only logged.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use tracing::{error, warn};
use triage_core::events::{Event, GENERIC_ERROR_MESSAGE};
use triage_core::{PrincipalId, TriageError};

use crate::metrics::BOUNDARY_FAULTS_TOTAL;
use crate::websocket::rooms::RoomRegistry;

/// Catches handler faults and reports them to the affected room.
pub struct ErrorBoundary {
    rooms: Arc<RoomRegistry>,
}

impl ErrorBoundary {
    /// Create a boundary that reports through `rooms`.
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }

    /// Run `handler`, containing any error or panic.
    ///
    /// Returns the handler's value, or `None` if it faulted.
    pub async fn guard<F, T>(&self, principal: Option<&PrincipalId>, handler: F) -> Option<T>
    where
        F: Future<Output = Result<T, TriageError>>,
    {
        match AssertUnwindSafe(handler).catch_unwind().await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(fault)) => {
                let _ = self.report(principal, &fault);
                None
            }
            Err(panic) => {
                let _ = self.report(principal, &TriageError::from_panic(panic.as_ref()));
                None
            }
        }
    }

    /// Log `fault` and broadcast the generic error to the principal's room.
    ///
    /// Returns the number of connections the error reached.
    pub fn report(&self, principal: Option<&PrincipalId>, fault: &TriageError) -> usize {
        counter!(BOUNDARY_FAULTS_TOTAL, "class" => fault.class().to_string()).increment(1);
        error!(
            principal = ?principal.map(PrincipalId::as_str),
            code = fault.code(),
            error = %fault,
            "unhandled fault in event handler"
        );

        match principal.filter(|p| !p.is_empty()) {
            Some(principal) => self.rooms.broadcast(
                principal,
                &Event::error(GENERIC_ERROR_MESSAGE, Some(fault.to_string())),
            ),
            None => {
                warn!(code = fault.code(), "fault without principal, not reported to any room");
                0
            }
        }
    }
}
