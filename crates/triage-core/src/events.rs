//! Outbound event types.
//!
//! Every event a client can observe is one [`EventPayload`] variant with a
//! fixed field set, wrapped in an [`Event`] that carries the emission time.
//!
//! Wire format (one JSON text frame per event):
//!
//! ```json
//! {"event": "analysis_update", "data": {"status": "processing", "progress": 25, "timestamp": "2026-01-01T00:00:00.000Z"}}
//! ```
//!
//! The timestamp lives inside `data` next to the variant's own fields.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, TriageError};

/// Message sent with `analysis_update{status: started}`.
pub const ANALYSIS_STARTED_MESSAGE: &str = "Analyzing symptoms...";
/// Message sent with `analysis_complete`.
pub const ANALYSIS_FINISHED_MESSAGE: &str = "Analysis finished";
/// Message of the error event for a run that faulted.
pub const ANALYSIS_FAILED_MESSAGE: &str = "Analysis failed";
/// Message of the error event for a request without a principal.
pub const AUTH_REQUIRED_MESSAGE: &str = "Authentication required";
/// Message of the error event raised by the error boundary.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred";

/// Connection lifecycle status reported in `connection_response`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// A connection of the principal joined.
    Connected,
    /// A connection of the principal left.
    Disconnected,
}

/// Progress report for a running analysis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisUpdate {
    /// The run was accepted.
    Started {
        /// Human-readable status line.
        message: String,
    },
    /// One stage finished.
    Processing {
        /// Percentage reported by the stage.
        progress: u8,
        /// Optional stage payload from the analyzer.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<Value>,
    },
}

/// Terminal status of a successful run. Single-valued on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// The run finished normally.
    #[default]
    Complete,
}

/// Event body, one variant per event kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// A connection of the principal joined or left.
    ConnectionResponse {
        /// Joined or left.
        status: ConnectionStatus,
    },
    /// Run accepted or stage progress.
    AnalysisUpdate(AnalysisUpdate),
    /// Run finished normally.
    AnalysisComplete {
        /// Always `complete`.
        status: CompletionStatus,
        /// Human-readable status line.
        message: String,
    },
    /// Something went wrong.
    Error {
        /// Short, stable description.
        message: String,
        /// Fault description, when available.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

/// Event kind discriminant, used for logs and metric labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `connection_response`
    ConnectionResponse,
    /// `analysis_update`
    AnalysisUpdate,
    /// `analysis_complete`
    AnalysisComplete,
    /// `error`
    Error,
}

impl EventKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionResponse => "connection_response",
            Self::AnalysisUpdate => "analysis_update",
            Self::AnalysisComplete => "analysis_complete",
            Self::Error => "error",
        }
    }
}

impl EventPayload {
    /// Kind of this payload.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionResponse { .. } => EventKind::ConnectionResponse,
            Self::AnalysisUpdate(_) => EventKind::AnalysisUpdate,
            Self::AnalysisComplete { .. } => EventKind::AnalysisComplete,
            Self::Error { .. } => EventKind::Error,
        }
    }

    /// Whether this payload ends a task run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AnalysisComplete { .. } | Self::Error { .. })
    }
}

/// A timestamped outbound event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Kind-specific body.
    pub payload: EventPayload,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Stamp a payload with the current time.
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self::at(payload, Utc::now())
    }

    /// Stamp a payload with an explicit time.
    #[must_use]
    pub fn at(payload: EventPayload, timestamp: DateTime<Utc>) -> Self {
        Self { payload, timestamp }
    }

    /// `connection_response{status: connected}`.
    #[must_use]
    pub fn connected() -> Self {
        Self::new(EventPayload::ConnectionResponse {
            status: ConnectionStatus::Connected,
        })
    }

    /// `connection_response{status: disconnected}`.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::new(EventPayload::ConnectionResponse {
            status: ConnectionStatus::Disconnected,
        })
    }

    /// `error{message, details?}`.
    #[must_use]
    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        Self::new(EventPayload::Error {
            message: message.into(),
            details,
        })
    }

    /// Kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Timestamp rendered the way it appears on the wire.
    #[must_use]
    pub fn timestamp_string(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    /// Encode as a wire frame.
    pub fn to_json(&self) -> Result<String> {
        let mut value = serde_json::to_value(&self.payload)?;
        match value.get_mut("data").and_then(Value::as_object_mut) {
            Some(data) => {
                let _ = data.insert("timestamp".into(), Value::String(self.timestamp_string()));
            }
            None => {
                return Err(TriageError::Unhandled(format!(
                    "event {} has no data object",
                    self.kind().as_str()
                )));
            }
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// Decode a wire frame produced by [`Event::to_json`].
    pub fn from_json(text: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(text)?;
        let raw_ts = value
            .get_mut("data")
            .and_then(Value::as_object_mut)
            .and_then(|data| data.remove("timestamp"))
            .ok_or_else(|| TriageError::InvalidMessage("event frame has no timestamp".into()))?;
        let raw_ts = raw_ts
            .as_str()
            .ok_or_else(|| TriageError::InvalidMessage("timestamp is not a string".into()))?;
        let timestamp = DateTime::parse_from_rfc3339(raw_ts)
            .map_err(|e| TriageError::InvalidMessage(format!("invalid timestamp: {e}")))?
            .with_timezone(&Utc);
        let payload: EventPayload = serde_json::from_value(value)?;
        Ok(Self { payload, timestamp })
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
