//! Error hierarchy for the Triage server.
//!
//! Faults fall into three classes (see [`FaultClass`]):
//!
//! - **`AuthRequired`**: an action needing a principal was attempted without one
//! - **`ComputationFault`**: the analysis collaborator failed mid-run; caught by
//!   the task progress emitter
//! - **`UnhandledFault`**: anything else; caught by the error boundary

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum TriageError {
    /// No principal is associated with the action.
    #[error("Authentication required")]
    AuthRequired,

    /// The analysis collaborator raised during staged execution.
    #[error("{message}")]
    Computation {
        /// Description of the fault, surfaced as event `details`.
        message: String,
    },

    /// An inbound frame could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A lifecycle state change that the state machine does not allow.
    #[error("invalid connection transition: {from} -> {to}")]
    InvalidTransition {
        /// State the connection was in.
        from: &'static str,
        /// State that was requested.
        to: &'static str,
    },

    /// The server is at its connection limit.
    #[error("connection limit reached ({max})")]
    CapacityExceeded {
        /// Configured limit.
        max: usize,
    },

    /// Event (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic fault raised by an event handler.
    #[error("{0}")]
    Unhandled(String),

    /// A handler panicked; carries the panic payload text.
    #[error("handler panicked: {0}")]
    Panic(String),
}

/// Coarse classification of a [`TriageError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// Missing principal.
    AuthRequired,
    /// Analysis collaborator failure.
    ComputationFault,
    /// Anything not caught by a more specific boundary.
    UnhandledFault,
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthRequired => write!(f, "auth_required"),
            Self::ComputationFault => write!(f, "computation_fault"),
            Self::UnhandledFault => write!(f, "unhandled_fault"),
        }
    }
}

impl TriageError {
    /// Build a computation fault from any displayable error.
    #[must_use]
    pub fn computation(err: impl fmt::Display) -> Self {
        Self::Computation {
            message: err.to_string(),
        }
    }

    /// Build a fault from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::Panic(panic_message(payload))
    }

    /// Fault class used for routing and metrics labels.
    #[must_use]
    pub fn class(&self) -> FaultClass {
        match self {
            Self::AuthRequired => FaultClass::AuthRequired,
            Self::Computation { .. } => FaultClass::ComputationFault,
            Self::InvalidMessage(_)
            | Self::InvalidTransition { .. }
            | Self::CapacityExceeded { .. }
            | Self::Serialization(_)
            | Self::Unhandled(_)
            | Self::Panic(_) => FaultClass::UnhandledFault,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::Computation { .. } => "COMPUTATION_FAULT",
            Self::InvalidMessage(_) => "INVALID_MESSAGE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Unhandled(_) => "UNHANDLED_FAULT",
            Self::Panic(_) => "PANIC",
        }
    }
}

/// Extract readable text from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

/// Result alias used across Triage crates.
pub type Result<T> = std::result::Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn auth_required_display_matches_wire_message() {
        assert_eq!(TriageError::AuthRequired.to_string(), "Authentication required");
    }

    #[test]
    fn computation_display_is_bare_message() {
        let err = TriageError::computation("model unavailable");
        assert_eq!(err.to_string(), "model unavailable");
        assert_eq!(err.class(), FaultClass::ComputationFault);
    }

    #[test]
    fn classes() {
        assert_eq!(TriageError::AuthRequired.class(), FaultClass::AuthRequired);
        assert_eq!(
            TriageError::InvalidMessage("x".into()).class(),
            FaultClass::UnhandledFault
        );
        assert_eq!(TriageError::Panic("x".into()).class(), FaultClass::UnhandledFault);
    }

    #[test]
    fn codes_are_screaming_snake_case() {
        let errors = [
            TriageError::AuthRequired,
            TriageError::computation("x"),
            TriageError::InvalidMessage("x".into()),
            TriageError::InvalidTransition {
                from: "closed",
                to: "active",
            },
            TriageError::CapacityExceeded { max: 1 },
            TriageError::Unhandled("x".into()),
            TriageError::Panic("x".into()),
        ];
        for err in errors {
            assert!(
                err.code().chars().all(|c| c.is_ascii_uppercase() || c == '_'),
                "code '{}' must be SCREAMING_SNAKE_CASE",
                err.code()
            );
        }
    }

    #[test]
    fn serde_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: TriageError = json_err.into();
        assert_matches!(err, TriageError::Serialization(_));
    }

    #[test]
    fn panic_payload_str() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }

    #[test]
    fn panic_payload_string() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        let err = TriageError::from_panic(payload.as_ref());
        assert_matches!(err, TriageError::Panic(ref m) if m == "kaboom");
    }

    #[test]
    fn panic_payload_other() {
        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn fault_class_display() {
        assert_eq!(FaultClass::ComputationFault.to_string(), "computation_fault");
    }
}
