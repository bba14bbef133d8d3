//! # triage-core
//!
//! Foundation types shared by every Triage crate:
//!
//! - **Branded IDs**: `PrincipalId`, `ConnectionId`, `RunId` as newtypes for type safety
//! - **Events**: [`events::Event`] with one tagged variant per outbound event kind
//! - **Inbound messages**: [`messages::ClientMessage`] and [`messages::AnalysisRequest`]
//! - **Clock**: [`clock::RunClock`] for non-decreasing timestamps within a task run
//! - **Errors**: [`errors::TriageError`] via `thiserror`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;

pub use errors::{Result, TriageError};
pub use ids::{ConnectionId, PrincipalId, RunId};
