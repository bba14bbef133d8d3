//! # triage-analysis
//!
//! The analysis computation is an external collaborator. The server only
//! needs it to turn an [`AnalysisRequest`] into a lazy sequence of
//! [`Stage`]s; this crate defines that contract ([`Analyzer`]) and ships a
//! simulated analyzer that paces evenly spaced stages with a cooperative
//! delay.
//!
//! [`AnalysisRequest`]: triage_core::messages::AnalysisRequest

#![deny(unsafe_code)]

pub mod analyzer;
pub mod errors;
pub mod simulated;

pub use analyzer::{Analyzer, Stage, StageStream};
pub use errors::{AnalysisError, AnalysisResult};
pub use simulated::SimulatedAnalyzer;
