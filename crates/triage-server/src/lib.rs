//! # triage-server
//!
//! Axum HTTP + `WebSocket` server delivering analysis progress to every
//! connection of one authenticated principal.
//!
//! - Identity resolution at handshake time ([`identity`])
//! - Principal-keyed rooms with non-owning membership ([`websocket::rooms`])
//! - Per-connection lifecycle state machine ([`websocket::lifecycle`])
//! - Staged analysis runs reported as room broadcasts ([`emitter`])
//! - Last-resort fault routing for event handlers ([`boundary`])
//! - Health and Prometheus endpoints, graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod boundary;
pub mod config;
pub mod emitter;
pub mod health;
pub mod identity;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
