//! WebSocket connection management, rooms, heartbeat and message dispatch.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod lifecycle;
pub mod rooms;
pub mod session;
