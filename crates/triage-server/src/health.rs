//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Principals with at least one live connection.
    pub rooms: usize,
    /// Analysis runs in flight.
    pub active_runs: usize,
}

/// Live counters sampled for a health response.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCounters {
    /// Open WebSocket connections.
    pub connections: usize,
    /// Non-empty rooms.
    pub rooms: usize,
    /// Analysis runs in flight.
    pub active_runs: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, shutting_down: bool, counters: HealthCounters) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counters.connections,
        rooms: counters.rooms,
        active_runs: counters.active_runs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), false, HealthCounters::default());
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn status_reports_shutdown() {
        let resp = health_check(Instant::now(), true, HealthCounters::default());
        assert_eq!(resp.status, "shutting_down");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, false, HealthCounters::default());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let counters = HealthCounters {
            connections: 3,
            rooms: 2,
            active_runs: 1,
        };
        let json = serde_json::to_value(health_check(Instant::now(), false, counters)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 3);
        assert_eq!(json["rooms"], 2);
        assert_eq!(json["active_runs"], 1);
        assert!(json["uptime_secs"].is_number());
    }
}
