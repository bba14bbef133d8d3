//! Per-run timestamp source.

use chrono::{DateTime, Utc};

use crate::events::{Event, EventPayload};

/// Wall clock that never goes backwards within one task run.
///
/// If the system clock steps back between two emissions, the previous
/// timestamp is reused.
#[derive(Debug, Default)]
pub struct RunClock {
    last: Option<DateTime<Utc>>,
}

impl RunClock {
    /// Create a clock with no emissions yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp, never earlier than the previous one.
    pub fn now(&mut self) -> DateTime<Utc> {
        self.observe(Utc::now())
    }

    /// Stamp a payload.
    pub fn stamp(&mut self, payload: EventPayload) -> Event {
        Event::at(payload, self.now())
    }

    fn observe(&mut self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let ts = match self.last {
            Some(last) if last > candidate => last,
            _ => candidate,
        };
        self.last = Some(ts);
        ts
    }
}
