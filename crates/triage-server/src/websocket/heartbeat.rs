//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Shortest timer period; `tokio::time::interval` rejects zero.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Clamp a configured period to [`MIN_TICK`].
pub fn tick_period(period: Duration) -> Duration {
    period.max(MIN_TICK)
}

/// Consecutive silent intervals tolerated before a connection is dead.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = tick_period(interval).as_millis();
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}

/// Watch a connection's liveness flag.
///
/// Each `interval` tick consumes the alive flag. After
/// [`max_missed`]`(interval, timeout)` consecutive ticks without activity
/// the connection is reported dead.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(tick_period(interval));
    let limit = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= limit {
                        return HeartbeatResult::TimedOut;
                    }
                }
                connection.is_alive.store(false, Ordering::Relaxed);
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
