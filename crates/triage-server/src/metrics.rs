//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Fails if a
/// global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections accepted total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Handshakes refused total (counter, labels: reason).
pub const WS_REJECTIONS_TOTAL: &str = "ws_rejections_total";
/// Events dropped because a connection's queue was full or closed (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Analysis runs total (counter, labels: outcome).
pub const ANALYSIS_RUNS_TOTAL: &str = "analysis_runs_total";
/// Analysis runs in flight (gauge).
pub const ANALYSIS_RUNS_ACTIVE: &str = "analysis_runs_active";
/// Analysis run duration seconds (histogram).
pub const ANALYSIS_RUN_DURATION_SECONDS: &str = "analysis_run_duration_seconds";
/// Faults caught by the error boundary (counter, labels: class).
pub const BOUNDARY_FAULTS_TOTAL: &str = "boundary_faults_total";
