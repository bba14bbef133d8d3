//! `TriageServer`: Axum HTTP + WebSocket server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use triage_analysis::Analyzer;
use triage_core::TriageError;

use crate::boundary::ErrorBoundary;
use crate::config::ServerConfig;
use crate::emitter::TaskProgressEmitter;
use crate::health::{self, HealthCounters, HealthResponse};
use crate::identity::{HandshakeContext, IdentityResolver};
use crate::metrics::WS_REJECTIONS_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::MessageHandler;
use crate::websocket::lifecycle::ConnectionLifecycle;
use crate::websocket::rooms::RoomRegistry;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Principal-keyed rooms.
    pub rooms: Arc<RoomRegistry>,
    /// Connection lifecycle manager.
    pub lifecycle: Arc<ConnectionLifecycle>,
    /// Analysis run driver.
    pub emitter: Arc<TaskProgressEmitter>,
    /// Collaborators handed to each session.
    pub session: Arc<SessionContext>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Triage server.
pub struct TriageServer {
    state: AppState,
}

impl TriageServer {
    /// Wire the server's components together.
    pub fn new(
        config: ServerConfig,
        resolver: Arc<dyn IdentityResolver>,
        analyzer: Arc<dyn Analyzer>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let lifecycle = Arc::new(
            ConnectionLifecycle::new(Arc::clone(&rooms), resolver)
                .with_max_connections(config.max_connections),
        );
        let boundary = Arc::new(ErrorBoundary::new(Arc::clone(&rooms)));
        let emitter = Arc::new(TaskProgressEmitter::new(
            Arc::clone(&rooms),
            analyzer,
            config.unauthenticated_reply,
        ));
        let handler = Arc::new(MessageHandler::new(
            Arc::clone(&emitter),
            Arc::clone(&boundary),
            config.default_language.clone(),
        ));
        let session = Arc::new(SessionContext {
            lifecycle: Arc::clone(&lifecycle),
            handler,
            boundary,
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            shutdown: shutdown.token(),
        });

        Self {
            state: AppState {
                config: Arc::new(config),
                rooms,
                lifecycle,
                emitter,
                session,
                shutdown,
                start_time: Instant::now(),
                metrics,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            TcpListener::bind((self.state.config.host.as_str(), self.state.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.state.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(error) = served {
                error!(%error, "server terminated with error");
            }
        });

        info!(%addr, "triage server listening");
        Ok((addr, handle))
    }

    /// Principal-keyed rooms.
    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.state.rooms
    }

    /// Connection lifecycle manager.
    pub fn lifecycle(&self) -> &Arc<ConnectionLifecycle> {
        &self.state.lifecycle
    }

    /// Analysis run driver.
    pub fn emitter(&self) -> &Arc<TaskProgressEmitter> {
        &self.state.emitter
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let counters = HealthCounters {
        connections: state.lifecycle.open_connections(),
        rooms: state.rooms.room_count(),
        active_runs: state.emitter.active_runs(),
    };
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        counters,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /ws
///
/// Identity is resolved before the upgrade: an anonymous handshake gets
/// `401` and never becomes a session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        counter!(WS_REJECTIONS_TOTAL, "reason" => "shutting_down").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }

    let handshake = HandshakeContext::new(headers, query);
    let (tx, rx) = mpsc::channel(state.config.send_queue_capacity);
    let connection = match state.lifecycle.open(&handshake, tx).await {
        Ok(connection) => connection,
        Err(error @ TriageError::CapacityExceeded { .. }) => {
            return (StatusCode::SERVICE_UNAVAILABLE, error.to_string()).into_response();
        }
        Err(error) => return (StatusCode::UNAUTHORIZED, error.to_string()).into_response(),
    };

    let lifecycle = Arc::clone(&state.lifecycle);
    let failed = Arc::clone(&connection);
    let session = Arc::clone(&state.session);
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |error| {
            warn!(connection_id = %failed.id, %error, "websocket upgrade failed");
            let _ = lifecycle.close(&failed);
        })
        .on_upgrade(move |socket| run_ws_session(socket, connection, rx, session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TokenIdentityResolver;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;
    use triage_analysis::SimulatedAnalyzer;

    fn make_server(config: ServerConfig) -> TriageServer {
        let resolver = TokenIdentityResolver::new(HashMap::from([(
            "tok".to_string(),
            "alice".to_string(),
        )]));
        TriageServer::new(
            config,
            Arc::new(resolver),
            Arc::new(SimulatedAnalyzer::new(3, Duration::ZERO)),
            None,
        )
    }

    async fn get(app: Router, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(req).await.unwrap()
    }

    #[test]
    fn components_start_empty() {
        let server = make_server(ServerConfig::default());
        assert_eq!(server.rooms().room_count(), 0);
        assert_eq!(server.lifecycle().open_connections(), 0);
        assert_eq!(server.emitter().active_runs(), 0);
        assert!(!server.shutdown().is_shutting_down());
        assert_eq!(server.config().port, 0);
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server(ServerConfig::default());
        let resp = get(server.router(), "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["rooms"], 0);
        assert_eq!(parsed["active_runs"], 0);
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let server = make_server(ServerConfig::default());
        server.shutdown().shutdown();
        let resp = get(server.router(), "/health").await;
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "shutting_down");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server(ServerConfig::default());
        let resp = get(server.router(), "/metrics").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_route_exists() {
        let server = make_server(ServerConfig::default());
        let resp = get(server.router(), "/ws").await;
        assert_ne!(resp.status(), StatusCode::NOT_FOUND);
        assert_ne!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server(ServerConfig::default());
        let resp = get(server.router(), "/nonexistent").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let server = make_server(ServerConfig::default());
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
