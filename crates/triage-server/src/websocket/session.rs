//! One connected client from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use triage_core::TriageError;

use super::connection::ClientConnection;
use super::handler::MessageHandler;
use super::heartbeat::{HeartbeatResult, run_heartbeat, tick_period};
use super::lifecycle::ConnectionLifecycle;
use crate::boundary::ErrorBoundary;

/// How long the writer gets to flush a close frame after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared collaborators for every session.
pub struct SessionContext {
    /// Lifecycle manager owning room membership.
    pub lifecycle: Arc<ConnectionLifecycle>,
    /// Inbound frame dispatcher.
    pub handler: Arc<MessageHandler>,
    /// Fault reporter for handler invocations.
    pub boundary: Arc<ErrorBoundary>,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before the connection is closed.
    pub heartbeat_timeout: Duration,
    /// Server shutdown token; each session derives a child from it.
    pub shutdown: CancellationToken,
}

/// Run a WebSocket session for an authenticated connection.
///
/// 1. Starts the outbound writer (queued events plus periodic pings)
/// 2. Activates the connection: joins its room and announces it
/// 3. Dispatches inbound frames through the error boundary
/// 4. Closes the connection on client close, heartbeat timeout, or shutdown
#[instrument(skip_all, fields(connection_id = %connection.id, principal = ?connection.principal()))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection: Arc<ClientConnection>,
    send_rx: mpsc::Receiver<Arc<String>>,
    ctx: Arc<SessionContext>,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let principal = connection.principal().cloned();
    let cancel = ctx.shutdown.child_token();

    let outbound = tokio::spawn(write_outbound(
        ws_tx,
        send_rx,
        ctx.heartbeat_interval,
        cancel.clone(),
    ));

    let heartbeat = tokio::spawn({
        let connection = Arc::clone(&connection);
        let cancel = cancel.clone();
        let (interval, timeout) = (ctx.heartbeat_interval, ctx.heartbeat_timeout);
        async move {
            if run_heartbeat(connection, interval, timeout, cancel.clone()).await
                == HeartbeatResult::TimedOut
            {
                warn!(timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "client unresponsive, closing");
                cancel.cancel();
            }
        }
    });

    if let Err(fault) = ctx.lifecycle.activate(&connection) {
        let _ = ctx.boundary.report(principal.as_ref(), &fault);
        cancel.cancel();
    }

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = cancel.cancelled() => break,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(error)) => {
                debug!(%error, "websocket read failed");
                break;
            }
            None => break,
        };
        connection.mark_alive();

        let text = match msg {
            Message::Text(text) => Ok(text.as_str().to_owned()),
            Message::Binary(data) => String::from_utf8(data.to_vec()).map_err(|e| {
                TriageError::InvalidMessage(format!("binary frame is not UTF-8: {e}"))
            }),
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let _ = ctx
            .boundary
            .guard(principal.as_ref(), async {
                let text = text?;
                ctx.handler.handle(&text, &connection)
            })
            .await;
    }

    cancel.cancel();
    let _ = ctx.lifecycle.close(&connection);
    heartbeat.abort();
    let writer = outbound.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, outbound).await.is_err() {
        writer.abort();
    }
}

async fn write_outbound<S>(
    mut ws_tx: S,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    ping_every: Duration,
    cancel: CancellationToken,
) where
    S: futures::Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval(tick_period(ping_every));
    // The first tick completes immediately.
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.as_str().to_owned().into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => {
                while let Ok(text) = send_rx.try_recv() {
                    if ws_tx.send(Message::Text(text.as_str().to_owned().into())).await.is_err() {
                        return;
                    }
                }
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;

    async fn run_writer(
        queued: &[&str],
        cancel_first: bool,
    ) -> Vec<Message> {
        let (sink, stream) = fmpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(16);
        for text in queued {
            tx.try_send(Arc::new((*text).to_owned())).unwrap();
        }
        let cancel = CancellationToken::new();
        if cancel_first {
            cancel.cancel();
        } else {
            drop(tx);
        }
        write_outbound(sink, rx, Duration::from_secs(3600), cancel).await;
        stream.collect().await
    }

    #[tokio::test]
    async fn forwards_queue_until_closed() {
        let sent = run_writer(&["a", "b"], false).await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Message::Text("a".to_owned().into()));
        assert_eq!(sent[1], Message::Text("b".to_owned().into()));
    }

    #[tokio::test]
    async fn cancel_flushes_then_closes() {
        let sent = run_writer(&["x"], true).await;
        assert!(sent.iter().any(|m| *m == Message::Text("x".to_owned().into())));
        assert_eq!(sent.last(), Some(&Message::Close(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_interval() {
        let (sink, mut stream) = fmpsc::unbounded::<Message>();
        let (_tx, rx) = mpsc::channel::<Arc<String>>(4);
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_outbound(sink, rx, Duration::from_millis(100), cancel.clone()));

        let first = stream.next().await.unwrap();
        assert!(matches!(first, Message::Ping(_)));
        cancel.cancel();
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ping_interval_still_pings() {
        let (sink, mut stream) = fmpsc::unbounded::<Message>();
        let (_tx, rx) = mpsc::channel::<Arc<String>>(4);
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_outbound(sink, rx, Duration::ZERO, cancel.clone()));

        assert!(matches!(stream.next().await.unwrap(), Message::Ping(_)));
        cancel.cancel();
        writer.await.unwrap();
    }
}
