//! WebSocket transport: login, keep-alive, and the per-connection loops.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use cohost_protocol::envelope::encode_message;
use cohost_types::ServerMessage;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::hub::Hub;
use crate::member::Credentials;
use crate::session::{Session, Transport};

/// HTTP routes: `/ws` for clients and `/health`.
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(hub)
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn serve(
    hub: Arc<Hub>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let addr = format!("{}:{}", hub.config().server.bind, hub.config().server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::Config(format!("failed to bind {addr}: {e}")))?;
    serve_on(listener, hub, shutdown).await
}

/// Serve on an already bound listener.
///
/// When `shutdown` resolves every client is disconnected before the
/// listener stops.
pub async fn serve_on(
    listener: TcpListener,
    hub: Arc<Hub>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?local, "listening");
    hub.start();

    let stopping = Arc::clone(&hub);
    axum::serve(listener, router(hub))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutdown requested");
            stopping.shutdown();
        })
        .await
        .map_err(|e| ServerError::TransientIo(format!("server error: {e}")))
}

async fn ws_handler(
    State(hub): State<Arc<Hub>>,
    Query(credentials): Query<Credentials>,
    ws: WebSocketUpgrade,
) -> Response {
    match hub.login(&credentials) {
        Ok(session) => ws.on_upgrade(move |socket| handle_socket(hub, session, socket)),
        Err(e) => {
            info!(username = %credentials.username, error = %e, "login rejected");
            let status = match e {
                ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
                _ => StatusCode::UNAUTHORIZED,
            };
            (status, e.to_string()).into_response()
        }
    }
}

async fn handle_socket(hub: Arc<Hub>, session: Arc<Session>, mut socket: WebSocket) {
    let id = session.id().clone();
    let (transport, outbound) = Transport::channel(hub.config().server.outbound_queue);

    if let Err(e) = hub.connect(&session, Arc::clone(&transport)) {
        info!(session_id = %id, error = %e, "connection refused");
        if let Ok(text) = encode_message(&ServerMessage::SystemDisconnect {
            message: e.to_string(),
        }) {
            let _ = socket.send(Message::Text(text)).await;
        }
        let _ = socket.send(Message::Close(None)).await;
        hub.expire_when_idle(&session);
        return;
    }
    info!(session_id = %id, "client connected");

    let (sink, mut stream) = socket.split();
    let missed = Arc::new(AtomicU32::new(0));
    let writer = spawn_writer(&hub, sink, outbound, transport.cancelled(), Arc::clone(&missed));

    if session.profile().can_watch {
        if let Err(e) = hub.create_peer(&session).await {
            warn!(session_id = %id, error = %e, "failed to create peer");
        }
    }

    let cancel = transport.cancelled();
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = stream.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                missed.store(0, Ordering::Relaxed);
                if let Err(e) = hub.handle_message(&session, &text).await {
                    log_message_error(&session, &e);
                }
            }
            Some(Ok(Message::Pong(_))) => missed.store(0, Ordering::Relaxed),
            Some(Ok(Message::Binary(_) | Message::Ping(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(session_id = %id, error = %e, "websocket read failed");
                break;
            }
        }
    }

    transport.close();
    hub.registry().transport_closed(&id, &transport);
    hub.expire_when_idle(&session);
    let _ = writer.await;
    info!(session_id = %id, "client disconnected");
}

fn log_message_error(session: &Session, err: &ServerError) {
    match err {
        ServerError::Forbidden(_) | ServerError::Unauthorized(_) | ServerError::Decode(_) => {
            debug!(session_id = %session.id(), error = %err, "client message refused");
        }
        _ => warn!(session_id = %session.id(), error = %err, "client message failed"),
    }
}

/// Drain the outbound queue into the socket and keep the connection alive.
///
/// After `max_missed_pings` periods without a pong or message the
/// transport is cancelled.
fn spawn_writer(
    hub: &Hub,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    cancel: CancellationToken,
    missed: Arc<AtomicU32>,
) -> JoinHandle<()> {
    let period = hub.config().server.ping_period();
    let max_missed = hub.config().server.max_missed_pings;
    let heartbeat = encode_message(&ServerMessage::Heartbeat).ok();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                text = outbound.recv() => {
                    let Some(text) = text else { break };
                    if sink.send(Message::Text(text.to_string())).await.is_err() {
                        cancel.cancel();
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if missed.fetch_add(1, Ordering::Relaxed) >= max_missed {
                        warn!(max_missed, "client stopped answering pings");
                        cancel.cancel();
                        break;
                    }
                    let ping = sink.send(Message::Ping(Vec::new())).await;
                    let beat = match &heartbeat {
                        Some(text) => sink.send(Message::Text(text.clone())).await,
                        None => Ok(()),
                    };
                    if ping.is_err() || beat.is_err() {
                        cancel.cancel();
                        break;
                    }
                }
            }
        }

        // Deliver whatever was queued before the close, e.g. a disconnect reason.
        while let Ok(text) = outbound.try_recv() {
            if sink.send(Message::Text(text.to_string())).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    })
}
