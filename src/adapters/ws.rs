use crate::ports::{ConnectionHandlers, NoopHandlers};
use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Extracts the value of `key` from a raw URI query string
/// (`a=1&session=abc` with key `session` yields `abc`).
pub fn resolve_query(query: &str, key: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix(key) {
            if let Some(value) = value.strip_prefix('=') {
                return value.to_string();
            }
        }
    }
    String::new()
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(default)]
    id: Option<u32>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// Parses an application frame. Frames without a parseable envelope, a
/// `method`, or an integer `id` are not dispatchable.
fn parse_frame(text: &str) -> Option<(String, Value, u32)> {
    let frame: InboundFrame = serde_json::from_str(text).ok()?;
    Some((frame.method?, frame.params, frame.id?))
}

struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Message>,
    closer: watch::Sender<bool>,
}

/// WebSocket connection manager: owns the loopback listener, assigns
/// monotonically increasing connection ids, runs the per-connection reader,
/// dispatcher and writer tasks, and offers unicast send plus
/// manager-initiated close.
///
/// Message dispatch never runs on the reader: frames are handed to a
/// per-connection dispatcher task over a channel, which serializes handling
/// per connection while keeping connections independent of one another.
pub struct ConnectionManager {
    connections: RwLock<HashMap<u32, ConnectionHandle>>,
    next_connection_id: AtomicU32,
    handlers: StdRwLock<Arc<dyn ConnectionHandlers>>,
    shutdown: watch::Sender<bool>,
}

impl ConnectionManager {
    pub fn new(handlers: Arc<dyn ConnectionHandlers>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU32::new(0),
            handlers: StdRwLock::new(handlers),
            shutdown,
        })
    }

    fn current_handlers(&self) -> Arc<dyn ConnectionHandlers> {
        self.handlers.read().unwrap().clone()
    }

    pub fn set_handlers(&self, handlers: Arc<dyn ConnectionHandlers>) {
        *self.handlers.write().unwrap() = handlers;
    }

    /// Binds the listener and starts serving upgrades. Returns the bound
    /// address (useful when the configured port is 0) and the server task.
    pub async fn start(
        self: Arc<Self>,
        listen: SocketAddr,
    ) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
        let app = axum::Router::new()
            .route("/", get(ws_upgrade))
            .with_state(self.clone());
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("binding gateway listener on {listen}"))?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "gateway websocket listener started");

        let mut shutdown_rx = self.shutdown.subscribe();
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });

        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(%err, "gateway listener terminated");
            }
        });
        Ok((local_addr, task))
    }

    /// Unicast a text frame. Returns false when the connection is gone.
    pub async fn send(&self, connection_id: u32, text: String) -> bool {
        let connections = self.connections.read().await;
        match connections.get(&connection_id) {
            Some(handle) => handle.outbound.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    /// Manager-initiated close of a single connection.
    pub async fn close(&self, connection_id: u32) {
        let connections = self.connections.read().await;
        if let Some(handle) = connections.get(&connection_id) {
            let _ = handle.outbound.send(Message::Close(None));
            let _ = handle.closer.send(true);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Shutdown barrier: swap in no-op handlers so nothing new is admitted
    /// or dispatched, give in-flight handlers a brief stabilization window,
    /// then stop the listener and drop every connection.
    pub async fn shutdown(&self) {
        info!("shutting down connection manager");
        self.set_handlers(Arc::new(NoopHandlers));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let _ = self.shutdown.send(true);
        let handles: Vec<ConnectionHandle> = {
            let mut connections = self.connections.write().await;
            connections.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.closer.send(true);
        }
    }

    async fn handle_socket(self: Arc<Self>, socket: WebSocket, query: String) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;

        let handlers = self.current_handlers();
        if !handlers.on_auth(connection_id, &query).await {
            info!(connection_id, "connection rejected at auth");
            let mut socket = socket;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        debug!(connection_id, "connection admitted");

        let (mut sender, mut receiver) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (closer_tx, mut closer_rx) = watch::channel(false);
        {
            let mut connections = self.connections.write().await;
            connections.insert(
                connection_id,
                ConnectionHandle {
                    outbound: outbound_tx.clone(),
                    closer: closer_tx,
                },
            );
        }

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if sender.send(message).await.is_err() || is_close {
                    break;
                }
            }
        });

        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<(String, Value, u32)>();
        let dispatcher = tokio::spawn({
            let manager = self.clone();
            async move {
                while let Some((method, params, request_id)) = frame_rx.recv().await {
                    let handlers = manager.current_handlers();
                    handlers
                        .on_message(connection_id, method, params, request_id)
                        .await;
                }
            }
        });

        loop {
            tokio::select! {
                _ = closer_rx.changed() => break,
                message = receiver.next() => {
                    let Some(Ok(message)) = message else { break };
                    match message {
                        Message::Text(text) => match parse_frame(&text) {
                            Some(frame) => {
                                if frame_tx.send(frame).is_err() {
                                    break;
                                }
                            }
                            None => {
                                warn!(connection_id, "dropping malformed frame");
                            }
                        },
                        Message::Ping(payload) => {
                            let _ = outbound_tx.send(Message::Pong(payload));
                        }
                        Message::Close(_) => break,
                        Message::Binary(_) | Message::Pong(_) => {}
                    }
                }
            }
        }

        // Let every message that was handed off finish before disconnecting.
        drop(frame_tx);
        let _ = dispatcher.await;

        self.connections.write().await.remove(&connection_id);
        drop(outbound_tx);
        let _ = writer.await;

        let handlers = self.current_handlers();
        handlers.on_disconnect(connection_id).await;
        info!(connection_id, "connection closed");
    }
}

async fn ws_upgrade(
    State(manager): State<Arc<ConnectionManager>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !peer.ip().is_loopback() {
        warn!(%peer, "refusing non-loopback connection");
        return StatusCode::FORBIDDEN.into_response();
    }
    let query = uri.query().unwrap_or_default().to_string();
    ws.on_upgrade(move |socket| manager.handle_socket(socket, query))
        .into_response()
}
