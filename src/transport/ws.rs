//! WebSocket binding: one JSON envelope per text frame.
//!
//! The server assigns each accepted connection a fresh client id and
//! keeps a per-client writer registry, so several remote front ends can
//! share one server. An optional bearer token is checked at the HTTP
//! upgrade; TLS termination is left to the deployment in front of the
//! listener.
//!
//! Malformed frames are logged and dropped — one bad frame never takes
//! down the connection. Closing the socket (either side, for any
//! reason) surfaces as the same events as an orderly disconnect.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, accept_hdr_async, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CHANNEL_CAPACITY, ClientTransport, ServerEvent, ServerTransport};
use crate::config::LinkConfig;
use crate::error::ProtocolError;
use crate::protocol::{Envelope, encode_envelope, parse_envelope};

type ClientSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type ServerSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type SinkRegistry = Arc<Mutex<HashMap<String, Arc<Mutex<ServerSink>>>>>;

// ── Client ──────────────────────────────────────────────────────────────────

/// WebSocket client transport for a gateway URL like `ws://127.0.0.1:8765`.
pub struct WsClient {
    url: String,
    auth_token: Option<String>,
    writer: Mutex<Option<ClientSink>>,
    connected: Arc<AtomicBool>,
}

impl WsClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            writer: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Present this bearer token at the handshake.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

#[async_trait]
impl ClientTransport for WsClient {
    async fn connect(&self) -> Result<mpsc::Receiver<Envelope>, ProtocolError> {
        let mut request = self.url.as_str().into_client_request().map_err(|e| {
            ProtocolError::Connection(format!("invalid gateway URL '{}': {e}", self.url))
        })?;
        if let Some(token) = &self.auth_token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|e| ProtocolError::Connection(format!("invalid auth token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        let (sink, stream) = ws_stream.split();
        *self.writer.lock().await = Some(sink);
        self.connected.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let connected = self.connected.clone();
        tokio::spawn(async move {
            client_read_loop(stream, tx).await;
            connected.store(false, Ordering::SeqCst);
        });
        Ok(rx)
    }

    async fn disconnect(&self) {
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send(&self, message: Envelope) -> Result<(), ProtocolError> {
        let text = encode_envelope(&message)?;
        let mut guard = self.writer.lock().await;
        let sink = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| ProtocolError::Send(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn client_read_loop(
    mut stream: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    tx: mpsc::Sender<Envelope>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match parse_envelope(text.as_str()) {
                Ok(envelope) => {
                    if tx.send(envelope).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("dropping inbound frame: {e}"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong/binary — not part of this protocol
            Err(e) => {
                debug!("gateway socket error: {e}");
                break;
            }
        }
    }
    // Dropping tx closes the inbound stream; the client runs its
    // pending-rejection sweep from there.
}

// ── Server ──────────────────────────────────────────────────────────────────

/// WebSocket server transport.
pub struct WsServer {
    listen: String,
    auth_token: Option<String>,
    clients: SinkRegistry,
    cancel: CancellationToken,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

impl WsServer {
    pub fn new(listen: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            auth_token: None,
            clients: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            local_addr: std::sync::Mutex::new(None),
        }
    }

    /// Require this bearer token at the handshake; connections without
    /// it are rejected with HTTP 401 before the upgrade completes.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        let server = Self::new(config.listen.clone());
        match &config.auth_token {
            Some(token) => server.auth_token(token.clone()),
            None => server,
        }
    }

    /// The bound address, available after `start`. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }
}

#[async_trait]
impl ServerTransport for WsServer {
    async fn start(&self) -> Result<mpsc::Receiver<ServerEvent>, ProtocolError> {
        let listener = TcpListener::bind(&self.listen).await.map_err(|e| {
            ProtocolError::Connection(format!("failed to bind gateway to {}: {e}", self.listen))
        })?;
        *self.local_addr.lock().unwrap() = listener.local_addr().ok();
        debug!(listen = %self.listen, "gateway listening");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let clients = self.clients.clone();
        let auth_token = self.auth_token.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let clients = clients.clone();
                                let events = tx.clone();
                                let auth_token = auth_token.clone();
                                let child_cancel = cancel.child_token();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(
                                        stream, peer, auth_token, clients, events, child_cancel,
                                    )
                                    .await
                                    {
                                        debug!(%peer, "connection ended: {e}");
                                    }
                                });
                            }
                            Err(e) => warn!("accept failed: {e}"),
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn stop(&self) {
        self.cancel.cancel();
        let drained: Vec<Arc<Mutex<ServerSink>>> = {
            let mut guard = self.clients.lock().await;
            guard.drain().map(|(_, sink)| sink).collect()
        };
        for sink in drained {
            let mut sink = sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
    }

    async fn send_to(&self, client_id: &str, message: Envelope) -> Result<(), ProtocolError> {
        let sink = self
            .clients
            .lock()
            .await
            .get(client_id)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownClient(client_id.to_string()))?;
        let text = encode_envelope(&message)?;
        sink.lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ProtocolError::Send(e.to_string()))
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    auth_token: Option<String>,
    clients: SinkRegistry,
    events: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
) -> Result<(), ProtocolError> {
    let ws_stream = match auth_token {
        Some(expected) => {
            let check = move |request: &Request, response: Response| {
                let presented = request
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|value| value.to_str().ok());
                if presented == Some(format!("Bearer {expected}").as_str()) {
                    Ok(response)
                } else {
                    let mut reject = ErrorResponse::new(Some("invalid bearer token".to_string()));
                    *reject.status_mut() = StatusCode::UNAUTHORIZED;
                    Err(reject)
                }
            };
            accept_hdr_async(stream, check).await
        }
        None => accept_async(stream).await,
    }
    .map_err(|e| ProtocolError::Connection(format!("WebSocket handshake failed: {e}")))?;

    let client_id = Uuid::new_v4().to_string();
    let (sink, mut reader) = ws_stream.split();
    clients
        .lock()
        .await
        .insert(client_id.clone(), Arc::new(Mutex::new(sink)));

    if events
        .send(ServerEvent::Connected(client_id.clone()))
        .await
        .is_err()
    {
        clients.lock().await.remove(&client_id);
        return Ok(());
    }
    debug!(%peer, %client_id, "client connected");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = reader.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(Message::Text(text)) => match parse_envelope(text.as_str()) {
                        Ok(envelope) => {
                            if events
                                .send(ServerEvent::Message(envelope, client_id.clone()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => warn!(%client_id, "dropping inbound frame: {e}"),
                    },
                    Ok(Message::Ping(payload)) => {
                        let sink = clients.lock().await.get(&client_id).cloned();
                        if let Some(sink) = sink {
                            let _ = sink.lock().await.send(Message::Pong(payload)).await;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(%client_id, "socket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    clients.lock().await.remove(&client_id);
    let _ = events
        .send(ServerEvent::Disconnected(client_id.clone()))
        .await;
    debug!(%client_id, "client disconnected");
    Ok(())
}
