//! Client role: correlated calls over any [`ClientTransport`].
//!
//! `AgentClient` turns fire-and-forget sends into awaitable calls. Each
//! outgoing request registers a pending entry keyed by message id; the
//! dispatch task resolves entries as correlated responses arrive, runs
//! the registered tool executor for inbound execution requests, and on
//! connection loss rejects everything still outstanding.
//!
//! There is deliberately no global client instance: construct one and
//! pass it to whatever consumes it.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::protocol::{Envelope, Payload};
use crate::tools::ToolExecutor;
use crate::transport::ClientTransport;

/// Bounded wait for a correlated response unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

enum Pending {
    Unary(oneshot::Sender<Result<Value, ProtocolError>>),
    Stream(mpsc::Sender<Result<Value, ProtocolError>>),
}

type PendingMap = Arc<Mutex<HashMap<String, Pending>>>;
type ExecutorSlot = Arc<Mutex<Option<Arc<dyn ToolExecutor>>>>;

pub struct AgentClient {
    transport: Arc<dyn ClientTransport>,
    timeout: Duration,
    pending: PendingMap,
    executor: ExecutorSlot,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl AgentClient {
    pub fn new(transport: Arc<dyn ClientTransport>) -> Self {
        Self::with_timeout(transport, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(transport: Arc<dyn ClientTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
            executor: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
        }
    }

    /// Establish the transport channel and start dispatching inbound
    /// messages.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        let inbound = self.transport.connect().await?;
        let task = tokio::spawn(dispatch_loop(
            inbound,
            self.transport.clone(),
            self.pending.clone(),
            self.executor.clone(),
        ));
        *self.reader.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Tear down the channel. Idempotent. Every outstanding call is
    /// rejected with [`ProtocolError::ConnectionClosed`].
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        if let Some(task) = self.reader.lock().unwrap().take() {
            task.abort();
        }
        reject_all(&self.pending).await;
    }

    /// Transmit one envelope without registering a pending entry.
    pub async fn send_message(&self, message: Envelope) -> Result<(), ProtocolError> {
        if !self.transport.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        self.transport.send(message).await
    }

    /// Register the capability provider answering inbound tool requests
    /// and backing [`announce_tools`].
    ///
    /// [`announce_tools`]: AgentClient::announce_tools
    pub fn setup_tool_execution(&self, executor: Arc<dyn ToolExecutor>) {
        *self.executor.lock().unwrap() = Some(executor);
    }

    /// Advertise the executor's tools to the server in one discovery
    /// message. Fails fast when no executor is registered.
    pub async fn announce_tools(&self) -> Result<(), ProtocolError> {
        let definitions = {
            let guard = self.executor.lock().unwrap();
            let executor = guard
                .as_ref()
                .ok_or(ProtocolError::NotConfigured("tool executor"))?;
            executor.tool_definitions()
        };
        self.send_message(Envelope::tool_discovery(definitions)).await
    }

    /// Issue a generate request and await exactly one matching response.
    ///
    /// On timeout the pending entry is removed and a response arriving
    /// later is discarded as unknown. A response carrying `error`
    /// rejects with [`ProtocolError::Generation`], which is distinct
    /// from [`ProtocolError::Timeout`].
    pub async fn generate_content(
        &self,
        contents: Value,
        config: Value,
    ) -> Result<Value, ProtocolError> {
        let request = Envelope::generate_content_request(contents, config);
        let request_id = request.id.clone();

        let (resolve, wait) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(request_id.clone(), Pending::Unary(resolve));

        if let Err(err) = self.send_message(request).await {
            self.pending.lock().unwrap().remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                Err(ProtocolError::Timeout(self.timeout))
            }
        }
    }

    /// Issue a generate request and surface the response as a finite,
    /// forward-only chunk stream.
    ///
    /// Servers that stream send `streaming_response` frames; a server
    /// that answers with a plain `generate_content_response` degrades to
    /// a single-chunk stream. The per-chunk timeout matches the unary
    /// request timeout.
    pub async fn generate_content_stream(
        &self,
        contents: Value,
        config: Value,
    ) -> Result<ContentStream, ProtocolError> {
        let request = Envelope::generate_content_request(contents, config);
        let request_id = request.id.clone();

        let (chunks, rx) = mpsc::channel(16);
        self.pending
            .lock()
            .unwrap()
            .insert(request_id.clone(), Pending::Stream(chunks));

        if let Err(err) = self.send_message(request).await {
            self.pending.lock().unwrap().remove(&request_id);
            return Err(err);
        }

        Ok(ContentStream {
            rx,
            timeout: self.timeout,
            request_id,
            pending: self.pending.clone(),
            done: false,
        })
    }
}

/// Chunk sequence produced by [`AgentClient::generate_content_stream`].
/// Not restartable. Dropping it early abandons the request; a chunk
/// arriving afterwards is discarded as unknown.
pub struct ContentStream {
    rx: mpsc::Receiver<Result<Value, ProtocolError>>,
    timeout: Duration,
    request_id: String,
    pending: PendingMap,
    done: bool,
}

impl ContentStream {
    /// The next chunk, or `None` once the stream has ended. Waiting
    /// longer than the per-chunk timeout ends the stream with
    /// `Err(Timeout)`.
    pub async fn next(&mut self) -> Option<Result<Value, ProtocolError>> {
        if self.done {
            return None;
        }
        match tokio::time::timeout(self.timeout, self.rx.recv()).await {
            Ok(Some(item)) => {
                if item.is_err() {
                    self.done = true;
                }
                Some(item)
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(_) => {
                self.done = true;
                self.pending.lock().unwrap().remove(&self.request_id);
                Some(Err(ProtocolError::Timeout(self.timeout)))
            }
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Drop for ContentStream {
    fn drop(&mut self) {
        self.pending.lock().unwrap().remove(&self.request_id);
    }
}

// ── Inbound dispatch ────────────────────────────────────────────────────────

async fn dispatch_loop(
    mut inbound: mpsc::Receiver<Envelope>,
    transport: Arc<dyn ClientTransport>,
    pending: PendingMap,
    executor: ExecutorSlot,
) {
    while let Some(envelope) = inbound.recv().await {
        let kind = envelope.type_name();
        let Envelope { id, payload, .. } = envelope;
        match payload {
            Payload::ToolExecutionRequest { tool, parameters } => {
                // Run on a task of its own so a slow tool cannot stall
                // response dispatch behind it.
                let executor = executor.lock().unwrap().clone();
                let transport = transport.clone();
                tokio::spawn(async move {
                    let response = match executor {
                        Some(executor) => match executor.execute(&tool, &parameters).await {
                            Ok(result) => Envelope::tool_execution_response(&id, Some(result), None),
                            Err(message) => {
                                Envelope::tool_execution_response(&id, None, Some(message))
                            }
                        },
                        None => Envelope::tool_execution_response(
                            &id,
                            None,
                            Some("no tool executor configured".to_string()),
                        ),
                    };
                    if let Err(e) = transport.send(response).await {
                        warn!(tool, "failed to send tool response: {e}");
                    }
                });
            }
            Payload::GenerateContentResponse {
                request_id,
                response,
                error,
            } => resolve_response(&pending, &request_id, response, error).await,
            Payload::StreamingResponse {
                request_id,
                chunk,
                is_complete,
            } => advance_stream(&pending, &request_id, chunk, is_complete).await,
            _ => debug!("ignoring server-bound {kind} frame"),
        }
    }
    // Transport gone without an explicit disconnect.
    reject_all(&pending).await;
}

async fn resolve_response(
    pending: &PendingMap,
    request_id: &str,
    response: Option<Value>,
    error: Option<String>,
) {
    let entry = pending.lock().unwrap().remove(request_id);
    let outcome = match error {
        Some(message) => Err(ProtocolError::Generation(message)),
        None => Ok(response.unwrap_or(Value::Null)),
    };
    match entry {
        Some(Pending::Unary(resolve)) => {
            let _ = resolve.send(outcome);
        }
        // Transport without native streaming: the one response becomes a
        // single-chunk stream.
        Some(Pending::Stream(chunks)) => {
            let _ = chunks.send(outcome).await;
        }
        None => warn!(%request_id, "response for unknown request id"),
    }
}

async fn advance_stream(pending: &PendingMap, request_id: &str, chunk: Value, is_complete: bool) {
    let sender = {
        let mut guard = pending.lock().unwrap();
        match guard.get(request_id) {
            Some(Pending::Stream(_)) if is_complete => match guard.remove(request_id) {
                Some(Pending::Stream(chunks)) => Some(chunks),
                _ => None,
            },
            Some(Pending::Stream(chunks)) => Some(chunks.clone()),
            Some(Pending::Unary(_)) => {
                warn!(%request_id, "streaming frame for a unary request");
                None
            }
            None => {
                warn!(%request_id, "stream chunk for unknown request id");
                None
            }
        }
    };
    if let Some(chunks) = sender {
        let _ = chunks.send(Ok(chunk)).await;
    }
}

async fn reject_all(pending: &PendingMap) {
    let drained: Vec<Pending> = {
        let mut guard = pending.lock().unwrap();
        guard.drain().map(|(_, entry)| entry).collect()
    };
    for entry in drained {
        match entry {
            Pending::Unary(resolve) => {
                let _ = resolve.send(Err(ProtocolError::ConnectionClosed));
            }
            Pending::Stream(chunks) => {
                let _ = chunks.send(Err(ProtocolError::ConnectionClosed)).await;
            }
        }
    }
}
