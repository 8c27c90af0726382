//! Server role: message dispatch and the generation-engine seam.
//!
//! `AgentServer` consumes the transport's event stream and routes by
//! message type: discovery and tool responses go to the [`ToolProxy`],
//! generate requests spawn a generation task against the registered
//! [`GenerationEngine`]. The engine is opaque to the protocol — it gets
//! the request's contents and config plus a [`GenerationContext`] for
//! everything that crosses back into protocol territory: the client's
//! function declarations, mid-flight tool execution, streamed chunks,
//! and cancellation.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::protocol::{Envelope, FunctionDeclaration, Payload};
use crate::proxy::{DEFAULT_TOOL_TIMEOUT, Outbound, ToolProxy};
use crate::transport::{ServerEvent, ServerTransport};

/// Backend agent logic, treated as an opaque function.
///
/// Failures become the `error` string of the generate response. A tool
/// timeout raised through [`GenerationContext::execute_tool`] should be
/// propagated as a failure rather than silently generating without the
/// tool result.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(
        &self,
        contents: &Value,
        config: &Value,
        ctx: &GenerationContext,
    ) -> anyhow::Result<Value>;
}

/// Per-request handle the engine uses to reach back into the protocol.
pub struct GenerationContext {
    client_id: String,
    request_id: String,
    proxy: Arc<ToolProxy>,
    transport: Arc<dyn ServerTransport>,
    cancel: CancellationToken,
}

impl GenerationContext {
    /// The client this generation answers to — also the client whose
    /// tools are reachable from here.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Cancelled when the server stops.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The originating client's tools in the engine's function-calling
    /// shape.
    pub async fn function_declarations(&self) -> Vec<FunctionDeclaration> {
        self.proxy.function_declarations(&self.client_id).await
    }

    /// Run one of the originating client's tools and await the result.
    pub async fn execute_tool(
        &self,
        tool: &str,
        parameters: Map<String, Value>,
    ) -> Result<Value, ProtocolError> {
        self.proxy
            .execute_tool(&self.client_id, tool, parameters)
            .await
    }

    /// Push one streamed chunk for this request. The terminal chunk
    /// (`is_complete`) ends the client-side stream; the final generate
    /// response sent after it is discarded there as already-resolved.
    pub async fn emit_chunk(&self, chunk: Value, is_complete: bool) -> Result<(), ProtocolError> {
        self.transport
            .send_to(
                &self.client_id,
                Envelope::streaming_response(&self.request_id, chunk, is_complete),
            )
            .await
    }
}

struct ServerInner {
    transport: Arc<dyn ServerTransport>,
    proxy: Arc<ToolProxy>,
    engine: Arc<dyn GenerationEngine>,
    cancel: CancellationToken,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

pub struct AgentServer {
    inner: Arc<ServerInner>,
}

/// Adapter giving the proxy a transport-shaped send path.
struct TransportOutbound(Arc<dyn ServerTransport>);

#[async_trait]
impl Outbound for TransportOutbound {
    async fn send_to(&self, client_id: &str, message: Envelope) -> Result<(), ProtocolError> {
        self.0.send_to(client_id, message).await
    }
}

impl AgentServer {
    pub fn new(transport: Arc<dyn ServerTransport>, engine: Arc<dyn GenerationEngine>) -> Self {
        Self::with_tool_timeout(transport, engine, DEFAULT_TOOL_TIMEOUT)
    }

    pub fn with_tool_timeout(
        transport: Arc<dyn ServerTransport>,
        engine: Arc<dyn GenerationEngine>,
        tool_timeout: Duration,
    ) -> Self {
        let proxy = Arc::new(ToolProxy::with_timeout(
            Arc::new(TransportOutbound(transport.clone())),
            tool_timeout,
        ));
        Self {
            inner: Arc::new(ServerInner {
                transport,
                proxy,
                engine,
                cancel: CancellationToken::new(),
                dispatch: Mutex::new(None),
            }),
        }
    }

    /// Begin accepting clients and dispatching their traffic.
    pub async fn start(&self) -> Result<(), ProtocolError> {
        let events = self.inner.transport.start().await?;
        let inner = self.inner.clone();
        let task = tokio::spawn(dispatch_loop(inner, events));
        *self.inner.dispatch.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Stop the dispatch loop and close every connection. Idempotent.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        self.inner.transport.stop().await;
        if let Some(task) = self.inner.dispatch.lock().unwrap().take() {
            task.abort();
        }
    }

    /// Deliver one envelope to a specific connected client.
    pub async fn send_message(
        &self,
        client_id: &str,
        message: Envelope,
    ) -> Result<(), ProtocolError> {
        self.inner.transport.send_to(client_id, message).await
    }

    /// Integration seam for agent logic living outside a generation
    /// task: run a tool on a specific client.
    pub async fn request_tool_execution(
        &self,
        client_id: &str,
        tool: &str,
        parameters: Map<String, Value>,
    ) -> Result<Value, ProtocolError> {
        self.inner.proxy.execute_tool(client_id, tool, parameters).await
    }

    pub fn proxy(&self) -> Arc<ToolProxy> {
        self.inner.proxy.clone()
    }
}

// ── Dispatch ────────────────────────────────────────────────────────────────

async fn dispatch_loop(inner: Arc<ServerInner>, mut events: mpsc::Receiver<ServerEvent>) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ServerEvent::Connected(client_id) => {
                        debug!(%client_id, "client connected");
                    }
                    ServerEvent::Disconnected(client_id) => {
                        debug!(%client_id, "client disconnected");
                        inner.proxy.remove_client(&client_id).await;
                    }
                    ServerEvent::Message(envelope, client_id) => {
                        handle_message(&inner, envelope, client_id).await;
                    }
                }
            }
        }
    }
}

async fn handle_message(inner: &Arc<ServerInner>, envelope: Envelope, client_id: String) {
    let kind = envelope.type_name();
    let Envelope { id, payload, .. } = envelope;
    match payload {
        Payload::ToolDiscovery { tools } => {
            inner.proxy.handle_tool_discovery(&client_id, tools).await;
        }
        Payload::ToolExecutionResponse {
            request_id,
            result,
            error,
        } => {
            inner.proxy.handle_tool_response(&request_id, result, error).await;
        }
        Payload::GenerateContentRequest { contents, config } => {
            // The engine may run long and round-trip through client
            // tools; a task per request keeps dispatch moving.
            let inner = inner.clone();
            tokio::spawn(async move {
                let ctx = GenerationContext {
                    client_id: client_id.clone(),
                    request_id: id.clone(),
                    proxy: inner.proxy.clone(),
                    transport: inner.transport.clone(),
                    cancel: inner.cancel.child_token(),
                };
                let reply = match inner.engine.generate(&contents, &config, &ctx).await {
                    Ok(response) => Envelope::generate_content_response(&id, Some(response), None),
                    Err(err) => {
                        Envelope::generate_content_response(&id, None, Some(err.to_string()))
                    }
                };
                if let Err(e) = inner.transport.send_to(&client_id, reply).await {
                    warn!(%client_id, "failed to deliver generation response: {e}");
                }
            });
        }
        // Client-bound traffic arriving here is a peer bug, not ours.
        _ => debug!(%client_id, "ignoring client-bound {kind} frame"),
    }
}
