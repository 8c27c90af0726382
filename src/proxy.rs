//! Server-side tool discovery registry and execution correlator.
//!
//! The proxy bridges "what can this client run" and "ask this client to
//! run tool X with args Y". It owns the per-client tool sets and the
//! pending map for in-flight proxied calls, and talks to the wire only
//! through the [`Outbound`] seam, so it works unchanged over loopback,
//! WebSocket, or anything else implementing the server transport.
//!
//! All discovery and response handling for a client funnels through the
//! server's single dispatch task; the maps here are only ever touched
//! under the proxy's own locks, and never across a send await.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::protocol::{Envelope, FunctionDeclaration, ToolDefinition};

/// Bounded wait for a tool execution response unless overridden.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the proxy hands envelopes for delivery to a specific client.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_to(&self, client_id: &str, message: Envelope) -> Result<(), ProtocolError>;
}

struct PendingTool {
    client_id: String,
    resolve: oneshot::Sender<Result<Value, ProtocolError>>,
}

pub struct ToolProxy {
    outbound: Arc<dyn Outbound>,
    timeout: Duration,
    tools: Mutex<HashMap<String, Vec<ToolDefinition>>>,
    pending: Mutex<HashMap<String, PendingTool>>,
}

impl ToolProxy {
    pub fn new(outbound: Arc<dyn Outbound>) -> Self {
        Self::with_timeout(outbound, DEFAULT_TOOL_TIMEOUT)
    }

    pub fn with_timeout(outbound: Arc<dyn Outbound>, timeout: Duration) -> Self {
        Self {
            outbound,
            timeout,
            tools: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Store a client's advertised tool set, wholesale replacing any
    /// prior set. A tool missing from a later announcement is gone.
    pub async fn handle_tool_discovery(&self, client_id: &str, tools: Vec<ToolDefinition>) {
        debug!(%client_id, count = tools.len(), "tool discovery");
        self.tools.lock().await.insert(client_id.to_string(), tools);
    }

    /// The stored set, or empty for an unknown client. Never errors.
    pub async fn client_tools(&self, client_id: &str) -> Vec<ToolDefinition> {
        self.tools
            .lock()
            .await
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Client ids with a stored tool set.
    pub async fn clients(&self) -> Vec<String> {
        self.tools.lock().await.keys().cloned().collect()
    }

    pub async fn has_client_tool(&self, client_id: &str, name: &str) -> bool {
        self.tools
            .lock()
            .await
            .get(client_id)
            .is_some_and(|tools| tools.iter().any(|tool| tool.name == name))
    }

    pub async fn client_tool_definition(
        &self,
        client_id: &str,
        name: &str,
    ) -> Option<ToolDefinition> {
        self.tools
            .lock()
            .await
            .get(client_id)?
            .iter()
            .find(|tool| tool.name == name)
            .cloned()
    }

    /// Project the client's tool set into the engine's function-calling
    /// shape.
    pub async fn function_declarations(&self, client_id: &str) -> Vec<FunctionDeclaration> {
        self.client_tools(client_id)
            .await
            .iter()
            .map(FunctionDeclaration::from)
            .collect()
    }

    /// Ask a specific client to run one tool and await the result.
    ///
    /// Resolves with the response's `result`, rejects with the tool's
    /// error string verbatim, or rejects with
    /// `Tool execution timeout: <name>` after the configured wait —
    /// at which point the pending entry is gone and a late response is
    /// a logged no-op. No retries at this layer: only the caller knows
    /// whether a tool call is safely repeatable.
    pub async fn execute_tool(
        &self,
        client_id: &str,
        tool: &str,
        parameters: Map<String, Value>,
    ) -> Result<Value, ProtocolError> {
        let request = Envelope::tool_execution_request(tool, parameters);
        let request_id = request.id.clone();

        let (resolve, wait) = oneshot::channel();
        self.pending.lock().await.insert(
            request_id.clone(),
            PendingTool {
                client_id: client_id.to_string(),
                resolve,
            },
        );

        if let Err(err) = self.outbound.send_to(client_id, request).await {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(Ok(outcome)) => outcome,
            // Resolver dropped without firing: the client went away.
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(ProtocolError::ToolTimeout(tool.to_string()))
            }
        }
    }

    /// Resolve or reject the pending call matching `request_id`.
    /// Unknown ids (late responses, duplicates) are logged and ignored.
    pub async fn handle_tool_response(
        &self,
        request_id: &str,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let Some(entry) = self.pending.lock().await.remove(request_id) else {
            warn!(%request_id, "tool response for unknown request id");
            return;
        };
        let outcome = match error {
            Some(message) => Err(ProtocolError::ToolExecution(message)),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = entry.resolve.send(outcome);
    }

    /// Purge a disconnected client: its tool set is dropped and every
    /// in-flight call against it fails now rather than timing out.
    pub async fn remove_client(&self, client_id: &str) {
        self.tools.lock().await.remove(client_id);

        let mut pending = self.pending.lock().await;
        let stale: Vec<String> = pending
            .iter()
            .filter(|(_, entry)| entry.client_id == client_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(entry) = pending.remove(&id) {
                let _ = entry.resolve.send(Err(ProtocolError::ConnectionClosed));
            }
        }
    }
}
