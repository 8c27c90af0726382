//! Wire protocol for client/server agent communication.
//!
//! Every exchange is carried in an [`Envelope`]: an opaque unique `id`
//! (the correlation key), an advisory millisecond `timestamp`, and a
//! `type`-discriminated payload. On the WebSocket binding an envelope is
//! one JSON text frame:
//!
//! ```json
//! { "id": "…", "type": "generate_content_request", "timestamp": 1722870000000, "contents": [...] }
//! ```
//!
//! The loopback binding passes envelopes by value and never serializes.
//! Unknown `type` tags fail typed decoding and are dropped by the
//! dispatch loops, so an older peer stays compatible with a newer one.

mod types;

pub use types::{
    DeclarationProperty, DeclarationSchema, DeclarationType, FunctionDeclaration, ParameterSchema,
    PropertySchema, ToolDefinition,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ProtocolError;

/// One protocol message. Immutable once sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per in-flight request; responses reference it as `requestId`.
    pub id: String,
    /// Creation time, milliseconds since the Unix epoch. Advisory only —
    /// correlation and ordering never depend on it.
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Payload variants. The `type` tags are literal wire strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    GenerateContentRequest {
        /// Conversation turns, opaque to the protocol.
        contents: Value,
        /// Generation options, opaque to the protocol.
        #[serde(default)]
        config: Value,
    },
    #[serde(rename_all = "camelCase")]
    GenerateContentResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
        /// Presence signals failure; mutually exclusive with `response`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ToolExecutionRequest {
        tool: String,
        /// Argument name → value. Unvalidated here; validation is the
        /// tool's responsibility.
        parameters: Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    ToolExecutionResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StreamingResponse {
        request_id: String,
        chunk: Value,
        /// `true` marks the terminal chunk; no further chunks for that
        /// request id are valid after it.
        is_complete: bool,
    },
    ToolDiscovery {
        /// Wholesale replaces any prior set from the same client.
        tools: Vec<ToolDefinition>,
    },
}

impl Envelope {
    fn stamp(payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            payload,
        }
    }

    pub fn generate_content_request(contents: Value, config: Value) -> Self {
        Self::stamp(Payload::GenerateContentRequest { contents, config })
    }

    pub fn generate_content_response(
        request_id: &str,
        response: Option<Value>,
        error: Option<String>,
    ) -> Self {
        Self::stamp(Payload::GenerateContentResponse {
            request_id: request_id.to_string(),
            response,
            error,
        })
    }

    pub fn tool_execution_request(tool: &str, parameters: Map<String, Value>) -> Self {
        Self::stamp(Payload::ToolExecutionRequest {
            tool: tool.to_string(),
            parameters,
        })
    }

    pub fn tool_execution_response(
        request_id: &str,
        result: Option<Value>,
        error: Option<String>,
    ) -> Self {
        Self::stamp(Payload::ToolExecutionResponse {
            request_id: request_id.to_string(),
            result,
            error,
        })
    }

    pub fn streaming_response(request_id: &str, chunk: Value, is_complete: bool) -> Self {
        Self::stamp(Payload::StreamingResponse {
            request_id: request_id.to_string(),
            chunk,
            is_complete,
        })
    }

    pub fn tool_discovery(tools: Vec<ToolDefinition>) -> Self {
        Self::stamp(Payload::ToolDiscovery { tools })
    }

    /// The wire `type` tag, for logging.
    pub fn type_name(&self) -> &'static str {
        match &self.payload {
            Payload::GenerateContentRequest { .. } => "generate_content_request",
            Payload::GenerateContentResponse { .. } => "generate_content_response",
            Payload::ToolExecutionRequest { .. } => "tool_execution_request",
            Payload::ToolExecutionResponse { .. } => "tool_execution_response",
            Payload::StreamingResponse { .. } => "streaming_response",
            Payload::ToolDiscovery { .. } => "tool_discovery",
        }
    }
}

// ── Wire codec ──────────────────────────────────────────────────────────────

/// Structural sanity check on a raw frame: `id` a non-empty string,
/// `type` a non-empty string, `timestamp` a number. Variant-specific
/// fields are NOT checked here — typed decoding does that.
pub fn validate(value: &Value) -> bool {
    let id_ok = value
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    let type_ok = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    let timestamp_ok = value.get("timestamp").is_some_and(Value::is_number);
    id_ok && type_ok && timestamp_ok
}

/// Parse one JSON text frame into an envelope.
///
/// Any failure — bad JSON, failed structural check, unknown `type`,
/// missing variant field — is a [`ProtocolError::Violation`]. Callers
/// log and drop; a bad frame never tears down the connection.
pub fn parse_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::Violation(format!("invalid JSON frame: {e}")))?;
    if !validate(&value) {
        return Err(ProtocolError::Violation(
            "frame missing id, type, or timestamp".to_string(),
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| ProtocolError::Violation(format!("malformed frame: {e}")))
}

/// Serialize an envelope to one JSON text frame.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(|e| ProtocolError::Violation(e.to_string()))
}
