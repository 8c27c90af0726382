//! agentlink — a request/response protocol layer that decouples an
//! agent front end from the engine that does the thinking.
//!
//! The two halves can share a process (loopback binding), run as
//! separate local processes, or sit across a network (WebSocket
//! binding) without the application code changing: a front end talks
//! through an [`AgentClient`], the engine sits behind an
//! [`AgentServer`], and every exchange is a typed envelope correlated
//! by request id. The server-side [`ToolProxy`] lets agent logic invoke
//! tools that physically execute on a specific client — the client
//! advertises what it can run, the proxy forwards execution requests
//! and correlates the results back.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod tools;
pub mod transport;

pub use client::{AgentClient, ContentStream, DEFAULT_REQUEST_TIMEOUT};
pub use config::LinkConfig;
pub use error::ProtocolError;
pub use protocol::{
    DeclarationType, Envelope, FunctionDeclaration, ParameterSchema, Payload, PropertySchema,
    ToolDefinition,
};
pub use proxy::{DEFAULT_TOOL_TIMEOUT, Outbound, ToolProxy};
pub use server::{AgentServer, GenerationContext, GenerationEngine};
pub use tools::{CallbackExecutor, ToolExecutor};
pub use transport::{ClientTransport, ServerEvent, ServerTransport, loopback};
pub use transport::ws::{WsClient, WsServer};
