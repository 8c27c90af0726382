//! Error taxonomy for the protocol layer.
//!
//! Correlation failures (timeouts, unknown request ids) are local to one
//! pending call. Connection failures reject every pending call on that
//! connection and purge the client's tool set server-side. Malformed or
//! unrecognized frames are dropped without tearing down the connection.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Connect/accept failed. Fatal to that attempt, never retried here.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The peer went away while calls were still outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// Attempted to send without an established channel.
    #[error("not connected")]
    NotConnected,

    /// The transport accepted the message but failed to write it.
    #[error("send failed: {0}")]
    Send(String),

    /// A correlated generation call got no response within the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A proxied tool call got no response within the deadline.
    ///
    /// The display string is part of the public contract: callers match
    /// on `Tool execution timeout: <name>`.
    #[error("Tool execution timeout: {0}")]
    ToolTimeout(String),

    /// The server addressed a client id with no active connection.
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// The tool itself reported failure. Carries the tool's error text
    /// verbatim.
    #[error("{0}")]
    ToolExecution(String),

    /// The generation engine reported failure. Distinct from [`Timeout`]
    /// so callers can decide whether a retry makes sense.
    ///
    /// [`Timeout`]: ProtocolError::Timeout
    #[error("{0}")]
    Generation(String),

    /// Malformed frame or missing required field. Logged and dropped by
    /// the dispatch loops; one bad message never takes down a connection.
    #[error("protocol violation: {0}")]
    Violation(String),

    /// An operation needed a collaborator that was never registered,
    /// e.g. `announce_tools` without a tool executor.
    #[error("{0} not configured")]
    NotConfigured(&'static str),
}

impl ProtocolError {
    /// True for both timeout variants.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ToolTimeout(_))
    }
}
