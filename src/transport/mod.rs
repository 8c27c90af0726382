//! Transport abstraction: the two roles every binding implements.
//!
//! A [`ClientTransport`] connects to exactly one server and exchanges
//! envelopes; a [`ServerTransport`] fields many clients, each addressed
//! by a connection-scoped client id. Inbound traffic is delivered over
//! channels rather than callbacks, so per-connection ordering falls out
//! of the channel and the consumer owns its own dispatch loop.
//!
//! Both bindings — in-process [`loopback`] and WebSocket [`ws`] — are
//! behaviorally interchangeable from the caller's perspective.

pub mod loopback;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ProtocolError;
use crate::protocol::Envelope;

/// Inbound channel capacity shared by both bindings.
pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle and traffic, as seen by the server.
#[derive(Debug)]
pub enum ServerEvent {
    /// A client connected and was assigned this id.
    Connected(String),
    /// One envelope from the identified client, in per-client send order.
    Message(Envelope, String),
    /// The identified client is gone — explicit disconnect or connection
    /// loss, indistinguishable on purpose. The receiver must purge the
    /// client's tool set and fail its in-flight proxied calls.
    Disconnected(String),
}

/// Client side of a binding.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Establish the channel and return the inbound message stream.
    /// The stream closes when the peer goes away.
    async fn connect(&self) -> Result<mpsc::Receiver<Envelope>, ProtocolError>;

    /// Tear down the channel. Idempotent — a second call is a no-op.
    async fn disconnect(&self);

    /// Transmit one envelope. [`ProtocolError::NotConnected`] without an
    /// established channel.
    async fn send(&self, message: Envelope) -> Result<(), ProtocolError>;

    fn is_connected(&self) -> bool;
}

/// Server side of a binding.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Begin accepting clients and return the event stream.
    async fn start(&self) -> Result<mpsc::Receiver<ServerEvent>, ProtocolError>;

    /// Stop accepting and close all active connections. Idempotent.
    async fn stop(&self);

    /// Deliver one envelope to a specific connected client.
    /// [`ProtocolError::UnknownClient`] when the id has no active
    /// connection.
    async fn send_to(&self, client_id: &str, message: Envelope) -> Result<(), ProtocolError>;
}
