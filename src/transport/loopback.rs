//! In-process binding wiring one client directly to one server.
//!
//! Envelopes cross by value over channels — no serialization, no socket.
//! Used for same-process deployments and for exercising the protocol in
//! tests without a network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{CHANNEL_CAPACITY, ClientTransport, ServerEvent, ServerTransport};
use crate::error::ProtocolError;
use crate::protocol::Envelope;

/// The one client id the loopback binding ever assigns.
pub const LOOPBACK_CLIENT_ID: &str = "loopback";

struct Shared {
    client_connected: AtomicBool,
}

/// Create a wired client/server pair.
pub fn pair() -> (LoopbackClient, LoopbackServer) {
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let shared = Arc::new(Shared {
        client_connected: AtomicBool::new(false),
    });

    let client = LoopbackClient {
        shared: shared.clone(),
        events: event_tx,
        inbound: Mutex::new(Some(inbound_rx)),
    };
    let server = LoopbackServer {
        shared,
        events: Mutex::new(Some(event_rx)),
        to_client: Mutex::new(Some(inbound_tx)),
    };
    (client, server)
}

pub struct LoopbackClient {
    shared: Arc<Shared>,
    events: mpsc::Sender<ServerEvent>,
    inbound: Mutex<Option<mpsc::Receiver<Envelope>>>,
}

#[async_trait]
impl ClientTransport for LoopbackClient {
    async fn connect(&self) -> Result<mpsc::Receiver<Envelope>, ProtocolError> {
        let inbound = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ProtocolError::Connection("loopback client already connected".into()))?;
        self.shared.client_connected.store(true, Ordering::SeqCst);
        self.events
            .send(ServerEvent::Connected(LOOPBACK_CLIENT_ID.to_string()))
            .await
            .map_err(|_| {
                self.shared.client_connected.store(false, Ordering::SeqCst);
                ProtocolError::Connection("loopback server is gone".into())
            })?;
        Ok(inbound)
    }

    async fn disconnect(&self) {
        if self.shared.client_connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .events
                .send(ServerEvent::Disconnected(LOOPBACK_CLIENT_ID.to_string()))
                .await;
        }
    }

    async fn send(&self, message: Envelope) -> Result<(), ProtocolError> {
        if !self.shared.client_connected.load(Ordering::SeqCst) {
            return Err(ProtocolError::NotConnected);
        }
        self.events
            .send(ServerEvent::Message(message, LOOPBACK_CLIENT_ID.to_string()))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.shared.client_connected.load(Ordering::SeqCst)
    }
}

pub struct LoopbackServer {
    shared: Arc<Shared>,
    events: Mutex<Option<mpsc::Receiver<ServerEvent>>>,
    to_client: Mutex<Option<mpsc::Sender<Envelope>>>,
}

#[async_trait]
impl ServerTransport for LoopbackServer {
    async fn start(&self) -> Result<mpsc::Receiver<ServerEvent>, ProtocolError> {
        self.events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ProtocolError::Connection("loopback server already started".into()))
    }

    async fn stop(&self) {
        // Dropping the sender closes the client's inbound stream, which
        // runs the client's standard pending-rejection sweep.
        self.to_client.lock().unwrap().take();
        self.shared.client_connected.store(false, Ordering::SeqCst);
    }

    async fn send_to(&self, client_id: &str, message: Envelope) -> Result<(), ProtocolError> {
        if client_id != LOOPBACK_CLIENT_ID || !self.shared.client_connected.load(Ordering::SeqCst) {
            return Err(ProtocolError::UnknownClient(client_id.to_string()));
        }
        let sender = self
            .to_client
            .lock()
            .unwrap()
            .clone()
            .ok_or(ProtocolError::NotConnected)?;
        sender
            .send(message)
            .await
            .map_err(|_| ProtocolError::UnknownClient(client_id.to_string()))
    }
}
