use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::dispatcher::InboundDispatcher;
use crate::client::message::{InboundMessage, OutboundMessage, QualityOfService};
use crate::utils::error::TransportError;

/// Connection lifecycle transitions reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection (first or any reconnect) has been established
    Connected,
    /// An established connection dropped
    ConnectionLost(TransportError),
    /// The transport is about to retry the connection
    Reconnecting,
}

/// Callbacks a transport invokes from its own task.
///
/// Lifecycle events are queued for the connection supervisor; inbound
/// messages are dispatched synchronously on the caller's task.
#[derive(Clone)]
pub struct TransportHandlers {
    events: mpsc::UnboundedSender<ConnectionEvent>,
    dispatcher: Arc<InboundDispatcher>,
}

impl TransportHandlers {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<ConnectionEvent>,
        dispatcher: Arc<InboundDispatcher>,
    ) -> Self {
        Self { events, dispatcher }
    }

    pub fn connected(&self) {
        let _ = self.events.send(ConnectionEvent::Connected);
    }

    pub fn connection_lost(&self, err: TransportError) {
        let _ = self.events.send(ConnectionEvent::ConnectionLost(err));
    }

    pub fn reconnecting(&self) {
        let _ = self.events.send(ConnectionEvent::Reconnecting);
    }

    /// Hands an inbound message to the registered callback. Returns `false`
    /// when no callback is installed and the message was dropped.
    pub fn deliver(&self, message: InboundMessage) -> bool {
        self.dispatcher.dispatch(message)
    }
}

/// Minimal broker client surface the pub/sub client is built on.
///
/// Implementations own the wire protocol and the reconnect policy: after
/// `connect` they keep retrying on their own and report every transition
/// through the handlers passed in.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Starts the connection and resolves with the outcome of the first
    /// attempt. Handlers stay registered for all later reconnects.
    async fn connect(&self, handlers: TransportHandlers) -> Result<(), TransportError>;

    /// Subscribes and waits for the broker's acknowledgment.
    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> Result<(), TransportError>;

    /// Publishes and waits for the acknowledgment matching the message QoS.
    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Closes the connection and stops reconnecting.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
