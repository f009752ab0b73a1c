use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::client::lifecycle::{self, LifecycleReceiver};
use crate::client::message::QualityOfService;
use crate::client::options::ConnectionConfig;
use crate::client::transport::{ConnectionEvent, Transport, TransportHandlers};
use crate::utils::error::{ClientError, TransportError};
use crate::utils::logging::LogSink;

/// QoS used for the configured topic subscription.
pub const SUBSCRIBE_QOS: QualityOfService = QualityOfService::ExactlyOnce;

/// Drives the connection lifecycle: the initial connect, then one
/// "connected, subscribe" sequence for every connection the transport
/// reports, including reconnects.
pub(crate) struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    config: Arc<ConnectionConfig>,
    sink: Arc<dyn LogSink>,
    connect_timeout: Duration,
}

impl ConnectionSupervisor {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        config: Arc<ConnectionConfig>,
        sink: Arc<dyn LogSink>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            config,
            sink,
            connect_timeout,
        }
    }

    /// Runs until the client stops (it then disconnects the transport) or
    /// the transport drops its handlers.
    pub(crate) async fn run(
        self,
        handlers: TransportHandlers,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut phase: LifecycleReceiver,
    ) {
        let mut stopped = tokio::select! {
            _ = self.connect(handlers) => false,
            _ = lifecycle::stopped(&mut phase) => true,
        };

        while !stopped {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ConnectionEvent::Connected) => self.on_connected().await,
                    Some(ConnectionEvent::ConnectionLost(err)) => self.on_connection_lost(err),
                    Some(ConnectionEvent::Reconnecting) => self.on_reconnecting(),
                    None => break,
                },
                _ = lifecycle::stopped(&mut phase) => stopped = true,
            }
        }

        if stopped {
            self.disconnect().await;
        }
        self.sink.debug("Connection supervisor stopped");
    }

    async fn disconnect(&self) {
        if let Err(err) = self.transport.disconnect().await {
            self.sink.error("Error disconnecting from broker", Some(&err));
        }
    }

    async fn connect(&self, handlers: TransportHandlers) {
        self.sink
            .info(&format!("Connecting to broker: {}", self.config.broker));

        let outcome = match timeout(self.connect_timeout, self.transport.connect(handlers)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Timeout(self.connect_timeout)),
        };

        // Success is reported by the `Connected` event the transport emits.
        if let Err(source) = outcome {
            let err = ClientError::ConnectFailure {
                broker: self.config.broker.clone(),
                source,
            };
            self.sink.error("Error connecting to broker", Some(&err));
        }
    }

    async fn on_connected(&self) {
        self.sink.info("Connected to broker");
        self.sink
            .info(&format!("Subscribing to topic: {}", self.config.topic));

        match self.transport.subscribe(&self.config.topic, SUBSCRIBE_QOS).await {
            Ok(()) => self
                .sink
                .info(&format!("Subscribed to topic: {}", self.config.topic)),
            Err(source) => {
                let err = ClientError::SubscribeFailure {
                    topic: self.config.topic.clone(),
                    source,
                };
                self.sink.error("Error subscribing to topic", Some(&err));
            }
        }
    }

    fn on_connection_lost(&self, err: TransportError) {
        self.sink.error("Connection lost", Some(&err));
    }

    fn on_reconnecting(&self) {
        self.sink.info("Attempting to reconnect");
    }
}
