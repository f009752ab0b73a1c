//! Public surface of the pub/sub client.
//!
//! `Client` wires the outbound queue, the publish worker, the connection
//! supervisor and the inbound dispatcher around a [`Transport`]. Construction
//! returns right away; the connection is established in the background, so
//! callers must not assume connectivity immediately after `new`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::client::dispatcher::InboundDispatcher;
use crate::client::lifecycle::{self, Lifecycle, LifecycleSender};
use crate::client::message::{InboundMessage, OutboundMessage, QualityOfService};
use crate::client::mqtt_transport::MqttTransport;
use crate::client::options::{ClientOptions, ConnectionConfig};
use crate::client::queue::OutboundQueue;
use crate::client::supervisor::ConnectionSupervisor;
use crate::client::transport::{Transport, TransportHandlers};
use crate::client::worker;
use crate::utils::error::ClientError;
use crate::utils::logging::LogSink;

pub struct Client {
    config: Arc<ConnectionConfig>,
    options: ClientOptions,
    queue: OutboundQueue,
    dispatcher: Arc<InboundDispatcher>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn LogSink>,
    lifecycle: LifecycleSender,
    worker: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

impl Client {
    /// Starts the connection supervisor and the publish worker on the current
    /// Tokio runtime and returns immediately.
    pub fn new(
        config: ConnectionConfig,
        options: ClientOptions,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let config = Arc::new(config);
        let dispatcher = Arc::new(InboundDispatcher::new(sink.clone()));

        let (lifecycle, lifecycle_rx) = lifecycle::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handlers = TransportHandlers::new(events_tx, dispatcher.clone());
        let supervisor = ConnectionSupervisor::new(
            transport.clone(),
            config.clone(),
            sink.clone(),
            options.connect_timeout,
        );
        let supervisor = tokio::spawn(supervisor.run(handlers, events_rx, lifecycle_rx.clone()));

        let (queue, receiver) = OutboundQueue::bounded(options.queue_capacity);
        let worker = tokio::spawn(worker::run(
            transport.clone(),
            receiver,
            lifecycle_rx,
            sink.clone(),
        ));

        Self {
            config,
            options,
            queue,
            dispatcher,
            transport,
            sink,
            lifecycle,
            worker,
            supervisor,
        }
    }

    /// Builds a client backed by [`MqttTransport`]. Fails only if the broker
    /// address cannot be parsed.
    pub fn connect_mqtt(
        config: ConnectionConfig,
        options: ClientOptions,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, ClientError> {
        let transport = Arc::new(MqttTransport::new(&config, &options)?);
        Ok(Self::new(config, options, transport, sink))
    }

    /// Queues a message for publishing.
    ///
    /// Waits while the queue is full. Never reports delivery problems: a
    /// message that cannot be sent is logged and dropped by the worker.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QualityOfService,
    ) {
        let message = OutboundMessage::new(topic, payload, qos);
        if let Err(err) = self.queue.push(message).await {
            self.sink.error("Could not queue message", Some(&err));
        }
    }

    /// Queues a message without waiting. If the queue is full the message is
    /// logged and dropped.
    ///
    /// This is the way to publish from a message callback: callbacks run on
    /// the transport's task, where neither awaiting nor blocking is possible.
    pub fn try_publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QualityOfService,
    ) {
        let message = OutboundMessage::new(topic, payload, qos);
        if let Err(err) = self.queue.try_push(message) {
            self.sink.error("Could not queue message", Some(&err));
        }
    }

    /// Same as [`publish`](Self::publish) for plain threads outside the Tokio
    /// runtime. Panics when called from async code, message callbacks
    /// included; use [`try_publish`](Self::try_publish) there.
    pub fn publish_blocking(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QualityOfService,
    ) {
        let message = OutboundMessage::new(topic, payload, qos);
        if let Err(err) = self.queue.blocking_push(message) {
            self.sink.error("Could not queue message", Some(&err));
        }
    }

    /// Installs the handler for messages on the subscribed topic, replacing
    /// any previous one.
    ///
    /// Deliveries for different messages may run concurrently, so the
    /// callback must synchronize access to whatever it mutates.
    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        self.dispatcher.set_callback(Arc::new(callback));
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Number of messages queued but not yet taken by the publish worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Drains pending publishes (bounded by the shutdown timeout), then
    /// disconnects and waits for the background tasks to finish.
    ///
    /// Dropping a client without closing it also disconnects, but does not
    /// wait: messages still queued at that point are logged and dropped.
    pub async fn close(mut self) {
        let pending = self.queue.len();
        self.sink
            .info(&format!("Closing client, draining {pending} pending messages"));

        self.lifecycle.send_replace(Lifecycle::Draining);
        if timeout(self.options.shutdown_timeout, &mut self.worker)
            .await
            .is_err()
        {
            self.sink
                .warn("Publish queue not drained before shutdown timeout, discarding the rest");
            self.worker.abort();
        }

        self.lifecycle.send_replace(Lifecycle::Stopped);
        if timeout(self.options.shutdown_timeout, &mut self.supervisor)
            .await
            .is_err()
        {
            self.supervisor.abort();
        }

        self.sink.info("Client closed");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.lifecycle.send_replace(Lifecycle::Stopped);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("broker", &self.config.broker)
            .field("topic", &self.config.topic)
            .field("pending", &self.queue.len())
            .finish()
    }
}
