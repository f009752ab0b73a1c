//! `Transport` implementation on top of `rumqttc`.
//!
//! `rumqttc` splits a connection into an `AsyncClient` (request handle) and an
//! `EventLoop` that must be polled to make progress. This module owns the
//! polling task, which is also where reconnects happen: after a network error
//! the next `poll` dials the broker again. Acknowledgments are matched to the
//! waiting `publish`/`subscribe` call through the packet identifiers the event
//! loop reports.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, timeout};
use url::Url;

use crate::client::message::{InboundMessage, OutboundMessage, QualityOfService};
use crate::client::options::{ClientOptions, ConnectionConfig};
use crate::client::transport::{Transport, TransportHandlers};
use crate::utils::error::{ClientError, TransportError};

/// Capacity of the request channel between `AsyncClient` and `EventLoop`.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

type AckResult = Result<(), TransportError>;
type AckSender = oneshot::Sender<AckResult>;

/// Scheme, host and port extracted from a broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    /// Parses `scheme://host[:port]`. `tcp` and `mqtt` are plain connections
    /// on 1883 by default; `ssl`, `tls` and `mqtts` use TLS on 8883.
    pub fn parse(broker: &str) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidBroker {
            broker: broker.to_string(),
            reason,
        };

        let url = Url::parse(broker).map_err(|e| invalid(e.to_string()))?;
        let (tls, default_port) = match url.scheme() {
            "tcp" | "mqtt" => (false, 1883),
            "ssl" | "tls" | "mqtts" => (true, 8883),
            other => return Err(invalid(format!("unsupported scheme {other}"))),
        };
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host".to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(default_port),
            tls,
        })
    }
}

/// Builds `rumqttc` options from the connection config.
pub fn mqtt_options(
    config: &ConnectionConfig,
    options: &ClientOptions,
) -> Result<MqttOptions, ClientError> {
    let endpoint = BrokerEndpoint::parse(&config.broker)?;
    if config.client_id.is_empty() || config.client_id.starts_with(char::is_whitespace) {
        return Err(ClientError::InvalidClientId(config.client_id.clone()));
    }

    let mut mqtt = MqttOptions::new(&config.client_id, endpoint.host, endpoint.port);
    mqtt.set_keep_alive(options.keep_alive.max(Duration::from_secs(1)))
        .set_clean_session(true);

    if let Some(credentials) = &config.credentials {
        mqtt.set_credentials(&credentials.username, &credentials.password);
    }
    if endpoint.tls {
        mqtt.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    Ok(mqtt)
}

/// A `publish` call waiting for its packet to be written.
///
/// `tx` is `None` once the waiter was failed by a connection loss. The entry
/// stays queued because the event loop still writes the request after the
/// reconnect, and that write must not be credited to a newer request.
struct PendingPublish {
    qos: QoS,
    tx: Option<AckSender>,
}

/// A QoS 1/2 publish written with a packet id and waiting for its ack.
struct InFlightPublish {
    tx: AckSender,
    /// Set on PUBREC; the event loop then resends PUBREL, not PUBLISH.
    received: bool,
}

/// Waiters for broker acknowledgments.
///
/// A request first waits in an `unassigned_*` queue until the event loop
/// reports the packet id it was written with, then moves into the map keyed by
/// that id until the matching ack arrives.
///
/// After a connection loss the event loop replays unacknowledged QoS 1/2
/// publishes under their old packet ids, followed by the requests that were
/// still queued. Those writes belong to waiters that were already failed, so
/// they are consumed here without touching newer waiters.
#[derive(Default)]
pub(crate) struct AckTracker {
    unassigned_publishes: VecDeque<PendingPublish>,
    unassigned_subscribes: VecDeque<Option<AckSender>>,
    publishes: HashMap<u16, InFlightPublish>,
    subscribes: HashMap<u16, AckSender>,
    replayed_publishes: HashSet<u16>,
}

impl AckTracker {
    pub(crate) fn expect_publish(&mut self, qos: QoS) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        self.unassigned_publishes.push_back(PendingPublish { qos, tx: Some(tx) });
        rx
    }

    pub(crate) fn expect_subscribe(&mut self) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        self.unassigned_subscribes.push_back(Some(tx));
        rx
    }

    /// Drops the most recent publish waiter after its request never reached
    /// the event loop.
    pub(crate) fn cancel_last_publish(&mut self) {
        self.unassigned_publishes.pop_back();
    }

    pub(crate) fn cancel_last_subscribe(&mut self) {
        self.unassigned_subscribes.pop_back();
    }

    pub(crate) fn publish_written(&mut self, pkid: u16) {
        if pkid != 0 && self.replayed_publishes.remove(&pkid) {
            return;
        }
        let Some(PendingPublish { qos, tx }) = self.unassigned_publishes.pop_front() else {
            return;
        };
        let Some(tx) = tx else {
            return;
        };
        // QoS 0 has no acknowledgment; writing it is all there is.
        if qos == QoS::AtMostOnce {
            let _ = tx.send(Ok(()));
        } else {
            self.publishes.insert(
                pkid,
                InFlightPublish {
                    tx,
                    received: false,
                },
            );
        }
    }

    /// PUBREC for a QoS 2 publish.
    pub(crate) fn publish_received(&mut self, pkid: u16) {
        if let Some(publish) = self.publishes.get_mut(&pkid) {
            publish.received = true;
        }
    }

    /// PUBACK for QoS 1, PUBCOMP for QoS 2.
    pub(crate) fn publish_acknowledged(&mut self, pkid: u16) {
        if let Some(publish) = self.publishes.remove(&pkid) {
            let _ = publish.tx.send(Ok(()));
        }
    }

    pub(crate) fn subscribe_written(&mut self, pkid: u16) {
        if let Some(Some(tx)) = self.unassigned_subscribes.pop_front() {
            self.subscribes.insert(pkid, tx);
        }
    }

    pub(crate) fn subscribe_acknowledged(&mut self, pkid: u16, return_codes: &[SubscribeReasonCode]) {
        let Some(tx) = self.subscribes.remove(&pkid) else {
            return;
        };
        let refused = return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));
        let result = if refused {
            Err(TransportError::Rejected("subscription refused".to_string()))
        } else {
            Ok(())
        };
        let _ = tx.send(result);
    }

    /// Fails every waiter with `ConnectionLost` and remembers which writes the
    /// event loop will still report for them.
    pub(crate) fn fail_all(&mut self) {
        let lost = || Err(TransportError::ConnectionLost);

        for pending in &mut self.unassigned_publishes {
            if let Some(tx) = pending.tx.take() {
                let _ = tx.send(lost());
            }
        }
        for pending in &mut self.unassigned_subscribes {
            if let Some(tx) = pending.take() {
                let _ = tx.send(lost());
            }
        }
        for (pkid, publish) in self.publishes.drain() {
            if !publish.received {
                self.replayed_publishes.insert(pkid);
            }
            let _ = publish.tx.send(lost());
        }
        for (_, tx) in self.subscribes.drain() {
            let _ = tx.send(lost());
        }
    }
}

/// State shared between the transport handle and its event-loop task.
#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    acks: Mutex<AckTracker>,
}

impl Shared {
    fn acks(&self) -> MutexGuard<'_, AckTracker> {
        self.acks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// MQTT transport with automatic reconnect at a fixed interval.
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    retry_interval: Duration,
    ack_timeout: Duration,
}

impl MqttTransport {
    pub fn new(config: &ConnectionConfig, options: &ClientOptions) -> Result<Self, ClientError> {
        let mqtt = mqtt_options(config, options)?;
        let (client, eventloop) = AsyncClient::new(mqtt, REQUEST_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            shared: Arc::new(Shared::default()),
            shutdown,
            retry_interval: options.retry_interval,
            ack_timeout: options.ack_timeout,
        })
    }

    async fn await_ack(&self, rx: oneshot::Receiver<AckResult>) -> AckResult {
        match timeout(self.ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionLost),
            Err(_) => Err(TransportError::Timeout(self.ack_timeout)),
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, handlers: TransportHandlers) -> Result<(), TransportError> {
        let eventloop = self
            .eventloop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        let (first_tx, first_rx) = oneshot::channel();
        let driver = EventLoopDriver {
            eventloop,
            handlers,
            shared: self.shared.clone(),
            shutdown: self.shutdown.subscribe(),
            retry_interval: self.retry_interval,
            first_attempt: Some(first_tx),
        };
        tokio::spawn(driver.run());

        first_rx.await.unwrap_or(Err(TransportError::ConnectionLost))
    }

    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> Result<(), TransportError> {
        let rx = self.shared.acks().expect_subscribe();
        if let Err(err) = self.client.subscribe(topic, qos.into()).await {
            self.shared.acks().cancel_last_subscribe();
            return Err(TransportError::Request(err.to_string()));
        }
        self.await_ack(rx).await
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let qos: QoS = message.qos.into();
        let rx = self.shared.acks().expect_publish(qos);
        if let Err(err) = self
            .client
            .publish(message.topic, qos, false, message.payload)
            .await
        {
            self.shared.acks().cancel_last_publish();
            return Err(TransportError::Request(err.to_string()));
        }
        self.await_ack(rx).await
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let result = if self.is_connected() {
            self.client
                .disconnect()
                .await
                .map_err(|err| TransportError::Request(err.to_string()))
        } else {
            Ok(())
        };
        self.shutdown.send_replace(true);
        result
    }
}

/// Owns the `EventLoop` and keeps polling it until shutdown.
struct EventLoopDriver {
    eventloop: EventLoop,
    handlers: TransportHandlers,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
    retry_interval: Duration,
    first_attempt: Option<oneshot::Sender<AckResult>>,
}

impl EventLoopDriver {
    async fn run(mut self) {
        let mut closing = false;

        loop {
            let polled = tokio::select! {
                polled = self.eventloop.poll() => polled,
                changed = self.shutdown.changed(), if !closing => {
                    closing = true;
                    // Keep polling only to flush a queued DISCONNECT.
                    if changed.is_err() || !self.shared.is_connected() {
                        break;
                    }
                    continue;
                }
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.shared.connected.store(true, Ordering::SeqCst);
                    if let Some(tx) = self.first_attempt.take() {
                        let _ = tx.send(Ok(()));
                    }
                    self.handlers.connected();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handlers
                        .deliver(InboundMessage::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    self.shared.acks().publish_acknowledged(ack.pkid);
                }
                Ok(Event::Incoming(Packet::PubRec(rec))) => {
                    self.shared.acks().publish_received(rec.pkid);
                }
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    self.shared.acks().publish_acknowledged(comp.pkid);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    self.shared
                        .acks()
                        .subscribe_acknowledged(ack.pkid, &ack.return_codes);
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    self.shared.acks().publish_written(pkid);
                }
                Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                    self.shared.acks().subscribe_written(pkid);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(err) => {
                    if closing {
                        break;
                    }
                    if !self.connection_failed(TransportError::Connection(err.to_string())).await {
                        break;
                    }
                }
            }
        }

        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.acks().fail_all();
    }

    /// Reports the failure, waits out the retry interval and announces the
    /// next attempt. Returns `false` if shutdown was requested meanwhile.
    async fn connection_failed(&mut self, err: TransportError) -> bool {
        let was_connected = self.shared.connected.swap(false, Ordering::SeqCst);
        self.shared.acks().fail_all();

        if let Some(tx) = self.first_attempt.take() {
            let _ = tx.send(Err(err));
        } else if was_connected {
            self.handlers.connection_lost(err);
        }

        tokio::select! {
            _ = sleep(self.retry_interval) => {}
            _ = self.shutdown.changed() => return false,
        }

        self.handlers.reconnecting();
        true
    }
}
