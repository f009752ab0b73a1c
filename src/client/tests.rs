use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{QoS, SubscribeReasonCode};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{Semaphore, mpsc};

use super::dispatcher::InboundDispatcher;
use super::message::{InboundMessage, OutboundMessage, QualityOfService};
use super::mqtt_transport::{AckTracker, BrokerEndpoint, MqttTransport, mqtt_options};
use super::options::{ClientOptions, ConnectionConfig};
use super::pubsub_client::Client;
use super::queue::OutboundQueue;
use super::transport::{Transport, TransportHandlers};
use crate::config::MqttSettings;
use crate::utils::error::{ClientError, TransportError};
use crate::utils::logging::{ErrorChain, LogSink};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Default)]
struct RecordingSink {
    entries: Mutex<Vec<(Level, String, Option<String>)>>,
}

impl RecordingSink {
    fn push(&self, level: Level, msg: &str, err: Option<String>) {
        self.entries
            .lock()
            .unwrap()
            .push((level, msg.to_string(), err));
    }

    fn errors(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _, _)| *level == Level::Error)
            .map(|(_, msg, err)| (msg.clone(), err.clone().unwrap_or_default()))
            .collect()
    }

    fn infos(&self) -> Vec<String> {
        self.messages(Level::Info)
    }

    fn debugs(&self) -> Vec<String> {
        self.messages(Level::Debug)
    }

    fn messages(&self, wanted: Level) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _, _)| *level == wanted)
            .map(|(_, msg, _)| msg.clone())
            .collect()
    }
}

impl LogSink for RecordingSink {
    fn debug(&self, msg: &str) {
        self.push(Level::Debug, msg, None);
    }

    fn info(&self, msg: &str) {
        self.push(Level::Info, msg, None);
    }

    fn warn(&self, msg: &str) {
        self.push(Level::Warn, msg, None);
    }

    fn error(&self, msg: &str, err: Option<&(dyn Error + 'static)>) {
        self.push(Level::Error, msg, err.map(|e| ErrorChain(e).to_string()));
    }
}

/// In-memory transport that records calls and lets tests drive lifecycle
/// events by hand.
struct FakeTransport {
    connected: AtomicBool,
    connect_succeeds: bool,
    subscribe_succeeds: bool,
    handlers: Mutex<Option<TransportHandlers>>,
    published: Mutex<Vec<OutboundMessage>>,
    subscriptions: Mutex<Vec<(String, QualityOfService)>>,
    publish_started: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeTransport {
    fn online() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connect_succeeds: true,
            subscribe_succeeds: true,
            handlers: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            publish_started: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn offline() -> Self {
        Self {
            connect_succeeds: false,
            ..Self::online()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::online()
        }
    }

    fn handlers(&self) -> TransportHandlers {
        self.handlers
            .lock()
            .unwrap()
            .clone()
            .expect("transport not connected yet")
    }

    fn simulate_connection_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.handlers()
            .connection_lost(TransportError::Connection("broker went away".to_string()));
    }

    fn simulate_reconnect(&self) {
        let handlers = self.handlers();
        handlers.reconnecting();
        self.connected.store(true, Ordering::SeqCst);
        handlers.connected();
    }

    fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        self.handlers().deliver(InboundMessage::new(topic, payload))
    }

    fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }

    fn subscriptions(&self) -> Vec<(String, QualityOfService)> {
        self.subscriptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, handlers: TransportHandlers) -> Result<(), TransportError> {
        *self.handlers.lock().unwrap() = Some(handlers.clone());
        if !self.connect_succeeds {
            return Err(TransportError::Connection("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        handlers.connected();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> Result<(), TransportError> {
        self.subscriptions
            .lock()
            .unwrap()
            .push((topic.to_string(), qos));
        if self.subscribe_succeeds {
            Ok(())
        } else {
            Err(TransportError::Rejected("subscription refused".to_string()))
        }
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.publish_started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.published.lock().unwrap().push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.handlers.lock().unwrap().take();
        Ok(())
    }
}

fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("tcp://localhost:1883", "boiler_pin_state", "test-client")
}

fn test_options(queue_capacity: usize) -> ClientOptions {
    ClientOptions {
        queue_capacity,
        connect_timeout: Duration::from_secs(1),
        shutdown_timeout: Duration::from_secs(1),
        ..ClientOptions::default()
    }
}

fn start(
    transport: FakeTransport,
    queue_capacity: usize,
) -> (Client, Arc<FakeTransport>, Arc<RecordingSink>) {
    let transport = Arc::new(transport);
    let sink = Arc::new(RecordingSink::default());
    let client = Client::new(
        test_config(),
        test_options(queue_capacity),
        transport.clone(),
        sink.clone(),
    );
    (client, transport, sink)
}

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn test_publishes_reach_transport_in_enqueue_order() {
    let (client, transport, _sink) = start(FakeTransport::online(), 100);
    wait_until(|| transport.is_connected()).await;

    for i in 0..25 {
        client
            .publish("status", format!("message-{i}"), QualityOfService::AtLeastOnce)
            .await;
    }
    wait_until(|| transport.published().len() == 25).await;

    let payloads: Vec<String> = transport
        .published()
        .into_iter()
        .map(|m| String::from_utf8(m.payload).unwrap())
        .collect();
    let expected: Vec<String> = (0..25).map(|i| format!("message-{i}")).collect();
    assert_eq!(payloads, expected);
}

#[tokio::test]
async fn test_publish_while_disconnected_is_dropped_and_logged_once() {
    let (client, transport, sink) = start(FakeTransport::offline(), 100);
    wait_until(|| !sink.errors().is_empty()).await;

    client
        .publish("status", "ignored", QualityOfService::AtMostOnce)
        .await;
    client.close().await;

    assert!(transport.published().is_empty());
    let drops: Vec<_> = sink
        .errors()
        .into_iter()
        .filter(|(_, err)| err.contains("not connected"))
        .collect();
    assert_eq!(drops.len(), 1);
    assert!(drops[0].1.contains("status"));
}

#[tokio::test]
async fn test_connect_failure_is_logged_not_fatal() {
    let (client, transport, sink) = start(FakeTransport::offline(), 100);
    wait_until(|| !sink.errors().is_empty()).await;

    let (msg, err) = sink.errors().remove(0);
    assert_eq!(msg, "Error connecting to broker");
    assert!(err.contains("tcp://localhost:1883"));
    assert!(err.contains("connection refused"));

    // A later successful reconnect still subscribes.
    transport.simulate_reconnect();
    wait_until(|| transport.subscriptions().len() == 1).await;
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_new_callback_applies_from_next_delivery() {
    let (client, transport, _sink) = start(FakeTransport::online(), 100);
    wait_until(|| transport.is_connected()).await;

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = first.clone();
    client.set_message_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    for _ in 0..3 {
        assert!(transport.deliver("boiler_pin_state", b"SetLow"));
    }

    let counter = second.clone();
    client.set_message_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    for _ in 0..2 {
        assert!(transport.deliver("boiler_pin_state", b"SetLow"));
    }

    assert_eq!(first.load(Ordering::SeqCst), 3);
    assert_eq!(second.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reconnect_resubscribes_exactly_once() {
    let (_client, transport, sink) = start(FakeTransport::online(), 100);
    wait_until(|| transport.subscriptions().len() == 1).await;

    transport.simulate_connection_lost();
    transport.simulate_reconnect();
    wait_until(|| transport.subscriptions().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let subscriptions = transport.subscriptions();
    assert_eq!(subscriptions.len(), 2);
    assert_eq!(
        subscriptions[1],
        ("boiler_pin_state".to_string(), QualityOfService::ExactlyOnce)
    );

    assert!(sink.errors().iter().any(|(msg, _)| msg == "Connection lost"));
    assert!(sink.infos().iter().any(|msg| msg == "Attempting to reconnect"));
    assert_eq!(
        sink.infos()
            .iter()
            .filter(|msg| *msg == "Connected to broker")
            .count(),
        2
    );
}

#[tokio::test]
async fn test_subscribe_failure_keeps_connection_usable() {
    let transport = FakeTransport {
        subscribe_succeeds: false,
        ..FakeTransport::online()
    };
    let (client, transport, sink) = start(transport, 100);
    wait_until(|| !sink.errors().is_empty()).await;

    let (msg, err) = sink.errors().remove(0);
    assert_eq!(msg, "Error subscribing to topic");
    assert!(err.contains("subscription refused"));

    client
        .publish("status", "still works", QualityOfService::AtLeastOnce)
        .await;
    wait_until(|| transport.published().len() == 1).await;
}

#[tokio::test]
async fn test_full_queue_blocks_until_worker_drains() {
    let gate = Arc::new(Semaphore::new(0));
    let (client, transport, _sink) = start(FakeTransport::gated(gate.clone()), 2);
    wait_until(|| transport.is_connected()).await;

    // The worker takes the first message and parks in the gated publish.
    client.publish("t", "1", QualityOfService::AtMostOnce).await;
    wait_until(|| transport.publish_started.load(Ordering::SeqCst) == 1).await;

    client.publish("t", "2", QualityOfService::AtMostOnce).await;
    client.publish("t", "3", QualityOfService::AtMostOnce).await;
    assert_eq!(client.pending(), 2);

    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        client.publish("t", "4", QualityOfService::AtMostOnce),
    )
    .await;
    assert!(blocked.is_err(), "publish should wait while the queue is full");

    gate.add_permits(1);
    tokio::time::timeout(
        Duration::from_secs(1),
        client.publish("t", "4", QualityOfService::AtMostOnce),
    )
    .await
    .expect("publish should proceed once the worker drained an entry");

    gate.add_permits(3);
    wait_until(|| transport.published().len() == 4).await;
    let payloads: Vec<Vec<u8>> = transport
        .published()
        .into_iter()
        .map(|m| m.payload)
        .collect();
    assert_eq!(payloads, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec(), b"4".to_vec()]);
}

#[tokio::test]
async fn test_inbound_payload_reaches_callback_unchanged() {
    let (client, transport, _sink) = start(FakeTransport::online(), 100);
    wait_until(|| transport.is_connected()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.set_message_callback(move |message| {
        tx.send(message).unwrap();
    });

    assert!(transport.deliver("boiler_pin_state", b"SetHigh"));

    let received = rx.recv().await.unwrap();
    assert_eq!(received.topic, "boiler_pin_state");
    assert_eq!(received.payload, b"SetHigh".to_vec());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_close_drains_pending_messages() {
    let (client, transport, sink) = start(FakeTransport::online(), 100);
    wait_until(|| transport.is_connected()).await;

    for i in 0u8..10 {
        client
            .publish("status", vec![i], QualityOfService::AtMostOnce)
            .await;
    }
    client.close().await;

    assert_eq!(transport.published().len(), 10);
    assert!(!transport.is_connected());
    assert!(sink.infos().iter().any(|msg| msg == "Client closed"));
}

#[test]
fn test_dispatch_without_callback_drops_message() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = InboundDispatcher::new(sink.clone());

    assert!(!dispatcher.has_callback());
    assert!(!dispatcher.dispatch(InboundMessage::new("topic", "payload")));
    assert!(sink.errors().is_empty());
}

#[test]
fn test_callback_replaced_during_delivery_keeps_running_callback() {
    let dispatcher = Arc::new(InboundDispatcher::new(Arc::new(RecordingSink::default())));
    let calls = Arc::new(Mutex::new(Vec::new()));

    let inner = dispatcher.clone();
    let log = calls.clone();
    dispatcher.set_callback(Arc::new(move |message: InboundMessage| {
        log.lock().unwrap().push(format!("old:{}", message.topic));
        let log = log.clone();
        // Replacing from inside a delivery must not deadlock or affect it.
        inner.set_callback(Arc::new(move |message: InboundMessage| {
            log.lock().unwrap().push(format!("new:{}", message.topic));
        }));
    }));

    dispatcher.dispatch(InboundMessage::new("a", ""));
    dispatcher.dispatch(InboundMessage::new("b", ""));

    assert_eq!(*calls.lock().unwrap(), vec!["old:a", "new:b"]);
}

#[tokio::test]
async fn test_queue_reports_length_and_closure() {
    let (queue, receiver) = OutboundQueue::bounded(0);
    assert_eq!(queue.capacity(), 1);
    assert!(queue.is_empty());

    queue
        .push(OutboundMessage::new("t", "x", QualityOfService::AtMostOnce))
        .await
        .unwrap();
    assert_eq!(queue.len(), 1);

    drop(receiver);
    let err = queue
        .push(OutboundMessage::new("t", "y", QualityOfService::AtMostOnce))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::QueueClosed));
}

#[test]
fn test_qos_from_wire_level() {
    assert_eq!(QualityOfService::try_from(0).unwrap(), QualityOfService::AtMostOnce);
    assert_eq!(QualityOfService::try_from(1).unwrap(), QualityOfService::AtLeastOnce);
    assert_eq!(QualityOfService::try_from(2).unwrap(), QualityOfService::ExactlyOnce);
    assert!(matches!(
        QualityOfService::try_from(3),
        Err(ClientError::InvalidQos(3))
    ));
    assert_eq!(QualityOfService::ExactlyOnce.as_u8(), 2);
}

#[test]
fn test_broker_endpoint_parsing() {
    let plain = BrokerEndpoint::parse("tcp://broker.local:1884").unwrap();
    assert_eq!(plain.host, "broker.local");
    assert_eq!(plain.port, 1884);
    assert!(!plain.tls);

    let default_port = BrokerEndpoint::parse("mqtt://broker.local").unwrap();
    assert_eq!(default_port.port, 1883);

    let secure = BrokerEndpoint::parse("ssl://broker.local").unwrap();
    assert!(secure.tls);
    assert_eq!(secure.port, 8883);

    assert!(matches!(
        BrokerEndpoint::parse("http://broker.local"),
        Err(ClientError::InvalidBroker { .. })
    ));
    assert!(matches!(
        BrokerEndpoint::parse("localhost:1883"),
        Err(ClientError::InvalidBroker { .. })
    ));
}

#[test]
fn test_mqtt_options_from_config() {
    let config = test_config().with_credentials("user", "secret");
    let options = mqtt_options(&config, &ClientOptions::default()).unwrap();

    assert_eq!(options.client_id(), "test-client");
    assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
    assert_eq!(options.keep_alive(), Duration::from_secs(10));
    assert_eq!(
        options.credentials(),
        Some(("user".to_string(), "secret".to_string()))
    );
}

#[test]
fn test_connection_config_from_settings() {
    let mut settings = MqttSettings::default();
    let config = ConnectionConfig::from(&settings);
    assert!(config.client_id.starts_with("pinsub-"));
    assert!(config.credentials.is_none());

    settings.client_id = "controller".to_string();
    settings.username = "user".to_string();
    settings.password = "pw".to_string();
    settings.queue_capacity = 0;
    let config = ConnectionConfig::from(&settings);
    let options = ClientOptions::from(&settings);
    assert_eq!(config.client_id, "controller");
    assert_eq!(config.credentials.unwrap().password, "pw");
    assert_eq!(options.queue_capacity, 1);
}

#[test]
fn test_mqtt_options_reject_blank_client_id() {
    let config = ConnectionConfig::new("tcp://localhost:1883", "boiler_pin_state", " ");
    assert!(matches!(
        mqtt_options(&config, &ClientOptions::default()),
        Err(ClientError::InvalidClientId(_))
    ));
}

#[tokio::test]
async fn test_callback_can_publish_from_delivery_task() {
    let (client, transport, sink) = start(FakeTransport::online(), 10);
    wait_until(|| transport.is_connected()).await;

    let client = Arc::new(client);
    let replier = Arc::downgrade(&client);
    client.set_message_callback(move |message| {
        if let Some(client) = replier.upgrade() {
            client.try_publish(
                "boiler_pin_state/ack",
                message.payload,
                QualityOfService::AtLeastOnce,
            );
        }
    });

    // Deliveries run on a runtime task, like the MQTT event loop.
    let handlers = transport.handlers();
    let delivered = tokio::spawn(async move {
        handlers.deliver(InboundMessage::new("boiler_pin_state", "SetHigh"))
    })
    .await
    .expect("delivery task panicked");
    assert!(delivered);

    wait_until(|| transport.published().len() == 1).await;
    let published = transport.published();
    assert_eq!(published[0].topic, "boiler_pin_state/ack");
    assert_eq!(published[0].payload, b"SetHigh".to_vec());
    assert!(sink.errors().is_empty());
}

#[tokio::test]
async fn test_try_publish_drops_and_logs_when_queue_full() {
    let gate = Arc::new(Semaphore::new(0));
    let (client, transport, sink) = start(FakeTransport::gated(gate.clone()), 1);
    wait_until(|| transport.is_connected()).await;

    client.try_publish("t", "1", QualityOfService::AtMostOnce);
    wait_until(|| transport.publish_started.load(Ordering::SeqCst) == 1).await;
    client.try_publish("t", "2", QualityOfService::AtMostOnce);
    client.try_publish("overflow", "3", QualityOfService::AtMostOnce);

    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "Could not queue message");
    assert!(errors[0].1.contains("publish queue full"));
    assert!(errors[0].1.contains("overflow"));

    gate.add_permits(2);
    wait_until(|| transport.published().len() == 2).await;
    let payloads: Vec<Vec<u8>> = transport
        .published()
        .into_iter()
        .map(|m| m.payload)
        .collect();
    assert_eq!(payloads, vec![b"1".to_vec(), b"2".to_vec()]);
}

#[test]
fn test_panicking_callback_is_logged_and_contained() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = InboundDispatcher::new(sink.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    dispatcher.set_callback(Arc::new(move |message: InboundMessage| {
        counter.fetch_add(1, Ordering::SeqCst);
        if message.payload == b"boom" {
            panic!("bad payload");
        }
    }));

    assert!(dispatcher.dispatch(InboundMessage::new("boiler_pin_state", "boom")));
    assert!(dispatcher.dispatch(InboundMessage::new("boiler_pin_state", "SetHigh")));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "Message callback panicked: bad payload");
}

#[tokio::test]
async fn test_dropping_client_disconnects_transport() {
    let (client, transport, sink) = start(FakeTransport::online(), 100);
    wait_until(|| transport.subscriptions().len() == 1).await;

    drop(client);

    wait_until(|| {
        sink.debugs()
            .iter()
            .any(|msg| msg == "Connection supervisor stopped")
    })
    .await;
    wait_until(|| {
        sink.infos()
            .iter()
            .any(|msg| msg == "Publish queue closed, message processing stopped")
    })
    .await;
    assert!(!transport.is_connected());
    assert!(transport.handlers.lock().unwrap().is_none());
}

#[test]
fn test_ack_tracker_resolves_each_qos_on_its_final_packet() {
    let mut acks = AckTracker::default();
    let mut at_most_once = acks.expect_publish(QoS::AtMostOnce);
    let mut at_least_once = acks.expect_publish(QoS::AtLeastOnce);
    let mut exactly_once = acks.expect_publish(QoS::ExactlyOnce);

    acks.publish_written(0);
    assert_eq!(at_most_once.try_recv(), Ok(Ok(())));

    acks.publish_written(1);
    acks.publish_written(2);
    assert_eq!(at_least_once.try_recv(), Err(TryRecvError::Empty));
    acks.publish_acknowledged(1);
    assert_eq!(at_least_once.try_recv(), Ok(Ok(())));

    acks.publish_received(2);
    assert_eq!(exactly_once.try_recv(), Err(TryRecvError::Empty));
    acks.publish_acknowledged(2);
    assert_eq!(exactly_once.try_recv(), Ok(Ok(())));
}

#[test]
fn test_ack_tracker_reports_refused_subscription() {
    let mut acks = AckTracker::default();
    let mut granted = acks.expect_subscribe();
    let mut refused = acks.expect_subscribe();
    acks.subscribe_written(3);
    acks.subscribe_written(4);

    acks.subscribe_acknowledged(4, &[SubscribeReasonCode::Failure]);
    acks.subscribe_acknowledged(3, &[SubscribeReasonCode::Success(QoS::ExactlyOnce)]);

    assert_eq!(granted.try_recv(), Ok(Ok(())));
    assert_eq!(
        refused.try_recv(),
        Ok(Err(TransportError::Rejected("subscription refused".to_string())))
    );
}

#[test]
fn test_ack_tracker_fails_waiters_on_connection_loss() {
    let mut acks = AckTracker::default();
    let mut written = acks.expect_publish(QoS::AtLeastOnce);
    acks.publish_written(1);
    let mut queued = acks.expect_publish(QoS::ExactlyOnce);
    let mut subscribed = acks.expect_subscribe();
    acks.subscribe_written(2);
    let mut subscribe_queued = acks.expect_subscribe();

    acks.fail_all();

    for rx in [&mut written, &mut queued, &mut subscribed, &mut subscribe_queued] {
        assert_eq!(rx.try_recv(), Ok(Err(TransportError::ConnectionLost)));
    }
}

#[test]
fn test_ack_tracker_cancel_drops_unsent_request() {
    let mut acks = AckTracker::default();
    let mut sent = acks.expect_publish(QoS::AtLeastOnce);
    let mut unsent = acks.expect_publish(QoS::AtLeastOnce);
    acks.cancel_last_publish();

    acks.publish_written(5);
    acks.publish_acknowledged(5);
    assert_eq!(sent.try_recv(), Ok(Ok(())));
    assert_eq!(unsent.try_recv(), Err(TryRecvError::Closed));

    let mut subscribe = acks.expect_subscribe();
    acks.cancel_last_subscribe();
    assert_eq!(subscribe.try_recv(), Err(TryRecvError::Closed));
}

#[test]
fn test_ack_tracker_ignores_late_write_of_abandoned_request() {
    let mut acks = AckTracker::default();
    let mut stale = acks.expect_publish(QoS::AtMostOnce);
    acks.fail_all();
    assert_eq!(stale.try_recv(), Ok(Err(TransportError::ConnectionLost)));

    let mut fresh = acks.expect_publish(QoS::AtLeastOnce);
    // The abandoned request is flushed after the reconnect, ahead of the new one.
    acks.publish_written(0);
    assert_eq!(fresh.try_recv(), Err(TryRecvError::Empty));

    acks.publish_written(7);
    acks.publish_acknowledged(7);
    assert_eq!(fresh.try_recv(), Ok(Ok(())));
}

#[test]
fn test_ack_tracker_ignores_replayed_in_flight_publish() {
    let mut acks = AckTracker::default();
    let mut in_flight = acks.expect_publish(QoS::AtLeastOnce);
    acks.publish_written(1);
    acks.fail_all();
    assert_eq!(in_flight.try_recv(), Ok(Err(TransportError::ConnectionLost)));

    let mut fresh = acks.expect_publish(QoS::AtLeastOnce);
    // Unacknowledged publishes are resent under their old packet id.
    acks.publish_written(1);
    acks.publish_written(2);
    acks.publish_acknowledged(1);
    assert_eq!(fresh.try_recv(), Err(TryRecvError::Empty));

    acks.publish_acknowledged(2);
    assert_eq!(fresh.try_recv(), Ok(Ok(())));
}

#[test]
fn test_ack_tracker_released_publish_is_not_replayed() {
    let mut acks = AckTracker::default();
    let _released = acks.expect_publish(QoS::ExactlyOnce);
    acks.publish_written(1);
    acks.publish_received(1);
    acks.fail_all();

    // Past PUBREC only PUBREL is resent, so packet id 1 is free again.
    let mut fresh = acks.expect_publish(QoS::AtLeastOnce);
    acks.publish_written(1);
    acks.publish_acknowledged(1);
    assert_eq!(fresh.try_recv(), Ok(Ok(())));
}

#[tokio::test]
async fn test_mqtt_transport_starts_event_loop_once() {
    let config = ConnectionConfig::new("tcp://127.0.0.1:1", "boiler_pin_state", "test-client");
    let options = ClientOptions {
        retry_interval: Duration::from_millis(10),
        ..ClientOptions::default()
    };
    let transport = MqttTransport::new(&config, &options).unwrap();

    let (events, _events_rx) = mpsc::unbounded_channel();
    let dispatcher = Arc::new(InboundDispatcher::new(Arc::new(RecordingSink::default())));
    let handlers = TransportHandlers::new(events, dispatcher);

    let _ = tokio::time::timeout(
        Duration::from_millis(200),
        transport.connect(handlers.clone()),
    )
    .await;
    assert_eq!(
        transport.connect(handlers).await,
        Err(TransportError::AlreadyStarted)
    );
    assert!(!transport.is_connected());
    transport.disconnect().await.unwrap();
}
