use std::time::Duration;

use uuid::Uuid;

use crate::config::MqttSettings;

/// Username/password pair sent on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Immutable connection parameters, fixed at client construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Broker address as `scheme://host:port`
    pub broker: String,
    /// Topic subscribed to on every (re)connect
    pub topic: String,
    pub client_id: String,
    pub credentials: Option<Credentials>,
}

impl ConnectionConfig {
    pub fn new(broker: impl Into<String>, topic: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            topic: topic.into(),
            client_id: client_id.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

impl From<&MqttSettings> for ConnectionConfig {
    fn from(settings: &MqttSettings) -> Self {
        let client_id = if settings.client_id.is_empty() {
            format!("pinsub-{}", Uuid::new_v4())
        } else {
            settings.client_id.clone()
        };

        let config = ConnectionConfig::new(&settings.broker, &settings.topic, client_id);
        if settings.username.is_empty() {
            config
        } else {
            config.with_credentials(&settings.username, &settings.password)
        }
    }
}

/// Tuning knobs for the queue, the transport and shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Outbound queue capacity; `publish` waits once this many messages are pending
    pub queue_capacity: usize,
    pub keep_alive: Duration,
    /// Pause between reconnect attempts
    pub retry_interval: Duration,
    /// Upper bound on the initial connect attempt
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a publish or subscribe acknowledgment
    pub ack_timeout: Duration,
    /// Upper bound on draining the queue during `close`
    pub shutdown_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            keep_alive: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&MqttSettings> for ClientOptions {
    fn from(settings: &MqttSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity.max(1),
            keep_alive: Duration::from_secs(settings.keep_alive_secs.max(1)),
            retry_interval: Duration::from_secs(settings.retry_interval_secs),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            ack_timeout: Duration::from_secs(settings.ack_timeout_secs),
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
        }
    }
}
