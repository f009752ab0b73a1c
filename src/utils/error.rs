//! The `error` module defines the error types used within `pinsub`.
//!
//! Client failures are never returned to a `publish` caller; they are built
//! here and handed to the log sink at the point where they occur.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::client::Transport) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No acknowledgment arrived in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The connection dropped while a request was outstanding
    #[error("connection lost before acknowledgment")]
    ConnectionLost,

    /// The broker answered with a failure code
    #[error("broker rejected request: {0}")]
    Rejected(String),

    /// The request could not be handed to the network layer
    #[error("request could not be queued: {0}")]
    Request(String),

    /// Network or protocol level connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// `connect` was called on a transport whose event loop already runs
    #[error("transport already started")]
    AlreadyStarted,
}

/// Failures surfaced by the pub/sub client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Initial connect attempt failed; the transport keeps retrying
    #[error("error connecting to broker {broker}")]
    ConnectFailure {
        broker: String,
        #[source]
        source: TransportError,
    },

    /// Subscription request failed after connecting; publishing still works
    #[error("error subscribing to topic {topic}")]
    SubscribeFailure {
        topic: String,
        #[source]
        source: TransportError,
    },

    /// The broker rejected or never acknowledged a publish; the message is dropped
    #[error("error publishing to topic {topic}")]
    PublishFailure {
        topic: String,
        #[source]
        source: TransportError,
    },

    /// Publish attempted while disconnected; the message is dropped
    #[error("client not connected, could not publish message to topic {topic}")]
    NotConnectedDrop { topic: String },

    /// Non-blocking enqueue found the outbound queue at capacity; the message is dropped
    #[error("publish queue full, dropped message to topic {topic}")]
    QueueFull { topic: String },

    /// The outbound queue no longer has a consumer
    #[error("publish queue closed")]
    QueueClosed,

    /// Broker address cannot be turned into transport options
    #[error("invalid broker address {broker}: {reason}")]
    InvalidBroker { broker: String, reason: String },

    /// Client identity is empty or starts with whitespace
    #[error("invalid client id {0:?}")]
    InvalidClientId(String),

    /// Quality-of-service byte outside 0..=2
    #[error("invalid quality of service level {0}")]
    InvalidQos(u8),
}

/// Errors setting up the log file.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("invalid log rotation {0:?}, expected minutely, hourly, daily or never")]
    InvalidRotation(String),

    #[error("invalid log file path {0:?}")]
    InvalidPath(String),

    #[error("cannot open log file {path}")]
    File {
        path: String,
        #[source]
        source: tracing_appender::rolling::InitError,
    },
}

/// Errors reported by a pin operator.
#[derive(Error, Debug)]
pub enum PinError {
    #[error("pin controller is not open")]
    NotOpen,

    #[error("pin controller error: {0}")]
    Controller(String),
}
