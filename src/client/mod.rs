//! The `client` module is the asynchronous publish/subscribe client.
//!
//! Outbound messages flow caller → [`OutboundQueue`] → publish worker →
//! [`Transport`]; inbound messages flow transport → [`InboundDispatcher`] →
//! the registered callback. Connection lifecycle is handled by the
//! connection supervisor, which re-subscribes after every reconnect.

pub mod dispatcher;
mod lifecycle;
pub mod message;
pub mod mqtt_transport;
pub mod options;
pub mod pubsub_client;
pub mod queue;
mod supervisor;
pub mod transport;
mod worker;

pub use dispatcher::{InboundDispatcher, MessageCallback};
pub use message::{InboundMessage, OutboundMessage, QualityOfService};
pub use mqtt_transport::MqttTransport;
pub use options::{ClientOptions, ConnectionConfig, Credentials};
pub use pubsub_client::Client;
pub use queue::OutboundQueue;
pub use supervisor::SUBSCRIBE_QOS;
pub use transport::{ConnectionEvent, Transport, TransportHandlers};

#[cfg(test)]
mod tests;
