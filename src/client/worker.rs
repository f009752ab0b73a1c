use std::sync::Arc;

use crate::client::lifecycle::{self, LifecycleReceiver};
use crate::client::queue::OutboundReceiver;
use crate::client::transport::Transport;
use crate::utils::error::ClientError;
use crate::utils::logging::LogSink;

/// Single consumer of the outbound queue.
///
/// Messages are sent one at a time, each waiting for its acknowledgment, so
/// the broker sees them in enqueue order. Anything that cannot be sent is
/// logged and dropped. Once the client starts closing, the queue stops
/// accepting messages and the worker exits after sending what is left.
pub(crate) async fn run(
    transport: Arc<dyn Transport>,
    mut queue: OutboundReceiver,
    mut phase: LifecycleReceiver,
    sink: Arc<dyn LogSink>,
) {
    sink.info("Starting message processing");
    let mut draining = false;

    loop {
        let next = tokio::select! {
            message = queue.recv() => message,
            _ = lifecycle::closing(&mut phase), if !draining => {
                draining = true;
                queue.close();
                continue;
            }
        };
        let Some(message) = next else {
            break;
        };

        if !transport.is_connected() {
            let err = ClientError::NotConnectedDrop {
                topic: message.topic,
            };
            sink.error("Client not connected, could not publish message", Some(&err));
            continue;
        }

        // The transport takes ownership of the message.
        let topic = message.topic.clone();
        if let Err(source) = transport.publish(message).await {
            let err = ClientError::PublishFailure { topic, source };
            sink.error("Error publishing message", Some(&err));
        }
    }

    sink.info("Publish queue closed, message processing stopped");
}
