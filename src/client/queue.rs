use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::client::message::OutboundMessage;
use crate::utils::error::ClientError;

/// Receiving half of the outbound queue, owned by the publish worker.
pub type OutboundReceiver = mpsc::Receiver<OutboundMessage>;

/// Bounded FIFO of pending publishes.
///
/// Pushing waits while the queue is full instead of dropping, so a producer
/// that outpaces the network is slowed down rather than losing messages.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    sender: mpsc::Sender<OutboundMessage>,
}

impl OutboundQueue {
    /// Creates a queue holding at most `capacity` messages (at least one).
    pub fn bounded(capacity: usize) -> (Self, OutboundReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub async fn push(&self, message: OutboundMessage) -> Result<(), ClientError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| ClientError::QueueClosed)
    }

    /// Non-blocking variant of [`push`](Self::push). Fails with
    /// [`ClientError::QueueFull`] instead of waiting for a free slot.
    pub fn try_push(&self, message: OutboundMessage) -> Result<(), ClientError> {
        self.sender.try_send(message).map_err(|err| match err {
            TrySendError::Full(message) => ClientError::QueueFull {
                topic: message.topic,
            },
            TrySendError::Closed(_) => ClientError::QueueClosed,
        })
    }

    /// Blocking variant of [`push`](Self::push) for threads outside the async
    /// runtime. Panics if called from within an async execution context.
    pub fn blocking_push(&self, message: OutboundMessage) -> Result<(), ClientError> {
        self.sender
            .blocking_send(message)
            .map_err(|_| ClientError::QueueClosed)
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Number of messages waiting to be taken by the worker.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
