use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use crate::client::message::InboundMessage;
use crate::utils::logging::LogSink;

/// Handler invoked for every inbound message.
///
/// Several deliveries may run at the same time if the transport dispatches
/// concurrently; callbacks that touch shared state must lock it themselves.
pub type MessageCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Routes transport deliveries to the single registered callback.
pub struct InboundDispatcher {
    callback: RwLock<Option<MessageCallback>>,
    sink: Arc<dyn LogSink>,
}

impl InboundDispatcher {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            callback: RwLock::new(None),
            sink,
        }
    }

    /// Installs or replaces the callback. Takes effect for the next delivery;
    /// a delivery already running keeps the callback it started with.
    pub fn set_callback(&self, callback: MessageCallback) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn has_callback(&self) -> bool {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Invokes the current callback exactly once for `message`.
    ///
    /// A panicking callback is logged and contained here, so it cannot take
    /// down the transport task delivering the message.
    pub fn dispatch(&self, message: InboundMessage) -> bool {
        // Clone out of the lock so a slow callback never blocks `set_callback`.
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match callback {
            Some(callback) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(message))) {
                    self.sink.error(
                        &format!("Message callback panicked: {}", panic_reason(&*panic)),
                        None,
                    );
                }
                true
            }
            None => {
                self.sink.debug(&format!(
                    "No message callback registered, dropping message on topic {}",
                    message.topic
                ));
                false
            }
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> &str {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        reason
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason
    } else {
        "unknown panic"
    }
}

impl std::fmt::Debug for InboundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundDispatcher")
            .field("has_callback", &self.has_callback())
            .finish()
    }
}
