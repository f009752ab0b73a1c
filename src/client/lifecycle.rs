use tokio::sync::watch;

/// Shutdown phase broadcast from the client to its background tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Running,
    /// No new publishes are accepted; the worker empties the queue.
    Draining,
    /// The supervisor disconnects the transport and exits.
    Stopped,
}

pub(crate) type LifecycleSender = watch::Sender<Lifecycle>;
pub(crate) type LifecycleReceiver = watch::Receiver<Lifecycle>;

pub(crate) fn channel() -> (LifecycleSender, LifecycleReceiver) {
    watch::channel(Lifecycle::Running)
}

/// Resolves once the client left `Running`, or was dropped.
pub(crate) async fn closing(lifecycle: &mut LifecycleReceiver) {
    let _ = lifecycle.wait_for(|phase| *phase != Lifecycle::Running).await;
}

/// Resolves once the client reached `Stopped`, or was dropped.
pub(crate) async fn stopped(lifecycle: &mut LifecycleReceiver) {
    let _ = lifecycle.wait_for(|phase| *phase == Lifecycle::Stopped).await;
}
