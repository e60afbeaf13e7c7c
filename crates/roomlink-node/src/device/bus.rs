use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 256;

/// Loopback text channel ("send message" / "on message").
///
/// Every subscriber sees every message sent after it subscribed. Sending
/// never fails from the caller's view; a message sent with no subscriber is
/// simply gone.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<String>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn send(&self, text: impl Into<String>) {
        let delivered = self.tx.send(text.into()).unwrap_or(0);
        tracing::trace!(subscribers = delivered, "local bus send");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}
