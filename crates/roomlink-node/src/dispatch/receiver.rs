//! Inbound receiver: one subscription to the raw message channel, decoded
//! once, fanned out to every registered handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use roomlink_core::protocol::{self, Inbound};

use crate::device::LocalBus;
use crate::obs::NodeMetrics;

#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Must not fail; problems are logged by the handler itself.
    async fn handle(&self, msg: &Inbound);
}

/// Handle returned by [`Receiver::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn InboundHandler>,
    once: bool,
}

#[derive(Clone)]
pub struct Receiver {
    bus: LocalBus,
    subs: Arc<Mutex<Vec<Subscription>>>,
    next_id: Arc<AtomicU64>,
    metrics: Arc<NodeMetrics>,
}

impl Receiver {
    pub fn new(bus: LocalBus, metrics: Arc<NodeMetrics>) -> Self {
        Self {
            bus,
            subs: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            metrics,
        }
    }

    fn add(&self, handler: Arc<dyn InboundHandler>, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut subs) = self.subs.lock() {
            subs.push(Subscription { id, handler, once });
        }
        id
    }

    /// Persistent subscription.
    pub fn on(&self, handler: Arc<dyn InboundHandler>) -> SubscriptionId {
        self.add(handler, false)
    }

    /// Receives exactly one message, then is removed.
    pub fn once(&self, handler: Arc<dyn InboundHandler>) -> SubscriptionId {
        self.add(handler, true)
    }

    /// The next message, as a future.
    pub fn next_message(&self) -> oneshot::Receiver<Inbound> {
        let (tx, rx) = oneshot::channel();
        self.once(Arc::new(OneShot(Mutex::new(Some(tx)))));
        rx
    }

    pub fn off(&self, id: SubscriptionId) {
        if let Ok(mut subs) = self.subs.lock() {
            subs.retain(|s| s.id != id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Decode `text` and hand it to every current subscriber in
    /// registration order.
    pub async fn deliver(&self, text: &str) {
        let msg = protocol::decode(text);
        let origin = match msg.envelope() {
            Some(env) if env.source.is_local() => "local",
            Some(_) => "remote",
            None => {
                self.metrics.decode_fallbacks.inc(&[]);
                "raw"
            }
        };
        self.metrics.inbound_messages.inc(&[("origin", origin)]);

        let handlers: Vec<Arc<dyn InboundHandler>> = match self.subs.lock() {
            Ok(mut subs) => {
                let handlers = subs.iter().map(|s| s.handler.clone()).collect();
                subs.retain(|s| !s.once);
                handlers
            }
            Err(_) => return,
        };
        for h in handlers {
            h.handle(&msg).await;
        }
    }

    /// Subscribe to the bus and deliver until it closes. Lagging drops the
    /// skipped messages with a warning.
    pub fn spawn(&self) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(text) => this.deliver(&text).await,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "receiver lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("message channel closed, receiver stopping");
                        return;
                    }
                }
            }
        })
    }
}

struct OneShot(Mutex<Option<oneshot::Sender<Inbound>>>);

#[async_trait]
impl InboundHandler for OneShot {
    async fn handle(&self, msg: &Inbound) {
        let tx = self.0.lock().ok().and_then(|mut g| g.take());
        if let Some(tx) = tx {
            let _ = tx.send(msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    #[derive(Default)]
    struct Count(AtomicU64);

    #[async_trait]
    impl InboundHandler for Count {
        async fn handle(&self, _msg: &Inbound) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn once_handlers_see_a_single_message() {
        let r = Receiver::new(LocalBus::new(), Arc::default());
        let always = Arc::new(Count::default());
        let single = Arc::new(Count::default());
        r.on(always.clone());
        r.once(single.clone());

        r.deliver("one").await;
        r.deliver("two").await;

        assert_eq!(always.0.load(Ordering::Relaxed), 2);
        assert_eq!(single.0.load(Ordering::Relaxed), 1);
        assert_eq!(r.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn malformed_input_is_wrapped_not_dropped() {
        let metrics = Arc::new(NodeMetrics::default());
        let r = Receiver::new(LocalBus::new(), metrics.clone());
        let next = r.next_message();

        r.deliver("{\"App\": 1").await;
        match next.await.unwrap() {
            Inbound::Raw { raw_message } => assert_eq!(raw_message, "{\"App\": 1"),
            other => panic!("expected raw, got {other:?}"),
        }
        assert_eq!(metrics.decode_fallbacks.get(&[]), 1);
    }

    #[tokio::test]
    async fn spawned_receiver_reads_the_bus() {
        let bus = LocalBus::new();
        let r = Receiver::new(bus.clone(), Arc::default());
        let next = r.next_message();
        let task = r.spawn();

        bus.send(r#"{"App":"JoinSplit","Source":{"Type":"Remote_IP","Id":"10.0.0.110"},"Type":"Command","Value":"ACTIVATE_NEW_LAYOUT"}"#);
        let msg = next.await.unwrap();
        assert_eq!(msg.envelope().unwrap().source.id, "10.0.0.110");

        r.off(SubscriptionId(999));
        task.abort();
    }
}
