//! Outbound delivery queue.
//!
//! A single worker task owns the pending list and drains it one item per
//! tick. `fire` bypasses the list but shares the dispatch permit, so there is
//! never more than one network call in flight per process.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};

use roomlink_core::error::{Result, RoomLinkError};
use roomlink_core::protocol::Envelope;

use crate::config::RetryPolicy;
use crate::device::LocalBus;
use crate::obs::NodeMetrics;

use super::descriptor::{Destination, TransportDescriptor, TransportKind};
use super::egress::{Egress, EgressResponse};
use super::render::{self, Masker, RenderedRequest};

/// Lowest accepted tick interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(250);

/// What goes on the wire for one item.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Text for the loopback channel.
    Local(String),
    Http(RenderedRequest),
}

/// One pending delivery. Owned by the queue from enqueue until its attempt
/// completes.
#[derive(Debug)]
pub struct DeliveryItem {
    pub id: u64,
    pub kind: TransportKind,
    /// Destination address, or `"local"`.
    pub destination: String,
    pub payload: Payload,
    /// Copy of the envelope that was rendered.
    pub envelope: Envelope,
    pub attempts: u32,
    reply: Option<oneshot::Sender<DeliveryReport>>,
}

impl DeliveryItem {
    /// Size-checks and renders `envelope` for `dest`. Oversize values fail
    /// here, before anything reaches the queue.
    pub fn prepare(
        id: u64,
        descriptor: &TransportDescriptor,
        dest: Option<&Destination>,
        envelope: Envelope,
    ) -> Result<Self> {
        envelope.check_value_size(descriptor.limits().max_value_bytes)?;
        let text = envelope.to_json()?;
        let (destination, payload) = match (descriptor.kind(), dest) {
            (TransportKind::Local, _) => ("local".to_string(), Payload::Local(text)),
            (_, Some(dest)) => (dest.address.clone(), Payload::Http(render::render(descriptor, dest, &text)?)),
            (kind, None) => {
                return Err(RoomLinkError::Internal(format!("{kind} delivery without destination")))
            }
        };
        Ok(Self {
            id,
            kind: descriptor.kind(),
            destination,
            payload,
            envelope,
            attempts: 0,
            reply: None,
        })
    }

    /// Route the final report of this item to `tx`.
    pub fn with_reply(mut self, tx: oneshot::Sender<DeliveryReport>) -> Self {
        self.reply = Some(tx);
        self
    }
}

/// Successful delivery result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    /// HTTP status, absent for loopback deliveries.
    pub status: Option<u16>,
    pub body: String,
}

/// Outcome of one delivery attempt (or of a filtered destination).
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub id: u64,
    /// `None` for destinations rejected before dispatch.
    pub kind: Option<TransportKind>,
    pub destination: String,
    pub outcome: Result<DeliveryResponse>,
    pub dispatched_at: Instant,
}

impl DeliveryReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub(crate) fn rejected(destination: impl Into<String>, err: RoomLinkError) -> Self {
        Self {
            id: 0,
            kind: None,
            destination: destination.into(),
            outcome: Err(err),
            dispatched_at: Instant::now(),
        }
    }
}

/// Queue state after one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Empty,
    Pending(usize),
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub remaining: Remaining,
    /// `None` when the tick found nothing to do.
    pub outcome: Option<DeliveryReport>,
}

/// Dispatch path shared by the worker and `fire`.
pub struct Dispatch {
    egress: Arc<dyn Egress>,
    bus: LocalBus,
    permit: Semaphore,
    masker: Masker,
    metrics: Arc<NodeMetrics>,
}

impl Dispatch {
    pub fn new(egress: Arc<dyn Egress>, bus: LocalBus, masker: Masker, metrics: Arc<NodeMetrics>) -> Self {
        Self { egress, bus, permit: Semaphore::new(1), masker, metrics }
    }

    /// Perform one attempt. Never panics, never blocks on anything other
    /// than the single dispatch permit and the call itself.
    pub async fn deliver(&self, item: &DeliveryItem) -> DeliveryReport {
        let started = Instant::now();
        let outcome = match &item.payload {
            Payload::Local(text) => {
                self.bus.send(text.clone());
                Ok(DeliveryResponse { status: None, body: String::new() })
            }
            Payload::Http(req) => self.post(item, req).await,
        };

        let kind = item.kind.as_str();
        let result = if outcome.is_ok() { "ok" } else { "error" };
        self.metrics.deliveries.inc(&[("kind", kind), ("outcome", result)]);
        self.metrics.delivery_duration.observe(&[("kind", kind)], started.elapsed());

        match &outcome {
            Ok(_) => tracing::debug!(id = item.id, dest = %item.destination, kind, "delivered"),
            Err(e) => tracing::warn!(id = item.id, dest = %item.destination, kind, error = %e, "delivery failed"),
        }

        DeliveryReport {
            id: item.id,
            kind: Some(item.kind),
            destination: item.destination.clone(),
            outcome,
            dispatched_at: started,
        }
    }

    async fn post(&self, item: &DeliveryItem, req: &RenderedRequest) -> Result<DeliveryResponse> {
        let _permit = self
            .permit
            .acquire()
            .await
            .map_err(|_| RoomLinkError::Internal("dispatch permit closed".into()))?;

        match self.egress.post(req).await {
            Ok(EgressResponse { status, body }) => Ok(DeliveryResponse { status: Some(status), body }),
            Err(e) => Err(RoomLinkError::Delivery {
                destination: item.destination.clone(),
                correlation_id: item.id,
                payload: self.masker.mask(&String::from_utf8_lossy(&req.body)),
                reason: e.to_string(),
            }),
        }
    }
}

/// Handle for producers. Cheap to clone.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<DeliveryItem>,
    dispatch: Arc<Dispatch>,
    next_id: Arc<AtomicU64>,
}

impl DeliveryQueue {
    /// Build a queue and its worker. The caller spawns `worker.run(..)`.
    pub fn new(dispatch: Arc<Dispatch>, retry: RetryPolicy, metrics: Arc<NodeMetrics>) -> (Self, QueueWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self { tx, dispatch: dispatch.clone(), next_id: Arc::new(AtomicU64::new(1)) };
        let worker = QueueWorker { rx, pending: VecDeque::new(), dispatch, retry, metrics, ticks: None };
        (queue, worker)
    }

    /// Correlation id for the next item.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Append to the tail. Fails only if the worker is gone.
    pub fn enqueue(&self, item: DeliveryItem) -> Result<()> {
        tracing::trace!(id = item.id, dest = %item.destination, "enqueue");
        self.tx
            .send(item)
            .map_err(|_| RoomLinkError::Internal("delivery queue stopped".into()))
    }

    /// Immediate best-effort delivery outside the FIFO.
    pub async fn fire(&self, item: DeliveryItem) -> DeliveryReport {
        self.dispatch.deliver(&item).await
    }
}

pub struct QueueWorker {
    rx: mpsc::UnboundedReceiver<DeliveryItem>,
    pending: VecDeque<DeliveryItem>,
    dispatch: Arc<Dispatch>,
    retry: RetryPolicy,
    metrics: Arc<NodeMetrics>,
    ticks: Option<mpsc::UnboundedSender<TickReport>>,
}

impl QueueWorker {
    /// Publish every tick's report to `tx`.
    pub fn with_tick_reports(mut self, tx: mpsc::UnboundedSender<TickReport>) -> Self {
        self.ticks = Some(tx);
        self
    }

    fn remaining(&self) -> Remaining {
        match self.pending.len() {
            0 => Remaining::Empty,
            n => Remaining::Pending(n),
        }
    }

    /// Dispatch at most one item: the head of the list.
    pub async fn tick(&mut self) -> TickReport {
        while let Ok(item) = self.rx.try_recv() {
            self.pending.push_back(item);
        }

        let Some(mut item) = self.pending.pop_front() else {
            return TickReport { remaining: Remaining::Empty, outcome: None };
        };

        item.attempts += 1;
        let report = self.dispatch.deliver(&item).await;

        let requeue = match self.retry {
            RetryPolicy::Requeue { max_attempts } => !report.is_ok() && item.attempts < max_attempts,
            RetryPolicy::None => false,
        };
        if requeue {
            tracing::info!(id = item.id, dest = %item.destination, attempt = item.attempts, "requeue after failure");
            self.pending.push_back(item);
        } else if let Some(reply) = item.reply.take() {
            let _ = reply.send(report.clone());
        }

        self.metrics.queue_depth.set(&[], self.pending.len() as i64);
        TickReport { remaining: self.remaining(), outcome: Some(report) }
    }

    /// Tick forever at `interval` (floored at [`MIN_INTERVAL`]). Returns
    /// once every producer handle is dropped and the list is drained.
    pub async fn run(mut self, interval: Duration) {
        let period = if interval < MIN_INTERVAL {
            tracing::warn!(
                requested_ms = interval.as_millis() as u64,
                floor_ms = MIN_INTERVAL.as_millis() as u64,
                "delivery interval below floor, clamping"
            );
            MIN_INTERVAL
        } else {
            interval
        };

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.tick().await;
            if report.outcome.is_none() {
                tracing::trace!("delivery queue empty");
            }
            let drained = report.remaining == Remaining::Empty;
            if let Some(ticks) = &self.ticks {
                let _ = ticks.send(report);
            }
            if drained && self.rx.is_closed() && self.rx.is_empty() {
                tracing::debug!("delivery queue closed");
                return;
            }
        }
    }
}
