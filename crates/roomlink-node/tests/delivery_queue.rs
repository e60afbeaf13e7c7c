//! Queue pacing: one dispatch per tick, strict FIFO across transport kinds.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use roomlink_core::error::Result;
use roomlink_core::protocol::{Envelope, MessageType, Source};
use roomlink_node::config::RetryPolicy;
use roomlink_node::delivery::{
    Credentials, DeliveryItem, DeliveryQueue, DescriptorLimits, Destination, Dispatch, Egress,
    EgressResponse, Masker, Remaining, RenderedRequest, TickReport, TransportDescriptor,
    TransportKind,
};
use roomlink_node::device::LocalBus;
use roomlink_node::obs::NodeMetrics;

#[derive(Default)]
struct OkEgress {
    urls: Mutex<Vec<String>>,
}

#[async_trait]
impl Egress for OkEgress {
    async fn post(&self, req: &RenderedRequest) -> Result<EgressResponse> {
        self.urls.lock().unwrap().push(req.url.clone());
        Ok(EgressResponse { status: 200, body: String::new() })
    }
}

fn envelope(kind: &str) -> Envelope {
    Envelope::new("JoinSplit", Source::local("FOC100"), MessageType::Status, json!(kind))
}

async fn next_dispatch(ticks: &mut mpsc::UnboundedReceiver<TickReport>) -> TickReport {
    loop {
        let report = ticks.recv().await.unwrap();
        if report.outcome.is_some() {
            return report;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn mixed_kinds_dispatch_fifo_one_per_interval() {
    let egress = Arc::new(OkEgress::default());
    let bus = LocalBus::new();
    let mut local_rx = bus.subscribe();
    let metrics = Arc::new(NodeMetrics::default());
    let dispatch = Arc::new(Dispatch::new(egress.clone(), bus, Masker::default(), metrics.clone()));
    let (queue, worker) = DeliveryQueue::new(dispatch, RetryPolicy::None, metrics);

    let limits = DescriptorLimits { relay_base_url: "https://relay.test/v1".into(), ..Default::default() };
    let local = TransportDescriptor::local(limits.clone());
    let ip = TransportDescriptor::build(
        TransportKind::DirectIp,
        Credentials::Basic { username: "admin".into(), password: SecretString::from("pw") },
        vec![Destination::ip("10.0.0.110")],
        limits.clone(),
    )
    .unwrap();
    let relay = TransportDescriptor::build(
        TransportKind::Relay,
        Credentials::Token(SecretString::from("relay-token")),
        vec![Destination::relay("10.0.0.112", "dev-112")],
        limits,
    )
    .unwrap();

    let items = [
        DeliveryItem::prepare(queue.next_id(), &local, None, envelope("local")).unwrap(),
        DeliveryItem::prepare(queue.next_id(), &ip, ip.destinations().first(), envelope("ip")).unwrap(),
        DeliveryItem::prepare(queue.next_id(), &relay, relay.destinations().first(), envelope("relay")).unwrap(),
    ];
    for item in items {
        queue.enqueue(item).unwrap();
    }

    let (tx, mut ticks) = mpsc::unbounded_channel();
    let started = Instant::now();
    let run = tokio::spawn(worker.with_tick_reports(tx).run(Duration::from_millis(250)));

    let mut reports = Vec::new();
    for _ in 0..3 {
        reports.push(next_dispatch(&mut ticks).await);
    }

    let ids: Vec<u64> = reports.iter().map(|r| r.outcome.as_ref().unwrap().id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(reports[0].remaining, Remaining::Pending(2));
    assert_eq!(reports[2].remaining, Remaining::Empty);

    let at: Vec<Instant> = reports.iter().map(|r| r.outcome.as_ref().unwrap().dispatched_at).collect();
    assert!(at[0] >= started + Duration::from_millis(250));
    for pair in at.windows(2) {
        assert!(pair[1] > pair[0]);
        assert!(pair[1] - pair[0] >= Duration::from_millis(250));
    }

    assert!(local_rx.recv().await.unwrap().contains("\"local\""));
    assert_eq!(
        *egress.urls.lock().unwrap(),
        vec![
            "https://10.0.0.110/putxml".to_string(),
            "https://relay.test/v1/xapi/command/Message.Send".to_string(),
        ]
    );

    // Dropping the last producer lets the worker drain and stop.
    drop(queue);
    run.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn empty_queue_reports_empty_every_tick() {
    let metrics = Arc::new(NodeMetrics::default());
    let dispatch = Arc::new(Dispatch::new(
        Arc::new(OkEgress::default()),
        LocalBus::new(),
        Masker::default(),
        metrics.clone(),
    ));
    let (queue, worker) = DeliveryQueue::new(dispatch, RetryPolicy::None, metrics);
    let (tx, mut ticks) = mpsc::unbounded_channel();
    let _run = tokio::spawn(worker.with_tick_reports(tx).run(Duration::from_millis(300)));

    for _ in 0..3 {
        let report = ticks.recv().await.unwrap();
        assert_eq!(report.remaining, Remaining::Empty);
        assert!(report.outcome.is_none());
    }
    drop(queue);
}

#[tokio::test(start_paused = true)]
async fn interval_below_floor_is_clamped() {
    let metrics = Arc::new(NodeMetrics::default());
    let dispatch = Arc::new(Dispatch::new(
        Arc::new(OkEgress::default()),
        LocalBus::new(),
        Masker::default(),
        metrics.clone(),
    ));
    let (queue, worker) = DeliveryQueue::new(dispatch, RetryPolicy::None, metrics);
    let local = TransportDescriptor::local(DescriptorLimits::default());
    for _ in 0..2 {
        let item = DeliveryItem::prepare(queue.next_id(), &local, None, envelope("local")).unwrap();
        queue.enqueue(item).unwrap();
    }

    let (tx, mut ticks) = mpsc::unbounded_channel();
    let started = Instant::now();
    let _run = tokio::spawn(worker.with_tick_reports(tx).run(Duration::from_millis(50)));

    let first = next_dispatch(&mut ticks).await.outcome.unwrap();
    let second = next_dispatch(&mut ticks).await.outcome.unwrap();
    assert!(first.dispatched_at - started >= Duration::from_millis(250));
    assert!(second.dispatched_at - first.dispatched_at >= Duration::from_millis(250));
}
