//! Shared fixtures for node integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use roomlink_core::error::{Result, RoomLinkError};
use roomlink_core::protocol::{Envelope, LayoutCommand, LayoutId, Source};
use roomlink_node::config::{self, NodeConfig};
use roomlink_node::delivery::{DeliveryReport, DeliveryResponse, TransportKind};
use roomlink_node::device::{BlobStore, MemoryBlobStore, RoomControl};
use roomlink_node::dispatch::RemoteService;
use roomlink_node::layout::{
    LayoutHandle, LayoutTable, LayoutStatus, MachineConfig, PeerLink, TopologyStore,
};
use roomlink_node::obs::NodeMetrics;
use roomlink_node::store::KvStore;

pub const PRIMARY: &str = "10.0.0.100";
pub const SEC_A: &str = "10.0.0.110";
pub const SEC_B: &str = "10.0.0.112";

pub fn lay(s: &str) -> LayoutId {
    LayoutId::parse(s).unwrap()
}

pub fn primary_yaml() -> String {
    format!(
        r#"
version: 1
node: {{ id: FOC100, address: {PRIMARY}, role: primary }}
credentials: {{ username: admin, password: pw }}
peers:
  - {{ address: {SEC_A}, kind: ip }}
  - {{ address: {SEC_B}, kind: ip }}
layouts:
  - {{ id: LAY1 }}
  - {{ id: LAY2, members: [{PRIMARY}, {SEC_A}, {SEC_B}] }}
  - {{ id: LAY3, members: [{PRIMARY}, {SEC_A}] }}
wall:
  enabled: true
  map: {{ 0: LAY1, 3: LAY3, 7: LAY2 }}
protocol: {{ ack_timeout_ms: 2000, settle_delay_ms: 500 }}
"#
    )
}

pub fn secondary_yaml(address: &str) -> String {
    format!(
        r#"
version: 1
node: {{ id: FOC{tail}, address: {address}, role: secondary }}
credentials: {{ username: admin, password: pw }}
peers:
  - {{ address: {PRIMARY}, kind: ip, role: primary }}
layouts:
  - {{ id: LAY1 }}
  - {{ id: LAY2 }}
  - {{ id: LAY3 }}
"#,
        tail = address.rsplit('.').next().unwrap_or("0"),
    )
}

/// Records every control call as a short string.
#[derive(Default)]
pub struct RecordingControl {
    pub calls: Mutex<Vec<String>>,
    pub fail_apply: Mutex<bool>,
}

impl RecordingControl {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoomControl for RecordingControl {
    async fn enable_http_client(&self) -> Result<()> {
        self.calls.lock().unwrap().push("enable_http".into());
        Ok(())
    }

    async fn apply_layout(&self, layout: &LayoutId, combined: bool, _members: &[String]) -> Result<()> {
        if *self.fail_apply.lock().unwrap() {
            return Err(RoomLinkError::Internal("video matrix refused".into()));
        }
        self.calls.lock().unwrap().push(format!("apply:{layout}:{combined}"));
        Ok(())
    }

    async fn restart_automation(&self) -> Result<()> {
        self.calls.lock().unwrap().push("restart".into());
        Ok(())
    }

    async fn show_alert(&self, title: &str, _text: &str, _duration: Duration) -> Result<()> {
        self.calls.lock().unwrap().push(format!("alert:{title}"));
        Ok(())
    }
}

/// In-memory link between nodes of one test. Messages to a registered peer
/// are handed to its layout handle as if they had crossed the network.
pub struct LoopLink {
    from: String,
    routes: Mutex<HashMap<String, LayoutHandle>>,
    /// Accept delivery but never forward.
    pub silent: Mutex<BTreeSet<String>>,
    /// Fail delivery outright.
    pub unreachable: Mutex<BTreeSet<String>>,
    pub sent: Mutex<Vec<(String, LayoutCommand)>>,
    pub local: Mutex<Vec<LayoutCommand>>,
}

impl LoopLink {
    pub fn new(from: &str) -> Arc<Self> {
        Arc::new(Self {
            from: from.to_string(),
            routes: Mutex::default(),
            silent: Mutex::default(),
            unreachable: Mutex::default(),
            sent: Mutex::default(),
            local: Mutex::default(),
        })
    }

    pub fn route(&self, peer: &str, handle: LayoutHandle) {
        self.routes.lock().unwrap().insert(peer.to_string(), handle);
    }

    pub fn sent_to(&self, peer: &str) -> Vec<LayoutCommand> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl PeerLink for LoopLink {
    async fn send(&self, peers: &[String], cmd: &LayoutCommand) -> Vec<DeliveryReport> {
        let mut out = Vec::new();
        for peer in peers {
            self.sent.lock().unwrap().push((peer.clone(), cmd.clone()));
            let outcome = if self.unreachable.lock().unwrap().contains(peer) {
                Err(RoomLinkError::Delivery {
                    destination: peer.clone(),
                    correlation_id: 0,
                    payload: String::new(),
                    reason: "connection refused".into(),
                })
            } else {
                let silent = self.silent.lock().unwrap().contains(peer);
                let handle = self.routes.lock().unwrap().get(peer).cloned();
                if let (false, Some(handle)) = (silent, handle) {
                    let (ty, value) = cmd.to_message();
                    let env = Envelope::new("JoinSplit", Source::remote_ip(self.from.clone()), ty, value);
                    handle.handle(env).await.unwrap();
                }
                Ok(DeliveryResponse { status: Some(200), body: String::new() })
            };
            out.push(DeliveryReport {
                id: 0,
                kind: Some(TransportKind::DirectIp),
                destination: peer.clone(),
                outcome,
                dispatched_at: Instant::now(),
            });
        }
        out
    }

    async fn notify_local(&self, cmd: &LayoutCommand) {
        self.local.lock().unwrap().push(cmd.clone());
    }
}

pub struct TestNode {
    pub handle: LayoutHandle,
    pub control: Arc<RecordingControl>,
    pub link: Arc<LoopLink>,
    pub blobs: Arc<MemoryBlobStore>,
    pub kv: KvStore,
    pub metrics: Arc<NodeMetrics>,
}

impl TestNode {
    pub async fn start(yaml: &str) -> Self {
        Self::start_with(yaml, Arc::new(MemoryBlobStore::new())).await
    }

    /// Start on an existing blob store, as after a process restart.
    pub async fn start_with(yaml: &str, blobs: Arc<MemoryBlobStore>) -> Self {
        let cfg: NodeConfig = config::load_from_str(yaml).unwrap();
        let kv = KvStore::new(blobs.clone() as Arc<dyn BlobStore>, cfg.node.app.clone());
        let control = Arc::new(RecordingControl::default());
        let link = LoopLink::new(&cfg.node.address);
        let metrics = Arc::new(NodeMetrics::default());
        let (handle, _task) = LayoutHandle::start(
            &cfg.node.app,
            MachineConfig::from_config(&cfg).unwrap(),
            LayoutTable::new(cfg.layouts.clone(), &cfg.wall),
            TopologyStore::new(kv.clone()),
            control.clone(),
            link.clone(),
            metrics.clone(),
        )
        .await
        .unwrap();
        Self { handle, control, link, blobs, kv, metrics }
    }

    pub async fn status(&self) -> LayoutStatus {
        self.handle.status().await.unwrap()
    }
}

/// Poll `cond` on the node's status until it holds, letting paused time
/// advance between polls.
pub async fn wait_for(node: &TestNode, what: &str, cond: impl Fn(&LayoutStatus) -> bool) -> LayoutStatus {
    for _ in 0..200 {
        let st = node.status().await;
        if cond(&st) {
            return st;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}: {:?}", node.status().await);
}

/// Primary plus two secondaries, all wired to each other.
pub async fn cluster() -> (TestNode, TestNode, TestNode) {
    let primary = TestNode::start(&primary_yaml()).await;
    let a = TestNode::start(&secondary_yaml(SEC_A)).await;
    let b = TestNode::start(&secondary_yaml(SEC_B)).await;
    primary.link.route(SEC_A, a.handle.clone());
    primary.link.route(SEC_B, b.handle.clone());
    a.link.route(PRIMARY, primary.handle.clone());
    b.link.route(PRIMARY, primary.handle.clone());
    (primary, a, b)
}
