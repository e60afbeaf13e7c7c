//! Outbound builder: `status|error|command(value)`, optionally narrowed with
//! `.to([...])` or redirected with `.local()`, terminated by `.queue()` or
//! `.post()`.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::sync::oneshot;

use roomlink_core::error::{Result, RoomLinkError};
use roomlink_core::protocol::{Envelope, MessageType, Source};

use crate::config::{NodeConfig, PeerKind};

use super::descriptor::{
    Credentials, DescriptorLimits, Destination, TransportDescriptor, TransportKind,
};
use super::queue::{DeliveryItem, DeliveryQueue, DeliveryReport};
use super::render::Masker;

/// Who this node is on each transport.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub app: String,
    pub serial: String,
    pub address: String,
    pub relay_id: Option<String>,
}

impl NodeIdentity {
    pub fn from_config(cfg: &NodeConfig) -> Self {
        Self {
            app: cfg.node.app.clone(),
            serial: cfg.node.id.clone(),
            address: cfg.node.address.clone(),
            relay_id: cfg.node.relay_id.clone(),
        }
    }

    fn source_for(&self, kind: TransportKind) -> Source {
        match kind {
            TransportKind::Local => Source::local(self.serial.clone()),
            TransportKind::DirectIp => Source::remote_ip(self.address.clone()),
            TransportKind::Relay => {
                Source::remote_relay(self.relay_id.clone().unwrap_or_else(|| self.address.clone()))
            }
        }
    }
}

/// The loopback descriptor plus one descriptor per remote kind in use.
#[derive(Debug, Clone)]
pub struct Transports {
    pub local: TransportDescriptor,
    pub remotes: Vec<TransportDescriptor>,
}

impl Transports {
    /// Fails with `Construction` on missing or malformed credentials.
    pub fn from_config(cfg: &NodeConfig) -> Result<Self> {
        let limits = DescriptorLimits {
            max_value_bytes: cfg.delivery.max_value_bytes,
            timeout: Duration::from_millis(cfg.delivery.timeout_ms),
            relay_base_url: cfg.delivery.relay_base_url.clone(),
            peer_scheme: cfg.delivery.peer_scheme,
        };

        let mut ip = Vec::new();
        let mut relay = Vec::new();
        for p in &cfg.peers {
            match p.kind {
                PeerKind::Ip => ip.push(Destination::ip(p.address.clone())),
                PeerKind::Relay => relay.push(Destination::relay(
                    p.address.clone(),
                    p.relay_id.clone().unwrap_or_default(),
                )),
            }
        }

        let mut remotes = Vec::new();
        if !ip.is_empty() || !relay.is_empty() {
            let creds = Credentials::from_config(&cfg.credentials)?;
            if !ip.is_empty() {
                remotes.push(TransportDescriptor::build(
                    TransportKind::DirectIp,
                    creds.clone(),
                    ip,
                    limits.clone(),
                )?);
            }
            if !relay.is_empty() {
                remotes.push(TransportDescriptor::build(
                    TransportKind::Relay,
                    creds,
                    relay,
                    limits.clone(),
                )?);
            }
        }

        Ok(Self { local: TransportDescriptor::local(limits), remotes })
    }

    pub fn masker(&self) -> Masker {
        Masker::new(
            self.remotes
                .iter()
                .flat_map(|d| d.credentials().secret_literals())
                .collect(),
        )
    }

    fn find(&self, address: &str) -> Option<(&TransportDescriptor, &Destination)> {
        self.remotes
            .iter()
            .find_map(|d| d.find(address).map(|dest| (d, dest)))
    }

    fn all_peers(&self) -> impl Iterator<Item = (&TransportDescriptor, &Destination)> {
        self.remotes
            .iter()
            .flat_map(|d| d.destinations().iter().map(move |dest| (d, dest)))
    }
}

/// Entry point for outbound messages.
#[derive(Clone)]
pub struct Messenger {
    identity: Arc<NodeIdentity>,
    transports: Arc<Transports>,
    queue: DeliveryQueue,
}

impl Messenger {
    pub fn new(identity: NodeIdentity, transports: Arc<Transports>, queue: DeliveryQueue) -> Self {
        Self { identity: Arc::new(identity), transports, queue }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn status(&self, value: impl Into<Value>) -> Outbound<'_> {
        self.message(MessageType::Status, value.into())
    }

    pub fn error(&self, value: impl Into<Value>) -> Outbound<'_> {
        self.message(MessageType::Error, value.into())
    }

    pub fn command(&self, value: impl Into<Value>) -> Outbound<'_> {
        self.message(MessageType::Command, value.into())
    }

    pub fn message(&self, msg_type: MessageType, value: Value) -> Outbound<'_> {
        Outbound { messenger: self, msg_type, value, target: Target::AllPeers }
    }

    fn envelope(&self, descriptor: &TransportDescriptor, msg_type: MessageType, value: Value) -> Envelope {
        let mut source = self.identity.source_for(descriptor.kind());
        if descriptor.kind().is_remote() {
            source.auth = descriptor
                .credentials()
                .auth_blob()
                .map(|b| b.expose_secret().to_string());
        }
        Envelope::new(self.identity.app.clone(), source, msg_type, value)
    }
}

#[derive(Debug, Clone)]
enum Target {
    AllPeers,
    Peers(Vec<String>),
    Local,
}

/// Pending outbound message.
#[must_use = "an outbound message does nothing until .queue() or .post()"]
pub struct Outbound<'a> {
    messenger: &'a Messenger,
    msg_type: MessageType,
    value: Value,
    target: Target,
}

impl Outbound<'_> {
    /// Restrict delivery to the named peers. Names outside the configured
    /// group are reported as `Filter` errors; the rest still go out.
    pub fn to<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = Target::Peers(peers.into_iter().map(Into::into).collect());
        self
    }

    /// Deliver on the loopback channel instead of to peers.
    pub fn local(mut self) -> Self {
        self.target = Target::Local;
        self
    }

    /// Render every item. All-or-nothing: an oversize value fails before
    /// anything is handed to the queue.
    fn prepare(self) -> Result<(Vec<DeliveryItem>, Vec<DeliveryReport>)> {
        let m = self.messenger;
        let mut routes: Vec<(&TransportDescriptor, Option<&Destination>)> = Vec::new();
        let mut rejected = Vec::new();

        match &self.target {
            Target::Local => routes.push((&m.transports.local, None)),
            Target::AllPeers => routes.extend(m.transports.all_peers().map(|(d, dest)| (d, Some(dest)))),
            Target::Peers(names) => {
                for name in names {
                    match m.transports.find(name) {
                        Some((d, dest)) => routes.push((d, Some(dest))),
                        None => {
                            tracing::warn!(peer = %name, "destination outside configured peers, skipped");
                            rejected.push(DeliveryReport::rejected(
                                name.clone(),
                                RoomLinkError::Filter(name.clone()),
                            ));
                        }
                    }
                }
            }
        }

        let items = routes
            .into_iter()
            .map(|(d, dest)| {
                let env = m.envelope(d, self.msg_type, self.value.clone());
                DeliveryItem::prepare(m.queue.next_id(), d, dest, env)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((items, rejected))
    }

    /// Append to the delivery queue. Outcomes arrive through the receipt as
    /// the queue drains.
    pub fn queue(self) -> Result<Receipt> {
        let queue = self.messenger.queue.clone();
        let (items, rejected) = self.prepare()?;
        let mut pending = Vec::with_capacity(items.len());
        for item in items {
            let (tx, rx) = oneshot::channel();
            pending.push((item.id, item.destination.clone(), rx));
            queue.enqueue(item.with_reply(tx))?;
        }
        Ok(Receipt { ready: rejected, pending })
    }

    /// Deliver immediately, bypassing the queue order.
    pub async fn post(self) -> Result<Receipt> {
        let queue = self.messenger.queue.clone();
        let (items, mut ready) = self.prepare()?;
        for item in items {
            ready.push(queue.fire(item).await);
        }
        Ok(Receipt { ready, pending: Vec::new() })
    }
}

/// Per-destination outcomes of one outbound message.
#[derive(Debug)]
pub struct Receipt {
    ready: Vec<DeliveryReport>,
    pending: Vec<(u64, String, oneshot::Receiver<DeliveryReport>)>,
}

impl Receipt {
    /// Number of items handed to the queue.
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every destination's outcome.
    pub async fn outcomes(self) -> Vec<DeliveryReport> {
        let mut out = self.ready;
        for (id, destination, rx) in self.pending {
            let report = rx.await.unwrap_or_else(|_| {
                let mut r = DeliveryReport::rejected(
                    destination,
                    RoomLinkError::Internal("delivery queue stopped".into()),
                );
                r.id = id;
                r
            });
            out.push(report);
        }
        out
    }
}
