//! Shared application state for a roomlink node.
//!
//! `AppState::start` wires the delivery engine, the inbound receiver and
//! dispatcher, and the layout task. Startup errors are returned, never
//! panicked on; `Construction` errors mean the credential setup is unusable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;

use roomlink_core::error::Result;

use crate::config::NodeConfig;
use crate::delivery::{
    Credentials, Dispatch, DeliveryQueue, Egress, HttpClientActivation, HttpEgress, Messenger,
    NodeIdentity, TransportKind, Transports,
};
use crate::device::{BlobStore, FileBlobStore, LocalBus, LoggingRoomControl, RoomControl};
use crate::dispatch::{Dispatcher, Receiver};
use crate::layout::{LayoutHandle, LayoutStatus, LayoutTable, MachineConfig, TopologyStore};
use crate::obs::NodeMetrics;
use crate::services::OperatorPanel;
use crate::store::KvStore;

/// Device collaborators the node runs against.
#[derive(Clone)]
pub struct Devices {
    pub blobs: Arc<dyn BlobStore>,
    pub control: Arc<dyn RoomControl>,
    pub bus: LocalBus,
    /// `None` uses the reqwest client built from the delivery section.
    pub egress: Option<Arc<dyn Egress>>,
}

impl Devices {
    /// File-backed store under `node.store_dir`, a logging control surface
    /// and a fresh loopback channel.
    pub fn standalone(cfg: &NodeConfig) -> Self {
        Self {
            blobs: Arc::new(FileBlobStore::new(PathBuf::from(&cfg.node.store_dir))),
            control: Arc::new(LoggingRoomControl),
            bus: LocalBus::new(),
            egress: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: NodeConfig,
    bus: LocalBus,
    metrics: Arc<NodeMetrics>,
    messenger: Messenger,
    layout: LayoutHandle,
    dispatcher: Arc<Dispatcher>,
    receiver: Receiver,
    ingress_auth: Option<SecretString>,
}

impl AppState {
    /// Build every component and spawn the background tasks (queue worker,
    /// receiver, layout task).
    pub async fn start(cfg: NodeConfig, devices: Devices) -> Result<(Self, Vec<JoinHandle<()>>)> {
        let metrics = Arc::new(NodeMetrics::default());
        let mut tasks = Vec::new();

        // 1) Descriptors: credential problems surface here.
        let transports = Arc::new(Transports::from_config(&cfg)?);
        let ingress_auth = Credentials::from_config(&cfg.credentials)?.authorization(TransportKind::DirectIp);

        let activation = HttpClientActivation::default();
        for descriptor in &transports.remotes {
            activation.ensure(descriptor, devices.control.as_ref()).await?;
        }

        // 2) Delivery engine.
        let egress: Arc<dyn Egress> = match devices.egress {
            Some(egress) => egress,
            None => Arc::new(HttpEgress::new(
                Duration::from_millis(cfg.delivery.timeout_ms),
                cfg.delivery.accept_invalid_certs,
            )?),
        };
        let dispatch = Arc::new(Dispatch::new(
            egress,
            devices.bus.clone(),
            transports.masker(),
            metrics.clone(),
        ));
        let (queue, worker) = DeliveryQueue::new(dispatch, cfg.delivery.retry, metrics.clone());
        tasks.push(tokio::spawn(worker.run(Duration::from_millis(cfg.delivery.interval_ms))));
        let messenger = Messenger::new(NodeIdentity::from_config(&cfg), transports, queue);

        // 3) Layout task.
        let kv = KvStore::new(devices.blobs, cfg.node.app.clone());
        let (layout, layout_task) = LayoutHandle::start(
            &cfg.node.app,
            MachineConfig::from_config(&cfg)?,
            LayoutTable::new(cfg.layouts.clone(), &cfg.wall),
            TopologyStore::new(kv),
            devices.control,
            Arc::new(messenger.clone()),
            metrics.clone(),
        )
        .await?;
        tasks.push(layout_task);

        // 4) Inbound routing.
        let dispatcher = Arc::new(Dispatcher::new(metrics.clone()));
        dispatcher.register_remote(Arc::new(layout.clone()));
        dispatcher.register_local(Arc::new(OperatorPanel::new(layout.clone())));
        tracing::info!(
            local = ?dispatcher.registered_local_apps(),
            remote = ?dispatcher.registered_remote_apps(),
            "handlers registered"
        );

        let receiver = Receiver::new(devices.bus.clone(), metrics.clone());
        receiver.on(dispatcher.clone());
        tasks.push(receiver.spawn());

        let state = Self {
            inner: Arc::new(AppStateInner {
                cfg,
                bus: devices.bus,
                metrics,
                messenger,
                layout,
                dispatcher,
                receiver,
                ingress_auth,
            }),
        };
        Ok((state, tasks))
    }

    pub fn cfg(&self) -> &NodeConfig {
        &self.inner.cfg
    }

    pub fn bus(&self) -> &LocalBus {
        &self.inner.bus
    }

    pub fn metrics(&self) -> Arc<NodeMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn messenger(&self) -> &Messenger {
        &self.inner.messenger
    }

    pub fn layout(&self) -> &LayoutHandle {
        &self.inner.layout
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.inner.dispatcher)
    }

    pub async fn layout_status(&self) -> Result<LayoutStatus> {
        self.inner.layout.status().await
    }

    /// Whether an ingress request's `Authorization` header matches this
    /// node's own credentials. Nodes without credentials accept anything.
    pub fn ingress_authorized(&self, header: Option<&str>) -> bool {
        match &self.inner.ingress_auth {
            None => true,
            Some(expected) => header == Some(expected.expose_secret()),
        }
    }

    /// Extra gauge lines for `/metrics`.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        vec![("roomlink_receiver_subscribers", self.inner.receiver.subscriber_count() as u64)]
    }
}
