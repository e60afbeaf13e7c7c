//! Single task owning the [`LayoutMachine`].
//!
//! Everything that touches topology goes through the mailbox, so peer
//! envelopes, operator requests and ack deadlines are handled strictly one
//! at a time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use roomlink_core::error::{Result, RoomLinkError};
use roomlink_core::protocol::{Envelope, LayoutId};

use crate::device::RoomControl;
use crate::dispatch::RemoteService;
use crate::obs::NodeMetrics;

use super::machine::{LayoutMachine, LayoutStatus, MachineConfig, ProposalOutcome};
use super::state::TopologyStore;
use super::table::LayoutTable;
use super::PeerLink;

const LAYOUT_CHANNEL_BUFFER: usize = 256;

#[derive(Debug)]
pub enum LayoutEvent {
    Propose {
        layout: LayoutId,
        exclude: Vec<String>,
        respond_to: oneshot::Sender<Result<ProposalOutcome>>,
    },
    SelectManual {
        layout: LayoutId,
        exclude: Vec<String>,
        respond_to: oneshot::Sender<Result<ProposalOutcome>>,
    },
    ResetManual {
        respond_to: oneshot::Sender<Result<Option<ProposalOutcome>>>,
    },
    WallReading {
        key: u8,
    },
    ReportStatus {
        in_call: bool,
    },
    Peer(Envelope),
    Status {
        respond_to: oneshot::Sender<LayoutStatus>,
    },
}

/// Cheap, cloneable entry point to the layout task.
#[derive(Clone)]
pub struct LayoutHandle {
    sender: mpsc::Sender<LayoutEvent>,
    app: Arc<str>,
}

impl LayoutHandle {
    /// Build the machine, run startup recovery, and spawn the task.
    pub async fn start(
        app: &str,
        cfg: MachineConfig,
        table: LayoutTable,
        store: TopologyStore,
        control: Arc<dyn RoomControl>,
        link: Arc<dyn PeerLink>,
        metrics: Arc<NodeMetrics>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let (deadline_tx, deadline_rx) = mpsc::unbounded_channel();
        let mut machine = LayoutMachine::new(cfg, table, store, control, link, metrics, deadline_tx);
        machine.start().await?;

        let (sender, receiver) = mpsc::channel(LAYOUT_CHANNEL_BUFFER);
        let actor = LayoutActor { machine, receiver, deadlines: deadline_rx };
        let task = tokio::spawn(actor.run());
        Ok((Self { sender, app: Arc::from(app) }, task))
    }

    async fn send(&self, event: LayoutEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|e| RoomLinkError::Internal(format!("layout channel send failed: {e}")))
    }

    async fn request<T>(&self, event: LayoutEvent, rx: oneshot::Receiver<T>) -> Result<T> {
        self.send(event).await?;
        rx.await
            .map_err(|e| RoomLinkError::Internal(format!("layout response receive failed: {e}")))
    }

    pub async fn propose(&self, layout: LayoutId, exclude: Vec<String>) -> Result<ProposalOutcome> {
        let (tx, rx) = oneshot::channel();
        self.request(LayoutEvent::Propose { layout, exclude, respond_to: tx }, rx)
            .await?
    }

    pub async fn select_manual(&self, layout: LayoutId, exclude: Vec<String>) -> Result<ProposalOutcome> {
        let (tx, rx) = oneshot::channel();
        self.request(LayoutEvent::SelectManual { layout, exclude, respond_to: tx }, rx)
            .await?
    }

    pub async fn reset_manual(&self) -> Result<Option<ProposalOutcome>> {
        let (tx, rx) = oneshot::channel();
        self.request(LayoutEvent::ResetManual { respond_to: tx }, rx).await?
    }

    pub async fn wall_reading(&self, key: u8) -> Result<()> {
        self.send(LayoutEvent::WallReading { key }).await
    }

    pub async fn report_status(&self, in_call: bool) -> Result<()> {
        self.send(LayoutEvent::ReportStatus { in_call }).await
    }

    pub async fn status(&self) -> Result<LayoutStatus> {
        let (tx, rx) = oneshot::channel();
        self.request(LayoutEvent::Status { respond_to: tx }, rx).await
    }
}

#[async_trait]
impl RemoteService for LayoutHandle {
    fn app(&self) -> &str {
        &self.app
    }

    async fn handle(&self, env: Envelope) -> Result<()> {
        self.send(LayoutEvent::Peer(env)).await
    }
}

struct LayoutActor {
    machine: LayoutMachine,
    receiver: mpsc::Receiver<LayoutEvent>,
    deadlines: mpsc::UnboundedReceiver<u64>,
}

impl LayoutActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.receiver.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("layout channel closed, stopping");
                        return;
                    };
                    self.handle(event).await;
                }
                Some(seq) = self.deadlines.recv() => {
                    if let Some(outcome) = self.machine.on_ack_deadline(seq).await {
                        tracing::debug!(seq, outcome = ?outcome, "ack deadline handled");
                    }
                }
            }
            self.resume_wall().await;
        }
    }

    async fn resume_wall(&mut self) {
        match self.machine.resume_wall().await {
            Ok(Some(outcome)) => tracing::info!(outcome = ?outcome, "deferred wall reading applied"),
            Ok(None) => {}
            Err(e) => tracing::warn!(code = e.code().as_str(), error = %e, "deferred wall reading not applied"),
        }
    }

    async fn handle(&mut self, event: LayoutEvent) {
        match event {
            LayoutEvent::Propose { layout, exclude, respond_to } => {
                let _ = respond_to.send(self.machine.propose(layout, &exclude).await);
            }
            LayoutEvent::SelectManual { layout, exclude, respond_to } => {
                let _ = respond_to.send(self.machine.select_manual(layout, &exclude).await);
            }
            LayoutEvent::ResetManual { respond_to } => {
                let _ = respond_to.send(self.machine.reset_manual().await);
            }
            LayoutEvent::WallReading { key } => {
                if let Err(e) = self.machine.on_wall_reading(key).await {
                    tracing::warn!(key, code = e.code().as_str(), error = %e, "wall reading not applied");
                }
            }
            LayoutEvent::ReportStatus { in_call } => {
                if let Err(e) = self.machine.report_status(in_call).await {
                    tracing::warn!(error = %e, "status report failed");
                }
            }
            LayoutEvent::Peer(env) => {
                let source = env.source.id.clone();
                if let Err(e) = self.machine.on_peer(env).await {
                    tracing::warn!(peer = %source, code = e.code().as_str(), error = %e, "peer message failed");
                }
            }
            LayoutEvent::Status { respond_to } => {
                let _ = respond_to.send(self.machine.status());
            }
        }
    }
}
