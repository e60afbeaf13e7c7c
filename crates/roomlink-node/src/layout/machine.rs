//! Join/split state machine.
//!
//! The primary drives propose -> await acks -> commit or rollback. A
//! secondary applies what it is told, keeps a snapshot of what it had, and
//! either drops the snapshot on activation or restores it on rollback.
//!
//! Every committed change is written to the store before the machine moves
//! to a settled phase. The machine is owned by one task (see `actor`); all
//! methods take `&mut self`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use roomlink_core::error::{Result, RoomLinkError};
use roomlink_core::protocol::{Envelope, LayoutCommand, LayoutId, Origin, Source};

use crate::config::{NodeConfig, PeerKind, PeerRole, Role};
use crate::delivery::DeliveryReport;
use crate::device::RoomControl;
use crate::obs::NodeMetrics;

use super::state::{
    ManualWallSelect, PeerStatus, PendingProposal, Phase, Snapshot, TopologyStore,
};
use super::table::LayoutTable;
use super::PeerLink;

const ROLLBACK_ALERT_TITLE: &str = "Room layout change failed";

/// Static inputs of the machine, derived from config.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub role: Role,
    /// This endpoint's own address, matched against layout members.
    pub address: String,
    /// Peers that must ack every proposal.
    pub secondaries: Vec<String>,
    /// Peers told about commits but never asked to ack.
    pub auxiliaries: Vec<String>,
    /// The primary, as seen from a secondary.
    pub primary: Option<String>,
    /// Relay peer id -> peer address.
    pub relay_ids: BTreeMap<String, String>,
    pub default_layout: LayoutId,
    pub ack_timeout: Duration,
    pub settle_delay: Duration,
    pub alert_duration: Duration,
}

impl MachineConfig {
    pub fn from_config(cfg: &NodeConfig) -> Result<Self> {
        let default_layout = cfg
            .protocol
            .default_layout
            .clone()
            .or_else(|| cfg.layouts.first().map(|l| l.id.clone()))
            .ok_or_else(|| RoomLinkError::BadRequest("no layouts configured".into()))?;

        let by_role = |role: PeerRole| -> Vec<String> {
            cfg.peers
                .iter()
                .filter(|p| p.role == role)
                .map(|p| p.address.clone())
                .collect()
        };

        Ok(Self {
            role: cfg.node.role,
            address: cfg.node.address.clone(),
            secondaries: by_role(PeerRole::Secondary),
            auxiliaries: by_role(PeerRole::Auxiliary),
            primary: by_role(PeerRole::Primary).into_iter().next(),
            relay_ids: cfg
                .peers
                .iter()
                .filter(|p| p.kind == PeerKind::Relay)
                .filter_map(|p| p.relay_id.clone().map(|id| (id, p.address.clone())))
                .collect(),
            default_layout,
            ack_timeout: Duration::from_millis(cfg.protocol.ack_timeout_ms),
            settle_delay: Duration::from_millis(cfg.protocol.settle_delay_ms),
            alert_duration: Duration::from_secs(cfg.protocol.alert_duration_secs),
        })
    }

    fn knows(&self, address: &str) -> bool {
        self.secondaries.iter().any(|p| p == address)
            || self.auxiliaries.iter().any(|p| p == address)
            || self.primary.as_deref() == Some(address)
    }
}

/// Result of a proposal request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProposalOutcome {
    /// Target is already active.
    Unchanged,
    /// Apply sent; waiting for acks.
    Pending { seq: u64 },
    Committed { layout: LayoutId },
    RolledBack { reason: String },
}

/// Read-only view for operators and the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LayoutStatus {
    pub role: Role,
    pub phase: Phase,
    pub combined: bool,
    pub active_layout: LayoutId,
    pub pending_layout: Option<LayoutId>,
    pub manual: ManualWallSelect,
    pub wall_key: Option<u8>,
    pub peers: BTreeMap<String, PeerStatus>,
}

#[derive(Debug, Clone)]
struct Proposal {
    seq: u64,
    target: LayoutId,
    members: Vec<String>,
    snapshot: Snapshot,
    expected: BTreeSet<String>,
    acks: BTreeSet<String>,
}

impl Proposal {
    fn persisted(&self) -> PendingProposal {
        PendingProposal {
            seq: self.seq,
            layout: self.target.clone(),
            members: self.members.clone(),
            expected: self.expected.clone(),
        }
    }
}

pub struct LayoutMachine {
    cfg: MachineConfig,
    table: LayoutTable,
    store: TopologyStore,
    control: Arc<dyn RoomControl>,
    link: Arc<dyn PeerLink>,
    metrics: Arc<NodeMetrics>,

    deadlines: mpsc::UnboundedSender<u64>,
    timer: Option<JoinHandle<()>>,

    phase: Phase,
    topology: Snapshot,
    proposal: Option<Proposal>,
    /// Secondary only: topology before the last unactivated apply.
    held: Option<Snapshot>,
    peers: BTreeMap<String, PeerStatus>,
    manual: ManualWallSelect,
    wall_key: Option<u8>,
    /// A sensor change arrived while a proposal was in flight.
    wall_deferred: bool,
    seq: u64,
}

impl LayoutMachine {
    /// `deadlines` receives the sequence number of a proposal whose ack
    /// timer fired; feed it back through [`LayoutMachine::on_ack_deadline`].
    pub fn new(
        cfg: MachineConfig,
        table: LayoutTable,
        store: TopologyStore,
        control: Arc<dyn RoomControl>,
        link: Arc<dyn PeerLink>,
        metrics: Arc<NodeMetrics>,
        deadlines: mpsc::UnboundedSender<u64>,
    ) -> Self {
        let topology = Snapshot { combined: false, layout: cfg.default_layout.clone() };
        let peers = cfg
            .secondaries
            .iter()
            .map(|p| (p.clone(), PeerStatus::default()))
            .collect();
        Self {
            cfg,
            table,
            store,
            control,
            link,
            metrics,
            deadlines,
            timer: None,
            phase: Phase::Split,
            topology,
            proposal: None,
            held: None,
            peers,
            manual: ManualWallSelect::default(),
            wall_key: None,
            wall_deferred: false,
            seq: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> LayoutStatus {
        LayoutStatus {
            role: self.cfg.role,
            phase: self.phase,
            combined: self.topology.combined,
            active_layout: self.topology.layout.clone(),
            pending_layout: self.proposal.as_ref().map(|p| p.target.clone()),
            manual: self.manual.clone(),
            wall_key: self.wall_key,
            peers: self.peers.clone(),
        }
    }

    /// Load persisted state and finish anything a crash interrupted.
    pub async fn start(&mut self) -> Result<()> {
        let mut topology = self.store.load_topology(&self.cfg.default_layout).await?;
        if !self.table.contains(&topology.layout) {
            tracing::warn!(layout = %topology.layout, "persisted layout is not in the table, using default");
            topology.layout = self.cfg.default_layout.clone();
        }
        self.topology = topology;
        self.phase = Phase::settled(self.topology.combined);
        self.manual = self.store.load_manual().await?;

        match self.cfg.role {
            Role::Primary => {
                for (addr, st) in self.store.load_peers().await? {
                    if self.peers.contains_key(&addr) {
                        self.peers.insert(addr, st);
                    }
                }
                if let Some(pending) = self.store.load_pending().await? {
                    let snapshot = self
                        .store
                        .load_snapshot()
                        .await?
                        .unwrap_or_else(|| self.topology.clone());
                    tracing::warn!(
                        seq = pending.seq,
                        layout = %pending.layout,
                        "unfinished layout change found at startup, rolling back"
                    );
                    self.seq = pending.seq;
                    self.phase = Phase::Combining;
                    self.proposal = Some(Proposal {
                        seq: pending.seq,
                        target: pending.layout,
                        members: pending.members,
                        snapshot,
                        expected: pending.expected,
                        acks: BTreeSet::new(),
                    });
                    self.rollback("interrupted by restart".into(), true).await;
                }
            }
            Role::Secondary => {
                if let Some(held) = self.store.load_snapshot().await? {
                    tracing::info!(
                        layout = %self.topology.layout,
                        previous = %held.layout,
                        "applied layout not yet activated, awaiting primary"
                    );
                    self.held = Some(held);
                    self.phase = Phase::Combining;
                }
            }
        }

        tracing::info!(
            role = ?self.cfg.role,
            layout = %self.topology.layout,
            combined = self.topology.combined,
            phase = ?self.phase,
            "layout state initialized"
        );
        Ok(())
    }

    /// Primary: move every endpoint to `target`. Peers in `exclude` are not
    /// asked to apply or ack, and are left out of the combine set.
    pub async fn propose(&mut self, target: LayoutId, exclude: &[String]) -> Result<ProposalOutcome> {
        if self.cfg.role != Role::Primary {
            return Err(RoomLinkError::BadRequest("only the primary proposes layouts".into()));
        }
        if self.phase.in_flight() {
            let current = self.proposal.as_ref().map(|p| p.target.to_string()).unwrap_or_default();
            return Err(RoomLinkError::Busy(format!("layout change to {current} in flight")));
        }
        if target == self.topology.layout {
            tracing::info!(layout = %target, "layout already active");
            return Ok(ProposalOutcome::Unchanged);
        }
        let mut members = self
            .table
            .members(&target)
            .ok_or_else(|| RoomLinkError::BadRequest(format!("unknown layout: {target}")))?
            .to_vec();
        members.retain(|m| !exclude.contains(m));

        for name in exclude {
            if !self.cfg.secondaries.contains(name) {
                tracing::warn!(peer = %name, "excluded peer is not a configured secondary");
            }
        }
        let expected: BTreeSet<String> = self
            .cfg
            .secondaries
            .iter()
            .filter(|s| !exclude.contains(s))
            .cloned()
            .collect();

        self.seq += 1;
        let proposal = Proposal {
            seq: self.seq,
            target: target.clone(),
            members: members.clone(),
            snapshot: self.topology.clone(),
            expected: expected.clone(),
            acks: BTreeSet::new(),
        };
        self.store.save_snapshot(&proposal.snapshot).await?;
        self.store.save_pending(&proposal.persisted()).await?;
        self.phase = Phase::Combining;
        self.proposal = Some(proposal);
        tracing::info!(seq = self.seq, layout = %target, expected = ?expected, "proposing layout");

        let combined = members.contains(&self.cfg.address);
        if let Err(e) = self.control.apply_layout(&target, combined, &members).await {
            return Ok(self.rollback(format!("local apply failed: {e}"), false).await);
        }

        if expected.is_empty() {
            return Ok(self.commit().await);
        }

        let peers: Vec<String> = expected.into_iter().collect();
        let cmd = LayoutCommand::ApplyLayout { layout: target, members: Some(members) };
        let reports = self.link.send(&peers, &cmd).await;
        let failed = self.note_deliveries(&reports).await;
        if !failed.is_empty() {
            return Ok(self
                .rollback(format!("apply not delivered to {}", failed.join(", ")), true)
                .await);
        }

        self.arm_deadline(self.seq);
        Ok(ProposalOutcome::Pending { seq: self.seq })
    }

    /// Primary: the ack timer for `seq` fired.
    pub async fn on_ack_deadline(&mut self, seq: u64) -> Option<ProposalOutcome> {
        let p = self.proposal.as_ref().filter(|p| p.seq == seq)?;
        let missing: Vec<String> = p.expected.difference(&p.acks).cloned().collect();
        self.metrics.ack_timeouts.inc(&[]);
        let err = RoomLinkError::ProtocolTimeout(format!("no ack from {}", missing.join(", ")));
        tracing::warn!(seq, missing = ?missing, "ack deadline passed");
        Some(self.rollback(err.to_string(), true).await)
    }

    /// Any envelope from a peer endpoint.
    pub async fn on_peer(&mut self, env: Envelope) -> Result<()> {
        let Some(from) = self.peer_address(&env.source) else {
            tracing::warn!(source = %env.source.id, "envelope from unknown peer ignored");
            return Ok(());
        };
        let cmd = LayoutCommand::parse(env.msg_type, &env.value);

        match (self.cfg.role, cmd) {
            (Role::Primary, LayoutCommand::LayoutApplied(layout)) => {
                self.on_ack(from, layout).await;
                Ok(())
            }
            (Role::Primary, LayoutCommand::SecondaryStatus { in_call }) => {
                self.on_secondary_status(from, in_call).await
            }
            (
                Role::Secondary,
                cmd @ (LayoutCommand::ApplyLayout { .. }
                | LayoutCommand::RollbackLayout
                | LayoutCommand::ActivateLayout),
            ) if !self.is_primary(&from) => {
                tracing::warn!(peer = %from, cmd = ?cmd, "layout command from a peer other than the primary ignored");
                Ok(())
            }
            (Role::Secondary, LayoutCommand::ApplyLayout { layout, members }) => {
                self.on_apply(from, layout, members).await
            }
            (Role::Secondary, LayoutCommand::RollbackLayout) => self.on_rollback().await,
            (Role::Secondary, LayoutCommand::ActivateLayout) => self.on_activate().await,
            (_, LayoutCommand::StatusText(text)) => {
                tracing::info!(peer = %from, status = %text, "peer status");
                Ok(())
            }
            (_, LayoutCommand::ErrorReport(text)) => {
                tracing::warn!(peer = %from, error = %text, "peer reported error");
                Ok(())
            }
            (role, other) => {
                tracing::debug!(peer = %from, role = ?role, cmd = ?other, "command not handled in this role");
                Ok(())
            }
        }
    }

    /// Wall-partition sensor changed.
    pub async fn on_wall_reading(&mut self, key: u8) -> Result<Option<ProposalOutcome>> {
        let key = key & 0b111;
        self.wall_key = Some(key);
        if !self.table.wall_enabled() || self.cfg.role != Role::Primary {
            tracing::debug!(key, "wall reading ignored");
            return Ok(None);
        }
        if self.manual.manual {
            tracing::info!(key, "manual override active, wall reading ignored");
            return Ok(None);
        }
        let Some(target) = self.table.for_wall_key(key).cloned() else {
            tracing::warn!(key, "no layout mapped to wall key");
            return Ok(None);
        };
        if self.phase.in_flight() {
            tracing::info!(key, layout = %target, "layout change in flight, wall reading deferred");
            self.wall_deferred = true;
            return Ok(None);
        }
        self.propose(target, &[]).await.map(Some)
    }

    /// Re-evaluate a sensor reading that arrived mid-proposal, once the
    /// machine has settled.
    pub async fn resume_wall(&mut self) -> Result<Option<ProposalOutcome>> {
        if !self.wall_deferred || self.phase.in_flight() {
            return Ok(None);
        }
        self.wall_deferred = false;
        match self.wall_key {
            Some(key) => self.on_wall_reading(key).await,
            None => Ok(None),
        }
    }

    /// Operator picked a layout; the sensor is ignored until reset.
    pub async fn select_manual(&mut self, target: LayoutId, exclude: &[String]) -> Result<ProposalOutcome> {
        let outcome = self.propose(target, exclude).await?;
        self.manual = ManualWallSelect { wall_key: self.wall_key, manual: true };
        self.store.save_manual(&self.manual).await?;
        Ok(outcome)
    }

    /// Drop the manual override and follow the sensor again.
    pub async fn reset_manual(&mut self) -> Result<Option<ProposalOutcome>> {
        self.manual = ManualWallSelect::default();
        self.store.save_manual(&self.manual).await?;
        match self.wall_key {
            Some(key) => self.on_wall_reading(key).await,
            None => Ok(None),
        }
    }

    /// Secondary: tell the primary whether this room is in a call.
    pub async fn report_status(&mut self, in_call: bool) -> Result<()> {
        if self.cfg.role != Role::Secondary {
            return Err(RoomLinkError::BadRequest("only secondaries report status".into()));
        }
        let targets = match &self.cfg.primary {
            Some(p) => vec![p.clone()],
            None => self.cfg.secondaries.clone(),
        };
        let reports = self.link.send(&targets, &LayoutCommand::SecondaryStatus { in_call }).await;
        for r in reports.iter().filter(|r| !r.is_ok()) {
            tracing::warn!(peer = %r.destination, "status report not delivered");
        }
        Ok(())
    }

    async fn on_ack(&mut self, from: String, layout: LayoutId) {
        if self.mark_online(&from, true) {
            self.persist_peers().await;
        }
        let Some(p) = self.proposal.as_mut() else {
            tracing::debug!(peer = %from, layout = %layout, "ack without proposal");
            return;
        };
        if !p.expected.contains(&from) {
            tracing::warn!(peer = %from, "ack from a peer outside the proposal");
            return;
        }
        if layout != p.target {
            let reason = format!("{from} applied {layout} instead of {}", p.target);
            self.rollback(reason, true).await;
            return;
        }
        p.acks.insert(from);
        tracing::debug!(seq = p.seq, acks = p.acks.len(), expected = p.expected.len(), "ack");
        if p.acks == p.expected {
            self.commit().await;
        }
    }

    async fn on_secondary_status(&mut self, from: String, in_call: bool) -> Result<()> {
        let Some(st) = self.peers.get_mut(&from) else {
            return Ok(());
        };
        st.online = true;
        st.in_call = in_call;
        self.store.save_peers(&self.peers).await
    }

    async fn on_apply(&mut self, from: String, layout: LayoutId, members: Option<Vec<String>>) -> Result<()> {
        let members = members.or_else(|| self.table.members(&layout).map(<[String]>::to_vec));
        let Some(members) = members else {
            tracing::warn!(layout = %layout, "apply for a layout this node does not know");
            return self.reply_applied(&from, self.topology.layout.clone()).await;
        };

        let combined = members.contains(&self.cfg.address);
        if let Err(e) = self.control.apply_layout(&layout, combined, &members).await {
            tracing::warn!(layout = %layout, error = %e, "apply failed, reporting current layout");
            return self.reply_applied(&from, self.topology.layout.clone()).await;
        }

        let prior = self.held.clone().unwrap_or_else(|| self.topology.clone());
        self.store.save_snapshot(&prior).await?;
        let next = Snapshot { combined, layout: layout.clone() };
        self.store.save_topology(&next).await?;
        self.topology = next;
        self.held = Some(prior);
        self.phase = Phase::Combining;
        tracing::info!(layout = %layout, combined, "layout applied, awaiting activation");

        self.reply_applied(&from, layout).await
    }

    async fn reply_applied(&self, to: &str, layout: LayoutId) -> Result<()> {
        let reports = self
            .link
            .send(&[to.to_string()], &LayoutCommand::LayoutApplied(layout))
            .await;
        match reports.into_iter().find(|r| !r.is_ok()) {
            Some(r) => r.outcome.map(|_| ()),
            None => Ok(()),
        }
    }

    async fn on_rollback(&mut self) -> Result<()> {
        let Some(prior) = self.held.take() else {
            tracing::debug!("rollback with nothing held");
            return Ok(());
        };
        self.phase = Phase::RollingBack;
        let members = self.table.members(&prior.layout).map(<[String]>::to_vec).unwrap_or_default();
        if let Err(e) = self.control.apply_layout(&prior.layout, prior.combined, &members).await {
            tracing::error!(layout = %prior.layout, error = %e, "restoring previous layout failed");
        }
        self.store.save_topology(&prior).await?;
        self.store.clear_snapshot().await?;
        tracing::warn!(layout = %prior.layout, "rolled back to previous layout");
        self.phase = Phase::settled(prior.combined);
        self.topology = prior;
        Ok(())
    }

    async fn on_activate(&mut self) -> Result<()> {
        self.held = None;
        self.store.clear_snapshot().await?;
        self.phase = Phase::settled(self.topology.combined);
        tracing::info!(layout = %self.topology.layout, "layout activated");
        self.control.restart_automation().await
    }

    async fn commit(&mut self) -> ProposalOutcome {
        self.cancel_deadline();
        let Some(p) = self.proposal.clone() else {
            return ProposalOutcome::Unchanged;
        };

        let combined = p.members.contains(&self.cfg.address);
        let next = Snapshot { combined, layout: p.target.clone() };
        if let Err(e) = self.store.save_topology(&next).await {
            return self.rollback(format!("persisting committed layout failed: {e}"), true).await;
        }
        self.proposal = None;
        self.topology = next;
        if let Err(e) = self.store.clear_pending().await {
            tracing::error!(error = %e, "clearing pending proposal failed");
        }
        if let Err(e) = self.store.clear_snapshot().await {
            tracing::error!(error = %e, "clearing rollback snapshot failed");
        }
        self.phase = Phase::settled(combined);

        for (addr, st) in self.peers.iter_mut() {
            st.selected = p.members.contains(addr);
        }
        self.persist_peers().await;
        self.metrics.layout_transitions.inc(&[("outcome", "commit")]);
        tracing::info!(seq = p.seq, layout = %p.target, combined, "layout committed");

        tokio::time::sleep(self.cfg.settle_delay).await;

        let mut targets: Vec<String> = p.expected.iter().cloned().collect();
        targets.extend(self.cfg.auxiliaries.iter().cloned());
        if !targets.is_empty() {
            let reports = self.link.send(&targets, &LayoutCommand::ActivateLayout).await;
            self.note_deliveries(&reports).await;
        }
        if let Err(e) = self.control.restart_automation().await {
            tracing::error!(error = %e, "automation restart failed");
        }
        self.link
            .notify_local(&LayoutCommand::StatusText(format!("LAYOUT_ACTIVE_{}", p.target)))
            .await;

        ProposalOutcome::Committed { layout: p.target }
    }

    /// Undo the in-flight proposal. `notify_peers` is false when nothing was
    /// sent yet.
    async fn rollback(&mut self, reason: String, notify_peers: bool) -> ProposalOutcome {
        self.cancel_deadline();
        let Some(p) = self.proposal.take() else {
            return ProposalOutcome::RolledBack { reason };
        };
        self.phase = Phase::RollingBack;
        self.metrics.layout_transitions.inc(&[("outcome", "rollback")]);
        tracing::warn!(seq = p.seq, layout = %p.target, reason = %reason, "rolling back layout change");

        if notify_peers && !p.expected.is_empty() {
            let peers: Vec<String> = p.expected.iter().cloned().collect();
            let reports = self.link.send(&peers, &LayoutCommand::RollbackLayout).await;
            self.note_deliveries(&reports).await;
        }

        let snapshot = p.snapshot;
        let members = self.table.members(&snapshot.layout).map(<[String]>::to_vec).unwrap_or_default();
        if let Err(e) = self.control.apply_layout(&snapshot.layout, snapshot.combined, &members).await {
            tracing::error!(layout = %snapshot.layout, error = %e, "restoring previous layout failed");
        }
        if let Err(e) = self.store.save_topology(&snapshot).await {
            tracing::error!(error = %e, "persisting restored layout failed");
        }
        if let Err(e) = self.store.clear_pending().await {
            tracing::error!(error = %e, "clearing pending proposal failed");
        }
        if let Err(e) = self.store.clear_snapshot().await {
            tracing::error!(error = %e, "clearing rollback snapshot failed");
        }
        self.phase = Phase::settled(snapshot.combined);
        let text = format!("Restored {}: {reason}", snapshot.layout);
        self.topology = snapshot;

        if let Err(e) = self
            .control
            .show_alert(ROLLBACK_ALERT_TITLE, &text, self.cfg.alert_duration)
            .await
        {
            tracing::error!(error = %e, "alert failed");
        }
        ProposalOutcome::RolledBack { reason }
    }

    /// Update peer liveness from delivery outcomes; returns the peers that
    /// could not be reached.
    async fn note_deliveries(&mut self, reports: &[DeliveryReport]) -> Vec<String> {
        let mut failed = Vec::new();
        let mut changed = false;
        for r in reports {
            if !r.is_ok() {
                failed.push(r.destination.clone());
            }
            if r.kind.is_some() {
                changed |= self.mark_online(&r.destination, r.is_ok());
            }
        }
        if changed {
            self.persist_peers().await;
        }
        failed
    }

    fn mark_online(&mut self, peer: &str, online: bool) -> bool {
        match self.peers.get_mut(peer) {
            Some(st) if st.online != online => {
                st.online = online;
                if !online {
                    tracing::warn!(peer, "peer marked offline");
                }
                true
            }
            _ => false,
        }
    }

    async fn persist_peers(&self) {
        if self.cfg.role != Role::Primary {
            return;
        }
        if let Err(e) = self.store.save_peers(&self.peers).await {
            tracing::error!(error = %e, "persisting peer status failed");
        }
    }

    /// Secondaries without a configured primary accept any known peer.
    fn is_primary(&self, peer: &str) -> bool {
        self.cfg.primary.as_deref().map_or(true, |p| p == peer)
    }

    fn peer_address(&self, source: &Source) -> Option<String> {
        match source.origin() {
            Origin::RemoteIp { peer_address } if self.cfg.knows(peer_address) => {
                Some(peer_address.to_string())
            }
            Origin::RemoteRelay { peer_id } => self.cfg.relay_ids.get(peer_id).cloned(),
            _ => None,
        }
    }

    fn arm_deadline(&mut self, seq: u64) {
        self.cancel_deadline();
        let tx = self.deadlines.clone();
        let after = self.cfg.ack_timeout;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(seq);
        }));
    }

    fn cancel_deadline(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for LayoutMachine {
    fn drop(&mut self) {
        self.cancel_deadline();
    }
}
