//! Layout (join/split) protocol.
//!
//! - `table`: static layouts and the wall-sensor map.
//! - `state`: persisted topology keys and typed store access.
//! - `machine`: propose / ack / commit-or-rollback.
//! - `actor`: single-owner task and its handle.

pub mod actor;
pub mod machine;
pub mod state;
pub mod table;

use async_trait::async_trait;

use roomlink_core::protocol::LayoutCommand;

use crate::delivery::{DeliveryReport, Messenger};

pub use actor::{LayoutEvent, LayoutHandle};
pub use machine::{LayoutMachine, LayoutStatus, MachineConfig, ProposalOutcome};
pub use state::{ManualWallSelect, PeerStatus, Phase, Snapshot, TopologyStore};
pub use table::LayoutTable;

/// How the machine talks to other endpoints.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// One report per peer, in no particular order.
    async fn send(&self, peers: &[String], cmd: &LayoutCommand) -> Vec<DeliveryReport>;
    /// Announce on this device's own message channel.
    async fn notify_local(&self, cmd: &LayoutCommand);
}

#[async_trait]
impl PeerLink for Messenger {
    async fn send(&self, peers: &[String], cmd: &LayoutCommand) -> Vec<DeliveryReport> {
        let (msg_type, value) = cmd.to_message();
        match self.message(msg_type, value).to(peers.iter().cloned()).queue() {
            Ok(receipt) => receipt.outcomes().await,
            Err(e) => {
                tracing::warn!(error = %e, "layout command not queued");
                peers
                    .iter()
                    .map(|p| DeliveryReport::rejected(p.clone(), e.clone()))
                    .collect()
            }
        }
    }

    async fn notify_local(&self, cmd: &LayoutCommand) {
        let (msg_type, value) = cmd.to_message();
        if let Err(e) = self.message(msg_type, value).local().queue() {
            tracing::warn!(error = %e, "local notice not queued");
        }
    }
}
