//! Persisted topology facts and their store keys (global namespace).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use roomlink_core::error::Result;
use roomlink_core::protocol::LayoutId;

use crate::store::{KvStore, Namespace};

pub const KEY_COMBINED: &str = "JoinSplit_combinedState";
pub const KEY_LAYOUT: &str = "JoinSplit_alt_config";
pub const KEY_PEERS: &str = "JoinSplit_secondariesStatus";
pub const KEY_MANUAL: &str = "JoinSplit_alt_manual_wall_select";
pub const KEY_PENDING: &str = "JoinSplit_pending_layout";
pub const KEY_SNAPSHOT: &str = "JoinSplit_rollback_snapshot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Split,
    /// Proposal in flight (primary) or applied but not yet activated
    /// (secondary).
    Combining,
    Combined,
    RollingBack,
}

impl Phase {
    pub fn settled(combined: bool) -> Self {
        if combined {
            Phase::Combined
        } else {
            Phase::Split
        }
    }

    pub fn in_flight(self) -> bool {
        matches!(self, Phase::Combining | Phase::RollingBack)
    }
}

/// Committed topology of this endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub combined: bool,
    pub layout: LayoutId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub online: bool,
    #[serde(rename = "inCall")]
    pub in_call: bool,
    /// Combined under the active layout.
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualWallSelect {
    /// Sensor reading at the time of the override.
    pub wall_key: Option<u8>,
    pub manual: bool,
}

/// Proposal awaiting acknowledgements (primary only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingProposal {
    pub seq: u64,
    pub layout: LayoutId,
    pub members: Vec<String>,
    pub expected: BTreeSet<String>,
}

/// Typed access to the keys above.
#[derive(Clone)]
pub struct TopologyStore {
    kv: KvStore,
}

impl TopologyStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Committed topology; `default_layout` and split when nothing is stored.
    pub async fn load_topology(&self, default_layout: &LayoutId) -> Result<Snapshot> {
        let combined = self.kv.read_or(Namespace::Global, KEY_COMBINED, false).await?;
        let layout = self
            .kv
            .read_or(Namespace::Global, KEY_LAYOUT, default_layout.clone())
            .await?;
        Ok(Snapshot { combined, layout })
    }

    pub async fn save_topology(&self, t: &Snapshot) -> Result<()> {
        self.kv.write_as(Namespace::Global, KEY_COMBINED, &t.combined).await?;
        self.kv.write_as(Namespace::Global, KEY_LAYOUT, &t.layout).await
    }

    pub async fn load_peers(&self) -> Result<BTreeMap<String, PeerStatus>> {
        self.kv.read_or(Namespace::Global, KEY_PEERS, BTreeMap::new()).await
    }

    pub async fn save_peers(&self, peers: &BTreeMap<String, PeerStatus>) -> Result<()> {
        self.kv.write_as(Namespace::Global, KEY_PEERS, peers).await
    }

    pub async fn load_manual(&self) -> Result<ManualWallSelect> {
        self.kv.read_or(Namespace::Global, KEY_MANUAL, ManualWallSelect::default()).await
    }

    pub async fn save_manual(&self, m: &ManualWallSelect) -> Result<()> {
        self.kv.write_as(Namespace::Global, KEY_MANUAL, m).await
    }

    pub async fn load_pending(&self) -> Result<Option<PendingProposal>> {
        self.kv.read_or(Namespace::Global, KEY_PENDING, None).await
    }

    pub async fn save_pending(&self, p: &PendingProposal) -> Result<()> {
        self.kv.write_as(Namespace::Global, KEY_PENDING, p).await
    }

    pub async fn clear_pending(&self) -> Result<()> {
        self.kv.remove(Namespace::Global, KEY_PENDING).await
    }

    pub async fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        self.kv.read_or(Namespace::Global, KEY_SNAPSHOT, None).await
    }

    pub async fn save_snapshot(&self, s: &Snapshot) -> Result<()> {
        self.kv.write_as(Namespace::Global, KEY_SNAPSHOT, s).await
    }

    pub async fn clear_snapshot(&self) -> Result<()> {
        self.kv.remove(Namespace::Global, KEY_SNAPSHOT).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::device::MemoryBlobStore;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn defaults_then_round_trip() {
        let kv = KvStore::new(Arc::new(MemoryBlobStore::new()), "JoinSplit");
        let store = TopologyStore::new(kv.clone());
        let lay1 = LayoutId::parse("LAY1").unwrap();

        let t = store.load_topology(&lay1).await.unwrap();
        assert_eq!(t, Snapshot { combined: false, layout: lay1.clone() });
        assert_eq!(store.load_pending().await.unwrap(), None);

        let lay2 = LayoutId::parse("LAY2").unwrap();
        store.save_topology(&Snapshot { combined: true, layout: lay2.clone() }).await.unwrap();
        assert_eq!(kv.read(Namespace::Global, KEY_COMBINED).await.unwrap(), json!(true));
        assert_eq!(kv.read(Namespace::Global, KEY_LAYOUT).await.unwrap(), json!("LAY2"));

        store.save_snapshot(&Snapshot { combined: false, layout: lay1.clone() }).await.unwrap();
        assert_eq!(store.load_snapshot().await.unwrap().unwrap().layout, lay1);
        store.clear_snapshot().await.unwrap();
        assert_eq!(store.load_snapshot().await.unwrap(), None);
    }

    #[tokio::test]
    async fn peer_map_uses_wire_names() {
        let kv = KvStore::new(Arc::new(MemoryBlobStore::new()), "JoinSplit");
        let store = TopologyStore::new(kv.clone());
        let mut peers = BTreeMap::new();
        peers.insert("10.0.0.110".to_string(), PeerStatus { online: true, in_call: true, selected: false });
        store.save_peers(&peers).await.unwrap();

        let raw = kv.read(Namespace::Global, KEY_PEERS).await.unwrap();
        assert_eq!(raw["10.0.0.110"]["inCall"], true);
        assert_eq!(store.load_peers().await.unwrap(), peers);
    }
}
