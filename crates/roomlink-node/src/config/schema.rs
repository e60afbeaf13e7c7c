use std::collections::{BTreeMap, BTreeSet};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use roomlink_core::error::{Result, RoomLinkError};
use roomlink_core::protocol::LayoutId;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub version: u32,

    pub node: NodeSection,

    #[serde(default)]
    pub credentials: CredentialsSection,

    #[serde(default)]
    pub delivery: DeliverySection,

    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    pub layouts: Vec<LayoutConfig>,

    #[serde(default)]
    pub wall: WallSection,

    #[serde(default)]
    pub protocol: ProtocolSection,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(RoomLinkError::BadRequest(format!(
                "unsupported config version: {}",
                self.version
            )));
        }

        self.node.validate()?;
        self.delivery.validate()?;
        self.protocol.validate()?;

        let mut peer_addrs = BTreeSet::new();
        for p in &self.peers {
            if !peer_addrs.insert(p.address.as_str()) {
                return Err(RoomLinkError::BadRequest(format!("duplicate peer: {}", p.address)));
            }
            if p.address == self.node.address {
                return Err(RoomLinkError::BadRequest(
                    "peers must not list the node's own address".into(),
                ));
            }
            if p.kind == PeerKind::Relay && p.relay_id.as_deref().unwrap_or("").is_empty() {
                return Err(RoomLinkError::BadRequest(format!(
                    "relay peer {} requires relay_id",
                    p.address
                )));
            }
        }
        if !self.peers.is_empty() && !self.credentials.is_present() {
            return Err(RoomLinkError::BadRequest(
                "remote peers configured but credentials are missing".into(),
            ));
        }
        if self.node.role == Role::Secondary && self.peers.is_empty() {
            return Err(RoomLinkError::BadRequest("secondary requires its primary in peers".into()));
        }

        if self.layouts.is_empty() {
            return Err(RoomLinkError::BadRequest("layouts must not be empty".into()));
        }
        let mut ids = BTreeSet::new();
        for l in &self.layouts {
            if !ids.insert(&l.id) {
                return Err(RoomLinkError::BadRequest(format!("duplicate layout id: {}", l.id)));
            }
            if self.node.role == Role::Secondary {
                continue;
            }
            for m in &l.members {
                if m != &self.node.address && !peer_addrs.contains(m.as_str()) {
                    return Err(RoomLinkError::BadRequest(format!(
                        "layout {} member {m} is neither this node nor a peer",
                        l.id
                    )));
                }
            }
        }
        if let Some(default) = &self.protocol.default_layout {
            if !ids.contains(default) {
                return Err(RoomLinkError::BadRequest(format!(
                    "protocol.default_layout {default} is not in layouts"
                )));
            }
        }

        for (key, target) in &self.wall.map {
            if *key > 0b111 {
                return Err(RoomLinkError::BadRequest(format!(
                    "wall.map key {key} does not fit in 3 bits"
                )));
            }
            if !ids.contains(target) {
                return Err(RoomLinkError::BadRequest(format!(
                    "wall.map target {target} is not in layouts"
                )));
            }
        }
        if self.wall.enabled && self.wall.map.is_empty() {
            return Err(RoomLinkError::BadRequest("wall.enabled requires wall.map".into()));
        }

        Ok(())
    }
}

/// Endpoint role in the combined room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    /// Serial / asset id stamped into outgoing envelopes.
    pub id: String,
    /// Address peers use to reach this node.
    pub address: String,
    pub role: Role,
    /// Own id on the relay bus, if reachable that way.
    #[serde(default)]
    pub relay_id: Option<String>,
    #[serde(default = "default_app")]
    pub app: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
}

impl NodeSection {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(RoomLinkError::BadRequest("node.id must not be empty".into()));
        }
        if self.address.trim().is_empty() {
            return Err(RoomLinkError::BadRequest("node.address must not be empty".into()));
        }
        if self.app.trim().is_empty() {
            return Err(RoomLinkError::BadRequest("node.app must not be empty".into()));
        }
        Ok(())
    }
}

fn default_app() -> String {
    "JoinSplit".into()
}
fn default_listen() -> String {
    "0.0.0.0:8443".into()
}
fn default_store_dir() -> String {
    "./roomlink-store".into()
}

/// Pre-shared credentials used towards peers. Either a username/password
/// pair or a pre-encoded token.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsSection {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub token: Option<SecretString>,
}

impl CredentialsSection {
    pub fn is_present(&self) -> bool {
        self.username.is_some() || self.password.is_some() || self.token.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliverySection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_value_bytes")]
    pub max_value_bytes: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_relay_base_url")]
    pub relay_base_url: String,
    /// Device certificates are usually self-signed.
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,
    /// Scheme for direct-IP `putxml` calls. `http` reaches a peer node's own
    /// ingress, which serves plain HTTP.
    #[serde(default)]
    pub peer_scheme: PeerScheme,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_value_bytes: default_max_value_bytes(),
            timeout_ms: default_timeout_ms(),
            relay_base_url: default_relay_base_url(),
            accept_invalid_certs: default_accept_invalid_certs(),
            peer_scheme: PeerScheme::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DeliverySection {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(RoomLinkError::BadRequest("delivery.interval_ms must be > 0".into()));
        }
        if !(1..=65536).contains(&self.max_value_bytes) {
            return Err(RoomLinkError::BadRequest(
                "delivery.max_value_bytes must be between 1 and 65536".into(),
            ));
        }
        if !(100..=60000).contains(&self.timeout_ms) {
            return Err(RoomLinkError::BadRequest(
                "delivery.timeout_ms must be between 100 and 60000".into(),
            ));
        }
        if let RetryPolicy::Requeue { max_attempts } = self.retry {
            if !(2..=10).contains(&max_attempts) {
                return Err(RoomLinkError::BadRequest(
                    "delivery.retry.max_attempts must be between 2 and 10".into(),
                ));
            }
        }
        Ok(())
    }
}

fn default_interval_ms() -> u64 {
    500
}
fn default_max_value_bytes() -> usize {
    roomlink_core::protocol::MAX_VALUE_BYTES
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_relay_base_url() -> String {
    "https://webexapis.com/v1".into()
}
fn default_accept_invalid_certs() -> bool {
    true
}

/// What the queue does with a failed delivery. `Requeue` appends the item
/// to the tail again until `max_attempts` is reached; only the final
/// outcome is reported to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RetryPolicy {
    #[default]
    None,
    Requeue { max_attempts: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerScheme {
    #[default]
    Https,
    Http,
}

impl PeerScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerScheme::Https => "https",
            PeerScheme::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Ip,
    Relay,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    #[default]
    Secondary,
    /// Receives activation notices but never takes part in the ack round.
    Auxiliary,
    /// Used by secondaries to name their primary.
    Primary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    pub address: String,
    pub kind: PeerKind,
    #[serde(default)]
    pub role: PeerRole,
    #[serde(default)]
    pub relay_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    pub id: LayoutId,
    /// Addresses combined under this layout. Empty means everyone is split.
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WallSection {
    #[serde(default)]
    pub enabled: bool,
    /// 3-bit partition key (bit set = partition open) -> layout.
    #[serde(default)]
    pub map: BTreeMap<u8, LayoutId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolSection {
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_alert_duration_secs")]
    pub alert_duration_secs: u64,
    #[serde(default = "default_restart_countdown_secs")]
    pub restart_countdown_secs: u64,
    /// Layout assumed when nothing is persisted yet. Falls back to the
    /// first entry of `layouts`.
    #[serde(default)]
    pub default_layout: Option<LayoutId>,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            alert_duration_secs: default_alert_duration_secs(),
            restart_countdown_secs: default_restart_countdown_secs(),
            default_layout: None,
        }
    }
}

impl ProtocolSection {
    pub fn validate(&self) -> Result<()> {
        if !(1000..=30000).contains(&self.ack_timeout_ms) {
            return Err(RoomLinkError::BadRequest(
                "protocol.ack_timeout_ms must be between 1000 and 30000".into(),
            ));
        }
        if self.settle_delay_ms > 10000 {
            return Err(RoomLinkError::BadRequest(
                "protocol.settle_delay_ms must be at most 10000".into(),
            ));
        }
        Ok(())
    }
}

fn default_ack_timeout_ms() -> u64 {
    4000
}
fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_alert_duration_secs() -> u64 {
    10
}
fn default_restart_countdown_secs() -> u64 {
    30
}
