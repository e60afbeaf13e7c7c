//! Node config loader (strict parsing).

pub mod schema;

use std::fs;

use roomlink_core::error::{Result, RoomLinkError};

pub use schema::{
    PeerScheme,
    CredentialsSection, DeliverySection, LayoutConfig, NodeConfig, NodeSection, PeerConfig,
    PeerKind, PeerRole, ProtocolSection, RetryPolicy, Role, WallSection,
};

pub fn load_from_file(path: &str) -> Result<NodeConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| RoomLinkError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<NodeConfig> {
    let cfg: NodeConfig = serde_yaml::from_str(s)
        .map_err(|e| RoomLinkError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
