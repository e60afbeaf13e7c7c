//! Wire envelope exchanged between endpoints (JSON).
//!
//! Field names follow the wire contract (`App`, `Source`, `Type`, `Value`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RoomLinkError};

/// Default upper bound for the serialized `Value` field.
pub const MAX_VALUE_BYTES: usize = 1024;

/// Envelope message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Status,
    Error,
    Command,
}

/// How the sending endpoint reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Local,
    #[serde(rename = "Remote_IP")]
    RemoteIp,
    #[serde(rename = "Remote_Webex")]
    RemoteRelay,
}

/// Envelope source block.
///
/// `id` is the sender's identity for its transport: the serial for local
/// traffic, the sender's own address for direct-IP, its relay peer id for
/// relayed traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "Type")]
    pub kind: SourceKind,
    #[serde(rename = "Id", default)]
    pub id: String,
    /// Opaque pre-shared credential blob, carried but never interpreted.
    #[serde(rename = "Auth", default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

/// Typed view of [`Source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin<'a> {
    Local { serial: &'a str },
    RemoteIp { peer_address: &'a str },
    RemoteRelay { peer_id: &'a str },
}

impl Source {
    pub fn local(serial: impl Into<String>) -> Self {
        Self { kind: SourceKind::Local, id: serial.into(), auth: None }
    }

    pub fn remote_ip(own_address: impl Into<String>) -> Self {
        Self { kind: SourceKind::RemoteIp, id: own_address.into(), auth: None }
    }

    pub fn remote_relay(own_peer_id: impl Into<String>) -> Self {
        Self { kind: SourceKind::RemoteRelay, id: own_peer_id.into(), auth: None }
    }

    pub fn origin(&self) -> Origin<'_> {
        match self.kind {
            SourceKind::Local => Origin::Local { serial: &self.id },
            SourceKind::RemoteIp => Origin::RemoteIp { peer_address: &self.id },
            SourceKind::RemoteRelay => Origin::RemoteRelay { peer_id: &self.id },
        }
    }

    pub fn is_local(&self) -> bool {
        self.kind == SourceKind::Local
    }
}

/// Envelope (text message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical sender application.
    #[serde(rename = "App")]
    pub app: String,
    #[serde(rename = "Source")]
    pub source: Source,
    #[serde(rename = "Type")]
    pub msg_type: MessageType,
    /// Protocol payload; string or nested object.
    #[serde(rename = "Value", default)]
    pub value: Value,
}

impl Envelope {
    pub fn new(app: impl Into<String>, source: Source, msg_type: MessageType, value: Value) -> Self {
        Self { app: app.into(), source, msg_type, value }
    }

    /// Serialized size of `value` in bytes.
    pub fn value_len(&self) -> Result<usize> {
        serde_json::to_vec(&self.value)
            .map(|v| v.len())
            .map_err(|e| RoomLinkError::Internal(format!("value encode failed: {e}")))
    }

    /// Reject envelopes whose value exceeds `max` bytes.
    pub fn check_value_size(&self, max: usize) -> Result<usize> {
        let size = self.value_len()?;
        if size > max {
            return Err(RoomLinkError::PayloadTooLarge { size, max });
        }
        Ok(size)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| RoomLinkError::Internal(format!("envelope encode failed: {e}")))
    }
}
