//! Typed view of envelope values used by the join/split protocol.
//!
//! Known protocol values become explicit variants; anything else is kept as
//! `Opaque` so newer peers can talk to older ones.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, RoomLinkError};
use crate::protocol::envelope::MessageType;

pub const APPLY_LAYOUT_PREFIX: &str = "APPLY_LAYOUT_";
pub const LAYOUT_APPLIED_PREFIX: &str = "SEC_LAYOUT_APPLIED_";
pub const ROLLBACK_LAYOUT: &str = "ROLLBACK_LAYOUT";
pub const ACTIVATE_NEW_LAYOUT: &str = "ACTIVATE_NEW_LAYOUT";

const RICH_APPLY_KEY: &str = "apply_div_combine_layout";
const SECONDARY_STATUS_KEY: &str = "secondary_status";
const MAX_LAYOUT_ID_LEN: usize = 32;

/// Name of one entry in the layout table (e.g. `LAY2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayoutId(String);

impl LayoutId {
    /// Layout ids are short upper-case ASCII tokens (`A-Z`, `0-9`, `_`).
    pub fn parse(s: &str) -> Result<Self> {
        let ok = !s.is_empty()
            && s.len() <= MAX_LAYOUT_ID_LEN
            && s.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_');
        if !ok {
            return Err(RoomLinkError::BadRequest(format!("invalid layout id: {s:?}")));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LayoutId {
    type Error = RoomLinkError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<LayoutId> for String {
    fn from(id: LayoutId) -> Self {
        id.0
    }
}

impl fmt::Display for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Deserialize)]
struct RichApply {
    layout: LayoutId,
    #[serde(default)]
    members: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SecondaryStatusBody {
    in_call: bool,
}

/// Decoded envelope value.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutCommand {
    /// Primary -> secondary: apply `layout`. `members` is present in the
    /// rich form and lets a secondary apply without its own layout table.
    ApplyLayout { layout: LayoutId, members: Option<Vec<String>> },
    /// Secondary -> primary: layout applied and persisted.
    LayoutApplied(LayoutId),
    /// Primary -> secondary: restore the pre-proposal snapshot.
    RollbackLayout,
    /// Primary -> secondary: proposal committed, restart automation.
    ActivateLayout,
    /// Secondary -> primary: periodic status report.
    SecondaryStatus { in_call: bool },
    StatusText(String),
    ErrorReport(String),
    Opaque(Value),
}

impl LayoutCommand {
    pub fn parse(msg_type: MessageType, value: &Value) -> Self {
        if let Value::String(s) = value {
            if let Some(cmd) = parse_token(s) {
                return cmd;
            }
        }

        if let Some(body) = value.get(RICH_APPLY_KEY) {
            if let Ok(rich) = serde_json::from_value::<RichApply>(body.clone()) {
                return LayoutCommand::ApplyLayout { layout: rich.layout, members: rich.members };
            }
        }
        if let Some(body) = value.get(SECONDARY_STATUS_KEY) {
            if let Ok(st) = serde_json::from_value::<SecondaryStatusBody>(body.clone()) {
                return LayoutCommand::SecondaryStatus { in_call: st.in_call };
            }
        }

        match (msg_type, value) {
            (MessageType::Status, Value::String(s)) => LayoutCommand::StatusText(s.clone()),
            (MessageType::Error, Value::String(s)) => LayoutCommand::ErrorReport(s.clone()),
            (MessageType::Error, other) => LayoutCommand::ErrorReport(other.to_string()),
            (_, other) => LayoutCommand::Opaque(other.clone()),
        }
    }

    /// Wire representation (message type + value).
    pub fn to_message(&self) -> (MessageType, Value) {
        match self {
            LayoutCommand::ApplyLayout { layout, members: None } => (
                MessageType::Command,
                Value::String(format!("{APPLY_LAYOUT_PREFIX}{layout}")),
            ),
            LayoutCommand::ApplyLayout { layout, members: Some(members) } => (
                MessageType::Command,
                json!({ RICH_APPLY_KEY: { "layout": layout, "members": members } }),
            ),
            LayoutCommand::LayoutApplied(layout) => (
                MessageType::Command,
                Value::String(format!("{LAYOUT_APPLIED_PREFIX}{layout}")),
            ),
            LayoutCommand::RollbackLayout => {
                (MessageType::Command, Value::String(ROLLBACK_LAYOUT.into()))
            }
            LayoutCommand::ActivateLayout => {
                (MessageType::Command, Value::String(ACTIVATE_NEW_LAYOUT.into()))
            }
            LayoutCommand::SecondaryStatus { in_call } => (
                MessageType::Status,
                json!({ SECONDARY_STATUS_KEY: { "in_call": in_call } }),
            ),
            LayoutCommand::StatusText(s) => (MessageType::Status, Value::String(s.clone())),
            LayoutCommand::ErrorReport(s) => (MessageType::Error, Value::String(s.clone())),
            LayoutCommand::Opaque(v) => (MessageType::Command, v.clone()),
        }
    }
}

fn parse_token(s: &str) -> Option<LayoutCommand> {
    match s {
        ROLLBACK_LAYOUT => return Some(LayoutCommand::RollbackLayout),
        ACTIVATE_NEW_LAYOUT => return Some(LayoutCommand::ActivateLayout),
        _ => {}
    }
    if let Some(id) = s.strip_prefix(LAYOUT_APPLIED_PREFIX) {
        return LayoutId::parse(id).ok().map(LayoutCommand::LayoutApplied);
    }
    if let Some(id) = s.strip_prefix(APPLY_LAYOUT_PREFIX) {
        return LayoutId::parse(id)
            .ok()
            .map(|layout| LayoutCommand::ApplyLayout { layout, members: None });
    }
    None
}
