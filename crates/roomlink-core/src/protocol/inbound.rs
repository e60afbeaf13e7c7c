//! Decode-once for raw text arriving on the message channel.
//!
//! Decoding never fails: text that is not a valid envelope is wrapped as
//! `{"rawMessage": text}` and handed on like any other message.

use serde::Serialize;

use crate::protocol::envelope::Envelope;

/// One message as seen by receivers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Inbound {
    Envelope(Envelope),
    Raw {
        #[serde(rename = "rawMessage")]
        raw_message: String,
    },
}

impl Inbound {
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Inbound::Envelope(env) => Some(env),
            Inbound::Raw { .. } => None,
        }
    }
}

pub fn decode(text: &str) -> Inbound {
    match serde_json::from_str::<Envelope>(text) {
        Ok(env) => Inbound::Envelope(env),
        Err(e) => {
            tracing::debug!(error = %e, len = text.len(), "undecodable message wrapped as raw");
            Inbound::Raw { raw_message: text.to_string() }
        }
    }
}
