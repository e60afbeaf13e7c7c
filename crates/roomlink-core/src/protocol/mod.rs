//! Protocol modules (envelope, layout commands, inbound decoding).
//!
//! - `envelope`: the JSON wire envelope and its size limit.
//! - `command`: typed view of envelope values for the join/split protocol.
//! - `inbound`: decode-once that never rejects input.
//!
//! All parsers are panic-free: malformed input is reported as
//! `RoomLinkError` or wrapped, never unwrapped.

pub mod command;
pub mod envelope;
pub mod inbound;

pub use command::{LayoutCommand, LayoutId};
pub use envelope::{Envelope, MessageType, Origin, Source, SourceKind, MAX_VALUE_BYTES};
pub use inbound::{decode, Inbound};
