//! Transport layer (HTTP ingress).
//!
//! Peers deliver envelopes as `putxml` commands; the ingress unwraps the
//! message text and publishes it on the local bus, where the receiver
//! decodes it once like any other inbound message.

pub mod putxml;
