//! Outbound delivery engine.
//!
//! - `descriptor`: transport kinds, credentials, destinations.
//! - `render`: putxml / relay wire bodies and credential masking.
//! - `egress`: the HTTP seam (`Egress`) and its reqwest implementation.
//! - `queue`: FIFO worker, single-permit dispatch, delivery reports.
//! - `messenger`: the `status|error|command` builder used by everything else.

pub mod descriptor;
pub mod egress;
pub mod messenger;
pub mod queue;
pub mod render;

pub use descriptor::{
    Credentials, DescriptorLimits, Destination, HttpClientActivation, TransportDescriptor,
    TransportKind,
};
pub use egress::{Egress, EgressResponse, HttpEgress};
pub use messenger::{Messenger, NodeIdentity, Outbound, Receipt, Transports};
pub use queue::{
    DeliveryItem, DeliveryQueue, DeliveryReport, DeliveryResponse, Dispatch, Payload, QueueWorker,
    Remaining, TickReport, MIN_INTERVAL,
};
pub use render::{extract_text, Masker, RenderedRequest};
