//! Inbound side: the receiver subscribes to the message channel and decodes
//! once; the dispatcher routes envelopes to services by origin and app.

pub mod dispatcher;
pub mod receiver;

pub use dispatcher::{Dispatcher, LocalService, RemoteService};
pub use receiver::{InboundHandler, Receiver, SubscriptionId};
