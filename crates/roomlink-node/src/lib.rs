//! roomlink node library entry.
//!
//! Wires the delivery engine, inbound receiver and dispatcher, the persistent
//! store client and the layout protocol into one endpoint runtime. Consumed
//! by the binary (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod config;
pub mod delivery;
pub mod device;
pub mod dispatch;
pub mod layout;
pub mod obs;
pub mod ops;
pub mod router;
pub mod services;
pub mod store;
pub mod transport;
