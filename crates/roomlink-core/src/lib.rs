//! roomlink core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the wire envelope, the typed join/split command set and
//! the error surface shared by the node runtime and tooling. It carries no
//! transport or runtime dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. All fallible paths
//! surface as `RoomLinkError`/`Result`; inbound decoding wraps bad input
//! instead of failing.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorCode, Result, RoomLinkError};
