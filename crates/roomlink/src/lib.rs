//! Top-level facade crate for roomlink.
//!
//! Re-exports the protocol primitives and the node runtime so users can
//! depend on a single crate.

pub mod core {
    pub use roomlink_core::*;
}

pub mod node {
    pub use roomlink_node::*;
}
