//! Built-in local services.
//!
//! - `operator`: the on-device panel app (wall sensor, manual layout
//!   selection, call status).

pub mod operator;

pub use operator::{OperatorPanel, PANEL_APP};
