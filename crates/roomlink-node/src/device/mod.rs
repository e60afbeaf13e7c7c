//! Device collaborator seams.
//!
//! The node never drives device hardware itself. It needs three things from
//! the device: a named-blob store for persistence, a loopback text channel,
//! and a control surface that applies layouts and restarts automation.

mod blob;
mod bus;
mod control;

use std::time::Duration;

use async_trait::async_trait;

use roomlink_core::error::Result;
use roomlink_core::protocol::LayoutId;

pub use blob::{FileBlobStore, MemoryBlobStore};
pub use bus::LocalBus;
pub use control::LoggingRoomControl;

/// Get/set of a single named text blob.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// `Ok(None)` when the blob was never written.
    async fn get(&self, name: &str) -> Result<Option<String>>;
    async fn set(&self, name: &str, blob: &str) -> Result<()>;
}

/// Device control surface consumed by the layout protocol. Only pass/fail is
/// observed.
#[async_trait]
pub trait RoomControl: Send + Sync {
    /// Turn on the device's outbound HTTP client.
    async fn enable_http_client(&self) -> Result<()>;
    /// Route audio/video for `layout`. `members` are the combined addresses.
    async fn apply_layout(&self, layout: &LayoutId, combined: bool, members: &[String]) -> Result<()>;
    /// Restart the automation subsystem so it picks up the new layout.
    async fn restart_automation(&self) -> Result<()>;
    /// Timed on-screen alert.
    async fn show_alert(&self, title: &str, text: &str, duration: Duration) -> Result<()>;
}
