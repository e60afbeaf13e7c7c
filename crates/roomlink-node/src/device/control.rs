use std::time::Duration;

use async_trait::async_trait;

use roomlink_core::error::Result;
use roomlink_core::protocol::LayoutId;

use super::RoomControl;

/// Control surface for hosts without a device API: every action succeeds and
/// is logged.
#[derive(Debug, Default)]
pub struct LoggingRoomControl;

#[async_trait]
impl RoomControl for LoggingRoomControl {
    async fn enable_http_client(&self) -> Result<()> {
        tracing::info!("device http client enabled");
        Ok(())
    }

    async fn apply_layout(&self, layout: &LayoutId, combined: bool, members: &[String]) -> Result<()> {
        tracing::info!(%layout, combined, members = ?members, "apply layout");
        Ok(())
    }

    async fn restart_automation(&self) -> Result<()> {
        tracing::info!("automation restart requested");
        Ok(())
    }

    async fn show_alert(&self, title: &str, text: &str, duration: Duration) -> Result<()> {
        tracing::warn!(title, text, secs = duration.as_secs(), "alert");
        Ok(())
    }
}
