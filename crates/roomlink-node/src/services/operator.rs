use async_trait::async_trait;
use serde::Deserialize;

use roomlink_core::error::{Result, RoomLinkError};
use roomlink_core::protocol::{Envelope, LayoutId, MessageType};

use crate::dispatch::LocalService;
use crate::layout::{LayoutHandle, ProposalOutcome};

/// Application name the panel and sensor macros publish under.
pub const PANEL_APP: &str = "JoinSplit_Panel";

const RESET_MANUAL: &str = "RESET_MANUAL";

/// Local requests raised by the room panel and the wall-sensor macro.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PanelRequest {
    Wall {
        wall_key: u8,
    },
    Select {
        select_layout: LayoutId,
        #[serde(default)]
        exclude: Vec<String>,
    },
    InCall {
        in_call: bool,
    },
    Keyword(String),
}

/// Turns panel commands into layout requests.
pub struct OperatorPanel {
    layout: LayoutHandle,
}

impl OperatorPanel {
    pub fn new(layout: LayoutHandle) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl LocalService for OperatorPanel {
    fn app(&self) -> &str {
        PANEL_APP
    }

    async fn handle(&self, env: Envelope) -> Result<()> {
        if env.msg_type != MessageType::Command {
            tracing::debug!(msg_type = ?env.msg_type, "panel message ignored");
            return Ok(());
        }
        let req: PanelRequest = serde_json::from_value(env.value)
            .map_err(|e| RoomLinkError::BadRequest(format!("panel command invalid: {e}")))?;

        match req {
            PanelRequest::Wall { wall_key } => self.layout.wall_reading(wall_key).await,
            PanelRequest::Select { select_layout, exclude } => {
                let outcome = self.layout.select_manual(select_layout, exclude).await?;
                log_outcome(&outcome);
                Ok(())
            }
            PanelRequest::InCall { in_call } => self.layout.report_status(in_call).await,
            PanelRequest::Keyword(k) if k == RESET_MANUAL => {
                if let Some(outcome) = self.layout.reset_manual().await? {
                    log_outcome(&outcome);
                }
                Ok(())
            }
            PanelRequest::Keyword(k) => Err(RoomLinkError::BadRequest(format!("unknown panel command: {k}"))),
        }
    }
}

fn log_outcome(outcome: &ProposalOutcome) {
    match outcome {
        ProposalOutcome::RolledBack { reason } => tracing::warn!(reason = %reason, "panel selection rolled back"),
        other => tracing::info!(outcome = ?other, "panel selection"),
    }
}
