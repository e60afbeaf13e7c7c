use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use roomlink_core::error::{Result, RoomLinkError};
use roomlink_core::protocol::{Envelope, Inbound};

use crate::obs::NodeMetrics;

use super::receiver::InboundHandler;

/// Handlers for envelopes raised on this device (operator panels, other
/// local applications).
#[async_trait]
pub trait LocalService: Send + Sync {
    fn app(&self) -> &str;
    async fn handle(&self, env: Envelope) -> Result<()>;
}

/// Handlers for envelopes that arrived from a peer endpoint.
#[async_trait]
pub trait RemoteService: Send + Sync {
    fn app(&self) -> &str;
    async fn handle(&self, env: Envelope) -> Result<()>;
}

/// Routes decoded envelopes by origin and application name.
pub struct Dispatcher {
    local: DashMap<String, Arc<dyn LocalService>>,
    remote: DashMap<String, Arc<dyn RemoteService>>,
    metrics: Arc<NodeMetrics>,
}

impl Dispatcher {
    pub fn new(metrics: Arc<NodeMetrics>) -> Self {
        Self { local: DashMap::new(), remote: DashMap::new(), metrics }
    }

    pub fn register_local(&self, svc: Arc<dyn LocalService>) {
        self.local.insert(svc.app().to_string(), svc);
    }

    pub fn register_remote(&self, svc: Arc<dyn RemoteService>) {
        self.remote.insert(svc.app().to_string(), svc);
    }

    pub fn registered_local_apps(&self) -> Vec<String> {
        self.local.iter().map(|e| e.key().clone()).collect()
    }

    pub fn registered_remote_apps(&self) -> Vec<String> {
        self.remote.iter().map(|e| e.key().clone()).collect()
    }

    /// `NotFound` when no handler is registered for the envelope's origin
    /// and application.
    pub async fn dispatch(&self, env: Envelope) -> Result<()> {
        let app = env.app.clone();
        if env.source.is_local() {
            let handler = self
                .local
                .get(&app)
                .map(|e| e.value().clone())
                .ok_or_else(|| RoomLinkError::NotFound(format!("local handler for app {app}")))?;
            handler.handle(env).await
        } else {
            let handler = self
                .remote
                .get(&app)
                .map(|e| e.value().clone())
                .ok_or_else(|| RoomLinkError::NotFound(format!("remote handler for app {app}")))?;
            handler.handle(env).await
        }
    }
}

#[async_trait]
impl InboundHandler for Dispatcher {
    async fn handle(&self, msg: &Inbound) {
        let Some(env) = msg.envelope() else {
            self.metrics.unrouted_messages.inc(&[("origin", "raw"), ("app", "")]);
            return;
        };
        let origin = if env.source.is_local() { "local" } else { "remote" };
        let app = env.app.clone();
        match self.dispatch(env.clone()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(origin, app = %app, "no handler for envelope");
                self.metrics.unrouted_messages.inc(&[("origin", origin), ("app", &app)]);
            }
            Err(e) => {
                tracing::warn!(origin, app = %app, code = e.code().as_str(), error = %e, "handler failed");
                self.metrics.handler_errors.inc(&[("app", &app)]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use roomlink_core::protocol::{MessageType, Source};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LocalService for Recorder {
        fn app(&self) -> &str {
            "JoinSplit_Panel"
        }
        async fn handle(&self, env: Envelope) -> Result<()> {
            self.seen.lock().unwrap().push(format!("local:{}", env.value));
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteService for Recorder {
        fn app(&self) -> &str {
            "JoinSplit"
        }
        async fn handle(&self, env: Envelope) -> Result<()> {
            self.seen.lock().unwrap().push(format!("remote:{}", env.value));
            Err(RoomLinkError::BadRequest("nope".into()))
        }
    }

    #[tokio::test]
    async fn routes_by_origin_then_app() {
        let metrics = Arc::new(NodeMetrics::default());
        let d = Dispatcher::new(metrics.clone());
        let rec = Arc::new(Recorder::default());
        d.register_local(rec.clone());
        d.register_remote(rec.clone());

        let local = Envelope::new("JoinSplit_Panel", Source::local("FOC1"), MessageType::Command, json!(1));
        let remote = Envelope::new("JoinSplit", Source::remote_ip("10.0.0.110"), MessageType::Command, json!(2));
        // Same app name, wrong origin: nobody handles it.
        let stray = Envelope::new("JoinSplit", Source::local("FOC1"), MessageType::Command, json!(3));

        d.handle(&Inbound::Envelope(local)).await;
        d.handle(&Inbound::Envelope(remote)).await;
        d.handle(&Inbound::Envelope(stray)).await;
        d.handle(&Inbound::Raw { raw_message: "garbage".into() }).await;

        assert_eq!(*rec.seen.lock().unwrap(), vec!["local:1".to_string(), "remote:2".to_string()]);
        assert_eq!(metrics.handler_errors.get(&[("app", "JoinSplit")]), 1);
        assert_eq!(metrics.unrouted_messages.get(&[("origin", "local"), ("app", "JoinSplit")]), 1);
        assert_eq!(metrics.unrouted_messages.get(&[("origin", "raw"), ("app", "")]), 1);
    }
}
