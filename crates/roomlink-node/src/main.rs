//! roomlink node
//!
//! - HTTP ingress: POST /putxml (peer envelopes onto the local bus)
//! - Ops: /healthz, /status, /metrics
//! - Config path: first argument, default `roomlink.yaml`

use std::net::SocketAddr;
use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roomlink_core::ErrorCode;
use roomlink_node::{app_state, config, ops, router};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "roomlink.yaml".into());
    let cfg = match config::load_from_file(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(path = %path, error = %e, "config load failed");
            return ExitCode::FAILURE;
        }
    };
    let listen: SocketAddr = match cfg.node.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(listen = %cfg.node.listen, error = %e, "node.listen must be a valid SocketAddr");
            return ExitCode::FAILURE;
        }
    };

    let countdown = cfg.protocol.restart_countdown_secs;
    let devices = app_state::Devices::standalone(&cfg);
    let control = devices.control.clone();

    let (state, _tasks) = match app_state::AppState::start(cfg, devices).await {
        Ok(started) => started,
        Err(e) if e.code() == ErrorCode::Construction => {
            tracing::error!(error = %e, "credentials unusable, scheduling restart");
            ops::restart_countdown(control.as_ref(), &e.to_string(), countdown).await;
            return ExitCode::FAILURE;
        }
        Err(e) => {
            tracing::error!(code = e.code().as_str(), error = %e, "node startup failed");
            return ExitCode::FAILURE;
        }
    };

    let app = router::build_router(state);
    tracing::info!(%listen, "roomlink node starting");
    let listener = match tokio::net::TcpListener::bind(listen).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%listen, error = %e, "failed to bind");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, starting graceful shutdown");
}
