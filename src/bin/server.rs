//! Pilot 命令服务器
//!
//! 启动: cargo run --bin pilot-server --features server
//! 以模拟桌面为后端，暴露 /command、/tools、/history、/sse。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pilot::agent::desktop_router;
use pilot::config::load_config;
use pilot::core::ShutdownManager;
use pilot::protocol::{EventBroadcaster, SimulatedDesktop};
use pilot::server::{serve, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pilot::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path.as_deref()).context("Failed to load config")?;

    let router = desktop_router(
        &cfg.server,
        Arc::new(SimulatedDesktop::new()),
        Arc::new(EventBroadcaster::new()),
    );
    let state = ServerState::new(
        Arc::new(router),
        Duration::from_secs(cfg.server.keepalive_secs),
    );

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    serve(state, &cfg.server.bind_addr, shutdown)
        .await
        .context("Server failed")?;
    tracing::info!("pilot-server stopped");
    Ok(())
}
