//! agentcore HTTP server binary.
//!
//! Starts the agent core's background loops (mission dispatch, cron
//! ticking, security heartbeat) plus its axum HTTP control surface.
//!
//! # Environment Variables
//!
//! - `AGENTCORE_CONFIG` — Path to the YAML config file (default: "config.yaml")
//! - `PORT`              — HTTP port override (default: value from config)
//! - `RUST_LOG`          — Tracing filter (default: "agentcore=info,warn")

use std::sync::Arc;

use agentcore::config::Config;
use agentcore::server::{app_router, AppState};
use agentcore::AgentCore;

#[tokio::main]
async fn main() {
    agentcore::telemetry::init();

    let config_path = std::env::var("AGENTCORE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let mut config = Config::load(&config_path).unwrap_or_else(|err| {
        tracing::error!(error = %err, path = %config_path, "failed to load config");
        std::process::exit(1);
    });

    if let Ok(port) = std::env::var("PORT") {
        config.bind_addr = format!("0.0.0.0:{port}");
    }
    let bind_addr = config.bind_addr.clone();

    let core = Arc::new(AgentCore::new(config).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to initialize agent core");
        std::process::exit(1);
    }));
    core.spawn_background_tasks();

    let state = AppState::new(Arc::clone(&core));
    let app = app_router(state);

    tracing::info!(addr = %bind_addr, "agentcore server starting");
    tracing::info!("  GET    /health            — liveness probe");
    tracing::info!("  POST   /chat               — chat pipeline");
    tracing::info!("  GET    /missions/:id       — mission state");
    tracing::info!("  DELETE /missions/:id       — cancel mission");
    tracing::info!("  POST   /cron/jobs          — create scheduled job");
    tracing::info!("  GET    /cron/jobs          — list scheduled jobs");
    tracing::info!("  DELETE /cron/jobs/:id      — delete scheduled job");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("server failed");
}
