use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use todo_core::storage::{Credentials, RemoteConnector};
use todo_server::config::ServerConfig;
use todo_server::{app, serve, shutdown_signal, telemetry, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;
    telemetry::init(config.log_format);

    let db = &config.database;
    let connector = RemoteConnector::new(
        db.host.clone(),
        Credentials::new(db.user.clone(), db.password.clone()),
    );
    tracing::info!(db = %connector.addr(), user = %db.user, "connecting to storage");
    let state = AppState::connect(Arc::new(connector), &db.space)
        .await
        .with_context(|| format!("failed to connect to storage at {}", db.host))?;

    let addr = config.socket_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    let router = app(state, config.request_timeout());
    serve(listener, router, shutdown_signal(), config.shutdown_grace()).await?;
    Ok(())
}
