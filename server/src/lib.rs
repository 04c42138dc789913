//! HTTP front end for the todo service.
//!
//! # Overview
//! | method   | path         | handler       |
//! |----------|--------------|---------------|
//! | `GET`    | `/`          | static page   |
//! | `GET`    | `/todo/`     | list, newest first |
//! | `POST`   | `/todo/`     | create        |
//! | `PUT`    | `/todo/{id}` | update        |
//! | `DELETE` | `/todo/{id}` | delete        |
//!
//! `/todo` without the trailing slash is routed like `/todo/`.
//!
//! # Design
//! Handlers only extract, call `TodoService` and wrap the result; every
//! failure becomes an `ApiError` at the handler boundary. Each request runs
//! inside a `TraceLayer` span carrying a fresh request id, and a request that
//! outlives the configured timeout is answered with `408 Request Timeout`.

pub mod config;
pub mod error;
mod handlers;
pub mod telemetry;

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::routing::{get, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use todo_core::storage::Connector;
use todo_core::{StorageError, TodoService};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;
use uuid::Uuid;

/// Shared per-process state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: TodoService,
}

impl AppState {
    pub fn new(service: TodoService) -> Self {
        Self { service }
    }

    /// Build the state for todos stored in `space`. One session is opened up
    /// front so a storage problem surfaces at startup instead of on the first
    /// request.
    pub async fn connect(connector: Arc<dyn Connector>, space: &str) -> Result<Self, StorageError> {
        connector.connect().await?;
        tracing::info!(%space, "connected to storage");
        Ok(Self::new(TodoService::new(connector, space)))
    }
}

/// The router, with every request bounded by `request_timeout`.
pub fn app(state: AppState, request_timeout: Duration) -> Router {
    let trace = TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
            tracing::info_span!(
                "request",
                id = %Uuid::new_v4(),
                method = %request.method(),
                path = %request.uri().path(),
            )
        })
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    Router::new()
        .route("/", get(handlers::home))
        .route("/todo", get(handlers::fetch_todos).post(handlers::create_todo))
        .route("/todo/", get(handlers::fetch_todos).post(handlers::create_todo))
        .route(
            "/todo/{id}",
            put(handlers::update_todo).delete(handlers::delete_todo),
        )
        .layer(TimeoutLayer::new(request_timeout))
        .layer(trace)
        .with_state(state)
}

/// Serve `app` on `listener` until `shutdown` resolves, then stop accepting
/// connections and give in-flight requests up to `grace` to finish. Requests
/// still running after that are dropped.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send,
    grace: Duration,
) -> io::Result<()> {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        joined = &mut server => return flatten(joined),
        _ = shutdown => {}
    }

    tracing::info!("Shutting down server...");
    let _ = stop_tx.send(());
    match tokio::time::timeout(grace, &mut server).await {
        Ok(joined) => {
            flatten(joined)?;
            tracing::info!("Server gracefully stopped");
        }
        Err(_) => {
            tracing::warn!(
                grace_secs = grace.as_secs_f64(),
                "grace period elapsed, aborting in-flight requests"
            );
            server.abort();
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn flatten(joined: Result<io::Result<()>, JoinError>) -> io::Result<()> {
    joined.map_err(io::Error::other)?
}
