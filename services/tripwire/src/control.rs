//! Control plane: live mutation of workloads and server capacity.
//!
//! `POST /client/workloads` replaces every client's workload set;
//! `POST /server` resizes every server's worker pool. The matching GET
//! endpoints return the current configuration as YAML. Parse failures
//! reply 400 without mutating state; unsupported methods get axum's 405.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tripwire_core::config::validate_workloads;
use tripwire_core::{ServerConfig, TripwireError, TripwireResult, Workload};

use crate::client::Client;
use crate::server::SimServer;

/// Default control-plane port.
pub const CONTROL_PORT: u16 = 9095;

#[derive(Clone)]
pub struct ControlState {
    clients: Arc<Vec<Arc<Client>>>,
    servers: Arc<Vec<Arc<SimServer>>>,
}

impl ControlState {
    pub fn new(clients: Vec<Arc<Client>>, servers: Vec<Arc<SimServer>>) -> Self {
        Self {
            clients: Arc::new(clients),
            servers: Arc::new(servers),
        }
    }
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/client/workloads", get(get_workloads).post(update_workloads))
        .route("/server", get(get_server).post(update_server))
        .with_state(state)
}

/// Serves the control plane until the token is cancelled.
pub async fn serve(
    state: ControlState,
    port: u16,
    shutdown: CancellationToken,
) -> TripwireResult<tokio::task::JoinHandle<()>> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(|err| {
        TripwireError::startup(format!("control plane failed to bind port {port}: {err}"))
    })?;
    tracing::info!(port, "control plane listening");
    let app = router(state);
    Ok(tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned());
        if let Err(err) = serve.await {
            tracing::error!(error = %err, "control plane terminated with error");
        }
    }))
}

fn yaml_response<T: serde::Serialize>(value: &T) -> Response {
    match serde_yaml::to_string(value) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-yaml")],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode YAML");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_workloads(State(state): State<ControlState>) -> Response {
    let workloads = state
        .clients
        .first()
        .map(|client| client.workloads())
        .unwrap_or_default();
    yaml_response(&workloads)
}

async fn update_workloads(State(state): State<ControlState>, body: String) -> Response {
    let workloads: Vec<Workload> = match serde_yaml::from_str(&body) {
        Ok(workloads) => workloads,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("invalid workloads: {err}\n"))
                .into_response()
        }
    };
    if let Err(err) = validate_workloads(&workloads) {
        return (StatusCode::BAD_REQUEST, format!("{err}\n")).into_response();
    }

    tracing::info!(count = workloads.len(), "replacing client workloads");
    for client in state.clients.iter() {
        client.update_workloads(workloads.clone());
    }
    (StatusCode::OK, "client workloads updated\n").into_response()
}

async fn get_server(State(state): State<ControlState>) -> Response {
    let threads = match state.servers.first() {
        Some(server) => server.threads().await,
        None => 0,
    };
    yaml_response(&ServerConfig { threads })
}

async fn update_server(State(state): State<ControlState>, body: String) -> Response {
    let config: ServerConfig = match serde_yaml::from_str(&body) {
        Ok(config) => config,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("invalid server config: {err}\n"))
                .into_response()
        }
    };
    if let Err(err) = config.validate() {
        return (StatusCode::BAD_REQUEST, format!("{err}\n")).into_response();
    }

    tracing::info!(threads = config.threads, "resizing server worker pools");
    // The shrink path can block on in-use permits; apply asynchronously so
    // the mutation is acknowledged immediately.
    for server in state.servers.iter() {
        let server = Arc::clone(server);
        tokio::spawn(async move { server.update_threads(config.threads).await });
    }
    (StatusCode::OK, "server config updated\n").into_response()
}

/// Binds an ephemeral port for tests and returns the bound address.
pub async fn serve_ephemeral(
    state: ControlState,
    shutdown: CancellationToken,
) -> TripwireResult<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(state);
    let task = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned());
        if let Err(err) = serve.await {
            tracing::error!(error = %err, "control plane terminated with error");
        }
    });
    Ok((addr, task))
}
