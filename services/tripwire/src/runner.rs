//! Strategy orchestration.
//!
//! Strategies run sequentially when the client defines only stages, one
//! client/server pair at a time with a quiescence gap in between so
//! histograms settle. Any configured workload switches the runner to
//! parallel mode: every strategy gets its own pair, the control plane comes
//! up, and the run continues until interrupted.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tripwire_core::metrics::{self, StrategyMetrics};
use tripwire_core::{TripwireError, TripwireResult};
use tripwire_policy::Pipeline;

use crate::client::Client;
use crate::config::{Config, StrategyConfig};
use crate::control::{self, ControlState, CONTROL_PORT};
use crate::server::SimServer;

/// Port for the Prometheus scrape endpoint.
pub const METRICS_PORT: u16 = 8080;

/// Gap between sequential strategies, letting histograms settle.
const QUIESCENCE_GAP: Duration = Duration::from_secs(5);

/// Runs the whole benchmark described by `config`.
pub async fn run(config: Config) -> TripwireResult<()> {
    let shutdown = CancellationToken::new();
    serve_metrics(METRICS_PORT, shutdown.clone()).await?;

    let result = if config.client.workloads.is_empty() {
        run_sequential(&config).await
    } else {
        run_parallel(&config, shutdown.clone()).await
    };
    shutdown.cancel();
    result
}

/// One strategy's client/server pair, wired to a fresh scoped metrics view.
async fn start_pair(
    config: &Config,
    strategy: &StrategyConfig,
) -> TripwireResult<(Arc<Client>, Arc<SimServer>, Arc<StrategyMetrics>)> {
    let run_id = format!(
        "{} {}",
        chrono::Local::now().format("%H:%M:%S"),
        strategy.name
    );
    let metrics = Arc::new(StrategyMetrics::new(run_id, &strategy.name));
    metrics
        .run_duration
        .set(config.client.total_duration().as_secs_f64());
    tracing::info!(strategy = %strategy.name, run_id = metrics.run_id(), "running strategy");

    let server_pipeline = Arc::new(Pipeline::<Response>::build(
        &strategy.server_policies,
        &metrics,
    ));
    let (server, addr) = SimServer::start(&config.server, Arc::clone(&metrics), server_pipeline).await?;

    let client_pipeline = Arc::new(Pipeline::build(&strategy.client_policies, &metrics));
    metrics.min_timeout.set(
        client_pipeline
            .min_timeout()
            .map_or(0.0, |timeout| timeout.as_secs_f64()),
    );
    let client = Client::new(addr, &config.client, Arc::clone(&metrics), client_pipeline);

    Ok((client, server, metrics))
}

/// Stage mode: strategies one at a time, state never leaking between runs.
async fn run_sequential(config: &Config) -> TripwireResult<()> {
    for (index, strategy) in config.strategies.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(QUIESCENCE_GAP).await;
        }
        let (client, server, metrics) = match start_pair(config, strategy).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::error!(strategy = %strategy.name, error = %err, "skipping strategy");
                continue;
            }
        };

        // The client drives the wall clock: it returns when its stages are
        // done, then the server drains.
        client.run().await;
        server.shutdown().await;
        metrics.reset();
    }
    Ok(())
}

/// Workload mode: every strategy in parallel until interrupted.
async fn run_parallel(config: &Config, shutdown: CancellationToken) -> TripwireResult<()> {
    let mut clients = Vec::new();
    let mut servers = Vec::new();
    for strategy in &config.strategies {
        match start_pair(config, strategy).await {
            Ok((client, server, _metrics)) => {
                tokio::spawn(Arc::clone(&client).run());
                clients.push(client);
                servers.push(server);
            }
            Err(err) => {
                tracing::error!(strategy = %strategy.name, error = %err, "skipping strategy");
            }
        }
    }
    if clients.is_empty() {
        return Err(TripwireError::startup("no strategy could be started"));
    }

    let control_state = ControlState::new(clients.clone(), servers.clone());
    let control_task = control::serve(control_state, CONTROL_PORT, shutdown.clone()).await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| TripwireError::startup(format!("failed to listen for ctrl-c: {err}")))?;
    tracing::info!("shutting down");

    for client in &clients {
        client.shutdown();
    }
    for server in &servers {
        server.shutdown().await;
    }
    shutdown.cancel();
    if let Err(err) = control_task.await {
        tracing::error!(error = %err, "control plane task panicked");
    }
    Ok(())
}

/// Handler for the Prometheus scrape endpoint.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics::encode(),
    )
}

pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn serve_metrics(port: u16, shutdown: CancellationToken) -> TripwireResult<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(|err| {
        TripwireError::startup(format!("metrics endpoint failed to bind port {port}: {err}"))
    })?;
    tracing::info!(port, "metrics endpoint listening");
    let app = metrics_router();
    tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned());
        if let Err(err) = serve.await {
            tracing::error!(error = %err, "metrics endpoint terminated with error");
        }
    });
    Ok(())
}
