//! The simulated server: bounded-concurrency request servicing.
//!
//! Each request declares its service time in the body. The handler splits
//! that time into 100 equal slices and, for each slice, acquires one worker
//! permit, sleeps, and releases it. Every active request therefore holds at
//! most one permit at a time but relinquishes it between slices, emulating
//! time-slicing on a fixed thread count: `threads` requests progress
//! concurrently in expectation, and under overload measured latency grows
//! roughly linearly with the queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use prometheus::Gauge;
use tokio::net::TcpListener;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tripwire_core::metrics::{self, StrategyMetrics};
use tripwire_core::{ServerConfig, SimRequest, TripwireError, TripwireResult};
use tripwire_policy::{Attempt, Pipeline, PolicyError};

/// Work slices per simulated request. A trade-off between scheduler churn
/// and time-sharing fidelity, not a contract.
const WORK_SLICES: u32 = 100;

/// Limit on how long a request body read may take.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Resizable worker pool. The semaphore is the sole arbiter of worker
/// availability; capacity changes are serialized by an async mutex and the
/// shrink path blocks on in-use permits, which is acceptable because
/// capacity changes are infrequent.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: AsyncMutex<u32>,
}

impl WorkerPool {
    pub fn new(threads: u32) -> Self {
        metrics::SERVER_THREADS.set(f64::from(threads));
        Self {
            permits: Arc::new(Semaphore::new(threads as usize)),
            capacity: AsyncMutex::new(threads),
        }
    }

    pub async fn capacity(&self) -> u32 {
        *self.capacity.lock().await
    }

    /// Resizes worker capacity: new permits are released immediately when
    /// growing; excess permits are drained (awaiting in-use ones) when
    /// shrinking. The gauge reflects the new size before any drain blocks.
    pub async fn resize(&self, threads: u32) {
        let mut capacity = self.capacity.lock().await;
        metrics::SERVER_THREADS.set(f64::from(threads));
        if threads >= *capacity {
            self.permits.add_permits((threads - *capacity) as usize);
        } else {
            for _ in 0..(*capacity - threads) {
                match self.permits.acquire().await {
                    Ok(permit) => permit.forget(),
                    Err(_) => break,
                }
            }
        }
        let old = *capacity;
        *capacity = threads;
        tracing::info!(old, new = threads, "server worker pool resized");
    }

    /// Performs one work slice: hold a worker for `increment`, then yield
    /// it back.
    async fn run_slice(&self, increment: Duration) {
        let Ok(_permit) = self.permits.acquire().await else {
            return;
        };
        tokio::time::sleep(increment).await;
    }
}

/// Decrements the inflight gauge even when the connection drops and the
/// handler future is cancelled mid-service.
struct InflightGuard {
    gauge: Gauge,
}

impl InflightGuard {
    fn new(gauge: Gauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[derive(Clone)]
struct ServerState {
    metrics: Arc<StrategyMetrics>,
    pool: Arc<WorkerPool>,
}

/// One strategy's simulated server.
pub struct SimServer {
    pool: Arc<WorkerPool>,
    metrics: Arc<StrategyMetrics>,
    shutdown: CancellationToken,
    serve_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SimServer {
    /// Binds an ephemeral loopback port and starts serving; returns the
    /// bound address.
    pub async fn start(
        config: &ServerConfig,
        metrics: Arc<StrategyMetrics>,
        pipeline: Arc<Pipeline<Response>>,
    ) -> TripwireResult<(Arc<Self>, SocketAddr)> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|err| {
            TripwireError::startup(format!("server failed to bind: {err}"))
        })?;
        let addr = listener.local_addr()?;

        let pool = Arc::new(WorkerPool::new(config.threads));
        let state = ServerState {
            metrics: Arc::clone(&metrics),
            pool: Arc::clone(&pool),
        };

        let mut app = Router::new().route("/", post(handle_request)).with_state(state);
        if !pipeline.is_empty() {
            app = app.layer(middleware::from_fn_with_state(pipeline, policy_middleware));
        }

        let shutdown = CancellationToken::new();
        let serve_shutdown = shutdown.clone();
        let serve_task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(serve_shutdown.cancelled_owned());
            if let Err(err) = serve.await {
                tracing::error!(error = %err, "server terminated with error");
            }
        });

        tracing::info!(%addr, threads = config.threads, "server listening");
        let server = Arc::new(Self {
            pool,
            metrics,
            shutdown,
            serve_task: parking_lot::Mutex::new(Some(serve_task)),
        });
        Ok((server, addr))
    }

    /// Atomically resizes worker capacity.
    pub async fn update_threads(&self, threads: u32) {
        self.pool.resize(threads).await;
    }

    pub async fn threads(&self) -> u32 {
        self.pool.capacity().await
    }

    /// Stops accepting and waits for in-flight requests to complete or
    /// cancel.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.serve_task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "server task panicked");
            }
        }
        self.metrics.server_service_time.set(0.0);
    }
}

/// Runs the server-side policy pipeline around request handling,
/// translating rejection sentinels into the statuses the client classifies
/// on.
async fn policy_middleware(
    State(pipeline): State<Arc<Pipeline<Response>>>,
    request: Request,
    next: Next,
) -> Response {
    let attempt: Attempt<Response> =
        Box::new(move || Box::pin(async move { Ok(next.run(request).await) }));
    match pipeline.execute(attempt).await {
        Ok(response) => response,
        Err(err) => rejection_status(&err).into_response(),
    }
}

fn rejection_status(err: &PolicyError) -> StatusCode {
    match err {
        PolicyError::TimeoutExceeded => StatusCode::SERVICE_UNAVAILABLE,
        PolicyError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::TOO_MANY_REQUESTS,
    }
}

/// Simulates servicing one request, performing the work in increments to
/// emulate context switching between workers.
async fn handle_request(State(state): State<ServerState>, request: Request) -> Response {
    let body = match tokio::time::timeout(READ_TIMEOUT, to_bytes(request.into_body(), MAX_BODY_BYTES))
        .await
    {
        Ok(Ok(body)) => body,
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };
    let request: SimRequest = match serde_yaml::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(error = %err, "unparseable request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    state
        .metrics
        .server_service_time
        .set(request.service_time.as_secs_f64());
    let _inflight = InflightGuard::new(state.metrics.server_inflight_requests.clone());

    let increment = request.service_time / WORK_SLICES;
    if !increment.is_zero() {
        for _ in 0..WORK_SLICES {
            state.pool.run_slice(increment).await;
        }
    }

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_metrics(name: &str) -> Arc<StrategyMetrics> {
        Arc::new(StrategyMetrics::new(format!("00:00:00 {name}"), name))
    }

    async fn post_sim_request(addr: SocketAddr, body: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .body(body.to_string())
            .send()
            .await
            .expect("request")
    }

    #[tokio::test]
    async fn services_a_declared_service_time() {
        let metrics = test_metrics("server-basic");
        let (server, addr) = SimServer::start(
            &ServerConfig { threads: 4 },
            Arc::clone(&metrics),
            Arc::new(Pipeline::from_policies(Vec::new())),
        )
        .await
        .expect("start server");

        let started = std::time::Instant::now();
        let response = post_sim_request(addr, "service_time: 50ms\n").await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(metrics.server_service_time.get(), 0.05);
        assert_eq!(metrics.server_inflight_requests.get(), 0.0);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_bodies_get_a_400() {
        let metrics = test_metrics("server-badreq");
        let (server, addr) = SimServer::start(
            &ServerConfig { threads: 2 },
            metrics,
            Arc::new(Pipeline::from_policies(Vec::new())),
        )
        .await
        .expect("start server");

        let response = post_sim_request(addr, "not a sim request").await;
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn worker_pool_resize_updates_capacity() {
        let pool = WorkerPool::new(4);
        assert_eq!(pool.capacity().await, 4);

        pool.resize(8).await;
        assert_eq!(pool.capacity().await, 8);

        pool.resize(2).await;
        assert_eq!(pool.capacity().await, 2);
        // Only two permits remain available after the drain.
        assert_eq!(pool.permits.available_permits(), 2);
    }

    #[tokio::test]
    async fn zero_service_time_completes_immediately() {
        let metrics = test_metrics("server-zero");
        let (server, addr) = SimServer::start(
            &ServerConfig { threads: 1 },
            metrics,
            Arc::new(Pipeline::from_policies(Vec::new())),
        )
        .await
        .expect("start server");

        let response = post_sim_request(addr, "service_time: 0s\n").await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        server.shutdown().await;
    }
}
