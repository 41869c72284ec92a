//! The load-generating client.
//!
//! In workload mode every workload runs its own ticker at `1s / rps`, each
//! tick spawning an independent request attempt; replacing the workload set
//! cancels the current epoch and restarts the tickers. In stage mode the
//! configured stages run in declared order, each for exactly its duration,
//! and the client stops after the last one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use parking_lot::{Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tripwire_core::metrics::{StrategyMetrics, WorkloadMetrics};
use tripwire_core::{ClientConfig, SimRequest, Stage, Workload};
use tripwire_policy::{Attempt, Pipeline, PolicyError};

/// Label under which stage-mode traffic is recorded.
const STAGED_WORKLOAD: &str = "staged";

pub struct Client {
    server_url: String,
    http: reqwest::Client,
    metrics: Arc<StrategyMetrics>,
    pipeline: Arc<Pipeline<StatusCode>>,
    stages: Vec<Stage>,
    workloads: RwLock<Vec<Workload>>,
    epoch: Mutex<CancellationToken>,
    shutdown: CancellationToken,
}

impl Client {
    pub fn new(
        server_addr: SocketAddr,
        config: &ClientConfig,
        metrics: Arc<StrategyMetrics>,
        pipeline: Arc<Pipeline<StatusCode>>,
    ) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        Arc::new(Self {
            server_url: format!("http://{server_addr}/"),
            http: reqwest::Client::new(),
            metrics,
            pipeline,
            stages: config.stages.clone(),
            workloads: RwLock::new(config.workloads.clone()),
            epoch: Mutex::new(shutdown.child_token()),
            shutdown,
        })
    }

    /// Drives the configured load until stage completion (stage mode) or
    /// shutdown (workload mode).
    pub async fn run(self: Arc<Self>) {
        if !self.workloads.read().is_empty() {
            self.run_workloads().await;
        } else {
            self.run_stages().await;
        }
    }

    /// Replaces the workload set; running tickers observe the epoch
    /// cancellation and restart with the new set. In-flight requests are
    /// left to resolve on their own.
    pub fn update_workloads(&self, workloads: Vec<Workload>) {
        *self.workloads.write() = workloads;
        self.epoch.lock().cancel();
    }

    /// The current workload set, for control-plane read-back.
    pub fn workloads(&self) -> Vec<Workload> {
        self.workloads.read().clone()
    }

    /// Stops emitting requests. In-flight requests resolve under their own
    /// timeouts.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn run_workloads(self: &Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            let epoch = self.shutdown.child_token();
            *self.epoch.lock() = epoch.clone();

            let current = self.workloads.read().clone();
            for workload in current {
                let client = Arc::clone(self);
                let epoch = epoch.clone();
                tokio::spawn(async move { client.drive_workload(epoch, workload).await });
            }

            // A workload replacement (or shutdown) cancels the epoch; the
            // next iteration starts the replacement set.
            epoch.cancelled().await;
        }
    }

    async fn run_stages(self: &Arc<Self>) {
        for stage in &self.stages {
            if self.shutdown.is_cancelled() {
                return;
            }
            self.perform_stage(stage).await;
        }
        tracing::info!("client stages finished");
    }

    async fn perform_stage(self: &Arc<Self>, stage: &Stage) {
        let rps = stage.rps();
        let service_times = stage.service_times();
        let workload_metrics = self.metrics.workload(STAGED_WORKLOAD);
        tracing::info!(rps, duration = ?stage.duration, "starting client stage");

        let stage_done = tokio::time::sleep(stage.duration);
        tokio::pin!(stage_done);

        if rps == 0 || service_times.is_empty() {
            tokio::select! {
                () = &mut stage_done => {}
                () = self.shutdown.cancelled() => {}
            }
            return;
        }

        let period = Duration::from_secs(1) / rps;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = &mut stage_done => return,
                () = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    workload_metrics.expected_rps.set(f64::from(rps));
                    let service_time = service_times.sample(&mut rand::thread_rng());
                    self.spawn_request(workload_metrics.clone(), service_time);
                }
            }
        }
    }

    async fn drive_workload(self: Arc<Self>, epoch: CancellationToken, workload: Workload) {
        let workload_metrics = self.metrics.workload(&workload.name);
        tracing::info!(
            workload = %workload.name,
            rps = workload.rps,
            priority = ?workload.priority,
            "starting client workload"
        );
        if workload.rps == 0 {
            return;
        }

        let period = Duration::from_secs(1) / workload.rps;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = epoch.cancelled() => return,
                _ = ticker.tick() => {
                    workload_metrics.expected_rps.set(f64::from(workload.rps));
                    let service_time = workload.service_times.sample(&mut rand::thread_rng());
                    self.spawn_request(workload_metrics.clone(), service_time);
                }
            }
        }
    }

    fn spawn_request(self: &Arc<Self>, workload_metrics: WorkloadMetrics, service_time: Duration) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.send_request(&workload_metrics, service_time).await;
        });
    }

    /// One request attempt: counted in `total` before the pipeline runs,
    /// classified into exactly one outcome afterwards. The response-time
    /// observation encloses the entire pipeline call.
    async fn send_request(&self, workload_metrics: &WorkloadMetrics, service_time: Duration) {
        let body = match serde_yaml::to_string(&SimRequest { service_time }) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode request body");
                return;
            }
        };

        let start = Instant::now();
        workload_metrics.total.inc();

        let http = self.http.clone();
        let url = self.server_url.clone();
        let attempt: Attempt<StatusCode> = Box::new(move || {
            Box::pin(async move {
                let response = http
                    .post(url)
                    .body(body)
                    .send()
                    .await
                    .map_err(transport_error)?;
                Ok(response.status())
            })
        });

        let result = self.pipeline.execute(attempt).await;
        classify(workload_metrics, start, &result);
    }
}

fn transport_error(err: reqwest::Error) -> PolicyError {
    if err.is_timeout() {
        PolicyError::TimeoutExceeded
    } else {
        PolicyError::Transport(Box::new(err))
    }
}

/// Maps one attempt outcome onto the metric families. Rejections and
/// timeouts also count as failures; response times are recorded for the
/// success and timeout paths only.
fn classify(
    workload_metrics: &WorkloadMetrics,
    start: Instant,
    result: &Result<StatusCode, PolicyError>,
) {
    match result {
        Ok(status) => match *status {
            StatusCode::OK => {
                workload_metrics
                    .response_times
                    .observe(start.elapsed().as_secs_f64());
                workload_metrics.successes.inc();
            }
            StatusCode::TOO_MANY_REQUESTS => {
                // No response time for rejected requests.
                workload_metrics.rejected.inc();
                workload_metrics.failures.inc();
            }
            StatusCode::REQUEST_TIMEOUT
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => {
                workload_metrics
                    .response_times
                    .observe(start.elapsed().as_secs_f64());
                workload_metrics.timeouts.inc();
                workload_metrics.failures.inc();
            }
            StatusCode::INTERNAL_SERVER_ERROR => {
                workload_metrics.failures.inc();
            }
            status => {
                tracing::error!(%status, "unknown response code");
                workload_metrics.failures.inc();
            }
        },
        Err(err) if err.is_rejection() => {
            workload_metrics.rejected.inc();
            workload_metrics.failures.inc();
        }
        Err(err) if err.is_timeout() => {
            workload_metrics
                .response_times
                .observe(start.elapsed().as_secs_f64());
            workload_metrics.timeouts.inc();
            workload_metrics.failures.inc();
        }
        Err(err) => {
            tracing::debug!(error = %err, "request failed");
            workload_metrics.failures.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload_metrics(name: &str) -> WorkloadMetrics {
        StrategyMetrics::new(format!("00:00:00 {name}"), name).workload(STAGED_WORKLOAD)
    }

    #[test]
    fn success_records_response_time() {
        let metrics = workload_metrics("classify-ok");
        classify(&metrics, Instant::now(), &Ok(StatusCode::OK));

        assert_eq!(metrics.successes.get(), 1);
        assert_eq!(metrics.failures.get(), 0);
        assert_eq!(metrics.response_times.get_sample_count(), 1);
    }

    #[test]
    fn http_429_counts_as_rejection_without_response_time() {
        let metrics = workload_metrics("classify-429");
        classify(&metrics, Instant::now(), &Ok(StatusCode::TOO_MANY_REQUESTS));

        assert_eq!(metrics.rejected.get(), 1);
        assert_eq!(metrics.failures.get(), 1);
        assert_eq!(metrics.response_times.get_sample_count(), 0);
    }

    #[test]
    fn timeout_statuses_count_as_timeouts_with_response_time() {
        let metrics = workload_metrics("classify-503");
        classify(&metrics, Instant::now(), &Ok(StatusCode::SERVICE_UNAVAILABLE));
        classify(&metrics, Instant::now(), &Ok(StatusCode::GATEWAY_TIMEOUT));
        classify(&metrics, Instant::now(), &Ok(StatusCode::REQUEST_TIMEOUT));

        assert_eq!(metrics.timeouts.get(), 3);
        assert_eq!(metrics.failures.get(), 3);
        assert_eq!(metrics.response_times.get_sample_count(), 3);
    }

    #[test]
    fn http_500_is_a_plain_failure() {
        let metrics = workload_metrics("classify-500");
        classify(
            &metrics,
            Instant::now(),
            &Ok(StatusCode::INTERNAL_SERVER_ERROR),
        );

        assert_eq!(metrics.failures.get(), 1);
        assert_eq!(metrics.rejected.get(), 0);
        assert_eq!(metrics.timeouts.get(), 0);
        assert_eq!(metrics.response_times.get_sample_count(), 0);
    }

    #[test]
    fn rejection_sentinels_count_as_rejections() {
        let metrics = workload_metrics("classify-rejected");
        for err in [
            PolicyError::RateLimitExceeded,
            PolicyError::AdaptiveLimitExceeded,
            PolicyError::BulkheadFull,
            PolicyError::CircuitOpen,
        ] {
            classify(&metrics, Instant::now(), &Err(err));
        }

        assert_eq!(metrics.rejected.get(), 4);
        assert_eq!(metrics.failures.get(), 4);
        assert_eq!(metrics.response_times.get_sample_count(), 0);
    }

    #[test]
    fn timeout_sentinel_records_response_time() {
        let metrics = workload_metrics("classify-timeout");
        classify(&metrics, Instant::now(), &Err(PolicyError::TimeoutExceeded));

        assert_eq!(metrics.timeouts.get(), 1);
        assert_eq!(metrics.failures.get(), 1);
        assert_eq!(metrics.response_times.get_sample_count(), 1);
    }

    #[test]
    fn transport_errors_are_plain_failures() {
        let metrics = workload_metrics("classify-transport");
        classify(
            &metrics,
            Instant::now(),
            &Err(PolicyError::Transport("connection reset".into())),
        );

        assert_eq!(metrics.failures.get(), 1);
        assert_eq!(metrics.rejected.get(), 0);
        assert_eq!(metrics.timeouts.get(), 0);
    }

    #[test]
    fn every_outcome_is_counted_exactly_once() {
        let metrics = workload_metrics("classify-identity");
        let outcomes: Vec<Result<StatusCode, PolicyError>> = vec![
            Ok(StatusCode::OK),
            Ok(StatusCode::TOO_MANY_REQUESTS),
            Ok(StatusCode::SERVICE_UNAVAILABLE),
            Ok(StatusCode::INTERNAL_SERVER_ERROR),
            Err(PolicyError::CircuitOpen),
            Err(PolicyError::TimeoutExceeded),
        ];
        for outcome in &outcomes {
            metrics.total.inc();
            classify(&metrics, Instant::now(), outcome);
        }

        // total = successes + failures, with rejections and timeouts
        // sub-classified inside failures.
        assert_eq!(metrics.total.get(), 6);
        assert_eq!(
            metrics.total.get(),
            metrics.successes.get() + metrics.failures.get()
        );
        assert_eq!(metrics.rejected.get(), 2);
        assert_eq!(metrics.timeouts.get(), 2);
        assert_eq!(
            metrics.response_times.get_sample_count(),
            metrics.successes.get() + metrics.timeouts.get()
        );
    }
}
