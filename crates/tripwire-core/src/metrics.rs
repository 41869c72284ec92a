//! Central metrics registry and label-scoped views.
//!
//! All series live in the default Prometheus registry and are registered
//! lazily on first access. Counters and the response-time histogram carry
//! `run_id` so distinct runs stay separable in post-analysis; gauges that
//! describe an instantaneous strategy property omit `run_id` so dashboards
//! do not multiply time series per run.

use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_counter_vec, Encoder, Gauge, GaugeVec, Histogram, HistogramVec, IntCounter,
    IntCounterVec, TextEncoder,
};

const RUN_LABELS: &[&str] = &["run_id", "workload", "strategy"];

/// Request attempts, incremented once per attempt before the policy
/// pipeline runs.
pub static CLIENT_REQ_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("client_req_total", "Total client request attempts", RUN_LABELS)
        .expect("register client_req_total")
});

/// Requests that completed with HTTP 200.
pub static CLIENT_REQ_SUCCESSES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "client_req_successes",
        "Client requests that completed successfully",
        RUN_LABELS
    )
    .expect("register client_req_successes")
});

/// Requests shed by a policy or the server (rate limit, bulkhead, circuit,
/// adaptive limit).
pub static CLIENT_REQ_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "client_req_rejected",
        "Client requests rejected by a resilience policy",
        RUN_LABELS
    )
    .expect("register client_req_rejected")
});

/// Requests that hit a policy timeout or a server-side timeout status.
pub static CLIENT_REQ_TIMEOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "client_req_timeouts",
        "Client requests that timed out",
        RUN_LABELS
    )
    .expect("register client_req_timeouts")
});

/// All failed requests, rejections and timeouts included.
pub static CLIENT_REQ_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "client_req_failures",
        "Client requests that did not succeed",
        &["workload", "strategy"]
    )
    .expect("register client_req_failures")
});

/// Response-time distribution for success and timeout paths, measured from
/// immediately before policy entry. Exponential buckets (base 1.1) keep
/// percentile rendering meaningful from sub-millisecond to multi-second.
pub static CLIENT_REQ_RESPONSE_TIMES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "client_req_response_times",
        "Client-observed response times in seconds",
        RUN_LABELS,
        exponential_buckets(0.001, 1.1, 100).expect("response-time buckets")
    )
    .expect("register client_req_response_times")
});

/// Target request rate currently driven for a workload.
pub static CLIENT_EXPECTED_RPS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "client_expected_rps",
        "Configured request rate per workload",
        &["workload", "strategy"]
    )
    .expect("register client_expected_rps")
});

/// Planned run duration in seconds (zero in workload mode).
pub static RUN_DURATION: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "run_duration",
        "Planned run duration in seconds",
        &["run_id", "strategy"]
    )
    .expect("register run_duration")
});

/// Size of the server worker pool; process-wide because every server shares
/// the configured capacity.
pub static SERVER_THREADS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("server_threads", "Server worker pool size").expect("register server_threads")
});

/// Most recently declared service time, a coarse last-write-wins indicator.
pub static SERVER_SERVICE_TIME: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "server_service_time",
        "Most recent declared service time in seconds",
        &["strategy"]
    )
    .expect("register server_service_time")
});

/// Requests currently being serviced.
pub static SERVER_INFLIGHT_REQUESTS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "server_inflight_requests",
        "Requests currently in service",
        &["strategy"]
    )
    .expect("register server_inflight_requests")
});

/// Smallest timeout in the client policy pipeline, for dashboard thresholds.
pub static MIN_TIMEOUT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "min_timeout",
        "Smallest client policy timeout in seconds",
        &["strategy"]
    )
    .expect("register min_timeout")
});

/// Configured RPS of the strategy's rate limiter.
pub static RATE_LIMIT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("rate_limit", "Configured rate limit in RPS", &["strategy"])
        .expect("register rate_limit")
});

/// Current concurrency limit of a bulkhead or adaptive limiter.
pub static CONCURRENCY_LIMIT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "concurrency_limit",
        "Current concurrency limit",
        &["strategy"]
    )
    .expect("register concurrency_limit")
});

/// Rejection probability: 1 while a circuit is open, the current shed rate
/// for the adaptive throttler.
pub static THROTTLE_PROBABILITY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "throttle_probability",
        "Current probabilistic rejection rate",
        &["strategy"]
    )
    .expect("register throttle_probability")
});

/// Requests queued behind an adaptive limiter.
pub static QUEUED_REQUESTS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "queued_requests",
        "Requests waiting on an adaptive limiter",
        &["strategy"]
    )
    .expect("register queued_requests")
});

/// Per-strategy view over the registry: gauge children resolved once, label
/// context for the per-workload counters.
#[derive(Clone)]
pub struct StrategyMetrics {
    run_id: String,
    strategy: String,

    pub run_duration: Gauge,
    pub server_service_time: Gauge,
    pub server_inflight_requests: Gauge,
    pub min_timeout: Gauge,
    pub rate_limit: Gauge,
    pub concurrency_limit: Gauge,
    pub throttle_probability: Gauge,
    pub queued_requests: Gauge,
}

impl StrategyMetrics {
    pub fn new(run_id: impl Into<String>, strategy: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let strategy = strategy.into();
        let labels = &[strategy.as_str()];
        Self {
            run_duration: RUN_DURATION.with_label_values(&[run_id.as_str(), strategy.as_str()]),
            server_service_time: SERVER_SERVICE_TIME.with_label_values(labels),
            server_inflight_requests: SERVER_INFLIGHT_REQUESTS.with_label_values(labels),
            min_timeout: MIN_TIMEOUT.with_label_values(labels),
            rate_limit: RATE_LIMIT.with_label_values(labels),
            concurrency_limit: CONCURRENCY_LIMIT.with_label_values(labels),
            throttle_probability: THROTTLE_PROBABILITY.with_label_values(labels),
            queued_requests: QUEUED_REQUESTS.with_label_values(labels),
            run_id,
            strategy,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// Resolves the per-workload counter and histogram children.
    pub fn workload(&self, workload: &str) -> WorkloadMetrics {
        WorkloadMetrics::new(&self.run_id, workload, &self.strategy)
    }

    /// Marks policy gauges stale between runs so dashboards drop the series
    /// instead of rendering the previous strategy's last value.
    pub fn reset(&self) {
        self.rate_limit.set(f64::NAN);
        self.concurrency_limit.set(f64::NAN);
        self.throttle_probability.set(f64::NAN);
    }
}

/// Per-workload counter and histogram children for one run.
#[derive(Clone)]
pub struct WorkloadMetrics {
    pub total: IntCounter,
    pub successes: IntCounter,
    pub rejected: IntCounter,
    pub timeouts: IntCounter,
    pub failures: IntCounter,
    pub response_times: Histogram,
    pub expected_rps: Gauge,
}

impl WorkloadMetrics {
    fn new(run_id: &str, workload: &str, strategy: &str) -> Self {
        let run_labels = &[run_id, workload, strategy];
        let metrics = Self {
            total: CLIENT_REQ_TOTAL.with_label_values(run_labels),
            successes: CLIENT_REQ_SUCCESSES.with_label_values(run_labels),
            rejected: CLIENT_REQ_REJECTED.with_label_values(run_labels),
            timeouts: CLIENT_REQ_TIMEOUTS.with_label_values(run_labels),
            failures: CLIENT_REQ_FAILURES.with_label_values(&[workload, strategy]),
            response_times: CLIENT_REQ_RESPONSE_TIMES.with_label_values(run_labels),
            expected_rps: CLIENT_EXPECTED_RPS.with_label_values(&[workload, strategy]),
        };
        // Touch the timeout series so rate queries see it from the first
        // scrape, not from the first timeout.
        metrics.timeouts.inc_by(0);
        metrics
    }
}

/// Renders every registered series in the Prometheus text exposition format.
pub fn encode() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return String::from("# encoding error\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|err| {
        tracing::error!(error = %err, "metrics are not valid UTF-8");
        String::from("# encoding error\n")
    })
}
