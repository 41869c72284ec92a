//! End-to-end scenarios: a real client/server pair over loopback HTTP.

use std::sync::Arc;
use std::time::Duration;

use tripwire::client::Client;
use tripwire::server::SimServer;
use tripwire_core::metrics::{StrategyMetrics, WorkloadMetrics};
use tripwire_core::{ClientConfig, ServerConfig};
use tripwire_policy::config::{RateLimiterConfig, RateLimiterKind};
use tripwire_policy::{Pipeline, PolicyConfig};

/// Runs a staged client against a fresh server and returns the strategy
/// metrics after both sides are done.
async fn run_staged(
    strategy: &str,
    client_yaml: &str,
    threads: u32,
    client_policies: Vec<PolicyConfig>,
    drain: Duration,
) -> (Arc<StrategyMetrics>, WorkloadMetrics) {
    let metrics = Arc::new(StrategyMetrics::new(format!("00:00:00 {strategy}"), strategy));

    let server_pipeline = Arc::new(Pipeline::from_policies(Vec::new()));
    let (server, addr) = SimServer::start(
        &ServerConfig { threads },
        Arc::clone(&metrics),
        server_pipeline,
    )
    .await
    .expect("start server");

    let mut client_config: ClientConfig = serde_yaml::from_str(client_yaml).expect("client config");
    client_config.normalize().expect("normalize");

    let client_pipeline = Arc::new(Pipeline::build(&client_policies, &metrics));
    let client = Client::new(addr, &client_config, Arc::clone(&metrics), client_pipeline);
    client.run().await;

    // Outstanding requests resolve under their own timeouts.
    tokio::time::sleep(drain).await;
    server.shutdown().await;

    let workload = metrics.workload("staged");
    (metrics, workload)
}

#[tokio::test]
async fn uniform_stage_without_policies_succeeds_fully() {
    let (metrics, workload) = run_staged(
        "e2e baseline",
        r"
stages:
  - rps: 100
    duration: 1s
    service_times:
      - service_time: 20ms
",
        16,
        Vec::new(),
        Duration::from_millis(500),
    )
    .await;

    let total = workload.total.get();
    assert!((50..=110).contains(&total), "total attempts: {total}");
    assert_eq!(workload.successes.get(), total);
    assert_eq!(workload.rejected.get(), 0);
    assert_eq!(workload.timeouts.get(), 0);
    assert_eq!(workload.failures.get(), 0);

    // Histogram observations cover exactly the success and timeout paths.
    assert_eq!(workload.response_times.get_sample_count(), total);

    // The server drained: no request is still holding the inflight gauge.
    assert_eq!(metrics.server_inflight_requests.get(), 0.0);
}

#[tokio::test]
async fn overload_with_timeout_policy_times_out_without_rejections() {
    let (_metrics, workload) = run_staged(
        "e2e timeout",
        r"
stages:
  - rps: 100
    duration: 1s
    service_times:
      - service_time: 100ms
",
        2,
        vec![PolicyConfig::Timeout(Duration::from_millis(150))],
        Duration::from_millis(700),
    )
    .await;

    let total = workload.total.get();
    assert!(total > 0);
    assert!(workload.timeouts.get() > 0, "expected timeouts under overload");
    assert_eq!(workload.rejected.get(), 0);
    assert_eq!(workload.successes.get() + workload.timeouts.get(), total);
    assert_eq!(
        workload.response_times.get_sample_count(),
        workload.successes.get() + workload.timeouts.get()
    );
}

#[tokio::test]
async fn rate_limiter_caps_throughput() {
    let (_metrics, workload) = run_staged(
        "e2e ratelimiter",
        r"
stages:
  - rps: 200
    duration: 1s
    service_times:
      - service_time: 1ms
",
        32,
        vec![PolicyConfig::RateLimiter(RateLimiterConfig {
            kind: RateLimiterKind::Smooth,
            rps: 50,
            max_wait_time: Duration::ZERO,
        })],
        Duration::from_millis(300),
    )
    .await;

    let total = workload.total.get();
    let successes = workload.successes.get();
    let rejected = workload.rejected.get();
    assert!(total > 100, "total attempts: {total}");
    assert!(successes <= 80, "rate limit leaked: {successes}");
    assert!(rejected > successes, "rejections should dominate: {rejected}");
    assert_eq!(total, successes + workload.failures.get());
    // Rejections never record a response time.
    assert_eq!(workload.response_times.get_sample_count(), successes);
}

#[tokio::test]
async fn staged_run_sets_strategy_gauges() {
    let (metrics, _workload) = run_staged(
        "e2e gauges",
        r"
stages:
  - rps: 20
    duration: 500ms
    service_times:
      - service_time: 5ms
",
        4,
        vec![PolicyConfig::RateLimiter(RateLimiterConfig {
            kind: RateLimiterKind::Smooth,
            rps: 1000,
            max_wait_time: Duration::from_millis(100),
        })],
        Duration::from_millis(200),
    )
    .await;

    assert_eq!(metrics.rate_limit.get(), 1000.0);
    // Last declared service time sticks until the server shuts down, which
    // zeroes it.
    assert_eq!(metrics.server_service_time.get(), 0.0);

    metrics.reset();
    assert!(metrics.rate_limit.get().is_nan());
}
