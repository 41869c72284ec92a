//! Adaptive throttler: client-side probabilistic load shedding.
//!
//! Tracks the failure rate over a sliding time window. Once the rate climbs
//! past `failure_rate_threshold`, attempts are rejected with a probability
//! that ramps linearly toward `max_rejection_rate`; the current probability
//! is published to the `throttle_probability` gauge.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;
use tripwire_core::metrics::StrategyMetrics;

use crate::config::AdaptiveThrottlerConfig;
use crate::error::PolicyError;
use crate::pipeline::{Attempt, Outcome, Policy};

pub struct AdaptiveThrottlerPolicy {
    failure_rate_threshold: f64,
    period: Duration,
    execution_threshold: u32,
    max_rejection_rate: f64,
    samples: Mutex<VecDeque<(Instant, bool)>>,
    metrics: Arc<StrategyMetrics>,
}

impl AdaptiveThrottlerPolicy {
    pub fn new(config: &AdaptiveThrottlerConfig, metrics: Arc<StrategyMetrics>) -> Self {
        metrics.throttle_probability.set(0.0);
        Self {
            failure_rate_threshold: config.failure_rate_threshold.clamp(0.0, 1.0),
            period: config.thresholding_period,
            execution_threshold: config.execution_threshold.max(1),
            max_rejection_rate: config.max_rejection_rate.clamp(0.0, 1.0),
            samples: Mutex::new(VecDeque::new()),
            metrics,
        }
    }

    /// Current rejection probability from the observed failure rate.
    fn rejection_rate(&self) -> f64 {
        let now = Instant::now();
        let mut samples = self.samples.lock();
        while samples
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > self.period)
        {
            samples.pop_front();
        }
        let executions = samples.len() as u32;
        if executions < self.execution_threshold {
            return 0.0;
        }
        let failures = samples.iter().filter(|(_, failed)| *failed).count();
        let failure_rate = failures as f64 / f64::from(executions);
        rejection_rate_for(
            failure_rate,
            self.failure_rate_threshold,
            self.max_rejection_rate,
        )
    }

    fn record(&self, failure: bool) {
        self.samples.lock().push_back((Instant::now(), failure));
    }
}

/// Linear ramp from 0 at the threshold to `max_rejection_rate` at a 100%
/// failure rate.
fn rejection_rate_for(failure_rate: f64, threshold: f64, max_rejection_rate: f64) -> f64 {
    if failure_rate <= threshold || threshold >= 1.0 {
        return 0.0;
    }
    let excess = (failure_rate - threshold) / (1.0 - threshold);
    excess.min(1.0) * max_rejection_rate
}

#[async_trait]
impl<R: Outcome> Policy<R> for AdaptiveThrottlerPolicy {
    async fn execute(&self, inner: Attempt<R>) -> Result<R, PolicyError> {
        let rate = self.rejection_rate();
        self.metrics.throttle_probability.set(rate);
        if rate > 0.0 && rand::thread_rng().gen::<f64>() < rate {
            return Err(PolicyError::AdaptiveLimitExceeded);
        }

        let result = inner().await;
        let failure = match &result {
            Ok(response) => response.is_failure(),
            Err(_) => true,
        };
        self.record(failure);
        result
    }
}
