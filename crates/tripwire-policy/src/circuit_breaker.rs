//! Circuit breaker policy.
//!
//! Closed → Open when the configured failure thresholding trips; Open →
//! HalfOpen after `delay`; HalfOpen closes once `success_threshold` of
//! `success_thresholding_capacity` probes succeed and reopens as soon as
//! that ratio is out of reach.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tripwire_core::metrics::StrategyMetrics;

use crate::config::CircuitBreakerConfig;
use crate::error::PolicyError;
use crate::pipeline::{Attempt, Outcome, Policy};

/// Failure accounting while the circuit is closed. The mode is selected
/// from the config fields (see [`CircuitBreakerConfig`]).
enum Thresholder {
    /// Trip on `threshold` consecutive failures.
    Consecutive { threshold: u32, failures: u32 },
    /// Trip when the last `capacity` executions contain `threshold`
    /// failures.
    Ratio {
        threshold: u32,
        capacity: usize,
        window: VecDeque<bool>,
    },
    /// Trip when the failure rate over `period` reaches `rate_threshold`
    /// percent, given at least `min_executions` samples.
    Rate {
        rate_threshold: f64,
        min_executions: u32,
        period: Duration,
        samples: VecDeque<(Instant, bool)>,
    },
}

impl Thresholder {
    fn from_config(config: &CircuitBreakerConfig) -> Self {
        if config.failure_thresholding_capacity == 0
            && config.failure_thresholding_period.is_zero()
        {
            Self::Consecutive {
                threshold: config.failure_threshold.max(1),
                failures: 0,
            }
        } else if config.failure_thresholding_period.is_zero() {
            Self::Ratio {
                threshold: config.failure_threshold.max(1),
                capacity: config.failure_thresholding_capacity as usize,
                window: VecDeque::with_capacity(config.failure_thresholding_capacity as usize),
            }
        } else {
            Self::Rate {
                rate_threshold: config.failure_rate_threshold,
                min_executions: config.failure_execution_threshold.max(1),
                period: config.failure_thresholding_period,
                samples: VecDeque::new(),
            }
        }
    }

    /// Records one execution result; returns whether the circuit should
    /// open.
    fn record(&mut self, failure: bool) -> bool {
        match self {
            Self::Consecutive {
                threshold,
                failures,
            } => {
                if failure {
                    *failures += 1;
                } else {
                    *failures = 0;
                }
                *failures >= *threshold
            }
            Self::Ratio {
                threshold,
                capacity,
                window,
            } => {
                if window.len() == *capacity {
                    window.pop_front();
                }
                window.push_back(failure);
                window.iter().filter(|f| **f).count() >= *threshold as usize
            }
            Self::Rate {
                rate_threshold,
                min_executions,
                period,
                samples,
            } => {
                let now = Instant::now();
                while samples
                    .front()
                    .is_some_and(|(at, _)| now.duration_since(*at) > *period)
                {
                    samples.pop_front();
                }
                samples.push_back((now, failure));
                let executions = samples.len() as u32;
                if executions < *min_executions {
                    return false;
                }
                let failures = samples.iter().filter(|(_, f)| *f).count();
                failures as f64 / executions as f64 * 100.0 >= *rate_threshold
            }
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Consecutive { failures, .. } => *failures = 0,
            Self::Ratio { window, .. } => window.clear(),
            Self::Rate { samples, .. } => samples.clear(),
        }
    }
}

enum State {
    Closed,
    Open { until: Instant },
    HalfOpen {
        admitted: u32,
        successes: u32,
        failures: u32,
    },
}

struct Inner {
    state: State,
    thresholder: Thresholder,
}

pub struct CircuitBreakerPolicy {
    delay: Duration,
    success_threshold: u32,
    success_capacity: u32,
    inner: Mutex<Inner>,
    metrics: Arc<StrategyMetrics>,
}

impl CircuitBreakerPolicy {
    pub fn new(config: &CircuitBreakerConfig, metrics: Arc<StrategyMetrics>) -> Self {
        metrics.throttle_probability.set(0.0);
        let success_threshold = config.success_threshold.max(1);
        Self {
            delay: config.delay,
            success_threshold,
            success_capacity: config.success_thresholding_capacity.max(success_threshold),
            inner: Mutex::new(Inner {
                state: State::Closed,
                thresholder: Thresholder::from_config(config),
            }),
            metrics,
        }
    }

    fn try_admit(&self) -> Result<(), PolicyError> {
        let inner = &mut *self.inner.lock();
        match &mut inner.state {
            State::Closed => Ok(()),
            State::Open { until } => {
                if Instant::now() >= *until {
                    tracing::info!("circuit breaker half-open, probing");
                    inner.state = State::HalfOpen {
                        admitted: 1,
                        successes: 0,
                        failures: 0,
                    };
                    Ok(())
                } else {
                    Err(PolicyError::CircuitOpen)
                }
            }
            State::HalfOpen { admitted, .. } => {
                if *admitted >= self.success_capacity {
                    Err(PolicyError::CircuitOpen)
                } else {
                    *admitted += 1;
                    Ok(())
                }
            }
        }
    }

    fn record(&self, failure: bool) {
        let inner = &mut *self.inner.lock();
        match &mut inner.state {
            State::Closed => {
                if inner.thresholder.record(failure) {
                    inner.thresholder.reset();
                    inner.state = State::Open {
                        until: Instant::now() + self.delay,
                    };
                    self.metrics.throttle_probability.set(1.0);
                    tracing::warn!("circuit breaker opened");
                }
            }
            State::HalfOpen {
                successes,
                failures,
                ..
            } => {
                if failure {
                    *failures += 1;
                } else {
                    *successes += 1;
                }
                if *successes >= self.success_threshold {
                    inner.thresholder.reset();
                    inner.state = State::Closed;
                    self.metrics.throttle_probability.set(0.0);
                    tracing::info!("circuit breaker closed");
                } else if *failures > self.success_capacity - self.success_threshold {
                    inner.state = State::Open {
                        until: Instant::now() + self.delay,
                    };
                    self.metrics.throttle_probability.set(1.0);
                    tracing::warn!("circuit breaker reopened after failed probe");
                }
            }
            // Results from requests admitted before the circuit opened.
            State::Open { .. } => {}
        }
    }
}

#[async_trait]
impl<R: Outcome> Policy<R> for CircuitBreakerPolicy {
    async fn execute(&self, inner: Attempt<R>) -> Result<R, PolicyError> {
        self.try_admit()?;
        let result = inner().await;
        let failure = match &result {
            Ok(response) => response.is_failure(),
            Err(_) => true,
        };
        self.record(failure);
        result
    }
}
