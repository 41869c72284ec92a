//! Policy configuration variants.
//!
//! Each variant is a single-key YAML mapping (`- timeout: 300ms`,
//! `- ratelimiter: { rps: 100 }`, …). Building a variant produces a policy
//! instance with its telemetry wired to the strategy's gauges.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tripwire_core::metrics::StrategyMetrics;

use crate::bulkhead::BulkheadPolicy;
use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::limit::AdaptiveLimitPolicy;
use crate::pipeline::{Outcome, Policy};
use crate::rate_limiter::RateLimiterPolicy;
use crate::throttler::AdaptiveThrottlerPolicy;
use crate::timeout::TimeoutPolicy;

/// One resilience policy in a strategy's pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum PolicyConfig {
    #[serde(rename = "timeout")]
    Timeout(#[serde(with = "humantime_serde")] Duration),

    #[serde(rename = "ratelimiter")]
    RateLimiter(RateLimiterConfig),

    #[serde(rename = "bulkhead")]
    Bulkhead(BulkheadConfig),

    #[serde(rename = "circuitbreaker")]
    CircuitBreaker(CircuitBreakerConfig),

    #[serde(rename = "adaptivelimiter")]
    AdaptiveLimiter(AdaptiveLimiterConfig),

    #[serde(rename = "adaptivethrottler")]
    AdaptiveThrottler(AdaptiveThrottlerConfig),

    #[serde(rename = "vegaslimiter")]
    VegasLimiter(VegasLimiterConfig),

    #[serde(rename = "gradientlimiter")]
    GradientLimiter(GradientLimiterConfig),

    #[serde(rename = "gradient2limiter")]
    Gradient2Limiter(Gradient2LimiterConfig),
}

impl PolicyConfig {
    /// Builds the policy instance and publishes its static telemetry.
    pub fn build<R: Outcome>(&self, metrics: &Arc<StrategyMetrics>) -> Arc<dyn Policy<R>> {
        match self {
            Self::Timeout(timeout) => Arc::new(TimeoutPolicy::new(*timeout)),
            Self::RateLimiter(config) => {
                metrics.rate_limit.set(f64::from(config.rps));
                Arc::new(RateLimiterPolicy::new(config))
            }
            Self::Bulkhead(config) => {
                metrics.concurrency_limit.set(f64::from(config.max_concurrency));
                Arc::new(BulkheadPolicy::new(config))
            }
            Self::CircuitBreaker(config) => {
                Arc::new(CircuitBreakerPolicy::new(config, Arc::clone(metrics)))
            }
            Self::AdaptiveLimiter(config) => {
                Arc::new(AdaptiveLimitPolicy::adaptive(config, Arc::clone(metrics)))
            }
            Self::AdaptiveThrottler(config) => {
                Arc::new(AdaptiveThrottlerPolicy::new(config, Arc::clone(metrics)))
            }
            Self::VegasLimiter(config) => {
                Arc::new(AdaptiveLimitPolicy::vegas(config, Arc::clone(metrics)))
            }
            Self::GradientLimiter(config) => {
                Arc::new(AdaptiveLimitPolicy::gradient(config, Arc::clone(metrics)))
            }
            Self::Gradient2Limiter(config) => {
                Arc::new(AdaptiveLimitPolicy::gradient2(config, Arc::clone(metrics)))
            }
        }
    }

    /// The timeout carried by a timeout variant, for min-timeout tracking.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Timeout(timeout) => Some(*timeout),
            _ => None,
        }
    }
}

/// Rate limiter admission style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimiterKind {
    /// One permit every `1s / rps`, spreading load evenly.
    #[default]
    Smooth,
    /// `rps` permits per fixed one-second window.
    Bursty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimiterConfig {
    #[serde(default, rename = "type")]
    pub kind: RateLimiterKind,

    pub rps: u32,

    /// How long a caller may wait for a permit before being rejected.
    #[serde(default, with = "humantime_serde")]
    pub max_wait_time: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BulkheadConfig {
    pub max_concurrency: u32,

    #[serde(default, with = "humantime_serde")]
    pub max_wait_time: Duration,
}

fn one() -> u32 {
    1
}

/// Circuit breaker tuning. The failure thresholding mode is selected from
/// which fields are set: exact consecutive count when neither
/// `failure_thresholding_capacity` nor `failure_thresholding_period` is
/// given; ratio over the last `failure_thresholding_capacity` executions
/// when only the capacity is given; failure rate (percent) over
/// `failure_thresholding_period` otherwise.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    /// Time the breaker stays open before probing.
    #[serde(default, with = "humantime_serde")]
    pub delay: Duration,

    #[serde(default = "one")]
    pub failure_threshold: u32,

    /// Percentage in `(0, 100]`; selects rate thresholding together with a
    /// period.
    #[serde(default)]
    pub failure_rate_threshold: f64,

    #[serde(default)]
    pub failure_thresholding_capacity: u32,

    /// Minimum executions within the period before the rate is trusted.
    #[serde(default)]
    pub failure_execution_threshold: u32,

    #[serde(default, with = "humantime_serde")]
    pub failure_thresholding_period: Duration,

    #[serde(default = "one")]
    pub success_threshold: u32,

    #[serde(default = "one")]
    pub success_thresholding_capacity: u32,
}

/// Tuning for the latency-tracking adaptive limiter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdaptiveLimiterConfig {
    pub min_limit: u32,
    pub max_limit: u32,
    pub initial_limit: u32,

    /// Upper bound on the limit relative to observed peak inflight.
    pub max_limit_factor: f64,

    #[serde(with = "humantime_serde")]
    pub recent_window_min_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub recent_window_max_duration: Duration,
    pub recent_window_min_samples: u32,

    /// Number of recent windows folded into the latency baseline.
    pub baseline_window_age: u32,

    pub smoothing_factor: f64,

    /// Queueing factor: waiters are admitted up to
    /// `limit × max_rejection_factor` before rejection.
    pub max_rejection_factor: f64,
}

impl Default for AdaptiveLimiterConfig {
    fn default() -> Self {
        Self {
            min_limit: 1,
            max_limit: 200,
            initial_limit: 20,
            max_limit_factor: 5.0,
            recent_window_min_duration: Duration::from_secs(1),
            recent_window_max_duration: Duration::from_secs(30),
            recent_window_min_samples: 50,
            baseline_window_age: 10,
            smoothing_factor: 0.1,
            max_rejection_factor: 4.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VegasLimiterConfig {
    pub max_limit: u32,
    pub initial_limit: u32,

    #[serde(with = "humantime_serde")]
    pub recent_window_min_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub recent_window_max_duration: Duration,
    pub recent_window_min_samples: u32,

    pub smoothing_factor: f64,
}

impl Default for VegasLimiterConfig {
    fn default() -> Self {
        Self {
            max_limit: 200,
            initial_limit: 20,
            recent_window_min_duration: Duration::from_secs(1),
            recent_window_max_duration: Duration::from_secs(1),
            recent_window_min_samples: 1,
            smoothing_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GradientLimiterConfig {
    pub min_limit: u32,
    pub max_limit: u32,
    pub initial_limit: u32,

    #[serde(with = "humantime_serde")]
    pub recent_window_min_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub recent_window_max_duration: Duration,
    pub recent_window_min_samples: u32,

    pub smoothing_factor: f64,
}

impl Default for GradientLimiterConfig {
    fn default() -> Self {
        Self {
            min_limit: 1,
            max_limit: 200,
            initial_limit: 20,
            recent_window_min_duration: Duration::from_secs(1),
            recent_window_max_duration: Duration::from_secs(1),
            recent_window_min_samples: 1,
            smoothing_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Gradient2LimiterConfig {
    pub min_limit: u32,
    pub max_limit: u32,
    pub initial_limit: u32,

    #[serde(with = "humantime_serde")]
    pub recent_window_min_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub recent_window_max_duration: Duration,
    pub recent_window_min_samples: u32,

    /// Window count folded into the long-term latency average.
    pub baseline_window_age: u32,

    pub smoothing_factor: f64,
}

impl Default for Gradient2LimiterConfig {
    fn default() -> Self {
        Self {
            min_limit: 1,
            max_limit: 200,
            initial_limit: 20,
            recent_window_min_duration: Duration::from_secs(1),
            recent_window_max_duration: Duration::from_secs(1),
            recent_window_min_samples: 10,
            baseline_window_age: 60,
            smoothing_factor: 0.1,
        }
    }
}

/// Client-side probabilistic load shedding driven by observed failure rate.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdaptiveThrottlerConfig {
    /// Failure-rate fraction above which shedding begins.
    pub failure_rate_threshold: f64,

    #[serde(with = "humantime_serde")]
    pub thresholding_period: Duration,

    /// Minimum samples within the period before the rate is trusted.
    pub execution_threshold: u32,

    /// Ceiling on the rejection probability.
    pub max_rejection_rate: f64,
}

impl Default for AdaptiveThrottlerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            thresholding_period: Duration::from_secs(5),
            execution_threshold: 10,
            max_rejection_rate: 0.9,
        }
    }
}
