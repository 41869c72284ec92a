//! Adaptive concurrency limiters.
//!
//! A shared [`Limiter`] owns the atomic limit, the inflight count and a
//! measurement window; completed requests feed RTT samples back into one of
//! four limit algorithms. Samples aggregate into windows bounded by the
//! configured minimum duration, maximum duration and minimum sample count;
//! the algorithm adjusts the limit once per window.
//!
//! At capacity the `adaptivelimiter` variant queues waiters up to
//! `limit × max_rejection_factor` (publishing the depth to the
//! `queued_requests` gauge); the Vegas and Gradient variants reject
//! immediately, so their queue never forms.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tripwire_core::metrics::StrategyMetrics;

use crate::config::{
    AdaptiveLimiterConfig, Gradient2LimiterConfig, GradientLimiterConfig, VegasLimiterConfig,
};
use crate::error::PolicyError;
use crate::pipeline::{Attempt, Outcome, Policy};

/// One aggregated measurement window.
#[derive(Debug)]
struct Window {
    started: Instant,
    samples: u32,
    drops: u32,
    rtt_sum: Duration,
    min_rtt: Duration,
    peak_inflight: usize,
}

impl Window {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            samples: 0,
            drops: 0,
            rtt_sum: Duration::ZERO,
            min_rtt: Duration::MAX,
            peak_inflight: 0,
        }
    }

    fn record(&mut self, rtt: Duration, inflight: usize, dropped: bool) {
        self.samples += 1;
        if dropped {
            self.drops += 1;
        }
        self.rtt_sum += rtt;
        self.min_rtt = self.min_rtt.min(rtt);
        self.peak_inflight = self.peak_inflight.max(inflight);
    }

    fn avg_rtt(&self) -> Duration {
        if self.samples == 0 {
            Duration::ZERO
        } else {
            self.rtt_sum / self.samples
        }
    }
}

/// Exponential moving average seeded by an arithmetic mean.
///
/// A cold EMA with a small factor takes hundreds of samples to reach the
/// true baseline; the warmup mean converges within a few, giving the EMA a
/// sensible starting point.
struct ExpAvg {
    value: f64,
    sum: f64,
    count: u32,
    warmup: u32,
    factor: f64,
}

impl ExpAvg {
    fn new(window: u32, warmup: u32) -> Self {
        Self {
            value: 0.0,
            sum: 0.0,
            count: 0,
            warmup,
            factor: 2.0 / (f64::from(window) + 1.0),
        }
    }

    fn update(&mut self, sample: f64) -> f64 {
        if self.count < self.warmup {
            self.count += 1;
            self.sum += sample;
            self.value = self.sum / f64::from(self.count);
        } else {
            self.value = self.value * (1.0 - self.factor) + sample * self.factor;
        }
        self.value
    }

    fn decay(&mut self, factor: f64) {
        self.value *= factor;
    }
}

/// The per-window limit adjustment.
enum Algorithm {
    /// Latency-baseline limiter: multiplicative decrease (smoothed by the
    /// configured factor) when the recent window runs hot against the
    /// baseline or saw drops, additive sqrt increase when utilized. The
    /// limit is additionally capped at `peak_inflight × max_limit_factor`.
    Adaptive {
        baseline: ExpAvg,
        max_limit_factor: f64,
        smoothing: f64,
    },
    /// TCP-Vegas style: estimates the queue the current limit builds
    /// (`limit × (1 − base_rtt/rtt)`) and steps the limit by `log10(limit)`
    /// against alpha/beta bounds.
    Vegas { base_rtt: Duration, smoothing: f64 },
    /// Latency gradient against the no-load RTT with a sqrt queue
    /// allowance.
    Gradient { noload_rtt: Duration, smoothing: f64 },
    /// Gradient of a long-window RTT average over the recent window, with a
    /// fixed queue allowance.
    Gradient2 { long_rtt: ExpAvg, smoothing: f64 },
}

const GRADIENT_TOLERANCE: f64 = 2.0;
const GRADIENT2_TOLERANCE: f64 = 1.5;
const GRADIENT2_QUEUE_SIZE: f64 = 4.0;

impl Algorithm {
    /// Returns the proposed limit; the caller clamps to the configured
    /// bounds.
    fn update(&mut self, window: &Window, limit: f64) -> f64 {
        let avg = window.avg_rtt().as_secs_f64();
        if avg <= 0.0 {
            return limit;
        }
        match self {
            Self::Adaptive {
                baseline,
                max_limit_factor,
                smoothing,
            } => {
                let base = baseline.update(avg);
                let overloaded = window.drops > 0 || avg > base * 2.0;
                let mut proposed = if overloaded {
                    limit * (1.0 - 0.5 * *smoothing)
                } else if window.peak_inflight as f64 * 2.0 >= limit {
                    limit + limit.sqrt().max(1.0)
                } else {
                    limit
                };
                let cap = (window.peak_inflight as f64 * *max_limit_factor).max(1.0);
                if proposed > cap {
                    proposed = cap;
                }
                proposed
            }
            Self::Vegas { base_rtt, smoothing } => {
                if window.min_rtt < *base_rtt {
                    *base_rtt = window.min_rtt;
                }
                let base = base_rtt.as_secs_f64();
                let step = limit.log10().max(1.0);
                let queue = limit * (1.0 - base / avg).max(0.0);
                let proposed = if window.drops > 0 || queue > 6.0 * step {
                    limit - step
                } else if queue < 3.0 * step {
                    limit + step
                } else {
                    limit
                };
                limit * (1.0 - *smoothing) + proposed * *smoothing
            }
            Self::Gradient { noload_rtt, smoothing } => {
                if window.min_rtt < *noload_rtt {
                    *noload_rtt = window.min_rtt;
                }
                let gradient = if window.drops > 0 {
                    0.5
                } else {
                    (GRADIENT_TOLERANCE * noload_rtt.as_secs_f64() / avg).clamp(0.5, 1.0)
                };
                let proposed = limit * gradient + limit.sqrt();
                limit * (1.0 - *smoothing) + proposed * *smoothing
            }
            Self::Gradient2 { long_rtt, smoothing } => {
                let long = long_rtt.update(avg);
                // Drift recovery: a long-term average far above current
                // observations would inflate the limit indefinitely.
                if long / avg > 2.0 {
                    long_rtt.decay(0.95);
                }
                if (window.peak_inflight as f64) < limit / 2.0 {
                    return limit;
                }
                let gradient = (GRADIENT2_TOLERANCE * long / avg).clamp(0.5, 1.0);
                let proposed = limit * gradient + GRADIENT2_QUEUE_SIZE;
                limit * (1.0 - *smoothing) + proposed * *smoothing
            }
        }
    }
}

struct LimiterState {
    window: Window,
    algorithm: Algorithm,
    limit_f: f64,
}

/// Shared state between the policy and its permits.
pub struct Limiter {
    limit: AtomicUsize,
    inflight: AtomicUsize,
    queued: AtomicUsize,
    min_limit: usize,
    max_limit: usize,
    window_min_duration: Duration,
    window_max_duration: Duration,
    window_min_samples: u32,
    /// Waiters admitted up to `limit × max_queue_factor`; zero disables
    /// queueing entirely.
    max_queue_factor: f64,
    notify: Notify,
    state: Mutex<LimiterState>,
    metrics: Arc<StrategyMetrics>,
}

impl Limiter {
    #[allow(clippy::too_many_arguments)]
    fn new(
        algorithm: Algorithm,
        initial: u32,
        min_limit: u32,
        max_limit: u32,
        window_min_duration: Duration,
        window_max_duration: Duration,
        window_min_samples: u32,
        max_queue_factor: f64,
        metrics: Arc<StrategyMetrics>,
    ) -> Arc<Self> {
        let min_limit = min_limit.max(1) as usize;
        let max_limit = (max_limit as usize).max(min_limit);
        let initial = (initial as usize).clamp(min_limit, max_limit);
        metrics.concurrency_limit.set(initial as f64);
        Arc::new(Self {
            limit: AtomicUsize::new(initial),
            inflight: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            min_limit,
            max_limit,
            window_min_duration,
            window_max_duration,
            window_min_samples: window_min_samples.max(1),
            max_queue_factor,
            notify: Notify::new(),
            state: Mutex::new(LimiterState {
                window: Window::new(),
                algorithm,
                limit_f: initial as f64,
            }),
            metrics,
        })
    }

    pub fn current_limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Claims an inflight slot if one is free.
    fn try_acquire(self: &Arc<Self>) -> Option<LimitPermit> {
        let limit = self.current_limit();
        let mut inflight = self.inflight.load(Ordering::Relaxed);
        loop {
            if inflight >= limit {
                return None;
            }
            match self.inflight.compare_exchange_weak(
                inflight,
                inflight + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(LimitPermit {
                        limiter: Some(Arc::clone(self)),
                        inflight: inflight + 1,
                        start: Instant::now(),
                    })
                }
                Err(current) => inflight = current,
            }
        }
    }

    /// Claims a slot, queueing up to the configured factor when at
    /// capacity.
    async fn acquire(self: &Arc<Self>) -> Result<LimitPermit, PolicyError> {
        if let Some(permit) = self.try_acquire() {
            return Ok(permit);
        }
        if self.max_queue_factor <= 0.0 {
            return Err(PolicyError::AdaptiveLimitExceeded);
        }

        let cap = (self.current_limit() as f64 * self.max_queue_factor).ceil() as usize;
        let mut queued = self.queued.load(Ordering::Relaxed);
        loop {
            if queued >= cap {
                return Err(PolicyError::AdaptiveLimitExceeded);
            }
            match self.queued.compare_exchange_weak(
                queued,
                queued + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => queued = current,
            }
        }
        self.publish_queue_depth();
        // Leaves the queue even when the waiter is cancelled mid-wait.
        let _queue_slot = QueueGuard {
            limiter: self.as_ref(),
        };

        let permit = loop {
            if let Some(permit) = self.try_acquire() {
                break permit;
            }
            self.notify.notified().await;
        };
        Ok(permit)
    }

    fn publish_queue_depth(&self) {
        self.metrics
            .queued_requests
            .set(self.queued.load(Ordering::Relaxed) as f64);
    }

    fn release(&self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        self.notify.notify_one();
    }

    /// Folds one completed request into the current window and runs the
    /// algorithm when the window closes.
    fn record_sample(&self, rtt: Duration, inflight: usize, dropped: bool) {
        let mut state = self.state.lock();
        state.window.record(rtt, inflight, dropped);

        let elapsed = state.window.started.elapsed();
        let complete = (elapsed >= self.window_min_duration
            && state.window.samples >= self.window_min_samples)
            || elapsed >= self.window_max_duration;
        if !complete {
            return;
        }

        let window = std::mem::replace(&mut state.window, Window::new());
        let current = state.limit_f;
        let proposed = state.algorithm.update(&window, current);
        state.limit_f = proposed.clamp(self.min_limit as f64, self.max_limit as f64);
        let new_limit = state.limit_f.round() as usize;
        let old_limit = self.limit.swap(new_limit, Ordering::Release);
        if old_limit != new_limit {
            self.metrics.concurrency_limit.set(new_limit as f64);
            tracing::debug!(old_limit, new_limit, "concurrency limit changed");
            if new_limit > old_limit {
                self.notify.notify_one();
            }
        }
    }
}

struct QueueGuard<'a> {
    limiter: &'a Limiter,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.limiter.queued.fetch_sub(1, Ordering::AcqRel);
        self.limiter.publish_queue_depth();
    }
}

/// RAII inflight slot. Dropping without recording (cancellation) releases
/// the slot without feeding the algorithm.
pub struct LimitPermit {
    limiter: Option<Arc<Limiter>>,
    /// Inflight count captured at acquire time, including this permit.
    inflight: usize,
    start: Instant,
}

impl LimitPermit {
    /// Records the sample with the elapsed time since acquisition and
    /// releases the slot. Consumes the permit.
    pub fn record(mut self, dropped: bool) {
        if let Some(limiter) = self.limiter.take() {
            let rtt = self.start.elapsed();
            limiter.record_sample(rtt, self.inflight, dropped);
            limiter.release();
        }
    }
}

impl Drop for LimitPermit {
    fn drop(&mut self) {
        if let Some(limiter) = self.limiter.take() {
            limiter.release();
        }
    }
}

/// Policy wrapper over a [`Limiter`].
pub struct AdaptiveLimitPolicy {
    limiter: Arc<Limiter>,
}

impl AdaptiveLimitPolicy {
    pub fn adaptive(config: &AdaptiveLimiterConfig, metrics: Arc<StrategyMetrics>) -> Self {
        let algorithm = Algorithm::Adaptive {
            baseline: ExpAvg::new(config.baseline_window_age.max(1), 3),
            max_limit_factor: config.max_limit_factor.max(1.0),
            smoothing: config.smoothing_factor.clamp(0.0, 1.0),
        };
        Self {
            limiter: Limiter::new(
                algorithm,
                config.initial_limit,
                config.min_limit,
                config.max_limit,
                config.recent_window_min_duration,
                config.recent_window_max_duration,
                config.recent_window_min_samples,
                config.max_rejection_factor,
                metrics,
            ),
        }
    }

    pub fn vegas(config: &VegasLimiterConfig, metrics: Arc<StrategyMetrics>) -> Self {
        let algorithm = Algorithm::Vegas {
            base_rtt: Duration::MAX,
            smoothing: config.smoothing_factor.clamp(0.0, 1.0),
        };
        Self {
            limiter: Limiter::new(
                algorithm,
                config.initial_limit,
                1,
                config.max_limit,
                config.recent_window_min_duration,
                config.recent_window_max_duration,
                config.recent_window_min_samples,
                0.0,
                metrics,
            ),
        }
    }

    pub fn gradient(config: &GradientLimiterConfig, metrics: Arc<StrategyMetrics>) -> Self {
        let algorithm = Algorithm::Gradient {
            noload_rtt: Duration::MAX,
            smoothing: config.smoothing_factor.clamp(0.0, 1.0),
        };
        Self {
            limiter: Limiter::new(
                algorithm,
                config.initial_limit,
                config.min_limit,
                config.max_limit,
                config.recent_window_min_duration,
                config.recent_window_max_duration,
                config.recent_window_min_samples,
                0.0,
                metrics,
            ),
        }
    }

    pub fn gradient2(config: &Gradient2LimiterConfig, metrics: Arc<StrategyMetrics>) -> Self {
        let algorithm = Algorithm::Gradient2 {
            long_rtt: ExpAvg::new(config.baseline_window_age.max(1), 10),
            smoothing: config.smoothing_factor.clamp(0.0, 1.0),
        };
        Self {
            limiter: Limiter::new(
                algorithm,
                config.initial_limit,
                config.min_limit,
                config.max_limit,
                config.recent_window_min_duration,
                config.recent_window_max_duration,
                config.recent_window_min_samples,
                0.0,
                metrics,
            ),
        }
    }

    #[cfg(test)]
    fn limiter(&self) -> &Arc<Limiter> {
        &self.limiter
    }
}

#[async_trait]
impl<R: Outcome> Policy<R> for AdaptiveLimitPolicy {
    async fn execute(&self, inner: Attempt<R>) -> Result<R, PolicyError> {
        let permit = self.limiter.acquire().await?;
        let result = inner().await;
        let dropped = match &result {
            Ok(response) => response.is_failure(),
            Err(_) => true,
        };
        permit.record(dropped);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn test_metrics(name: &str) -> Arc<StrategyMetrics> {
        Arc::new(StrategyMetrics::new(format!("00:00:00 {name}"), name))
    }

    fn window(avg: Duration, min: Duration, samples: u32, drops: u32, peak: usize) -> Window {
        Window {
            started: Instant::now(),
            samples,
            drops,
            rtt_sum: avg * samples,
            min_rtt: min,
            peak_inflight: peak,
        }
    }

    fn ok_attempt() -> Attempt<StatusCode> {
        Box::new(|| Box::pin(async { Ok(StatusCode::OK) }))
    }

    #[test]
    fn adaptive_grows_when_utilized_and_healthy() {
        let mut alg = Algorithm::Adaptive {
            baseline: ExpAvg::new(10, 3),
            max_limit_factor: 10.0,
            smoothing: 1.0,
        };
        let w = window(Duration::from_millis(20), Duration::from_millis(20), 50, 0, 100);
        // sqrt(100) = 10
        assert_eq!(alg.update(&w, 100.0), 110.0);
    }

    #[test]
    fn adaptive_backs_off_on_drops() {
        let mut alg = Algorithm::Adaptive {
            baseline: ExpAvg::new(10, 3),
            max_limit_factor: 10.0,
            smoothing: 1.0,
        };
        let w = window(Duration::from_millis(20), Duration::from_millis(20), 50, 5, 100);
        // Full smoothing halves the limit on an overloaded window.
        assert_eq!(alg.update(&w, 100.0), 50.0);
    }

    #[test]
    fn adaptive_backs_off_when_latency_doubles() {
        let mut alg = Algorithm::Adaptive {
            baseline: ExpAvg::new(10, 3),
            max_limit_factor: 10.0,
            smoothing: 1.0,
        };
        // Establish a ~20ms baseline over the warmup windows.
        for _ in 0..3 {
            let w = window(Duration::from_millis(20), Duration::from_millis(20), 50, 0, 100);
            alg.update(&w, 100.0);
        }
        let hot = window(Duration::from_millis(200), Duration::from_millis(180), 50, 0, 100);
        assert!(alg.update(&hot, 100.0) < 100.0);
    }

    #[test]
    fn adaptive_caps_at_peak_inflight_factor() {
        let mut alg = Algorithm::Adaptive {
            baseline: ExpAvg::new(10, 3),
            max_limit_factor: 2.0,
            smoothing: 1.0,
        };
        // Only 10 inflight at peak: the limit cannot run past 20.
        let w = window(Duration::from_millis(20), Duration::from_millis(20), 50, 0, 10);
        assert_eq!(alg.update(&w, 100.0), 20.0);
    }

    #[test]
    fn vegas_grows_while_the_queue_estimate_is_small() {
        let mut alg = Algorithm::Vegas {
            base_rtt: Duration::MAX,
            smoothing: 1.0,
        };
        // First window sets base_rtt == avg, so the queue estimate is zero.
        let w = window(Duration::from_millis(10), Duration::from_millis(10), 10, 0, 20);
        let next = alg.update(&w, 20.0);
        assert!(next > 20.0, "expected growth, got {next}");
    }

    #[test]
    fn vegas_shrinks_when_latency_builds_a_queue() {
        let mut alg = Algorithm::Vegas {
            base_rtt: Duration::MAX,
            smoothing: 1.0,
        };
        let calm = window(Duration::from_millis(10), Duration::from_millis(10), 10, 0, 20);
        alg.update(&calm, 20.0);

        // 5x the base RTT: queue estimate = 20 * (1 - 1/5) = 16 > beta.
        let congested = window(Duration::from_millis(50), Duration::from_millis(40), 10, 0, 20);
        let next = alg.update(&congested, 20.0);
        assert!(next < 20.0, "expected backoff, got {next}");
    }

    #[test]
    fn gradient_tracks_the_latency_ratio() {
        let mut alg = Algorithm::Gradient {
            noload_rtt: Duration::MAX,
            smoothing: 1.0,
        };
        let calm = window(Duration::from_millis(10), Duration::from_millis(10), 10, 0, 100);
        // gradient clamps to 1.0, proposed = 100 + sqrt(100) = 110.
        assert_eq!(alg.update(&calm, 100.0), 110.0);

        // 10x latency: gradient clamps to 0.5, proposed = 50 + 10 = 60.
        let hot = window(Duration::from_millis(100), Duration::from_millis(90), 10, 0, 100);
        assert_eq!(alg.update(&hot, 100.0), 60.0);
    }

    #[test]
    fn gradient2_holds_steady_at_stable_latency() {
        let mut alg = Algorithm::Gradient2 {
            long_rtt: ExpAvg::new(60, 10),
            smoothing: 1.0,
        };
        let mut limit = 100.0;
        for _ in 0..20 {
            let w = window(Duration::from_millis(30), Duration::from_millis(30), 10, 0, 100);
            limit = alg.update(&w, limit).clamp(1.0, 200.0);
        }
        // Stable latency keeps the gradient at 1.0; only the queue
        // allowance pushes upward until the clamp.
        assert!(limit > 100.0);
    }

    #[test]
    fn gradient2_skips_adjustment_when_app_limited() {
        let mut alg = Algorithm::Gradient2 {
            long_rtt: ExpAvg::new(60, 10),
            smoothing: 1.0,
        };
        let idle = window(Duration::from_millis(30), Duration::from_millis(30), 10, 0, 5);
        assert_eq!(alg.update(&idle, 100.0), 100.0);
    }

    #[test]
    fn exp_avg_warms_up_with_the_arithmetic_mean() {
        let mut avg = ExpAvg::new(100, 3);
        assert_eq!(avg.update(10.0), 10.0);
        assert_eq!(avg.update(20.0), 15.0);
        assert_eq!(avg.update(30.0), 20.0);

        let factor = 2.0 / 101.0;
        let expected = 20.0 * (1.0 - factor) + 40.0 * factor;
        assert!((avg.update(40.0) - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rejects_at_the_limit_without_queueing() {
        let policy = AdaptiveLimitPolicy::vegas(
            &VegasLimiterConfig {
                initial_limit: 1,
                ..VegasLimiterConfig::default()
            },
            test_metrics("vegas-reject"),
        );

        let held = policy.limiter().try_acquire().expect("first slot");
        let result: Result<StatusCode, _> = policy.execute(ok_attempt()).await;
        assert!(matches!(result, Err(PolicyError::AdaptiveLimitExceeded)));
        drop(held);

        let result: Result<StatusCode, _> = policy.execute(ok_attempt()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn queued_waiter_proceeds_after_a_release() {
        let policy = Arc::new(AdaptiveLimitPolicy::adaptive(
            &AdaptiveLimiterConfig {
                initial_limit: 1,
                min_limit: 1,
                max_limit: 1,
                max_rejection_factor: 2.0,
                ..AdaptiveLimiterConfig::default()
            },
            test_metrics("adaptive-queue"),
        ));

        let held = policy.limiter().try_acquire().expect("first slot");
        let waiter = {
            let policy = Arc::clone(&policy);
            tokio::spawn(async move { policy.execute(ok_attempt()).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        let result = waiter.await.expect("join");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn queue_overflow_is_rejected() {
        let policy = Arc::new(AdaptiveLimitPolicy::adaptive(
            &AdaptiveLimiterConfig {
                initial_limit: 1,
                min_limit: 1,
                max_limit: 1,
                max_rejection_factor: 1.0,
                ..AdaptiveLimiterConfig::default()
            },
            test_metrics("adaptive-overflow"),
        ));

        let held = policy.limiter().try_acquire().expect("first slot");
        let waiter = {
            let policy = Arc::clone(&policy);
            tokio::spawn(async move { policy.execute(ok_attempt()).await })
        };
        tokio::task::yield_now().await;

        // Queue capacity is limit * 1.0 = 1 and the waiter occupies it.
        let result: Result<StatusCode, _> = policy.execute(ok_attempt()).await;
        assert!(matches!(result, Err(PolicyError::AdaptiveLimitExceeded)));

        drop(held);
        assert!(waiter.await.expect("join").is_ok());
    }

    #[tokio::test]
    async fn dropped_permit_releases_the_slot() {
        let metrics = test_metrics("permit-drop");
        let policy = AdaptiveLimitPolicy::vegas(
            &VegasLimiterConfig {
                initial_limit: 1,
                ..VegasLimiterConfig::default()
            },
            metrics,
        );

        let permit = policy.limiter().try_acquire().expect("slot");
        assert_eq!(policy.limiter().inflight(), 1);
        drop(permit);
        assert_eq!(policy.limiter().inflight(), 0);
    }
}
