//! The policy contract and ordered composition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tripwire_core::metrics::StrategyMetrics;

use crate::config::PolicyConfig;
use crate::error::PolicyError;

/// Result classification hook for policies that judge responses (circuit
/// breaker, adaptive limiters, throttler). Errors always count as failures;
/// this trait decides for completed responses.
pub trait Outcome: Send + 'static {
    fn is_failure(&self) -> bool;
}

impl Outcome for http::StatusCode {
    fn is_failure(&self) -> bool {
        *self == http::StatusCode::TOO_MANY_REQUESTS || self.is_server_error()
    }
}

impl<B: Send + 'static> Outcome for http::Response<B> {
    fn is_failure(&self) -> bool {
        self.status().is_failure()
    }
}

/// A request attempt, executed at most once. There is no retrying policy, so
/// consume-once semantics are part of the contract.
pub type Attempt<R> = Box<dyn FnOnce() -> BoxFuture<'static, Result<R, PolicyError>> + Send>;

/// A resilience policy: a filter around a request attempt.
#[async_trait]
pub trait Policy<R: Outcome>: Send + Sync {
    async fn execute(&self, inner: Attempt<R>) -> Result<R, PolicyError>;
}

/// Ordered composition of policies: for `p1, p2, …, pn` the executor is
/// `p1(p2(…pn(attempt)))`, so the first-declared policy sees the request
/// first. A timeout declared outside a circuit breaker is therefore visible
/// to the breaker, matching how the config file reads.
pub struct Pipeline<R: Outcome> {
    policies: Vec<Arc<dyn Policy<R>>>,
    min_timeout: Option<Duration>,
}

impl<R: Outcome> Pipeline<R> {
    /// Builds the pipeline for one strategy, wiring policy telemetry to the
    /// strategy's gauges.
    pub fn build(configs: &[PolicyConfig], metrics: &Arc<StrategyMetrics>) -> Self {
        let policies = configs
            .iter()
            .map(|config| config.build::<R>(metrics))
            .collect();
        let min_timeout = configs.iter().filter_map(PolicyConfig::timeout).min();
        Self {
            policies,
            min_timeout,
        }
    }

    /// Composition without config, for tests and custom wiring.
    pub fn from_policies(policies: Vec<Arc<dyn Policy<R>>>) -> Self {
        Self {
            policies,
            min_timeout: None,
        }
    }

    /// Smallest timeout among timeout policies, if any.
    pub fn min_timeout(&self) -> Option<Duration> {
        self.min_timeout
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Runs one attempt through the composed policies.
    pub async fn execute(&self, attempt: Attempt<R>) -> Result<R, PolicyError> {
        let mut chain = attempt;
        for policy in self.policies.iter().rev() {
            let policy = Arc::clone(policy);
            let inner = chain;
            chain = Box::new(move || Box::pin(async move { policy.execute(inner).await }));
        }
        chain().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use parking_lot::Mutex;

    /// Records the order in which policies saw the attempt and optionally
    /// short-circuits.
    struct Probe {
        id: &'static str,
        reject: bool,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Policy<StatusCode> for Probe {
        async fn execute(&self, inner: Attempt<StatusCode>) -> Result<StatusCode, PolicyError> {
            self.seen.lock().push(self.id);
            if self.reject {
                return Err(PolicyError::BulkheadFull);
            }
            inner().await
        }
    }

    fn probe(
        id: &'static str,
        reject: bool,
        seen: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn Policy<StatusCode>> {
        Arc::new(Probe {
            id,
            reject,
            seen: Arc::clone(seen),
        })
    }

    fn attempt_counting(calls: &Arc<Mutex<u32>>) -> Attempt<StatusCode> {
        let calls = Arc::clone(calls);
        Box::new(move || {
            Box::pin(async move {
                *calls.lock() += 1;
                Ok(StatusCode::OK)
            })
        })
    }

    #[tokio::test]
    async fn declared_order_is_outermost_first() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(Mutex::new(0));
        let pipeline = Pipeline::from_policies(vec![
            probe("outer", false, &seen),
            probe("middle", false, &seen),
            probe("inner", false, &seen),
        ]);

        let result = pipeline.execute(attempt_counting(&calls)).await;
        assert_eq!(result.expect("admitted"), StatusCode::OK);
        assert_eq!(*seen.lock(), vec!["outer", "middle", "inner"]);
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn rejection_short_circuits_inner_policies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(Mutex::new(0));
        let pipeline = Pipeline::from_policies(vec![
            probe("outer", false, &seen),
            probe("rejecting", true, &seen),
            probe("inner", false, &seen),
        ]);

        let result = pipeline.execute(attempt_counting(&calls)).await;
        assert!(matches!(result, Err(PolicyError::BulkheadFull)));
        assert_eq!(*seen.lock(), vec!["outer", "rejecting"]);
        assert_eq!(*calls.lock(), 0, "attempt must not run after rejection");
    }

    #[tokio::test]
    async fn empty_pipeline_runs_the_attempt_directly() {
        let calls = Arc::new(Mutex::new(0));
        let pipeline = Pipeline::from_policies(Vec::new());
        let result = pipeline.execute(attempt_counting(&calls)).await;
        assert_eq!(result.expect("ran"), StatusCode::OK);
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn status_outcomes_match_the_classification_table() {
        assert!(!StatusCode::OK.is_failure());
        assert!(StatusCode::TOO_MANY_REQUESTS.is_failure());
        assert!(StatusCode::INTERNAL_SERVER_ERROR.is_failure());
        assert!(StatusCode::SERVICE_UNAVAILABLE.is_failure());
        assert!(!StatusCode::NOT_FOUND.is_failure());
    }
}
