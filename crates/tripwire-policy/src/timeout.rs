//! Timeout policy.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::PolicyError;
use crate::pipeline::{Attempt, Outcome, Policy};

/// Bounds the inner attempt's execution time. On expiry the inner future is
/// dropped, which cancels an in-flight HTTP round-trip, and the attempt is
/// reported as [`PolicyError::TimeoutExceeded`].
pub struct TimeoutPolicy {
    timeout: Duration,
}

impl TimeoutPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl<R: Outcome> Policy<R> for TimeoutPolicy {
    async fn execute(&self, inner: Attempt<R>) -> Result<R, PolicyError> {
        match tokio::time::timeout(self.timeout, inner()).await {
            Ok(result) => result,
            Err(_) => Err(PolicyError::TimeoutExceeded),
        }
    }
}
