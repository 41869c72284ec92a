//! Bulkhead policy: a fixed concurrency compartment.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::BulkheadConfig;
use crate::error::PolicyError;
use crate::pipeline::{Attempt, Outcome, Policy};

/// Caps concurrent executions at `max_concurrency`. A caller waits up to
/// `max_wait_time` for a permit (zero means try-only), then is rejected
/// with [`PolicyError::BulkheadFull`].
pub struct BulkheadPolicy {
    permits: Semaphore,
    max_wait: Duration,
}

impl BulkheadPolicy {
    pub fn new(config: &BulkheadConfig) -> Self {
        Self {
            permits: Semaphore::new(config.max_concurrency as usize),
            max_wait: config.max_wait_time,
        }
    }
}

#[async_trait]
impl<R: Outcome> Policy<R> for BulkheadPolicy {
    async fn execute(&self, inner: Attempt<R>) -> Result<R, PolicyError> {
        let _permit = if self.max_wait.is_zero() {
            self.permits
                .try_acquire()
                .map_err(|_| PolicyError::BulkheadFull)?
        } else {
            match tokio::time::timeout(self.max_wait, self.permits.acquire()).await {
                Ok(Ok(permit)) => permit,
                _ => return Err(PolicyError::BulkheadFull),
            }
        };
        inner().await
    }
}
