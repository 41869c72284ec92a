//! Rate limiter policy: smooth (virtual scheduling) or bursty (fixed
//! windows).
//!
//! Admission computes the wait required for the next free slot under a
//! short-held lock, then sleeps outside it. A caller whose wait exceeds
//! `max_wait_time` is rejected without consuming the slot.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::{RateLimiterConfig, RateLimiterKind};
use crate::error::PolicyError;
use crate::pipeline::{Attempt, Outcome, Policy};

const WINDOW: Duration = Duration::from_secs(1);

enum State {
    /// Virtual scheduling: the instant the next permit becomes free.
    Smooth { next_free: Instant },
    /// Fixed windows since `epoch`, with the admission count of the window
    /// currently being filled (which may lie in the future when waiters
    /// have reserved ahead).
    Bursty {
        epoch: Instant,
        window: u64,
        admitted: u32,
    },
}

pub struct RateLimiterPolicy {
    interval: Duration,
    rps: u32,
    max_wait: Duration,
    state: Mutex<State>,
}

impl RateLimiterPolicy {
    pub fn new(config: &RateLimiterConfig) -> Self {
        let rps = config.rps.max(1);
        let now = Instant::now();
        let state = match config.kind {
            RateLimiterKind::Smooth => State::Smooth { next_free: now },
            RateLimiterKind::Bursty => State::Bursty {
                epoch: now,
                window: 0,
                admitted: 0,
            },
        };
        Self {
            interval: WINDOW / rps,
            rps,
            max_wait: config.max_wait_time,
            state: Mutex::new(state),
        }
    }

    /// Reserves the next free slot, returning how long the caller must wait
    /// for it.
    fn reserve(&self) -> Result<Duration, PolicyError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        match &mut *state {
            State::Smooth { next_free } => {
                let at = (*next_free).max(now);
                let wait = at - now;
                if wait > self.max_wait {
                    return Err(PolicyError::RateLimitExceeded);
                }
                *next_free = at + self.interval;
                Ok(wait)
            }
            State::Bursty {
                epoch,
                window,
                admitted,
            } => {
                let current = (now.duration_since(*epoch).as_nanos() / WINDOW.as_nanos()) as u64;
                let (mut slot_window, mut slot_admitted) = if *window < current {
                    (current, 0)
                } else {
                    (*window, *admitted)
                };
                if slot_admitted >= self.rps {
                    slot_window += 1;
                    slot_admitted = 0;
                }
                let wait = if slot_window > current {
                    (*epoch + WINDOW * (slot_window as u32)).saturating_duration_since(now)
                } else {
                    Duration::ZERO
                };
                if wait > self.max_wait {
                    return Err(PolicyError::RateLimitExceeded);
                }
                *window = slot_window;
                *admitted = slot_admitted + 1;
                Ok(wait)
            }
        }
    }
}

#[async_trait]
impl<R: Outcome> Policy<R> for RateLimiterPolicy {
    async fn execute(&self, inner: Attempt<R>) -> Result<R, PolicyError> {
        let wait = self.reserve()?;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        inner().await
    }
}
