use thiserror::Error;

/// Outcome of a policy-wrapped request attempt that did not produce a
/// response.
///
/// The first five variants are the known rejection and timeout sentinels
/// that drive the client's outcome classification; `Transport` carries
/// whatever the HTTP layer failed with.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("concurrency limit exceeded")]
    AdaptiveLimitExceeded,

    #[error("bulkhead full")]
    BulkheadFull,

    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("timeout exceeded")]
    TimeoutExceeded,

    #[error("transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
}

impl PolicyError {
    /// Whether a policy shed this attempt without running it to completion.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded
                | Self::AdaptiveLimitExceeded
                | Self::BulkheadFull
                | Self::CircuitOpen
        )
    }

    /// Whether the attempt ran out of time, either through a timeout policy
    /// or a network deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExceeded)
    }
}
