use thiserror::Error;

/// Canonical error type for harness setup and teardown.
///
/// Request-level outcomes never surface here; they are absorbed into the
/// metric counters at the client boundary. Anything of this type is either
/// fatal at startup (config, bind) or aborts a single strategy.
#[derive(Debug, Error)]
pub enum TripwireError {
    /// Configuration is structurally valid YAML but semantically wrong.
    #[error("config error: {message}")]
    Config {
        /// Human-readable explanation of the violation.
        message: String,
    },

    /// Configuration or wire document failed to parse.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error while reading the config file or binding a listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A component could not be brought up.
    #[error("startup error: {message}")]
    Startup {
        /// Human-readable details for the startup log.
        message: String,
    },
}

impl TripwireError {
    /// Creates a `Config` variant.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a `Startup` variant.
    #[must_use]
    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }
}

/// Convenient result alias for harness operations.
pub type TripwireResult<T> = Result<T, TripwireError>;
