use thiserror::Error;

/// Errors raised by the barrier-trigger engine and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// A malformed instrument or price sample was handed to a store operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Feed source, settlement backend or store backend temporarily unavailable
    #[error("backend unavailable: {0}")]
    TransientBackend(String),

    /// A remote call ran past its deadline; the remote side may still act on it
    #[error("timed out: {0}")]
    Timeout(String),

    /// Action executor reported a failed execution
    #[error("execution failed for {id}")]
    ExecutionFailed { id: String },

    /// Action executor could not act yet (backend precondition not met)
    #[error("execution not reachable for {id}")]
    ExecutionUnreachable { id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error should abort the current tick rather than a single instrument
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientBackend(_) | Error::Timeout(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::TransientBackend(format!("redis: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Error::Timeout(format!("http: {}", e));
        }
        Error::TransientBackend(format!("http: {}", e))
    }
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
