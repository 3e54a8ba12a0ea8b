use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilamentError {
    #[error("Cannot resolve configuration: {0}")]
    ConfigResolution(String),

    #[error("Service '{0}' is not registered on any node")]
    ServiceNotFound(String),

    #[error("Node '{node}' unavailable: {detail}")]
    NodeUnavailable { node: String, detail: String },

    #[error("Request timeout after {0}ms")]
    RequestTimeout(u64),

    #[error("Circuit breaker is open for '{service}.{action}' on node '{node}'")]
    CircuitBreakerOpen {
        service: String,
        action: String,
        node: String,
    },

    #[error("Max call level reached ({0}), the call graph probably contains a loop")]
    MaxCallLevel(u32),

    #[error("Call rejected: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FilamentError {
    /// Transient errors may succeed against a different target; the invoker
    /// retries them while its retry budget lasts. Everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FilamentError::NodeUnavailable { .. }
                | FilamentError::RequestTimeout(_)
                | FilamentError::CircuitBreakerOpen { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FilamentError>;
