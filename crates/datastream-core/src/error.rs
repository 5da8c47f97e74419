use thiserror::Error;

/// Canonical result for the stream protocol.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Terminal error carried by a `ClosedWithError` endpoint.
///
/// The same error value is delivered to every peer a close propagates to, so
/// it is `Clone` and comparable; causes are flattened into messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("upstream failed: {0}")]
    Upstream(String),

    #[error("downstream failed: {0}")]
    Downstream(String),

    #[error("storage failed: {0}")]
    Storage(String),

    /// A push while suspended/unbound, a double bind, and similar misuse.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StreamError {
    pub fn upstream(msg: impl Into<String>) -> Self {
        StreamError::Upstream(msg.into())
    }

    pub fn downstream(msg: impl Into<String>) -> Self {
        StreamError::Downstream(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        StreamError::Storage(msg.into())
    }
}
