use thiserror::Error;

/// Errors produced by the ha-ws protocol and client layers.
///
/// `Clone` so a single terminal error can be handed to every outstanding
/// waiter when a connection goes away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HaError {
    #[error("connection is not ready (handshake not completed)")]
    NotReady,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("timeout")]
    Timeout,

    #[error("remote error [{code}]: {message}")]
    Remote { code: String, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("correlation id {0} is already registered")]
    AlreadyRegistered(u64),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl HaError {
    /// Build a `Remote` error from the hub's `{code, message}` descriptor.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        HaError::Remote {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for HaError {
    fn from(e: serde_json::Error) -> Self {
        HaError::Codec(e.to_string())
    }
}

pub type HaResult<T> = Result<T, HaError>;
