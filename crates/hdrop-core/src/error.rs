use thiserror::Error;

pub type HdropResult<T> = Result<T, HdropError>;

#[derive(Debug, Error)]
pub enum HdropError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("config error: {0}")]
    Config(String),

    #[error("network error: {context}: {source}")]
    Network {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection closed after {received} of {expected} bytes")]
    ConnectionClosed { expected: usize, received: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("chunk authentication failed: wrong key or tampered data")]
    AuthenticationFailure,

    #[error("malformed beacon: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error category, one per failure class a caller may react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Network,
    Protocol,
    Authentication,
    Serialization,
    Io,
}

impl HdropError {
    pub fn network(context: impl Into<String>, source: std::io::Error) -> Self {
        HdropError::Network {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HdropError::InvalidKeyLength(_) | HdropError::Config(_) => ErrorKind::Configuration,
            HdropError::Network { .. } | HdropError::Timeout(_) => ErrorKind::Network,
            HdropError::ConnectionClosed { .. } | HdropError::Protocol(_) | HdropError::Cancelled => {
                ErrorKind::Protocol
            }
            HdropError::AuthenticationFailure => ErrorKind::Authentication,
            HdropError::Serialization(_) => ErrorKind::Serialization,
            HdropError::Io(_) => ErrorKind::Io,
        }
    }
}
