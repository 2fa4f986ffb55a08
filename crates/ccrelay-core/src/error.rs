use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credentials(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Short error code string used in client-facing error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "CONFIG_ERROR",
            RelayError::Credentials(_) => "CREDENTIAL_ERROR",
            RelayError::Upstream(_) => "UPSTREAM_ERROR",
            RelayError::Serialization(_) => "SERIALIZATION_ERROR",
            RelayError::Io(_) => "IO_ERROR",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
