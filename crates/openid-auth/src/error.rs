//! Error taxonomy for OpenID relying party operations

/// Errors from protocol processing.
///
/// `AssociationUnavailable` is recoverable (the relying party drops to
/// stateless verification); every other variant is fatal to the current
/// authentication attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("association unavailable: {0}")]
    AssociationUnavailable(String),

    #[error("replay detected: {0}")]
    ReplayDetected(String),

    #[error("assertion does not match discovered endpoints: {0}")]
    DiscoveryMismatch(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("private relying party secret not found: {0}")]
    PrivateSecretNotFound(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("store error: {0}")]
    Store(String),
}

impl Error {
    /// Stable label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ProtocolViolation(_) => "protocol_violation",
            Error::AssociationUnavailable(_) => "association_unavailable",
            Error::ReplayDetected(_) => "replay_detected",
            Error::DiscoveryMismatch(_) => "discovery_mismatch",
            Error::SignatureInvalid(_) => "signature_invalid",
            Error::PrivateSecretNotFound(_) => "private_secret_not_found",
            Error::Http(_) => "http",
            Error::Discovery(_) => "discovery",
            Error::Store(_) => "store",
        }
    }
}

impl From<discovery::DiscoveryError> for Error {
    fn from(e: discovery::DiscoveryError) -> Self {
        Error::Discovery(e.to_string())
    }
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
