use thiserror::Error;

use crate::dns::ParseError;

/// Unified error type for the proxy's core pipeline, collapsed into one
/// `thiserror`-derived enum following the crate's established error-module
/// convention.
#[derive(Debug, Clone, Error)]
pub enum WardenError {
    /// Wire bytes could not be decoded into a `DecodedPacket`.
    #[error("malformed DNS packet: {0}")]
    MalformedPacket(#[from] ParseError),

    /// A single upstream provider call failed (HTTP, network, or timeout).
    #[error("upstream {provider} failed: {reason}")]
    Upstream { provider: String, reason: String },

    /// Every configured provider failed for this query.
    #[error("all providers failed")]
    AllProvidersFailed,

    /// A driver's I/O failed. Always swallowed by the resolver; carried
    /// here only so drivers have something concrete to log.
    #[error("driver error ({driver}): {source}")]
    Driver { driver: &'static str, source: String },

    /// The persisted config document was missing or malformed.
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for WardenError {
    fn from(err: std::io::Error) -> Self {
        WardenError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
