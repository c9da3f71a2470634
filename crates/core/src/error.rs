//! Error taxonomy shared by all janitor crates.

use thiserror::Error;

/// Malformed marker or object content; scoped to a single object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("TTL value {0:?} does not match format (e.g. 60s, 5m, 8h, 7d, 2w)")]
    Ttl(String),
    #[error("expiry value {0:?} does not match any supported format")]
    Expiry(String),
    #[error("object is missing {0}")]
    Object(&'static str),
}

/// Failure of a single cluster API call.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport: {0:#}")]
    Transport(anyhow::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

impl From<anyhow::Error> for ClientError {
    fn from(e: anyhow::Error) -> Self {
        ClientError::Transport(e)
    }
}

#[derive(Debug, Error)]
pub enum JanitorError {
    #[error("invalid format: {0}")]
    InvalidFormat(#[from] FormatError),
    #[error("predicate: {0}")]
    Predicate(String),
    #[error(transparent)]
    Transport(#[from] ClientError),
    #[error("config: {0}")]
    Config(String),
}
