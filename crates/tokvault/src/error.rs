//! Error types for session store operations.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a session store or session façade.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No record exists for the token.
    #[error("token not found")]
    NotFound,

    /// A record existed but its expiration has lapsed.
    ///
    /// Distinct from [`Error::NotFound`] so callers can tell "never logged
    /// in" apart from "session timed out".
    #[error("token expired")]
    Expired,

    /// Filesystem failure from the file backend.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote backend failure, including partial pipeline failures and
    /// network timeouts.
    #[error("backend error: {0}")]
    Backend(String),

    /// A stored payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
