//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no available credential: {0}")]
    NoAvailableCredential(String),

    #[error("credential not found: {0}")]
    NotFound(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
