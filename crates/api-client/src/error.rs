//! Errors that stop a scrape run

use std::time::Duration;

/// Conditions no retry can cure. Per-attempt failures are reported through
/// `FetchStatus` instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no available credential: {0}")]
    NoAvailableCredential(String),

    #[error(
        "quota wait of {needed:?} exceeds remaining budget {remaining:?}; re-run once quota resets"
    )]
    QuotaWaitExceeded { needed: Duration, remaining: Duration },

    #[error("cancelled")]
    Cancelled,

    #[error("credential error: {0}")]
    Pool(key_pool::Error),

    #[error("retry state machine stalled in {0}")]
    Stalled(String),
}

impl From<key_pool::Error> for Error {
    fn from(err: key_pool::Error) -> Self {
        match err {
            key_pool::Error::NoAvailableCredential(msg) => Error::NoAvailableCredential(msg),
            other => Error::Pool(other),
        }
    }
}

impl Error {
    /// True for errors a later run can recover from once quota frees up.
    pub fn is_quota(&self) -> bool {
        matches!(self, Error::QuotaWaitExceeded { .. })
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
