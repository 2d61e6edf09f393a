//! Service-specific error types

use thiserror::Error;

/// Errors that end a scraper command.
///
/// Per-unit fetch failures never reach this type: the orchestrator logs them
/// and moves on. Only run-stopping client errors and local I/O failures do.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] api_client::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("progress file error: {0}")]
    Progress(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl Error {
    /// True when the run stopped because the user interrupted it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Client(api_client::Error::Cancelled))
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_display_transparently() {
        let err = Error::from(api_client::Error::NoAvailableCredential(
            "all 2 credentials disabled".into(),
        ));
        assert_eq!(
            err.to_string(),
            "no available credential: all 2 credentials disabled"
        );
        assert!(!err.is_cancelled());
        assert!(Error::from(api_client::Error::Cancelled).is_cancelled());
    }

    #[test]
    fn progress_error_mentions_file() {
        let err = Error::Progress("unexpected end of input".into());
        assert!(err.to_string().starts_with("progress file error"));
    }
}
