//! Configuration error types

use thiserror::Error;

/// Errors raised while loading and validating configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No API keys configured: set {0}")]
    MissingCredentials(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let config_err = Error::Config("requests_per_key_per_minute must be > 0".into());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: requests_per_key_per_minute must be > 0"
        );

        let missing = Error::MissingCredentials("API_FOOTBALL_KEY".into());
        assert!(missing.to_string().contains("API_FOOTBALL_KEY"));

        let invalid = Error::InvalidValue {
            key: "MAX_RETRIES".into(),
            value: "many".into(),
        };
        assert_eq!(invalid.to_string(), "Invalid value for MAX_RETRIES: \"many\"");
    }

    #[test]
    fn io_error_converts() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found").into();
        assert!(err.to_string().starts_with("I/O error:"), "got: {err}");
    }
}
