//! A single API key and its usage ledger

use common::Secret;

use crate::window::RateLimiter;

/// One configured API key.
///
/// `enabled` only ever goes from true to false; the first disable reason is
/// kept for status reporting.
#[derive(Debug)]
pub struct Credential {
    pub id: String,
    pub secret: Secret<String>,
    pub enabled: bool,
    pub disabled_reason: Option<String>,
    pub limiter: RateLimiter,
}

impl Credential {
    pub fn new(id: impl Into<String>, secret: Secret<String>, limiter: RateLimiter) -> Self {
        Self {
            id: id.into(),
            secret,
            enabled: true,
            disabled_reason: None,
            limiter,
        }
    }

    /// Disable the credential. Returns false when it was already disabled.
    pub fn disable(&mut self, reason: &str) -> bool {
        if !self.enabled {
            return false;
        }
        self.enabled = false;
        self.disabled_reason = Some(reason.to_string());
        true
    }
}
