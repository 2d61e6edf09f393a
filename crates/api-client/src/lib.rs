//! HTTP client for the API-Football REST API
//!
//! Sends one request at a time through a key chosen by the [`key_pool`],
//! classifies every response, and retries transient failures with
//! exponential backoff. The transport is a trait so the retry and failover
//! logic can run against an in-memory upstream.
//!
//! Per-attempt failures are data: `call` returns a [`FetchResult`] whose
//! `status` says how the request ended. Only conditions that stop a whole
//! run (no usable key, quota wait over budget, cancellation) are errors.

pub mod cancel;
pub mod classify;
pub mod client;
pub mod error;
pub mod retry;
pub mod transport;

pub use cancel::CancelSignal;
pub use classify::{Classification, classify_response};
pub use client::{ApiClient, ClientOptions};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use transport::ReqwestTransport;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Final outcome of a request after retries and failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    /// Upstream throttled the request (429 or rate-limit envelope)
    RateLimited,
    /// Key rejected (401/403 or suspension envelope), key gets disabled
    AuthFailed,
    /// Retryable failure: timeout, network error, 408, 5xx
    TransientError,
    /// Not worth retrying: other 4xx, malformed body, plan errors
    PermanentError,
}

impl FetchStatus {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::RateLimited => "rate_limited",
            FetchStatus::AuthFailed => "auth_failed",
            FetchStatus::TransientError => "transient_error",
            FetchStatus::PermanentError => "permanent_error",
        }
    }
}

/// Upstream endpoints used by the scraper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Teams,
    Squads,
    Players,
    Fixtures,
    Status,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Teams => "teams",
            Endpoint::Squads => "players/squads",
            Endpoint::Players => "players",
            Endpoint::Fixtures => "fixtures",
            Endpoint::Status => "status",
        }
    }
}

/// A single upstream GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub endpoint: Endpoint,
    pub params: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    /// Teams participating in a league season.
    pub fn teams(league: u32, season: u32) -> Self {
        Self::new(Endpoint::Teams)
            .param("league", league)
            .param("season", season)
    }

    /// Current squad of a team.
    pub fn squad(team: u64) -> Self {
        Self::new(Endpoint::Squads).param("team", team)
    }

    /// A player's statistics for one season, across all competitions.
    pub fn player_statistics(player: u64, season: u32) -> Self {
        Self::new(Endpoint::Players)
            .param("id", player)
            .param("season", season)
    }

    pub fn fixtures(league: u32, season: u32) -> Self {
        Self::new(Endpoint::Fixtures)
            .param("league", league)
            .param("season", season)
    }

    /// Account status. Does not count against the daily quota upstream.
    pub fn status() -> Self {
        Self::new(Endpoint::Status)
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint.path())?;
        let mut sep = '?';
        for (name, value) in &self.params {
            write!(f, "{sep}{name}={value}")?;
            sep = '&';
        }
        Ok(())
    }
}

/// Result of `ApiClient::call`.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: FetchStatus,
    /// Parsed JSON envelope when the upstream returned a well-formed body.
    pub payload: Option<serde_json::Value>,
    /// Attempts beyond the first, failover attempts included.
    pub retry_count: u32,
    /// Key used by the final attempt.
    pub credential_id: Option<String>,
    /// Human-readable reason for a non-success outcome.
    pub detail: Option<String>,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }

    /// Items of the envelope's `response` array. Empty when absent.
    pub fn rows(&self) -> &[serde_json::Value] {
        self.payload
            .as_ref()
            .and_then(|p| p.get("response"))
            .and_then(|r| r.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Raw upstream response before classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Network-level failure; every variant is retryable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Sends a request with a given API key.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Box<dyn Transport>`).
pub trait Transport: Send + Sync {
    fn get<'a>(
        &'a self,
        request: &'a FetchRequest,
        api_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<RawResponse, TransportError>> + Send + 'a>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn get<'a>(
        &'a self,
        request: &'a FetchRequest,
        api_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<RawResponse, TransportError>> + Send + 'a>>
    {
        (**self).get(request, api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_display_is_sorted_query() {
        let req = FetchRequest::player_statistics(154, 2022);
        assert_eq!(req.to_string(), "players?id=154&season=2022");
        assert_eq!(FetchRequest::status().to_string(), "status");
        assert_eq!(FetchRequest::squad(6).to_string(), "players/squads?team=6");
    }

    #[test]
    fn rows_reads_response_array() {
        let result = FetchResult {
            status: FetchStatus::Success,
            payload: Some(json!({"results": 2, "response": [{"a": 1}, {"a": 2}]})),
            retry_count: 0,
            credential_id: Some("key-1".into()),
            detail: None,
        };
        assert_eq!(result.rows().len(), 2);
    }

    #[test]
    fn rows_empty_without_payload_or_array() {
        let mut result = FetchResult {
            status: FetchStatus::TransientError,
            payload: None,
            retry_count: 3,
            credential_id: None,
            detail: Some("HTTP 500".into()),
        };
        assert!(result.rows().is_empty());

        result.payload = Some(json!({"response": {"account": {}}}));
        assert!(result.rows().is_empty());
    }

    #[test]
    fn status_labels() {
        assert_eq!(FetchStatus::AuthFailed.label(), "auth_failed");
        assert_eq!(
            serde_json::to_value(FetchStatus::TransientError).unwrap(),
            "transient_error"
        );
    }
}
