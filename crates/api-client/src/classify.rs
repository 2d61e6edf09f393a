//! Response classification
//!
//! API-Football answers most application errors with HTTP 200 and a
//! non-empty `errors` field in the JSON envelope, so the body is inspected
//! as well as the status code.

use serde_json::Value;

use crate::FetchStatus;

/// Envelope error phrases meaning the key itself is unusable for the rest
/// of the run: suspended account, invalid key, or daily allowance spent.
const DISABLE_PATTERNS: &[&str] = &[
    "suspended",
    "application key",
    "request limit for the day",
];

/// Envelope error phrases meaning a short-term throttle.
const RATE_LIMIT_PATTERNS: &[&str] = &["ratelimit", "rate limit", "too many requests"];

/// Classified response.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: FetchStatus,
    pub payload: Option<Value>,
    pub detail: Option<String>,
}

impl Classification {
    fn new(status: FetchStatus, payload: Option<Value>, detail: Option<String>) -> Self {
        Self {
            status,
            payload,
            detail,
        }
    }

    /// Network-level failure without a response.
    pub fn transport_failure(detail: String) -> Self {
        Self::new(FetchStatus::TransientError, None, Some(detail))
    }
}

/// Flatten the envelope's `errors` field into one lowercase string.
///
/// The field is `[]` when empty, otherwise an object such as
/// `{"rateLimit": "Too many requests..."}` or an array of messages. Object
/// keys are kept because they carry the error kind.
fn error_text(errors: &Value) -> Option<String> {
    let text = match errors {
        Value::Object(map) if !map.is_empty() => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}: {s}"),
                other => format!("{k}: {other}"),
            })
            .collect::<Vec<_>>()
            .join("; "),
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join("; "),
        Value::String(s) if !s.is_empty() => s.clone(),
        _ => return None,
    };
    Some(text)
}

fn matches_any(text: &str, patterns: &[&str]) -> bool {
    let lower = text.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

/// Classify an upstream response by HTTP status and body.
///
/// - 2xx: parse JSON. Malformed → PermanentError. Envelope errors are
///   matched against key-disable and rate-limit phrases; anything else is a
///   PermanentError. An empty `response` with no errors is a Success.
/// - 401/403 → AuthFailed
/// - 429 → RateLimited
/// - 408/5xx → TransientError
/// - everything else → PermanentError
pub fn classify_response(status: u16, body: &str) -> Classification {
    match status {
        200..=299 => classify_envelope(body),
        401 | 403 => Classification::new(
            FetchStatus::AuthFailed,
            None,
            Some(format!("HTTP {status}")),
        ),
        429 => Classification::new(
            FetchStatus::RateLimited,
            None,
            Some("HTTP 429".to_string()),
        ),
        408 | 500..=599 => Classification::new(
            FetchStatus::TransientError,
            None,
            Some(format!("HTTP {status}")),
        ),
        _ => Classification::new(
            FetchStatus::PermanentError,
            None,
            Some(format!("HTTP {status}")),
        ),
    }
}

fn classify_envelope(body: &str) -> Classification {
    let payload: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            return Classification::new(
                FetchStatus::PermanentError,
                None,
                Some(format!("malformed response body: {e}")),
            );
        }
    };

    let Some(text) = payload.get("errors").and_then(error_text) else {
        return Classification::new(FetchStatus::Success, Some(payload), None);
    };

    let status = if matches_any(&text, DISABLE_PATTERNS) {
        FetchStatus::AuthFailed
    } else if matches_any(&text, RATE_LIMIT_PATTERNS) {
        FetchStatus::RateLimited
    } else {
        FetchStatus::PermanentError
    };
    Classification::new(status, Some(payload), Some(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_is_success() {
        let body = r#"{"get":"teams","errors":[],"results":1,"response":[{"team":{"id":26}}]}"#;
        let c = classify_response(200, body);
        assert_eq!(c.status, FetchStatus::Success);
        assert_eq!(c.payload.unwrap()["results"], 1);
        assert!(c.detail.is_none());
    }

    #[test]
    fn empty_response_is_success() {
        let body = r#"{"get":"players","errors":[],"results":0,"response":[]}"#;
        assert_eq!(classify_response(200, body).status, FetchStatus::Success);
    }

    #[test]
    fn malformed_body_is_permanent() {
        let c = classify_response(200, "<html>oops</html>");
        assert_eq!(c.status, FetchStatus::PermanentError);
        assert!(c.detail.unwrap().contains("malformed"));
    }

    #[test]
    fn rate_limit_envelope() {
        let body = r#"{"errors":{"rateLimit":"Too many requests. Your rate limit is 10 requests per minute."},"response":[]}"#;
        assert_eq!(classify_response(200, body).status, FetchStatus::RateLimited);
    }

    #[test]
    fn suspended_envelope_is_auth_failed() {
        let body = r#"{"errors":{"access":"Your account is suspended"},"response":[]}"#;
        let c = classify_response(200, body);
        assert_eq!(c.status, FetchStatus::AuthFailed);
        assert!(c.detail.unwrap().contains("suspended"));
    }

    #[test]
    fn missing_key_envelope_is_auth_failed() {
        let body = r#"{"errors":{"token":"Error/Missing application key. Go to https://www.api-football.com/documentation-v3 to learn how to get your API application key."}}"#;
        assert_eq!(classify_response(200, body).status, FetchStatus::AuthFailed);
    }

    #[test]
    fn daily_limit_envelope_is_auth_failed() {
        let body = r#"{"errors":{"requests":"You have reached the request limit for the day, Go to https://dashboard.api-football.com to upgrade your plan."}}"#;
        assert_eq!(classify_response(200, body).status, FetchStatus::AuthFailed);
    }

    #[test]
    fn plan_envelope_is_permanent() {
        let body = r#"{"errors":{"plan":"Free plans do not have access to this season, try from 2021 to 2023."}}"#;
        let c = classify_response(200, body);
        assert_eq!(c.status, FetchStatus::PermanentError);
        assert!(c.payload.is_some());
    }

    #[test]
    fn array_errors_are_read() {
        let body = r#"{"errors":["Too many requests"]}"#;
        assert_eq!(classify_response(200, body).status, FetchStatus::RateLimited);
    }

    #[test]
    fn status_code_table() {
        assert_eq!(classify_response(401, "").status, FetchStatus::AuthFailed);
        assert_eq!(classify_response(403, "").status, FetchStatus::AuthFailed);
        assert_eq!(classify_response(429, "").status, FetchStatus::RateLimited);
        assert_eq!(classify_response(408, "").status, FetchStatus::TransientError);
        assert_eq!(classify_response(500, "").status, FetchStatus::TransientError);
        assert_eq!(classify_response(503, "").status, FetchStatus::TransientError);
        assert_eq!(classify_response(404, "").status, FetchStatus::PermanentError);
        assert_eq!(classify_response(400, "").status, FetchStatus::PermanentError);
    }

    #[test]
    fn status_detail_names_code() {
        assert_eq!(classify_response(502, "").detail.as_deref(), Some("HTTP 502"));
    }
}
