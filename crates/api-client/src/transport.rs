//! reqwest-backed transport

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::{FetchRequest, RawResponse, Transport, TransportError};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-apisports-key";

/// Sends requests to `{base_url}/{endpoint}?{params}` over HTTPS.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    /// `host` is either a bare hostname (`v3.football.api-sports.io`, HTTPS is
    /// assumed) or a full `http(s)://` base URL.
    pub fn new(client: reqwest::Client, host: &str, timeout: Duration) -> Self {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };
        Self {
            client,
            base_url,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, request: &FetchRequest) -> Result<reqwest::Url, TransportError> {
        let raw = format!("{}/{}", self.base_url, request.endpoint.path());
        reqwest::Url::parse_with_params(&raw, &request.params)
            .map_err(|e| TransportError::Other(format!("invalid url {raw}: {e}")))
    }

    async fn send(
        &self,
        request: &FetchRequest,
        api_key: &str,
    ) -> Result<RawResponse, TransportError> {
        let url = self.url(request)?;
        debug!(%url, "sending upstream request");

        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_error)?;
        Ok(RawResponse { status, body })
    }
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

impl Transport for ReqwestTransport {
    fn get<'a>(
        &'a self,
        request: &'a FetchRequest,
        api_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, TransportError>> + Send + 'a>> {
        Box::pin(self.send(request, api_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tokio::net::TcpListener;

    /// Start a mock upstream that echoes the path, query and key header as an
    /// API-Football envelope. `/status` answers 503 and `/fixtures` answers
    /// only after five seconds.
    async fn start_echo_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{addr}");

        let handle = tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/fixtures",
                    axum::routing::get(|| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        "late"
                    }),
                )
                .route(
                    "/status",
                    axum::routing::get(|| async {
                        (StatusCode::SERVICE_UNAVAILABLE, "maintenance")
                    }),
                )
                .fallback(|request: axum::http::Request<axum::body::Body>| async move {
                    let key = request
                        .headers()
                        .get(API_KEY_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let body = serde_json::json!({
                        "get": request.uri().path(),
                        "parameters": request.uri().query().unwrap_or(""),
                        "errors": [],
                        "results": 1,
                        "response": [{"key": key}],
                    });
                    (StatusCode::OK, axum::Json(body))
                });
            axum::serve(listener, app).await.unwrap();
        });

        (url, handle)
    }

    #[test]
    fn bare_host_gets_https() {
        let t = ReqwestTransport::new(
            reqwest::Client::new(),
            "v3.football.api-sports.io",
            Duration::from_secs(30),
        );
        assert_eq!(t.base_url(), "https://v3.football.api-sports.io");
        let url = t.url(&FetchRequest::teams(1, 2022)).unwrap();
        assert_eq!(
            url.as_str(),
            "https://v3.football.api-sports.io/teams?league=1&season=2022"
        );
    }

    #[tokio::test]
    async fn sends_key_header_and_query() {
        let (url, _server) = start_echo_server().await;
        let t = ReqwestTransport::new(reqwest::Client::new(), &url, Duration::from_secs(5));

        let raw = t
            .get(&FetchRequest::squad(6), "test-key-123")
            .await
            .unwrap();
        assert_eq!(raw.status, 200);
        let body: serde_json::Value = serde_json::from_str(&raw.body).unwrap();
        assert_eq!(body["get"], "/players/squads");
        assert_eq!(body["parameters"], "team=6");
        assert_eq!(body["response"][0]["key"], "test-key-123");
    }

    #[tokio::test]
    async fn non_success_status_is_returned_raw() {
        let (url, _server) = start_echo_server().await;
        let t = ReqwestTransport::new(reqwest::Client::new(), &url, Duration::from_secs(5));

        let raw = t.get(&FetchRequest::status(), "k").await.unwrap();
        assert_eq!(raw.status, 503);
        assert_eq!(raw.body, "maintenance");
    }

    #[tokio::test]
    async fn timeout_maps_to_timeout_error() {
        let (url, _server) = start_echo_server().await;
        let t = ReqwestTransport::new(reqwest::Client::new(), &url, Duration::from_millis(100));

        let err = t
            .get(&FetchRequest::fixtures(1, 2022), "k")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn dead_upstream_maps_to_connect_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let t = ReqwestTransport::new(
            reqwest::Client::new(),
            &format!("http://{addr}"),
            Duration::from_secs(2),
        );
        let err = t.get(&FetchRequest::status(), "k").await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "got {err:?}");
    }
}
