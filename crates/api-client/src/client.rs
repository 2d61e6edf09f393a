//! Request execution: key selection, quota waits, retry and failover
//!
//! Every attempt is recorded against the chosen key before it is sent, so
//! failed attempts consume quota the same way the upstream counts them.

use std::sync::Arc;
use std::time::Duration;

use key_pool::{Acquire, KeyPool, SelectedKey};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::classify::{Classification, classify_response};
use crate::error::{Error, Result};
use crate::retry::{self, RetryAction, RetryEvent, RetryPolicy, RetryState};
use crate::{FetchRequest, FetchResult, FetchStatus, Transport};

/// Tunables for `ApiClient`.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub retry: RetryPolicy,
    /// Upper bound on the total time one call may spend waiting for quota.
    pub max_quota_wait: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_quota_wait: Duration::from_secs(300),
        }
    }
}

/// Single-flight API client. Owns the key pool.
pub struct ApiClient {
    pool: KeyPool,
    transport: Box<dyn Transport>,
    options: ClientOptions,
    cancel: Arc<CancelSignal>,
    total_requests: u64,
}

impl ApiClient {
    pub fn new(
        pool: KeyPool,
        transport: Box<dyn Transport>,
        options: ClientOptions,
        cancel: Arc<CancelSignal>,
    ) -> Self {
        Self {
            pool,
            transport,
            options,
            cancel,
            total_requests: 0,
        }
    }

    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut KeyPool {
        &mut self.pool
    }

    pub fn cancel_signal(&self) -> &Arc<CancelSignal> {
        &self.cancel
    }

    /// Attempts sent upstream by this client, retries included.
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Execute a request with retry, failover and quota waits.
    ///
    /// Returns `Ok` with the final classification for every outcome the
    /// caller can skip past, and `Err` only for run-stopping conditions.
    pub async fn call(&mut self, request: &FetchRequest) -> Result<FetchResult> {
        let endpoint = request.endpoint.path();
        let started = Instant::now();
        let mut waited = Duration::ZERO;
        let mut attempts = 0u32;
        let mut last = Classification::transport_failure("no attempt made".into());
        let mut last_key: Option<String> = None;
        let (mut state, mut action) = RetryState::start();

        loop {
            match action {
                RetryAction::Send => {
                    let key = self.acquire_key(&mut waited).await?;
                    self.pool.record(&key.id)?;
                    attempts += 1;
                    self.total_requests += 1;

                    let classification =
                        match self.transport.get(request, key.secret.expose()).await {
                            Ok(raw) => classify_response(raw.status, &raw.body),
                            Err(e) => Classification::transport_failure(e.to_string()),
                        };
                    self.observe_attempt(request, &key, attempts, &classification)?;

                    (state, action) = retry::handle(
                        &self.options.retry,
                        state,
                        RetryEvent::Outcome(classification.status),
                    );
                    last = classification;
                    last_key = Some(key.id);
                }
                RetryAction::Sleep(delay) => {
                    debug!(
                        request = %request,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    metrics::counter!("scraper_retries_total", "endpoint" => endpoint)
                        .increment(1);
                    self.sleep(delay).await?;
                    (state, action) =
                        retry::handle(&self.options.retry, state, RetryEvent::BackoffElapsed);
                }
                RetryAction::Finish(status) => {
                    metrics::counter!(
                        "scraper_requests_total",
                        "endpoint" => endpoint,
                        "status" => status.label()
                    )
                    .increment(1);
                    metrics::histogram!("scraper_request_duration_seconds", "endpoint" => endpoint)
                        .record(started.elapsed().as_secs_f64());

                    let detail = if status == FetchStatus::Success {
                        None
                    } else {
                        last.detail
                    };
                    return Ok(FetchResult {
                        status,
                        payload: last.payload,
                        retry_count: attempts.saturating_sub(1),
                        credential_id: last_key,
                        detail,
                    });
                }
                RetryAction::None => return Err(Error::Stalled(format!("{state:?}"))),
            }
        }
    }

    /// Fetch upstream account status with one specific key.
    ///
    /// Informational: no retry, and the call is not counted against the
    /// key's local windows because the upstream does not count it either.
    pub async fn account_status(&self, credential_id: &str) -> Result<FetchResult> {
        let credential = self
            .pool
            .credential(credential_id)
            .ok_or_else(|| Error::Pool(key_pool::Error::NotFound(credential_id.to_string())))?;
        let request = FetchRequest::status();
        let classification = match self
            .transport
            .get(&request, credential.secret.expose())
            .await
        {
            Ok(raw) => classify_response(raw.status, &raw.body),
            Err(e) => Classification::transport_failure(e.to_string()),
        };
        Ok(FetchResult {
            status: classification.status,
            payload: classification.payload,
            retry_count: 0,
            credential_id: Some(credential_id.to_string()),
            detail: classification.detail,
        })
    }

    /// Select a key, sleeping while the pool reports every key at quota.
    async fn acquire_key(&mut self, waited: &mut Duration) -> Result<SelectedKey> {
        loop {
            match self.pool.acquire()? {
                Acquire::Ready(key) => return Ok(key),
                Acquire::Wait(wait) => {
                    let remaining = self.options.max_quota_wait.saturating_sub(*waited);
                    if wait > remaining {
                        warn!(
                            wait_secs = wait.as_secs(),
                            remaining_secs = remaining.as_secs(),
                            "quota wait exceeds budget"
                        );
                        return Err(Error::QuotaWaitExceeded {
                            needed: wait,
                            remaining,
                        });
                    }
                    info!(
                        wait_secs = wait.as_secs_f64(),
                        "all credentials at quota, waiting for a slot"
                    );
                    metrics::counter!("scraper_quota_waits_total").increment(1);
                    self.sleep(wait).await?;
                    *waited += wait;
                }
            }
        }
    }

    /// Log the attempt and apply its effect on the pool.
    fn observe_attempt(
        &mut self,
        request: &FetchRequest,
        key: &SelectedKey,
        attempt: u32,
        classification: &Classification,
    ) -> Result<()> {
        let detail = classification.detail.as_deref().unwrap_or("");
        match classification.status {
            FetchStatus::Success => {
                debug!(request = %request, credential_id = %key.id, attempt, "request succeeded");
            }
            FetchStatus::AuthFailed => {
                warn!(
                    request = %request,
                    credential_id = %key.id,
                    attempt,
                    detail,
                    "credential rejected upstream"
                );
                self.pool.disable(&key.id, detail)?;
            }
            status => {
                warn!(
                    request = %request,
                    credential_id = %key.id,
                    attempt,
                    status = status.label(),
                    detail,
                    "request attempt failed"
                );
            }
        }
        Ok(())
    }

    /// Sleep unless cancelled first.
    async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}
