//! Key selection, disable bookkeeping and status reporting
//!
//! Selection picks the enabled key with the fewest calls in its minute
//! window among the keys that have room in both windows. Equal loads are
//! broken by a rotating start index so keys alternate. When every enabled
//! key is full the pool reports how long until the first slot frees; it
//! never sleeps itself.

use common::Secret;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::window::RateLimiter;

/// Per-key call ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub per_minute: u32,
    pub per_day: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            per_minute: 10,
            per_day: 100,
        }
    }
}

/// A key chosen for the next request.
#[derive(Debug, Clone)]
pub struct SelectedKey {
    pub id: String,
    pub secret: Secret<String>,
}

/// Outcome of a selection attempt.
#[derive(Debug)]
pub enum Acquire {
    Ready(SelectedKey),
    /// Every enabled key is at its ceiling; retry after this long.
    Wait(Duration),
}

/// Status snapshot of a single key.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub id: String,
    pub key_preview: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    pub used_last_minute: u32,
    pub remaining_minute: u32,
    pub used_last_day: u32,
    pub remaining_day: u32,
}

/// Status snapshot of the whole pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    /// "healthy", "degraded" or "unhealthy"
    pub status: &'static str,
    pub credentials_total: usize,
    pub credentials_active: usize,
    pub credentials_available: usize,
    pub credentials_disabled: usize,
    pub credentials: Vec<CredentialStatus>,
}

/// Pool of API keys owned by a single HTTP client.
pub struct KeyPool {
    credentials: Vec<Credential>,
    next_index: usize,
    limits: QuotaLimits,
}

impl KeyPool {
    /// Build a pool from `(id, secret)` pairs. All keys start enabled.
    pub fn new(keys: Vec<(String, Secret<String>)>, limits: QuotaLimits) -> Self {
        let credentials: Vec<Credential> = keys
            .into_iter()
            .map(|(id, secret)| {
                Credential::new(id, secret, RateLimiter::new(limits.per_minute, limits.per_day))
            })
            .collect();
        info!(
            credentials = credentials.len(),
            per_minute = limits.per_minute,
            per_day = limits.per_day,
            "key pool initialized"
        );
        metrics::gauge!("scraper_credentials_active").set(credentials.len() as f64);
        Self {
            credentials,
            next_index: 0,
            limits,
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Number of keys not disabled.
    pub fn active_count(&self) -> usize {
        self.credentials.iter().filter(|c| c.enabled).count()
    }

    pub fn ids(&self) -> Vec<String> {
        self.credentials.iter().map(|c| c.id.clone()).collect()
    }

    pub fn credential(&self, id: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.id == id)
    }

    fn credential_mut(&mut self, id: &str) -> Result<&mut Credential> {
        self.credentials
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Select the next key, or report how long until one frees.
    ///
    /// Fails with `NoAvailableCredential` when the pool is empty or every key
    /// has been disabled; a wait can never cure that.
    pub fn acquire(&mut self) -> Result<Acquire> {
        let n = self.credentials.len();
        if n == 0 {
            return Err(Error::NoAvailableCredential("no credentials configured".into()));
        }

        let now = Instant::now();
        let start = self.next_index % n;
        let mut best: Option<(usize, u32)> = None;
        let mut shortest_wait: Option<Duration> = None;

        for offset in 0..n {
            let idx = (start + offset) % n;
            let credential = &mut self.credentials[idx];
            if !credential.enabled {
                continue;
            }
            if credential.limiter.would_exceed(now) {
                let wait = credential.limiter.next_free_in(now);
                shortest_wait = Some(shortest_wait.map_or(wait, |w| w.min(wait)));
                continue;
            }
            let load = credential.limiter.minute().count(now);
            if best.is_none_or(|(_, best_load)| load < best_load) {
                best = Some((idx, load));
            }
        }

        if let Some((idx, load)) = best {
            self.next_index = idx + 1;
            let credential = &self.credentials[idx];
            debug!(credential_id = %credential.id, load, "credential selected");
            return Ok(Acquire::Ready(SelectedKey {
                id: credential.id.clone(),
                secret: credential.secret.clone(),
            }));
        }

        match shortest_wait {
            Some(wait) => {
                debug!(wait_ms = wait.as_millis() as u64, "all credentials at quota");
                Ok(Acquire::Wait(wait))
            }
            None => Err(Error::NoAvailableCredential(format!(
                "all {n} credentials disabled"
            ))),
        }
    }

    /// Count one call against a key. Called right before the request is sent,
    /// so failed attempts still consume quota.
    pub fn record(&mut self, id: &str) -> Result<()> {
        let credential = self.credential_mut(id)?;
        credential.limiter.record(Instant::now());
        Ok(())
    }

    /// Disable a key for the rest of the process.
    ///
    /// Idempotent: returns `Ok(false)` when the key was already disabled and
    /// keeps the first reason.
    pub fn disable(&mut self, id: &str, reason: &str) -> Result<bool> {
        let changed = self.credential_mut(id)?.disable(reason);
        if changed {
            let active = self.active_count();
            warn!(credential_id = id, reason, active, "credential disabled");
            metrics::counter!("scraper_credentials_disabled_total").increment(1);
            metrics::gauge!("scraper_credentials_active").set(active as f64);
        }
        Ok(changed)
    }

    /// Pool status for the `status` command and end-of-run reporting.
    ///
    /// Status mapping: every key enabled with room → healthy, at least one key
    /// usable now → degraded, none usable → unhealthy.
    pub fn status(&mut self) -> PoolStatus {
        let now = Instant::now();
        let mut credentials = Vec::with_capacity(self.credentials.len());
        let mut available = 0usize;

        for c in self.credentials.iter_mut() {
            if c.enabled && !c.limiter.would_exceed(now) {
                available += 1;
            }
            credentials.push(CredentialStatus {
                id: c.id.clone(),
                key_preview: c.secret.preview(),
                enabled: c.enabled,
                disabled_reason: c.disabled_reason.clone(),
                used_last_minute: c.limiter.minute().count(now),
                remaining_minute: c.limiter.minute().remaining(now),
                used_last_day: c.limiter.day().count(now),
                remaining_day: c.limiter.day().remaining(now),
            });
        }

        let total = credentials.len();
        let active = credentials.iter().filter(|c| c.enabled).count();
        let status = if total > 0 && available == total {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        PoolStatus {
            status,
            credentials_total: total,
            credentials_active: active,
            credentials_available: available,
            credentials_disabled: total - active,
            credentials,
        }
    }
}
