//! API key pool with per-key sliding-window quotas
//!
//! Holds every configured API-Football key, counts the calls made with each
//! one inside a trailing 60-second window and a trailing 24-hour window, and
//! hands out the least-loaded key that still has room in both.
//!
//! Key lifecycle:
//! 1. Keys are registered at startup, all enabled
//! 2. `acquire` picks a key, the caller records the attempt right before sending
//! 3. A full key is skipped until its oldest timestamp leaves the window
//! 4. An authorization failure disables the key for the rest of the process
//!
//! The pool is single-writer: every mutating method takes `&mut self` and the
//! pool is owned by exactly one HTTP client. Parallel fetching would need a
//! lock around each ledger and an atomic select-then-record step.

pub mod credential;
pub mod error;
pub mod pool;
pub mod window;

pub use credential::Credential;
pub use error::{Error, Result};
pub use pool::{Acquire, CredentialStatus, KeyPool, PoolStatus, QuotaLimits, SelectedKey};
pub use window::{RateLimiter, SlidingWindow};
