//! Retry state machine
//!
//! Pure state machine: receives the outcome of an attempt, returns
//! (new_state, action). `ApiClient::call` executes the I/O implied by each
//! action.
//!
//! Transient outcomes get `max_retries` retries. Rate-limited outcomes use
//! the same backoff schedule but stop after `MAX_RATE_LIMITED_ATTEMPTS`
//! rate-limited attempts. An auth failure disables the key (done by the
//! caller) and gets one failover attempt on another key without consuming
//! either budget.

use std::time::Duration;

use crate::FetchStatus;

/// Failover attempts granted after an authorization failure.
pub const MAX_FAILOVERS: u32 = 1;

/// Rate-limited attempts of one call before it gives up as transient.
pub const MAX_RATE_LIMITED_ATTEMPTS: u32 = 3;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Attempt counters carried through the non-terminal states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attempts {
    /// Retries taken so far; indexes the backoff schedule
    pub retries: u32,
    /// Attempts answered with a rate limit
    pub rate_limited: u32,
    pub failovers: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    /// An attempt is in flight
    Attempting(Attempts),
    /// Waiting before the next attempt
    Backoff { attempts: Attempts, delay: Duration },
    /// Terminal: upstream answered successfully
    Succeeded,
    /// Terminal: retry budget spent on rate-limited/transient outcomes
    ExhaustedTransient,
    /// Terminal: permanent error or auth failure with no failover left
    Failed { status: FetchStatus },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// The current attempt finished with this classification
    Outcome(FetchStatus),
    /// The backoff delay elapsed
    BackoffElapsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Acquire a key and send the request
    Send,
    /// Sleep, then deliver `BackoffElapsed`
    Sleep(Duration),
    /// Stop and report this final status
    Finish(FetchStatus),
    /// No-op
    None,
}

impl RetryState {
    /// Initial state and the first action.
    pub fn start() -> (RetryState, RetryAction) {
        (
            RetryState::Attempting(Attempts::default()),
            RetryAction::Send,
        )
    }

    /// Attempts beyond the first, failovers included.
    pub fn extra_attempts(&self) -> u32 {
        match self {
            RetryState::Attempting(a) | RetryState::Backoff { attempts: a, .. } => {
                a.retries + a.failovers
            }
            _ => 0,
        }
    }
}

fn back_off(policy: &RetryPolicy, attempts: Attempts) -> (RetryState, RetryAction) {
    let delay = policy.delay_for(attempts.retries);
    (
        RetryState::Backoff { attempts, delay },
        RetryAction::Sleep(delay),
    )
}

fn exhausted() -> (RetryState, RetryAction) {
    (
        RetryState::ExhaustedTransient,
        RetryAction::Finish(FetchStatus::TransientError),
    )
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle(
    policy: &RetryPolicy,
    state: RetryState,
    event: RetryEvent,
) -> (RetryState, RetryAction) {
    match (state, event) {
        (RetryState::Attempting(_), RetryEvent::Outcome(FetchStatus::Success)) => (
            RetryState::Succeeded,
            RetryAction::Finish(FetchStatus::Success),
        ),

        (RetryState::Attempting(attempts), RetryEvent::Outcome(FetchStatus::RateLimited)) => {
            let attempts = Attempts {
                rate_limited: attempts.rate_limited + 1,
                ..attempts
            };
            if attempts.rate_limited < MAX_RATE_LIMITED_ATTEMPTS
                && attempts.retries < policy.max_retries
            {
                back_off(policy, attempts)
            } else {
                exhausted()
            }
        }

        (RetryState::Attempting(attempts), RetryEvent::Outcome(FetchStatus::TransientError)) => {
            if attempts.retries < policy.max_retries {
                back_off(policy, attempts)
            } else {
                exhausted()
            }
        }

        (RetryState::Attempting(attempts), RetryEvent::Outcome(FetchStatus::AuthFailed))
            if attempts.failovers < MAX_FAILOVERS =>
        {
            (
                RetryState::Attempting(Attempts {
                    failovers: attempts.failovers + 1,
                    ..attempts
                }),
                RetryAction::Send,
            )
        }

        (RetryState::Attempting(_), RetryEvent::Outcome(FetchStatus::AuthFailed)) => (
            RetryState::Failed {
                status: FetchStatus::AuthFailed,
            },
            RetryAction::Finish(FetchStatus::AuthFailed),
        ),

        (RetryState::Attempting(_), RetryEvent::Outcome(FetchStatus::PermanentError)) => (
            RetryState::Failed {
                status: FetchStatus::PermanentError,
            },
            RetryAction::Finish(FetchStatus::PermanentError),
        ),

        (RetryState::Backoff { attempts, .. }, RetryEvent::BackoffElapsed) => (
            RetryState::Attempting(Attempts {
                retries: attempts.retries + 1,
                ..attempts
            }),
            RetryAction::Send,
        ),

        (state, _event) => (state, RetryAction::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Drive the machine with the same outcome until it finishes, collecting
    /// every sleep it asks for.
    fn run_with(outcome: FetchStatus, policy: &RetryPolicy) -> (Vec<Duration>, FetchStatus, u32) {
        let (mut state, mut action) = RetryState::start();
        let mut sleeps = Vec::new();
        let mut sends = 0;
        loop {
            match action {
                RetryAction::Send => {
                    sends += 1;
                    (state, action) = handle(policy, state, RetryEvent::Outcome(outcome));
                }
                RetryAction::Sleep(d) => {
                    sleeps.push(d);
                    (state, action) = handle(policy, state, RetryEvent::BackoffElapsed);
                }
                RetryAction::Finish(status) => return (sleeps, status, sends),
                RetryAction::None => panic!("stalled in {state:?}"),
            }
        }
    }

    #[test]
    fn success_finishes_immediately() {
        let (sleeps, status, sends) = run_with(FetchStatus::Success, &policy());
        assert!(sleeps.is_empty());
        assert_eq!(status, FetchStatus::Success);
        assert_eq!(sends, 1);
    }

    #[test]
    fn transient_backoff_values_double() {
        let (sleeps, status, sends) = run_with(FetchStatus::TransientError, &policy());
        assert_eq!(
            sleeps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(status, FetchStatus::TransientError);
        assert_eq!(sends, 4);
    }

    #[test]
    fn rate_limited_gives_up_after_three_attempts() {
        let (sleeps, status, sends) = run_with(FetchStatus::RateLimited, &policy());
        assert_eq!(sleeps, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(status, FetchStatus::TransientError);
        assert_eq!(sends, MAX_RATE_LIMITED_ATTEMPTS);
    }

    #[test]
    fn rate_limit_cap_counts_only_rate_limited_attempts() {
        let p = policy();
        let (mut state, _) = RetryState::start();
        for outcome in [
            FetchStatus::TransientError,
            FetchStatus::RateLimited,
            FetchStatus::RateLimited,
        ] {
            let (next, action) = handle(&p, state, RetryEvent::Outcome(outcome));
            assert!(matches!(action, RetryAction::Sleep(_)), "got {action:?}");
            (state, _) = handle(&p, next, RetryEvent::BackoffElapsed);
        }
        // Two rate limits so far; the third ends the call.
        assert_eq!(
            state,
            RetryState::Attempting(Attempts {
                retries: 3,
                rate_limited: 2,
                failovers: 0
            })
        );
        let (_, action) = handle(&p, state, RetryEvent::Outcome(FetchStatus::RateLimited));
        assert_eq!(action, RetryAction::Finish(FetchStatus::TransientError));
    }

    #[test]
    fn permanent_error_never_retries() {
        let (sleeps, status, sends) = run_with(FetchStatus::PermanentError, &policy());
        assert!(sleeps.is_empty());
        assert_eq!(status, FetchStatus::PermanentError);
        assert_eq!(sends, 1);
    }

    #[test]
    fn auth_failure_fails_over_once() {
        let (sleeps, status, sends) = run_with(FetchStatus::AuthFailed, &policy());
        assert!(sleeps.is_empty());
        assert_eq!(status, FetchStatus::AuthFailed);
        assert_eq!(sends, 2);
    }

    #[test]
    fn failover_does_not_consume_retry_budget() {
        let p = policy();
        let (state, action) = RetryState::start();
        let (state, action2) = handle(&p, state, RetryEvent::Outcome(FetchStatus::AuthFailed));
        assert_eq!(action, RetryAction::Send);
        assert_eq!(action2, RetryAction::Send);
        assert_eq!(
            state,
            RetryState::Attempting(Attempts {
                failovers: 1,
                ..Attempts::default()
            })
        );
        assert_eq!(state.extra_attempts(), 1);

        let (_, action) = handle(&p, state, RetryEvent::Outcome(FetchStatus::TransientError));
        assert_eq!(action, RetryAction::Sleep(Duration::from_secs(1)));
    }

    #[test]
    fn delays_are_capped() {
        let p = RetryPolicy {
            max_retries: 8,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        };
        let delays: Vec<u64> = (0..8).map(|i| p.delay_for(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn zero_retries_finishes_after_first_failure() {
        let p = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        let (sleeps, status, sends) = run_with(FetchStatus::TransientError, &p);
        assert!(sleeps.is_empty());
        assert_eq!(status, FetchStatus::TransientError);
        assert_eq!(sends, 1);
    }

    #[test]
    fn unexpected_event_is_noop() {
        let p = policy();
        let (state, action) = handle(&p, RetryState::Succeeded, RetryEvent::BackoffElapsed);
        assert_eq!(state, RetryState::Succeeded);
        assert_eq!(action, RetryAction::None);

        let attempting = RetryState::Attempting(Attempts {
            retries: 1,
            ..Attempts::default()
        });
        let (state, action) = handle(&p, attempting.clone(), RetryEvent::BackoffElapsed);
        assert_eq!(state, attempting);
        assert_eq!(action, RetryAction::None);
    }
}
