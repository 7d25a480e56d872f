//! Completion-code classification and bounded retry.
//!
//! Backends never retry. [`dispatch`] owns the single retry loop shared by
//! every transport and every command.

use std::thread;
use std::time::Duration;

use crate::commands::Command;
use crate::completion::{self, NODE_BUSY, RESERVATION_CANCELLED};
use crate::device::Exchange;
use crate::error::{Error, Result};
use crate::types::{RawResponse, Request};

/// How many times to try a command and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub wait: Duration,
}

impl RetryPolicy {
    /// Attempts used by [`RetryPolicy::default`].
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    /// Wait used by [`RetryPolicy::default`].
    pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);

    /// A policy with explicit values.
    pub const fn new(max_attempts: u32, wait: Duration) -> Self {
        Self { max_attempts, wait }
    }

    /// A single attempt, no retry.
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Shrink the attempt count so `wait × (attempts − 1)` stays within `period`.
    ///
    /// Used by periodic callers (a watchdog renewing inside its timeout) that
    /// must not let a busy controller push them past their own deadline.
    pub fn fit_within(self, period: Duration) -> Self {
        if self.wait.is_zero() {
            return self;
        }
        let fitting = period.as_nanos() / self.wait.as_nanos();
        let fitting = u32::try_from(fitting).unwrap_or(u32::MAX).saturating_add(1);
        Self {
            max_attempts: self.max_attempts.max(1).min(fitting),
            wait: self.wait,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_WAIT)
    }
}

/// Outcome class of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Completion code 00h.
    Success,
    /// Controller or driver busy; worth another attempt.
    TransientBusy,
    /// SEL reservation invalidated (C5h).
    ReservationCancelled,
    /// Semantic rejection by the controller.
    BadCompletionCode(u8),
    /// The medium failed.
    TransportError,
}

impl Status {
    /// Classify a raw exchange result.
    pub fn of(result: &Result<RawResponse>) -> Self {
        match result {
            Ok(response) => Self::from_code(response.completion_code),
            Err(err) if err.is_transient() => Self::TransientBusy,
            Err(Error::ReservationCancelled) => Self::ReservationCancelled,
            Err(Error::CompletionCode {
                completion_code, ..
            }) => Self::from_code(*completion_code),
            Err(_) => Self::TransportError,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            completion::OK => Self::Success,
            NODE_BUSY => Self::TransientBusy,
            RESERVATION_CANCELLED => Self::ReservationCancelled,
            other => Self::BadCompletionCode(other),
        }
    }
}

/// Execute `request`, retrying transient failures according to `policy`.
///
/// Returns the response only when its completion code is zero. Any other
/// completion code is surfaced as an error immediately, with the controller's
/// reason text; C0h and C5h map to [`Error::ControllerBusy`] and
/// [`Error::ReservationCancelled`]. Transport errors are never retried.
pub fn dispatch<E: Exchange + ?Sized>(
    exchange: &mut E,
    request: &Request,
    policy: &RetryPolicy,
) -> Result<RawResponse> {
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = exchange.execute(request);
        let err = match (Status::of(&result), result) {
            (Status::Success, Ok(response)) => return Ok(response),
            (_, Ok(response)) => {
                let code = response.completion_code;
                let reason = exchange.describe_completion(request.netfn, request.cmd, code);
                completion::error_for(request.netfn, request.cmd, code, reason)
            }
            (_, Err(err)) => err,
        };

        if !err.is_transient() {
            return Err(err);
        }
        if attempt >= attempts {
            crate::observe::record_exhausted(request, attempt, &err);
            return Err(Error::Exhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        crate::observe::record_retry(request, attempt, &err);
        if !policy.wait.is_zero() {
            thread::sleep(policy.wait);
        }
    }
}

/// Dispatch a typed command and parse its response.
pub fn call<E: Exchange + ?Sized, C: Command>(
    exchange: &mut E,
    command: &C,
    policy: &RetryPolicy,
) -> Result<C::Output> {
    let response = dispatch(exchange, &command.request(), policy)?;
    command.parse_response(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_five_by_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.wait, Duration::from_secs(1));
    }

    #[test]
    fn fit_within_shrinks_to_deadline() {
        let policy = RetryPolicy::default();

        // 1 + floor(3s / 1s) = 4 attempts, 3 waits.
        assert_eq!(policy.fit_within(Duration::from_secs(3)).max_attempts, 4);
        assert_eq!(policy.fit_within(Duration::from_millis(2500)).max_attempts, 3);
        // A generous period leaves the policy alone.
        assert_eq!(policy.fit_within(Duration::from_secs(60)), policy);
        // Shorter than one wait: a single attempt.
        assert_eq!(policy.fit_within(Duration::from_millis(200)).max_attempts, 1);
    }

    #[test]
    fn fit_within_ignores_zero_wait() {
        let policy = RetryPolicy::new(7, Duration::ZERO);
        assert_eq!(policy.fit_within(Duration::from_millis(1)), policy);
    }

    #[test]
    fn status_classification() {
        let ok = |cc| {
            Ok(RawResponse {
                cmd: 0x01,
                completion_code: cc,
                data: Vec::new(),
            })
        };
        assert_eq!(Status::of(&ok(0x00)), Status::Success);
        assert_eq!(Status::of(&ok(0xC0)), Status::TransientBusy);
        assert_eq!(Status::of(&ok(0xC5)), Status::ReservationCancelled);
        assert_eq!(Status::of(&ok(0xCB)), Status::BadCompletionCode(0xCB));
        assert_eq!(Status::of(&Err(Error::DriverBusy)), Status::TransientBusy);
        assert_eq!(Status::of(&Err(Error::Timeout)), Status::TransportError);
        assert_eq!(
            Status::of(&Err(Error::SequenceMismatch {
                expected: 2,
                actual: 1
            })),
            Status::TransportError
        );
    }
}
