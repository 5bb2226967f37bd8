//! Bounded retry with a fixed interval
//!
//! Captive portal gateways sit on the local network and fail fast, so there is
//! no exponential backoff or jitter: `max_attempts` tries, `interval` apart.
//! `Success` and `FatalFailure` end the loop immediately.

use crate::{
    observer::{LoginObserver, NullObserver},
    types::{Failure, FailureKind, LoginAttempt, Outcome},
};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{thread, time::Duration};

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Clone, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_INTERVAL)
    }
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

    /// `max_attempts` of zero is treated as one attempt
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `attempt_fn` with the thread sleeper and no observer
    pub fn run<F>(&self, attempt_fn: F) -> LoginAttempt
    where
        F: FnMut(u32) -> LoginAttempt,
    {
        self.run_with(&ThreadSleeper, &NullObserver, attempt_fn)
    }

    /// Call `attempt_fn` with 1-based attempt numbers until it succeeds, fails
    /// fatally or the attempts are used up
    ///
    /// When every attempt failed transiently the last attempt is returned with
    /// its message replaced by a summary carrying the attempt count.
    pub fn run_with<F>(
        &self,
        sleeper: &dyn Sleeper,
        observer: &dyn LoginObserver,
        mut attempt_fn: F,
    ) -> LoginAttempt
    where
        F: FnMut(u32) -> LoginAttempt,
    {
        let mut attempt_number = 1;

        loop {
            let attempt = attempt_fn(attempt_number);
            observer.attempt_finished(&attempt);

            if !attempt.outcome.is_transient() {
                return attempt;
            }

            if attempt_number >= self.max_attempts {
                return Self::exhausted(attempt, self.max_attempts);
            }

            attempt_number += 1;
            observer.retry_scheduled(attempt_number, self.interval);
            sleeper.sleep(self.interval);
        }
    }

    fn exhausted(last: LoginAttempt, attempts: u32) -> LoginAttempt {
        let message = format!("登录失败，已尝试 {attempts} 次");
        let kind = last
            .outcome
            .failure_kind()
            .unwrap_or(FailureKind::PortalTransient);

        LoginAttempt {
            attempt_number: last.attempt_number,
            local_ip: last.local_ip,
            outcome: Outcome::TransientFailure(Failure::new(kind, message.clone())),
            message,
        }
    }
}
