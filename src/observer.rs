//! Observability port
//!
//! Components report domain events through a [`LoginObserver`] handed to them at
//! construction instead of writing to a process-wide logger themselves.

use crate::types::{LoginAttempt, Outcome};
use log::{debug, error, info, warn};
use std::{sync::Arc, time::Duration};

pub trait LoginObserver: Send + Sync {
    fn local_ip_resolved(&self, _source: &str, _ip: &str) {}

    fn local_ip_step_failed(&self, _source: &str, _reason: &str) {}

    fn local_ip_unavailable(&self, _placeholder: &str) {}

    fn attempt_started(&self, _attempt_number: u32, _max_attempts: u32, _local_ip: &str) {}

    fn attempt_finished(&self, _attempt: &LoginAttempt) {}

    fn login_request_failed(&self, _reason: &str) {}

    /// `excerpt` is a shortened copy of the body
    fn response_unparseable(&self, _excerpt: &str) {}

    fn retry_scheduled(&self, _next_attempt: u32, _interval: Duration) {}

    fn login_finished(&self, _outcome: &Outcome) {}

    fn notification_sent(&self, _target: &str) {}

    fn notification_failed(&self, _target: &str, _reason: &str) {}
}

pub type SharedObserver = Arc<dyn LoginObserver>;

/// Forwards events to the `log` facade
#[derive(Clone, Debug, Default)]
pub struct LogObserver;

impl LogObserver {
    const PROBE_TARGET: &str = "autonet::probe";
    const PORTAL_TARGET: &str = "autonet::portal";
    const NOTIFY_TARGET: &str = "autonet::notify";

    pub fn shared() -> SharedObserver {
        Arc::new(LogObserver)
    }
}

impl LoginObserver for LogObserver {
    fn local_ip_resolved(&self, source: &str, ip: &str) {
        info!(target: Self::PROBE_TARGET, "local ip via {source}: {ip}");
    }

    fn local_ip_step_failed(&self, source: &str, reason: &str) {
        warn!(target: Self::PROBE_TARGET, "failed to get local ip via {source}: {reason}");
    }

    fn local_ip_unavailable(&self, placeholder: &str) {
        warn!(
            target: Self::PROBE_TARGET,
            "failed to resolve local ip, using placeholder {placeholder}"
        );
    }

    fn attempt_started(&self, attempt_number: u32, max_attempts: u32, local_ip: &str) {
        info!(
            target: Self::PORTAL_TARGET,
            "login attempt {attempt_number}/{max_attempts} from {local_ip}"
        );
    }

    fn attempt_finished(&self, attempt: &LoginAttempt) {
        let n = attempt.attempt_number;
        match &attempt.outcome {
            Outcome::Success(message) => {
                info!(target: Self::PORTAL_TARGET, "login attempt {n} succeeded: {message}")
            }
            Outcome::FatalFailure(failure) => {
                error!(target: Self::PORTAL_TARGET, "login attempt {n} rejected: {failure}")
            }
            Outcome::TransientFailure(failure) => {
                warn!(target: Self::PORTAL_TARGET, "login attempt {n} failed: {failure}")
            }
        }
    }

    fn login_request_failed(&self, reason: &str) {
        warn!(target: Self::PORTAL_TARGET, "login request failed: {reason}");
    }

    fn response_unparseable(&self, excerpt: &str) {
        warn!(target: Self::PORTAL_TARGET, "failed to parse portal response: {excerpt}");
    }

    fn retry_scheduled(&self, next_attempt: u32, interval: Duration) {
        info!(
            target: Self::PORTAL_TARGET,
            "retrying (attempt {next_attempt}) in {}s",
            interval.as_secs_f32()
        );
    }

    fn login_finished(&self, outcome: &Outcome) {
        if outcome.is_success() {
            info!(target: Self::PORTAL_TARGET, "login finished: {outcome}");
        } else {
            error!(target: Self::PORTAL_TARGET, "login finished: {outcome}");
        }
    }

    fn notification_sent(&self, target: &str) {
        debug!(target: Self::NOTIFY_TARGET, "notification delivered to {target}");
    }

    fn notification_failed(&self, target: &str, reason: &str) {
        error!(target: Self::NOTIFY_TARGET, "failed to deliver notification to {target}: {reason}");
    }
}

/// Discards every event
#[derive(Clone, Debug, Default)]
pub struct NullObserver;

impl LoginObserver for NullObserver {}

/// Keeps the name of every event in order
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    events: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingObserver {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl LoginObserver for RecordingObserver {
    fn local_ip_resolved(&self, source: &str, ip: &str) {
        self.record(format!("local_ip_resolved {source} {ip}"));
    }

    fn local_ip_step_failed(&self, source: &str, _reason: &str) {
        self.record(format!("local_ip_step_failed {source}"));
    }

    fn local_ip_unavailable(&self, placeholder: &str) {
        self.record(format!("local_ip_unavailable {placeholder}"));
    }

    fn attempt_started(&self, attempt_number: u32, _max_attempts: u32, _local_ip: &str) {
        self.record(format!("attempt_started {attempt_number}"));
    }

    fn login_request_failed(&self, _reason: &str) {
        self.record("login_request_failed".to_string());
    }

    fn response_unparseable(&self, excerpt: &str) {
        self.record(format!("response_unparseable {excerpt}"));
    }

    fn login_finished(&self, outcome: &Outcome) {
        self.record(format!("login_finished {}", outcome.is_success()));
    }
}
