use std::fmt;

/// Account and password used for one login cycle
///
/// The password is never part of `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    account: String,
    password: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            account: account.into(),
            password: password.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("password", &format_args!("*** {} bytes ***", self.password.len()))
            .finish()
    }
}

/// Failure taxonomy shared by the login pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// account or password missing in the configuration
    ConfigIncomplete,
    /// neither the campus gateway nor the internet answered and no local address is known
    NetworkUnavailable,
    /// a local address exists but the campus gateway does not answer
    CampusUnreachable,
    /// timeout, connection error, bad status or unparseable portal response
    PortalTransient,
    /// the portal rejected the credentials
    PortalFatal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::ConfigIncomplete => "config incomplete",
            FailureKind::NetworkUnavailable => "network unavailable",
            FailureKind::CampusUnreachable => "campus unreachable",
            FailureKind::PortalTransient => "portal transient error",
            FailureKind::PortalFatal => "portal fatal error",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Failure {
            kind,
            message: message.into(),
        }
    }
}

/// Result of a single login handshake or of a whole login cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success(String),
    /// do not retry
    FatalFailure(Failure),
    /// worth retrying
    TransientFailure(Failure),
}

impl Outcome {
    pub fn transient(kind: FailureKind, message: impl Into<String>) -> Self {
        Outcome::TransientFailure(Failure::new(kind, message))
    }

    pub fn fatal(kind: FailureKind, message: impl Into<String>) -> Self {
        Outcome::FatalFailure(Failure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Outcome::TransientFailure(_))
    }

    /// Human readable message shown to the user
    pub fn message(&self) -> &str {
        match self {
            Outcome::Success(message) => message,
            Outcome::FatalFailure(failure) | Outcome::TransientFailure(failure) => {
                &failure.message
            }
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Success(_) => None,
            Outcome::FatalFailure(failure) | Outcome::TransientFailure(failure) => {
                Some(failure.kind)
            }
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(message) => write!(f, "success: {message}"),
            Outcome::FatalFailure(failure) => write!(f, "fatal failure ({failure})"),
            Outcome::TransientFailure(failure) => write!(f, "transient failure ({failure})"),
        }
    }
}

/// One iteration of the retry loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttempt {
    pub attempt_number: u32,
    pub local_ip: String,
    pub outcome: Outcome,
    pub message: String,
}

impl LoginAttempt {
    pub fn new(attempt_number: u32, local_ip: impl Into<String>, outcome: Outcome) -> Self {
        let message = outcome.message().to_string();
        LoginAttempt {
            attempt_number,
            local_ip: local_ip.into(),
            outcome,
            message,
        }
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn into_result(self) -> (bool, String) {
        (self.outcome.is_success(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials::new("2021001", "secret123");
        let debug_output = format!("{credentials:?}");
        assert!(debug_output.contains("2021001"));
        assert!(!debug_output.contains("secret123"));
        assert!(debug_output.contains("9 bytes"));
    }

    #[test]
    fn test_outcome_message_and_kind() {
        let outcome = Outcome::fatal(FailureKind::PortalFatal, "密码错误");
        assert_eq!(outcome.message(), "密码错误");
        assert_eq!(outcome.failure_kind(), Some(FailureKind::PortalFatal));
        assert!(!outcome.is_success());
        assert!(!outcome.is_transient());

        let outcome = Outcome::Success("登录成功".to_string());
        assert!(outcome.is_success());
        assert_eq!(outcome.failure_kind(), None);
    }

    #[test]
    fn test_login_attempt_copies_outcome_message() {
        let attempt = LoginAttempt::new(
            2,
            "10.1.2.3",
            Outcome::transient(FailureKind::PortalTransient, "unparseable response"),
        );
        assert_eq!(attempt.message, "unparseable response");
        assert_eq!(
            attempt.into_result(),
            (false, "unparseable response".to_string())
        );
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::new(FailureKind::CampusUnreachable, "尚未连接校园网");
        assert_eq!(failure.to_string(), "campus unreachable: 尚未连接校园网");
    }
}
