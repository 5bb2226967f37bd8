//! ePortal login handshake
//!
//! The gateway speaks plain HTTP and answers with a JSONP style body,
//! `dr1003({"result":"1","msg":"..."})`.

use crate::{
    config::PortalEndpoints,
    http_client::{blocking_client_builder, handle_http_response, truncate},
    network_probe::{ConnectivityState, NetworkProbe, is_unknown_ip},
    observer::SharedObserver,
    retry::{RetryPolicy, Sleeper, ThreadSleeper},
    types::{Credentials, FailureKind, LoginAttempt, Outcome},
};
use anyhow::{Context, Result};
use log::debug;
use reqwest::{
    blocking::Client,
    header::{self, HeaderMap, HeaderValue},
};
use serde::Deserialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

const CALLBACK: &str = "dr1003";
const PLACEHOLDER_MAC: &str = "000000000000";
const JS_VERSION: &str = "3.3.2";
const CLIENT_VERSION: &str = "1117";

pub const MSG_ALREADY_LOGGED_IN: &str = "已经登录校园网";
pub const MSG_NETWORK_UNAVAILABLE: &str = "网络连接不可用";
pub const MSG_CAMPUS_UNREACHABLE: &str = "尚未连接校园网";
pub const MSG_LOGIN_SUCCESS: &str = "登录成功";
pub const MSG_UNPARSEABLE: &str = "unparseable response";
const MSG_UNKNOWN_REASON: &str = "登录失败，未知原因";

/// Portal messages that mean the credentials are wrong
const CREDENTIAL_ERRORS: &[&str] = &["密码错误", "用户不存在"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortalState {
    Idle,
    Authenticating,
    Authenticated,
    Failed,
}

#[derive(Debug, Deserialize)]
struct PortalResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    msg: Option<String>,
}

pub struct PortalClient {
    client: Client,
    login_url: String,
    probe: Arc<dyn NetworkProbe>,
    observer: SharedObserver,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    state: PortalState,
}

impl PortalClient {
    const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(
        endpoints: &PortalEndpoints,
        probe: Arc<dyn NetworkProbe>,
        observer: SharedObserver,
    ) -> Result<Self> {
        let client = blocking_client_builder(Self::LOGIN_TIMEOUT)
            .default_headers(Self::browser_headers(&endpoints.login_url))
            .build()
            .context("failed to create portal client")?;

        Ok(PortalClient {
            client,
            login_url: endpoints.login_url.clone(),
            probe,
            observer,
            sleeper: Arc::new(ThreadSleeper),
            policy: RetryPolicy::default(),
            state: PortalState::Idle,
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn state(&self) -> PortalState {
        self.state
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn browser_headers(login_url: &str) -> HeaderMap {
        let referer = url::Url::parse(login_url)
            .ok()
            .and_then(|url| {
                url.host_str()
                    .map(|host| format!("{}://{host}/", url.scheme()))
            })
            .unwrap_or_else(|| "http://172.16.253.3/".to_string());

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Safari/605.1.15",
            ),
        );
        if let Ok(referer) = HeaderValue::from_str(&referer) {
            headers.insert(header::REFERER, referer);
        }
        headers
    }

    /// Run one login cycle: pre-flight probes, then handshakes under the retry policy
    ///
    /// The returned attempt is the last one made. Pre-flight results carry
    /// attempt number 0 since no handshake took place.
    pub fn login(&mut self, credentials: &Credentials) -> LoginAttempt {
        self.state = PortalState::Idle;

        let attempt = match ConnectivityState::probe(self.probe.as_ref()) {
            ConnectivityState::CampusAuthenticated => LoginAttempt::new(
                0,
                self.probe.resolve_local_ip(),
                Outcome::Success(MSG_ALREADY_LOGGED_IN.to_string()),
            ),
            ConnectivityState::NoCampusNoInternet => {
                let local_ip = self.probe.resolve_local_ip();
                let outcome = if is_unknown_ip(&local_ip) {
                    Outcome::transient(FailureKind::NetworkUnavailable, MSG_NETWORK_UNAVAILABLE)
                } else {
                    Outcome::transient(FailureKind::CampusUnreachable, MSG_CAMPUS_UNREACHABLE)
                };
                LoginAttempt::new(0, local_ip, outcome)
            }
            ConnectivityState::CampusReachableUnauthenticated => {
                self.state = PortalState::Authenticating;
                self.authenticate(credentials)
            }
        };

        self.state = if attempt.outcome.is_success() {
            PortalState::Authenticated
        } else {
            PortalState::Failed
        };
        self.observer.login_finished(&attempt.outcome);

        attempt
    }

    fn authenticate(&self, credentials: &Credentials) -> LoginAttempt {
        let max_attempts = self.policy.max_attempts();

        self.policy
            .run_with(self.sleeper.as_ref(), self.observer.as_ref(), |attempt_number| {
                // the address may change between attempts when roaming
                let local_ip = self.probe.resolve_local_ip();
                self.observer
                    .attempt_started(attempt_number, max_attempts, &local_ip);
                let outcome = self.handshake(credentials, &local_ip);
                LoginAttempt::new(attempt_number, local_ip, outcome)
            })
    }

    /// Send a single login request and classify the answer
    pub fn handshake(&self, credentials: &Credentials, local_ip: &str) -> Outcome {
        match self.send_login(credentials, local_ip) {
            Ok(body) => match decode_login_response(&body) {
                Some(response) => classify_response(response),
                None => {
                    self.observer.response_unparseable(&truncate(&body, 100));
                    Outcome::transient(FailureKind::PortalTransient, MSG_UNPARSEABLE)
                }
            },
            Err(e) => {
                let reason = format!("{e:#}");
                self.observer.login_request_failed(&reason);
                Outcome::transient(FailureKind::PortalTransient, reason)
            }
        }
    }

    fn send_login(&self, credentials: &Credentials, local_ip: &str) -> Result<String> {
        let query = login_query(credentials, local_ip);
        debug!("GET {} (account {})", self.login_url, credentials.account());

        let res = self
            .client
            .get(&self.login_url)
            .query(&query)
            .send()
            // the url carries the password
            .map_err(reqwest::Error::without_url)
            .context("failed to send login request")?;

        handle_http_response(res, "portal login")
    }
}

/// Query parameters of the login request, in the order the gateway's own page sends them
pub fn login_query<'a>(
    credentials: &'a Credentials,
    local_ip: &'a str,
) -> Vec<(&'static str, &'a str)> {
    vec![
        ("c", "Portal"),
        ("a", "login"),
        ("callback", CALLBACK),
        ("login_method", "1"),
        ("user_account", credentials.account()),
        ("user_password", credentials.password()),
        ("wlan_user_ip", local_ip),
        ("wlan_user_ipv6", ""),
        ("wlan_user_mac", PLACEHOLDER_MAC),
        ("wlan_ac_ip", ""),
        ("wlan_ac_name", ""),
        ("jsVersion", JS_VERSION),
        ("v", CLIENT_VERSION),
    ]
}

/// Extract the JSON text from `dr1003(...)`
///
/// Everything between the first `dr1003(` and the last `)` is taken.
pub fn extract_callback_json(body: &str) -> Option<&str> {
    let prefix = format!("{CALLBACK}(");
    let start = body.find(&prefix)? + prefix.len();
    let end = body.rfind(')')?;
    (end >= start).then(|| &body[start..end])
}

/// Classify a portal response body
pub fn parse_login_response(body: &str) -> Outcome {
    match decode_login_response(body) {
        Some(response) => classify_response(response),
        None => Outcome::transient(FailureKind::PortalTransient, MSG_UNPARSEABLE),
    }
}

fn decode_login_response(body: &str) -> Option<PortalResponse> {
    serde_json::from_str(extract_callback_json(body)?).ok()
}

fn classify_response(response: PortalResponse) -> Outcome {
    let succeeded = match &response.result {
        Value::String(s) => s == "1",
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    };
    if succeeded {
        return Outcome::Success(MSG_LOGIN_SUCCESS.to_string());
    }

    let msg = response
        .msg
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| MSG_UNKNOWN_REASON.to_string());
    classify_portal_message(msg)
}

/// Decide between fatal and transient failure from the portal's message
///
/// Matching is done on the gateway's localized wording; a wording change on
/// the gateway side silently turns credential errors into retried failures.
pub fn classify_portal_message(msg: String) -> Outcome {
    if CREDENTIAL_ERRORS.iter().any(|pattern| msg.contains(pattern)) {
        Outcome::fatal(FailureKind::PortalFatal, msg)
    } else {
        Outcome::transient(FailureKind::PortalTransient, msg)
    }
}
