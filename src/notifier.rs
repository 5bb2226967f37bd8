//! Webhook notifications (group-chat bot endpoints)
//!
//! Every target is attempted, one after another; a failing target never stops
//! the others. Webhook urls embed their access key, so they are redacted before
//! being logged.

use crate::{
    http_client::{blocking_client, truncate},
    observer::SharedObserver,
    proxy::{ProxyResolver, resolve_or_direct},
};
use anyhow::{Context, Result};
use log::warn;
use reqwest::{StatusCode, blocking::Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const EXPECTED_WEBHOOK_HOST: &str = "qyapi.weixin.qq.com";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("webhook answered with status {0}")]
    Status(StatusCode),
    #[error("failed to parse webhook response: {0}")]
    Body(String),
    #[error("webhook rejected message with errcode {errcode}: {errmsg}")]
    Api { errcode: i64, errmsg: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
pub enum Message {
    Text { text: TextContent },
    Markdown { markdown: MarkdownContent },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TextContent {
    pub content: String,
    pub mentioned_list: Vec<String>,
    pub mentioned_mobile_list: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarkdownContent {
    pub content: String,
}

impl Message {
    pub fn text(content: impl Into<String>) -> Self {
        Message::Text {
            text: TextContent {
                content: content.into(),
                mentioned_list: Vec::new(),
                mentioned_mobile_list: Vec::new(),
            },
        }
    }

    pub fn markdown(content: impl Into<String>) -> Self {
        Message::Markdown {
            markdown: MarkdownContent {
                content: content.into(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    errcode: Option<i64>,
    #[serde(default)]
    errmsg: String,
}

pub struct Notifier {
    client: Client,
    observer: SharedObserver,
}

impl Notifier {
    const TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a notifier; the proxy is resolved once here
    pub fn new(resolver: &dyn ProxyResolver, observer: SharedObserver) -> Result<Self> {
        let proxy = resolve_or_direct(resolver);
        let client = match blocking_client(Self::TIMEOUT, Some(&proxy)) {
            Ok(client) => client,
            Err(e) => {
                warn!("failed to apply proxy settings, continuing without proxy: {e:#}");
                blocking_client(Self::TIMEOUT, None).context("failed to create notifier client")?
            }
        };

        Ok(Notifier { client, observer })
    }

    /// Send a text message to all targets
    ///
    /// Returns true only if every target accepted the message.
    pub fn notify<S: AsRef<str>>(&self, targets: &[S], message: &str) -> bool {
        self.broadcast(targets, &Message::text(message))
    }

    pub fn notify_markdown<S: AsRef<str>>(&self, targets: &[S], content: &str) -> bool {
        self.broadcast(targets, &Message::markdown(content))
    }

    pub fn broadcast<S: AsRef<str>>(&self, targets: &[S], message: &Message) -> bool {
        let mut all_delivered = true;

        for target in targets {
            let target = target.as_ref();
            let redacted = redact_webhook_url(target);

            match self.deliver(target, message) {
                Ok(()) => self.observer.notification_sent(&redacted),
                Err(e) => {
                    self.observer.notification_failed(&redacted, &e.to_string());
                    all_delivered = false;
                }
            }
        }

        all_delivered
    }

    /// Deliver to a single target
    pub fn deliver(&self, target: &str, message: &Message) -> Result<(), NotifyError> {
        let url = validate_webhook_url(target)?;

        let res = self
            .client
            .post(url)
            .json(message)
            .send()
            .map_err(|e| NotifyError::Transport(e.without_url()))?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(NotifyError::Status(status));
        }

        let body = res
            .text()
            .map_err(|e| NotifyError::Transport(e.without_url()))?;
        let response: WebhookResponse = serde_json::from_str(&body)
            .map_err(|e| NotifyError::Body(format!("{e}: {}", truncate(&body, 100))))?;

        match response.errcode {
            Some(0) => Ok(()),
            Some(errcode) => Err(NotifyError::Api {
                errcode,
                errmsg: response.errmsg,
            }),
            None => Err(NotifyError::Body(format!(
                "missing errcode: {}",
                truncate(&body, 100)
            ))),
        }
    }
}

/// Check that the url has a scheme and a host
///
/// Hosts other than the usual chat vendor are accepted with a warning.
pub fn validate_webhook_url(target: &str) -> Result<Url, NotifyError> {
    let url = Url::parse(target.trim())
        .map_err(|e| NotifyError::InvalidUrl(format!("{}: {e}", redact_webhook_url(target))))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(NotifyError::InvalidUrl(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        None | Some("") => Err(NotifyError::InvalidUrl(format!(
            "{}: missing host",
            redact_webhook_url(target)
        ))),
        Some(host) => {
            if host != EXPECTED_WEBHOOK_HOST {
                warn!("webhook host {host} is not {EXPECTED_WEBHOOK_HOST}");
            }
            Ok(url)
        }
    }
}

/// Strip the query (which holds the webhook key) for logging
pub fn redact_webhook_url(target: &str) -> String {
    match Url::parse(target.trim()) {
        Ok(mut url) => {
            if url.query().is_some() {
                url.set_query(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_payload() {
        let json = serde_json::to_value(Message::text("hello")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "msgtype": "text",
                "text": {
                    "content": "hello",
                    "mentioned_list": [],
                    "mentioned_mobile_list": []
                }
            })
        );
    }

    #[test]
    fn test_markdown_message_payload() {
        let json = serde_json::to_value(Message::markdown("# title")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"msgtype": "markdown", "markdown": {"content": "# title"}})
        );
    }

    #[test]
    fn test_validate_webhook_url() {
        assert!(
            validate_webhook_url("https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=abc")
                .is_ok()
        );
        // other hosts only warn
        assert!(validate_webhook_url("http://127.0.0.1:8080/hook").is_ok());
        assert!(matches!(
            validate_webhook_url("not a url"),
            Err(NotifyError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_webhook_url("mailto:someone@example.com"),
            Err(NotifyError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_redact_webhook_url_hides_key() {
        let redacted =
            redact_webhook_url("https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=secret");
        assert!(!redacted.contains("secret"));
        assert!(redacted.starts_with("https://qyapi.weixin.qq.com/cgi-bin/webhook/send"));
        assert_eq!(redact_webhook_url("::"), "<invalid url>");
    }
}
