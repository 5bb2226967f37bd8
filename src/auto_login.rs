//! Entry point used by the CLI, a GUI or a scheduler
//!
//! Checks the configuration, runs one login cycle and then, once the outcome
//! is final, broadcasts it to the configured webhooks.

use crate::{
    config::LoginConfig,
    network_probe::{NetworkProbe, SystemNetworkProbe, UNKNOWN_LOCAL_IP},
    notifier::Notifier,
    observer::SharedObserver,
    portal_client::PortalClient,
    proxy::ProxyResolver,
    retry::Sleeper,
    types::{FailureKind, LoginAttempt, Outcome},
};
use anyhow::{Context, Result};
use chrono::Local;
use log::{error, info, warn};
use std::sync::Arc;

pub const MSG_CONFIG_INCOMPLETE: &str = "配置不完整，请配置学号和密码";

pub struct AutoLogin {
    config: LoginConfig,
    probe: Arc<dyn NetworkProbe>,
    observer: SharedObserver,
    proxy_resolver: Box<dyn ProxyResolver>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl AutoLogin {
    pub fn new(
        config: LoginConfig,
        probe: Arc<dyn NetworkProbe>,
        observer: SharedObserver,
        proxy_resolver: Box<dyn ProxyResolver>,
    ) -> Self {
        AutoLogin {
            config,
            probe,
            observer,
            proxy_resolver,
            sleeper: None,
        }
    }

    /// Wire up the real network probe for the configured gateway
    pub fn with_system_probe(
        config: LoginConfig,
        observer: SharedObserver,
        proxy_resolver: Box<dyn ProxyResolver>,
    ) -> Result<Self> {
        let probe = SystemNetworkProbe::new(&config.portal, Arc::clone(&observer))
            .context("failed to create network probe")?;
        Ok(Self::new(config, Arc::new(probe), observer, proxy_resolver))
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    /// Run a login cycle and report `(success, message)`
    ///
    /// Notification results are logged only and never change the returned value.
    pub fn login(&self) -> (bool, String) {
        let Some(credentials) = self.config.credentials() else {
            error!("{MSG_CONFIG_INCOMPLETE}");
            return (false, MSG_CONFIG_INCOMPLETE.to_string());
        };

        let attempt = match self.portal_client() {
            Ok(mut portal) => portal.login(&credentials),
            Err(e) => {
                error!("failed to set up portal client: {e:#}");
                LoginAttempt::new(
                    0,
                    UNKNOWN_LOCAL_IP,
                    Outcome::transient(FailureKind::PortalTransient, format!("{e:#}")),
                )
            }
        };

        if !self.config.webhook_urls.is_empty() {
            self.send_notification(&attempt);
        }

        let (success, message) = attempt.into_result();
        if success {
            info!("login succeeded: {message}");
        } else {
            error!("login failed: {message}");
        }
        (success, message)
    }

    fn portal_client(&self) -> Result<PortalClient> {
        let portal = PortalClient::new(
            &self.config.portal,
            Arc::clone(&self.probe),
            Arc::clone(&self.observer),
        )?
        .with_retry_policy(self.config.retry_policy());

        Ok(match &self.sleeper {
            Some(sleeper) => portal.with_sleeper(Arc::clone(sleeper)),
            None => portal,
        })
    }

    fn send_notification(&self, attempt: &LoginAttempt) {
        let content = notification_content(
            &self.config.student_id,
            attempt,
            &Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        );

        match Notifier::new(self.proxy_resolver.as_ref(), Arc::clone(&self.observer)) {
            Ok(notifier) => {
                if notifier.notify(&self.config.webhook_urls, &content) {
                    info!("notification sent");
                } else {
                    warn!("failed to send notification to all webhooks");
                }
            }
            Err(e) => error!("failed to create notifier: {e:#}"),
        }
    }

    /// Send a test message to the configured webhooks
    pub fn send_test_notification(&self, markdown: bool) -> Result<bool> {
        anyhow::ensure!(
            !self.config.webhook_urls.is_empty(),
            "failed to send test notification: no webhook urls configured"
        );

        let notifier = Notifier::new(self.proxy_resolver.as_ref(), Arc::clone(&self.observer))?;
        let now = Local::now().format("%Y-%m-%d %H:%M:%S");

        Ok(if markdown {
            notifier.notify_markdown(
                &self.config.webhook_urls,
                &format!(
                    "# 测试markdown消息\n- 项目: **autonet**\n- 状态: <font color=\"info\">正常</font>\n- 时间: {now}"
                ),
            )
        } else {
            notifier.notify(
                &self.config.webhook_urls,
                &format!("这是一条来自autonet的测试消息\n时间: {now}"),
            )
        })
    }
}

/// Human readable login report
pub fn notification_content(account: &str, attempt: &LoginAttempt, timestamp: &str) -> String {
    let status = if attempt.outcome.is_success() {
        "成功"
    } else {
        "失败"
    };

    format!(
        "校园网登录{status}通知\n\n学号: {account}\nIP地址: {}\n登录结果: {}\n时间: {timestamp}\n设备: {} {}",
        attempt.local_ip,
        attempt.message,
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}
