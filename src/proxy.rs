//! Proxy discovery for outgoing webhook requests
//!
//! A resolver is picked once at startup and queried once per [`crate::notifier::Notifier`].

use anyhow::Result;
use log::{info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl ProxySettings {
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }
}

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ProxyResolver: Send + Sync {
    fn resolve(&self) -> Result<ProxySettings>;
}

/// Resolve proxies, proceeding without one if discovery fails
pub fn resolve_or_direct(resolver: &dyn ProxyResolver) -> ProxySettings {
    match resolver.resolve() {
        Ok(settings) if settings.is_empty() => {
            info!("no proxy in use");
            settings
        }
        Ok(settings) => {
            info!(
                "using proxy: http={:?} https={:?}",
                settings.http, settings.https
            );
            settings
        }
        Err(e) => {
            warn!("failed to discover proxy settings, continuing without proxy: {e:#}");
            ProxySettings::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NoProxy;

impl ProxyResolver for NoProxy {
    fn resolve(&self) -> Result<ProxySettings> {
        Ok(ProxySettings::default())
    }
}

/// Reads `HTTP_PROXY`/`HTTPS_PROXY` (upper or lower case)
pub struct EnvProxyResolver {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl Default for EnvProxyResolver {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl EnvProxyResolver {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        EnvProxyResolver {
            lookup: Box::new(lookup),
        }
    }

    fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|key| (self.lookup)(key))
            .find(|value| !value.trim().is_empty())
    }
}

impl ProxyResolver for EnvProxyResolver {
    fn resolve(&self) -> Result<ProxySettings> {
        Ok(ProxySettings {
            http: self.first_of(&["HTTP_PROXY", "http_proxy"]),
            https: self.first_of(&["HTTPS_PROXY", "https_proxy"]),
        })
    }
}

/// Queries the macOS network settings of the Wi-Fi service
#[cfg(target_os = "macos")]
#[derive(Clone, Debug)]
pub struct MacSystemProxyResolver {
    service: String,
}

#[cfg(target_os = "macos")]
impl Default for MacSystemProxyResolver {
    fn default() -> Self {
        MacSystemProxyResolver {
            service: "Wi-Fi".to_string(),
        }
    }
}

#[cfg(target_os = "macos")]
impl MacSystemProxyResolver {
    const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

    fn query(&self, flag: &str, scheme: &str) -> Result<Option<String>> {
        let out = crate::process::output_with_timeout(
            "networksetup",
            &[flag, &self.service],
            Self::TIMEOUT,
        )?;
        Ok(parse_networksetup_proxy(&out, scheme))
    }
}

#[cfg(target_os = "macos")]
impl ProxyResolver for MacSystemProxyResolver {
    fn resolve(&self) -> Result<ProxySettings> {
        Ok(ProxySettings {
            http: self.query("-getwebproxy", "http")?,
            https: self.query("-getsecurewebproxy", "https")?,
        })
    }
}

/// Parse `networksetup -getwebproxy` style output into a proxy url
///
/// ```text
/// Enabled: Yes
/// Server: 127.0.0.1
/// Port: 7890
/// Authenticated Proxy Enabled: 0
/// ```
pub fn parse_networksetup_proxy(output: &str, scheme: &str) -> Option<String> {
    let field = |name: &str| {
        output.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
    };

    let enabled = field("Enabled")?;
    if !enabled.eq_ignore_ascii_case("yes") {
        return None;
    }

    let server = field("Server").filter(|s| !s.is_empty())?;
    let port = field("Port").filter(|p| !p.is_empty() && p != "0")?;

    Some(format!("{scheme}://{server}:{port}"))
}

/// Returns the first non-empty result of its resolvers
///
/// A failing resolver is skipped.
pub struct ChainedProxyResolver {
    resolvers: Vec<Box<dyn ProxyResolver>>,
}

impl ChainedProxyResolver {
    pub fn new(resolvers: Vec<Box<dyn ProxyResolver>>) -> Self {
        ChainedProxyResolver { resolvers }
    }
}

impl ProxyResolver for ChainedProxyResolver {
    fn resolve(&self) -> Result<ProxySettings> {
        for resolver in &self.resolvers {
            match resolver.resolve() {
                Ok(settings) if !settings.is_empty() => return Ok(settings),
                Ok(_) => {}
                Err(e) => warn!("proxy resolver failed: {e:#}"),
            }
        }
        Ok(ProxySettings::default())
    }
}

/// Environment variables first, then the OS network settings where supported
pub fn default_resolver() -> Box<dyn ProxyResolver> {
    #[cfg(target_os = "macos")]
    let resolvers: Vec<Box<dyn ProxyResolver>> = vec![
        Box::new(EnvProxyResolver::default()),
        Box::new(MacSystemProxyResolver::default()),
    ];
    #[cfg(not(target_os = "macos"))]
    let resolvers: Vec<Box<dyn ProxyResolver>> = vec![Box::new(EnvProxyResolver::default())];

    Box::new(ChainedProxyResolver::new(resolvers))
}
