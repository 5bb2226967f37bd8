use crate::proxy::ProxySettings;
use anyhow::{Context, Result, ensure};
use reqwest::{
    Proxy,
    blocking::{Client, ClientBuilder, Response},
    redirect::Policy,
};
use std::time::Duration;

/// Create a blocking HTTP client with a fixed timeout
///
/// Environment proxies are ignored; proxies are only applied when passed in
/// explicitly. Redirects are not followed so that a captive portal redirect
/// is not mistaken for a reachable target.
///
/// # Arguments
/// * `timeout` - Timeout applied to connect and the whole request
/// * `proxy` - Optional explicit proxy settings
///
/// # Examples
/// ```no_run
/// use autonet::http_client::blocking_client;
/// use std::time::Duration;
///
/// let client = blocking_client(Duration::from_secs(5), None)
///     .expect("failed to create client");
/// ```
pub fn blocking_client(timeout: Duration, proxy: Option<&ProxySettings>) -> Result<Client> {
    let mut builder = blocking_client_builder(timeout);

    if let Some(proxy) = proxy {
        if let Some(http) = &proxy.http {
            builder = builder.proxy(
                Proxy::http(http).context(format!("failed to parse http proxy: {http}"))?,
            );
        }
        if let Some(https) = &proxy.https {
            builder = builder.proxy(
                Proxy::https(https).context(format!("failed to parse https proxy: {https}"))?,
            );
        }
    }

    builder.build().context("failed to create blocking HTTP client")
}

/// Builder with the shared timeout, redirect and proxy defaults applied
pub fn blocking_client_builder(timeout: Duration) -> ClientBuilder {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(Policy::none())
        .no_proxy()
}

/// Handle HTTP response by checking status and extracting body
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `context_msg` - Context message describing the request (e.g., "portal login")
///
/// Request urls are stripped from errors since they may carry secrets.
///
/// # Returns
/// * `Ok(String)` - The response body if the status is 200
/// * `Err` - If the status is not 200 or reading the body fails
pub fn handle_http_response(res: Response, context_msg: &str) -> Result<String> {
    let status = res.status();
    let body = res
        .text()
        .map_err(reqwest::Error::without_url)
        .context("failed to read response body")?;

    ensure!(
        status == reqwest::StatusCode::OK,
        "{context_msg} failed with status {status} and body: {}",
        truncate(&body, 100)
    );

    Ok(body)
}

/// Cut a response body down for log output
pub fn truncate(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
