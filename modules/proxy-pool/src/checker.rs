use async_trait::async_trait;
use jobwatch_core::FetchError;
use reqwest::{Client, Proxy};
use std::time::Duration;

const LIST_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Network side of pool initialization: downloading public lists and testing candidates.
#[async_trait]
pub trait ProxyChecker: Send + Sync {
    async fn fetch_list(&self, url: &str) -> Result<String, FetchError>;
    /// True when a request through `proxy` to `test_url` succeeds within `timeout`.
    async fn test(&self, proxy: &str, test_url: &str, timeout: Duration) -> bool;
}

pub struct HttpChecker {
    client: Client,
    accept_invalid_certs: bool,
}

impl HttpChecker {
    pub fn new(list_timeout: Duration, accept_invalid_certs: bool) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(list_timeout)
            .user_agent(LIST_USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| FetchError::RequestFailed { url: String::new(), attempts: 0, message: e.to_string() })?;
        Ok(HttpChecker { client, accept_invalid_certs })
    }
}

#[async_trait]
impl ProxyChecker for HttpChecker {
    async fn fetch_list(&self, url: &str) -> Result<String, FetchError> {
        let failed = |e: reqwest::Error| FetchError::RequestFailed { url: url.to_string(), attempts: 1, message: e.to_string() };
        let resp = self.client.get(url).send().await.map_err(failed)?;
        resp.text().await.map_err(failed)
    }

    async fn test(&self, proxy: &str, test_url: &str, timeout: Duration) -> bool {
        let proxy_cfg = match Proxy::all(proxy) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(proxy, error = %e, "unusable proxy address");
                return false;
            }
        };
        let client = match Client::builder()
            .proxy(proxy_cfg)
            .timeout(timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(proxy, error = %e, "could not build check client");
                return false;
            }
        };
        match client.get(test_url).send().await {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                tracing::debug!(proxy, error = %e, "proxy failed test");
                false
            }
        }
    }
}
