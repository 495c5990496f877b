//! Proxy-aware HTTP fetching with bounded retries, escalating timeouts and block detection.

pub mod block;
pub mod identity;
pub mod transport;

pub use identity::{Identity, IdentityRotator};
pub use reqwest::Method;
pub use transport::{ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse};

use jobwatch_core::{FailureKind, FetchError, Pacer};
use proxy_pool::ProxyPool;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub request_delay_min: f64,
    pub request_delay_max: f64,
    pub request_timeout_secs: u64,
    pub adaptive_timeout: bool,
    pub timeout_escalation_secs: Vec<u64>,
    pub max_retries: u32,
    pub retry_delay_secs: f64,
    pub accept_invalid_certs: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            request_delay_min: 2.0,
            request_delay_max: 5.0,
            request_timeout_secs: 30,
            adaptive_timeout: true,
            timeout_escalation_secs: vec![15, 20, 30],
            max_retries: 3,
            retry_delay_secs: 1.0,
            accept_invalid_certs: false,
        }
    }
}

impl FetchConfig {
    /// Timeout for zero-based attempt `i`. The escalation schedule is clamped to its last entry.
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        let secs = match self.timeout_escalation_secs.as_slice() {
            steps if self.adaptive_timeout && !steps.is_empty() => steps[(attempt as usize).min(steps.len() - 1)],
            _ => self.request_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions { max_retries: 3, base_retry_delay: Duration::from_secs(1), headers: Vec::new(), body: None }
    }
}

impl FetchOptions {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json_body(mut self, body: &serde_json::Value) -> Self {
        self.headers.push(("Content-Type".into(), "application/json".into()));
        self.body = Some(body.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Proxy that served the response, if any.
    pub via: Option<String>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> { serde_json::from_str(&self.body) }
}

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    successes: AtomicU64,
    transport_errors: AtomicU64,
    blocked: AtomicU64,
    rate_limited: AtomicU64,
    direct_fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub transport_errors: u64,
    pub blocked: u64,
    pub rate_limited: u64,
    pub direct_fallbacks: u64,
}

/// Performs one logical request at a time on behalf of a job source.
pub struct Fetcher {
    cfg: FetchConfig,
    transport: Arc<dyn Transport>,
    pool: Arc<ProxyPool>,
    pacer: Pacer,
    identities: IdentityRotator,
    counters: Counters,
}

impl Fetcher {
    pub fn new(cfg: FetchConfig, transport: Arc<dyn Transport>, pool: Arc<ProxyPool>) -> Self {
        let pacer = Pacer::from_secs(cfg.request_delay_min, cfg.request_delay_max);
        Fetcher { cfg, transport, pool, pacer, identities: IdentityRotator::default(), counters: Counters::default() }
    }

    pub fn with_reqwest(cfg: FetchConfig, pool: Arc<ProxyPool>) -> Self {
        let transport = Arc::new(ReqwestTransport::new(cfg.accept_invalid_certs));
        Self::new(cfg, transport, pool)
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn pool(&self) -> &Arc<ProxyPool> { &self.pool }

    /// Options seeded from the configured retry policy.
    pub fn options(&self) -> FetchOptions {
        FetchOptions {
            max_retries: self.cfg.max_retries,
            base_retry_delay: Duration::from_secs_f64(self.cfg.retry_delay_secs.max(0.0)),
            ..FetchOptions::default()
        }
    }

    pub async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.fetch(Method::GET, url, self.options()).await
    }

    /// Runs up to `max_retries` attempts. Transport failures back off exponentially;
    /// a block or rate limit seen through a proxy is retried once more without one.
    pub async fn fetch(&self, method: Method, url: &str, opts: FetchOptions) -> Result<FetchResponse, FetchError> {
        let domain = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
        let attempts = opts.max_retries.max(1);
        let mut force_direct = false;
        let mut last_error = String::new();

        for i in 0..attempts {
            let last = i + 1 == attempts;
            let proxy = if force_direct || !self.pool.is_enabled() || self.pool.should_bypass(&domain) {
                None
            } else {
                self.pool.select(Some(&domain))
            };
            let timeout = self.cfg.timeout_for(i);
            self.pacer.pause().await;

            let identity = self.identities.next();
            let mut headers = identity.headers;
            headers.push(("User-Agent".into(), identity.user_agent));
            for (k, v) in &opts.headers {
                headers.retain(|(h, _)| !h.eq_ignore_ascii_case(k));
                headers.push((k.clone(), v.clone()));
            }
            let req = TransportRequest {
                method: method.clone(),
                url: url.to_string(),
                headers,
                body: opts.body.clone(),
                timeout,
                proxy: proxy.clone(),
            };

            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(url, attempt = i + 1, proxy = proxy.as_deref().unwrap_or("direct"), timeout_secs = timeout.as_secs(), "fetching");

            match self.transport.send(req).await {
                Err(e) => {
                    self.counters.transport_errors.fetch_add(1, Ordering::Relaxed);
                    if let Some(p) = &proxy {
                        self.pool.report_failure(p, Some(&domain), FailureKind::Transport);
                    }
                    last_error = e.to_string();
                    if last {
                        break;
                    }
                    let delay = opts.base_retry_delay.saturating_mul(1u32 << i.min(16));
                    tracing::warn!(url, attempt = i + 1, error = %e, delay_ms = delay.as_millis() as u64, "request failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Ok(resp) => match block::classify(resp.status, &resp.headers, &resp.body) {
                    Some(verdict) => {
                        match verdict.kind() {
                            FailureKind::RateLimited => self.counters.rate_limited.fetch_add(1, Ordering::Relaxed),
                            _ => self.counters.blocked.fetch_add(1, Ordering::Relaxed),
                        };
                        if let Some(p) = &proxy {
                            self.pool.report_failure(p, Some(&domain), verdict.kind());
                            if !last {
                                tracing::warn!(url, proxy = %p, verdict = ?verdict, "blocked through proxy, retrying direct");
                                self.counters.direct_fallbacks.fetch_add(1, Ordering::Relaxed);
                                force_direct = true;
                                continue;
                            }
                        }
                        return Err(verdict.into_error(url, resp.status));
                    }
                    None => {
                        if let Some(p) = &proxy {
                            self.pool.report_success(p);
                        }
                        self.counters.successes.fetch_add(1, Ordering::Relaxed);
                        return Ok(FetchResponse {
                            status: resp.status,
                            url: resp.final_url,
                            headers: resp.headers,
                            body: resp.body,
                            via: proxy,
                        });
                    }
                },
            }
        }

        Err(FetchError::RequestFailed { url: url.to_string(), attempts, message: last_error })
    }

    pub fn metrics(&self) -> FetchMetrics {
        let c = &self.counters;
        FetchMetrics {
            attempts: c.attempts.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            transport_errors: c.transport_errors.load(Ordering::Relaxed),
            blocked: c.blocked.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            direct_fallbacks: c.direct_fallbacks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proxy_pool::PoolConfig;
    use std::sync::Mutex;

    enum Step {
        Fail,
        Respond(u16, &'static str),
        Typed(u16, &'static str, &'static str),
    }

    /// Replays scripted outcomes and records the proxy each attempt went through.
    struct Scripted {
        steps: Mutex<Vec<Step>>,
        seen: Mutex<Vec<TransportRequest>>,
    }

    impl Scripted {
        fn new(mut steps: Vec<Step>) -> Arc<Self> {
            steps.reverse();
            Arc::new(Scripted { steps: Mutex::new(steps), seen: Mutex::new(Vec::new()) })
        }

        fn proxies(&self) -> Vec<Option<String>> { self.seen.lock().unwrap().iter().map(|r| r.proxy.clone()).collect() }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, req: TransportRequest) -> Result<TransportResponse, TransportError> {
            let step = self.steps.lock().unwrap().pop().unwrap_or(Step::Fail);
            let url = req.url.clone();
            self.seen.lock().unwrap().push(req);
            match step {
                Step::Fail => Err(TransportError("connection refused".into())),
                Step::Respond(status, body) => {
                    Ok(TransportResponse { status, final_url: url, headers: Vec::new(), body: body.to_string() })
                }
                Step::Typed(status, content_type, body) => Ok(TransportResponse {
                    status,
                    final_url: url,
                    headers: vec![("Content-Type".to_string(), content_type.to_string())],
                    body: body.to_string(),
                }),
            }
        }
    }

    fn pool_with(addrs: &[&str]) -> Arc<ProxyPool> {
        let pool = ProxyPool::new(PoolConfig {
            enabled: true,
            use_free_proxies: false,
            test_before_use: false,
            temp_ban_secs: 0,
            ..PoolConfig::default()
        });
        pool.add_untested(addrs);
        Arc::new(pool)
    }

    fn fetcher(t: Arc<Scripted>, pool: Arc<ProxyPool>) -> Fetcher {
        Fetcher::new(FetchConfig::default(), t, pool).with_pacer(Pacer::disabled())
    }

    fn opts(base_ms: u64) -> FetchOptions {
        FetchOptions { max_retries: 3, base_retry_delay: Duration::from_millis(base_ms), ..FetchOptions::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_back_off_and_stop_at_max_retries() {
        let t = Scripted::new(vec![Step::Fail, Step::Fail, Step::Fail, Step::Respond(200, "never")]);
        let f = fetcher(t.clone(), Arc::new(ProxyPool::disabled()));
        let started = tokio::time::Instant::now();
        let err = f.fetch(Method::GET, "https://jobs.example/search", opts(1_000)).await.unwrap_err();
        assert!(matches!(err, FetchError::RequestFailed { attempts: 3, .. }));
        assert_eq!(t.seen.lock().unwrap().len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(1_000 * (1 + 2)));
        assert_eq!(f.metrics().transport_errors, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let t = Scripted::new(vec![Step::Fail, Step::Respond(200, "<html>ok</html>")]);
        let f = fetcher(t.clone(), Arc::new(ProxyPool::disabled()));
        let resp = f.fetch(Method::GET, "https://jobs.example/", opts(10)).await.unwrap();
        assert_eq!(resp.body, "<html>ok</html>");
        assert_eq!(f.metrics().attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn block_through_proxy_retries_direct() {
        let t = Scripted::new(vec![Step::Respond(403, ""), Step::Respond(200, "fine")]);
        let pool = pool_with(&["10.0.0.1:80"]);
        let f = fetcher(t.clone(), pool.clone());
        let resp = f.fetch(Method::GET, "https://jobs.example/", opts(10)).await.unwrap();
        assert_eq!(resp.via, None);
        assert_eq!(t.proxies(), vec![Some("http://10.0.0.1:80".to_string()), None]);
        assert_eq!(pool.records()[0].total_failures, 1);
        assert_eq!(f.metrics().direct_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn block_without_proxy_is_terminal() {
        let t = Scripted::new(vec![Step::Respond(200, "Please verify you are human"), Step::Respond(200, "ok")]);
        let f = fetcher(t.clone(), Arc::new(ProxyPool::disabled()));
        let err = f.fetch(Method::GET, "https://jobs.example/", opts(10)).await.unwrap_err();
        assert!(matches!(err, FetchError::Blocked { status: 200, .. }));
        assert_eq!(t.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn json_listing_naming_cloudflare_is_usable() {
        let body = r#"{"jobDetails":[{"title":"Support Engineer","companyName":"Cloudflare","jobId":"1"}]}"#;
        let t = Scripted::new(vec![Step::Typed(200, "application/json", body)]);
        let pool = pool_with(&["10.0.0.1:80"]);
        let f = fetcher(t.clone(), pool.clone());
        let resp = f.fetch(Method::GET, "https://jobs.example/api", opts(10)).await.unwrap();
        assert_eq!(resp.body, body);
        assert_eq!(f.metrics().blocked, 0);
        assert_eq!(pool.records()[0].total_failures, 0);
        assert_eq!(pool.records()[0].total_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_on_last_attempt_propagates() {
        let t = Scripted::new(vec![Step::Respond(429, ""), Step::Respond(429, ""), Step::Respond(429, "")]);
        let pool = pool_with(&["10.0.0.1:80"]);
        let f = fetcher(t.clone(), pool);
        let err = f.fetch(Method::GET, "https://jobs.example/", opts(10)).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { status: 429, .. }));
        assert_eq!(t.proxies(), vec![Some("http://10.0.0.1:80".to_string()), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn plain_client_errors_are_returned_not_retried() {
        let t = Scripted::new(vec![Step::Respond(404, "gone")]);
        let pool = pool_with(&["10.0.0.1:80"]);
        let f = fetcher(t.clone(), pool.clone());
        let resp = f.fetch(Method::GET, "https://jobs.example/x", opts(10)).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.via.as_deref(), Some("http://10.0.0.1:80"));
        assert_eq!(pool.records()[0].total_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_through_proxy_feed_the_pool() {
        let t = Scripted::new(vec![Step::Fail, Step::Fail, Step::Fail]);
        let pool = pool_with(&["10.0.0.1:80", "10.0.0.2:80"]);
        let f = fetcher(t.clone(), pool.clone());
        f.fetch(Method::GET, "https://jobs.example/", opts(10)).await.unwrap_err();
        let failures: u64 = pool.records().iter().map(|r| r.total_failures).sum();
        assert_eq!(failures, 3);
        assert_eq!(t.proxies().iter().filter(|p| p.is_some()).count(), 3);
    }

    #[tokio::test]
    async fn rejects_unparseable_urls() {
        let f = fetcher(Scripted::new(vec![]), Arc::new(ProxyPool::disabled()));
        assert!(matches!(f.get("not a url").await, Err(FetchError::InvalidUrl(_))));
    }

    #[test]
    fn timeout_schedule_clamps_to_last_step() {
        let cfg = FetchConfig::default();
        let secs: Vec<u64> = (0..5).map(|i| cfg.timeout_for(i).as_secs()).collect();
        assert_eq!(secs, vec![15, 20, 30, 30, 30]);
        let fixed = FetchConfig { adaptive_timeout: false, ..FetchConfig::default() };
        assert_eq!(fixed.timeout_for(0), Duration::from_secs(30));
    }

    #[test]
    fn caller_headers_override_identity() {
        let o = FetchOptions::default().header("Accept", "application/json");
        assert_eq!(o.headers, vec![("Accept".to_string(), "application/json".to_string())]);
    }
}
