use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Method, Proxy};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
    pub proxy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub final_url: String,
    /// Header names lowercased.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Connection, DNS, TLS or timeout failure. No HTTP response was obtained.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport. Keeps one client per proxy so connections are pooled
/// per route.
pub struct ReqwestTransport {
    accept_invalid_certs: bool,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestTransport {
    pub fn new(accept_invalid_certs: bool) -> Self {
        ReqwestTransport { accept_invalid_certs, clients: Mutex::new(HashMap::new()) }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let key = proxy.map(str::to_string);
        let mut clients = self.clients.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(c) = clients.get(&key) {
            return Ok(c.clone());
        }
        let mut builder = Client::builder()
            .redirect(Policy::limited(10))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .danger_accept_invalid_certs(self.accept_invalid_certs);
        if let Some(p) = proxy {
            builder = builder.proxy(Proxy::all(p).map_err(|e| TransportError(format!("bad proxy {p}: {e}")))?);
        }
        let client = builder.build().map_err(|e| TransportError(e.to_string()))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, req: TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.client_for(req.proxy.as_deref())?;
        let mut rb = client.request(req.method, &req.url).timeout(req.timeout);
        for (k, v) in &req.headers {
            rb = rb.header(k.as_str(), v.as_str());
        }
        if let Some(body) = req.body {
            rb = rb.body(body);
        }
        let resp = rb.send().await.map_err(|e| TransportError(e.to_string()))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = resp.text().await.map_err(|e| TransportError(e.to_string()))?;
        Ok(TransportResponse { status, final_url, headers, body })
    }
}
