//! Health-tracked proxy pool with per-domain failover.

mod checker;
mod pool;
mod sources;

pub use checker::{HttpChecker, ProxyChecker};
pub use pool::{PoolStats, ProxyPool, ProxyRecord};
pub use sources::{normalize_address, parse_proxy_list, DEFAULT_FREE_SOURCES};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Master switch. When off, `select` always answers direct.
    pub enabled: bool,
    pub use_free_proxies: bool,
    pub custom_proxies: Vec<String>,
    pub free_proxy_sources: Vec<String>,
    pub test_before_use: bool,
    pub test_url: String,
    pub test_timeout_secs: u64,
    /// Round-robin when true, uniform random otherwise.
    pub rotate_per_request: bool,
    pub max_failures_before_blacklist: u32,
    /// Fraction of working proxies failing for a domain at which the pool is bypassed.
    pub bypass_threshold: f64,
    /// Cool-down after a rate-limit report. Zero disables temporary bans.
    pub temp_ban_secs: u64,
    pub max_free_proxies: usize,
    pub test_concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            enabled: false,
            use_free_proxies: true,
            custom_proxies: Vec::new(),
            free_proxy_sources: DEFAULT_FREE_SOURCES.iter().map(|s| s.to_string()).collect(),
            test_before_use: true,
            test_url: "https://httpbin.org/ip".to_string(),
            test_timeout_secs: 10,
            rotate_per_request: true,
            max_failures_before_blacklist: 3,
            bypass_threshold: 0.8,
            temp_ban_secs: 300,
            max_free_proxies: 50,
            test_concurrency: 16,
        }
    }
}
