use crate::checker::ProxyChecker;
use crate::sources::{dedupe, normalize_address, parse_proxy_list};
use crate::PoolConfig;
use futures::stream::{self, StreamExt};
use jobwatch_core::{now_ms, FailureKind};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time view of one proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRecord {
    pub address: String,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub blacklisted: bool,
    pub blacklisted_until_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub working: usize,
    pub blacklisted: usize,
    pub temp_banned: usize,
    pub total_successes: u64,
    pub total_failures: u64,
}

#[derive(Debug)]
struct Entry {
    address: String,
    consecutive_failures: u32,
    total_successes: u64,
    total_failures: u64,
    blacklisted: bool,
    banned_until: Option<Instant>,
    // passed admission (or admitted untested)
    admitted: bool,
}

impl Entry {
    fn new(address: String) -> Self {
        Entry {
            address,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            blacklisted: false,
            banned_until: None,
            admitted: false,
        }
    }

    fn working(&self) -> bool { self.admitted && !self.blacklisted }

    fn banned_at(&self, now: Instant) -> bool { self.banned_until.is_some_and(|t| t > now) }
}

#[derive(Debug, Default)]
struct PoolState {
    // never shrinks; blacklisting only flips a flag
    entries: Vec<Entry>,
    by_address: HashMap<String, usize>,
    domain_failures: HashMap<String, HashSet<usize>>,
    cursor: usize,
}

impl PoolState {
    fn entry_mut(&mut self, address: &str) -> Option<&mut Entry> {
        let idx = *self.by_address.get(address)?;
        self.entries.get_mut(idx)
    }

    fn insert(&mut self, address: String) -> usize {
        if let Some(&idx) = self.by_address.get(&address) {
            return idx;
        }
        let idx = self.entries.len();
        self.by_address.insert(address.clone(), idx);
        self.entries.push(Entry::new(address));
        idx
    }

    fn working_len(&self) -> usize { self.entries.iter().filter(|e| e.working()).count() }

    fn bypass(&self, domain: &str, threshold_pct: usize) -> bool {
        let working = self.working_len();
        if working == 0 {
            return false;
        }
        let failing = match self.domain_failures.get(domain) {
            Some(set) => set.iter().filter(|&&i| self.entries[i].working()).count(),
            None => 0,
        };
        failing * 100 >= threshold_pct * working
    }

    fn eligible(&self, idx: usize, domain: Option<&str>, now: Instant) -> bool {
        let e = &self.entries[idx];
        if !e.working() || e.banned_at(now) {
            return false;
        }
        match domain.and_then(|d| self.domain_failures.get(d)) {
            Some(set) => !set.contains(&idx),
            None => true,
        }
    }
}

/// Proxy pool shared by every fetch. All state sits behind one mutex that is held only
/// for in-memory bookkeeping, never across a network call.
pub struct ProxyPool {
    cfg: PoolConfig,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new(cfg: PoolConfig) -> Self {
        ProxyPool { cfg, state: Mutex::new(PoolState::default()) }
    }

    /// A pool that never hands out a proxy.
    pub fn disabled() -> Self {
        Self::new(PoolConfig { enabled: false, ..PoolConfig::default() })
    }

    pub fn config(&self) -> &PoolConfig { &self.cfg }

    pub fn is_enabled(&self) -> bool { self.cfg.enabled }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // the state stays consistent even if a holder panicked mid-update
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn threshold_pct(&self) -> usize { (self.cfg.bypass_threshold.clamp(0.0, 1.0) * 100.0).round() as usize }

    /// Builds the working set from custom endpoints and, optionally, public lists.
    /// Source and test failures are logged and skipped. Returns the working count.
    pub async fn initialize(&self, checker: &dyn ProxyChecker) -> usize {
        if !self.cfg.enabled {
            tracing::debug!("proxying disabled; pool left empty");
            return 0;
        }

        let mut candidates: Vec<String> = self.cfg.custom_proxies.iter().filter_map(|p| normalize_address(p)).collect();
        if !candidates.is_empty() {
            tracing::info!(count = candidates.len(), "added custom proxies");
        }

        if self.cfg.use_free_proxies {
            let mut free = Vec::new();
            for source in &self.cfg.free_proxy_sources {
                match checker.fetch_list(source).await {
                    Ok(body) => {
                        let found = parse_proxy_list(&body);
                        tracing::debug!(source = %source, count = found.len(), "fetched proxy list");
                        free.extend(found);
                    }
                    Err(e) => tracing::warn!(source = %source, error = %e, "failed to fetch proxy list"),
                }
            }
            let mut free = dedupe(free);
            free.truncate(self.cfg.max_free_proxies);
            candidates.extend(free);
        }
        let candidates = dedupe(candidates);

        let admitted: Vec<(String, bool)> = if self.cfg.test_before_use {
            let timeout = Duration::from_secs(self.cfg.test_timeout_secs);
            let test_url = self.cfg.test_url.as_str();
            tracing::info!(count = candidates.len(), "testing proxies");
            stream::iter(candidates)
                .map(|p| async move {
                    let ok = checker.test(&p, test_url, timeout).await;
                    (p, ok)
                })
                .buffered(self.cfg.test_concurrency.max(1))
                .collect()
                .await
        } else {
            candidates.into_iter().map(|p| (p, true)).collect()
        };

        let working = {
            let mut st = self.lock();
            for (address, ok) in admitted {
                let idx = st.insert(address);
                st.entries[idx].admitted = ok;
            }
            st.working_len()
        };
        tracing::info!(working, "proxy pool ready");
        working
    }

    /// Adds endpoints straight to the working set without testing.
    pub fn add_untested<I, S>(&self, addresses: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut st = self.lock();
        for a in addresses {
            if let Some(address) = normalize_address(a.as_ref()) {
                let idx = st.insert(address);
                st.entries[idx].admitted = true;
            }
        }
        st.working_len()
    }

    /// Picks a proxy for a request to `domain`. `None` means go direct: proxying is off,
    /// the pool is exhausted, or the domain has tripped the bypass threshold.
    pub fn select(&self, domain: Option<&str>) -> Option<String> {
        if !self.cfg.enabled {
            return None;
        }
        let now = Instant::now();
        let threshold = self.threshold_pct();
        let mut st = self.lock();
        if st.entries.is_empty() {
            return None;
        }
        if let Some(d) = domain {
            if st.bypass(d, threshold) {
                tracing::debug!(domain = d, "bypassing proxy pool");
                return None;
            }
        }

        let n = st.entries.len();
        if self.cfg.rotate_per_request {
            let start = st.cursor % n;
            let found = (0..n).map(|off| (start + off) % n).find(|&i| st.eligible(i, domain, now))?;
            st.cursor = found + 1;
            Some(st.entries[found].address.clone())
        } else {
            let eligible: Vec<usize> = (0..n).filter(|&i| st.eligible(i, domain, now)).collect();
            let idx = *eligible.choose(&mut rand::thread_rng())?;
            Some(st.entries[idx].address.clone())
        }
    }

    pub fn report_success(&self, proxy: &str) {
        let mut st = self.lock();
        if let Some(e) = st.entry_mut(proxy) {
            e.consecutive_failures = 0;
            e.total_successes += 1;
        }
    }

    pub fn report_failure(&self, proxy: &str, domain: Option<&str>, kind: FailureKind) {
        let max = self.cfg.max_failures_before_blacklist.max(1);
        let temp_ban = Duration::from_secs(self.cfg.temp_ban_secs);
        let mut st = self.lock();
        let Some(&idx) = st.by_address.get(proxy) else {
            tracing::debug!(proxy, "failure reported for unknown proxy");
            return;
        };
        let e = &mut st.entries[idx];
        e.consecutive_failures += 1;
        e.total_failures += 1;
        if !e.blacklisted && e.consecutive_failures >= max {
            e.blacklisted = true;
            e.banned_until = None;
            tracing::warn!(proxy, failures = e.consecutive_failures, "blacklisted proxy");
        } else if kind == FailureKind::RateLimited && !e.blacklisted && !temp_ban.is_zero() {
            e.banned_until = Some(Instant::now() + temp_ban);
            tracing::debug!(proxy, secs = temp_ban.as_secs(), "proxy cooling down");
        }
        if let Some(d) = domain {
            st.domain_failures.entry(d.to_string()).or_default().insert(idx);
        }
    }

    pub fn should_bypass(&self, domain: &str) -> bool {
        if !self.cfg.enabled {
            return false;
        }
        let threshold = self.threshold_pct();
        self.lock().bypass(domain, threshold)
    }

    pub fn working_count(&self) -> usize { self.lock().working_len() }

    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let st = self.lock();
        let mut s = PoolStats { total: st.entries.len(), ..PoolStats::default() };
        for e in &st.entries {
            if e.working() {
                s.working += 1;
            }
            if e.blacklisted {
                s.blacklisted += 1;
            }
            if e.banned_at(now) {
                s.temp_banned += 1;
            }
            s.total_successes += e.total_successes;
            s.total_failures += e.total_failures;
        }
        s
    }

    pub fn records(&self) -> Vec<ProxyRecord> {
        let now = Instant::now();
        let wall = now_ms();
        let st = self.lock();
        st.entries
            .iter()
            .map(|e| ProxyRecord {
                address: e.address.clone(),
                consecutive_failures: e.consecutive_failures,
                total_successes: e.total_successes,
                total_failures: e.total_failures,
                blacklisted: e.blacklisted,
                blacklisted_until_ms: e
                    .banned_until
                    .filter(|t| *t > now)
                    .map(|t| wall + (t - now).as_millis() as i64),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobwatch_core::FetchError;
    use std::collections::HashMap;

    fn cfg() -> PoolConfig {
        PoolConfig {
            enabled: true,
            use_free_proxies: false,
            test_before_use: false,
            temp_ban_secs: 0,
            ..PoolConfig::default()
        }
    }

    fn pool_of(n: usize) -> (ProxyPool, Vec<String>) {
        let pool = ProxyPool::new(cfg());
        let addrs: Vec<String> = (1..=n).map(|i| format!("http://10.0.0.{i}:8080")).collect();
        pool.add_untested(&addrs);
        (pool, addrs)
    }

    struct FakeChecker {
        lists: HashMap<String, String>,
        alive: HashSet<String>,
    }

    #[async_trait]
    impl ProxyChecker for FakeChecker {
        async fn fetch_list(&self, url: &str) -> Result<String, FetchError> {
            self.lists.get(url).cloned().ok_or_else(|| FetchError::RequestFailed {
                url: url.to_string(),
                attempts: 1,
                message: "unreachable".into(),
            })
        }
        async fn test(&self, proxy: &str, _test_url: &str, _timeout: Duration) -> bool { self.alive.contains(proxy) }
    }

    #[test]
    fn three_consecutive_failures_blacklist() {
        let (pool, addrs) = pool_of(2);
        for _ in 0..3 {
            pool.report_failure(&addrs[0], None, FailureKind::Transport);
        }
        for _ in 0..10 {
            assert_eq!(pool.select(None).as_deref(), Some(addrs[1].as_str()));
        }
        assert_eq!(pool.stats().blacklisted, 1);
        assert!(pool.records()[0].blacklisted);
    }

    #[test]
    fn success_resets_the_streak() {
        let (pool, addrs) = pool_of(1);
        pool.report_failure(&addrs[0], None, FailureKind::Transport);
        pool.report_failure(&addrs[0], None, FailureKind::Transport);
        pool.report_success(&addrs[0]);
        pool.report_failure(&addrs[0], None, FailureKind::Transport);
        assert_eq!(pool.select(None).as_deref(), Some(addrs[0].as_str()));
        let rec = &pool.records()[0];
        assert_eq!((rec.consecutive_failures, rec.total_failures, rec.total_successes), (1, 3, 1));
        assert!(!rec.blacklisted);
    }

    #[test]
    fn bypass_trips_at_eighty_percent() {
        let (pool, addrs) = pool_of(5);
        for a in &addrs[..3] {
            pool.report_failure(a, Some("example.com"), FailureKind::Blocked);
        }
        assert!(!pool.should_bypass("example.com"));
        assert!(pool.select(Some("example.com")).is_some());
        pool.report_failure(&addrs[3], Some("example.com"), FailureKind::Blocked);
        assert!(pool.should_bypass("example.com"));
        assert_eq!(pool.select(Some("example.com")), None);
        assert!(!pool.should_bypass("other.org"));
        assert!(pool.select(Some("other.org")).is_some());
    }

    #[test]
    fn domain_failures_are_skipped_for_that_domain_only() {
        let (pool, addrs) = pool_of(3);
        pool.report_failure(&addrs[0], Some("a.com"), FailureKind::Blocked);
        for _ in 0..6 {
            assert_ne!(pool.select(Some("a.com")).as_deref(), Some(addrs[0].as_str()));
        }
        let picks: HashSet<_> = (0..3).filter_map(|_| pool.select(Some("b.com"))).collect();
        assert_eq!(picks.len(), 3);
    }

    #[test]
    fn round_robin_is_fair() {
        let (pool, addrs) = pool_of(4);
        let n = 23;
        let mut counts: HashMap<String, usize> = addrs.iter().map(|a| (a.clone(), 0)).collect();
        for i in 1..=n {
            *counts.entry(pool.select(None).unwrap()).or_default() += 1;
            // no proxy gets two picks ahead of any other at any point
            let (lo, hi) = (counts.values().min().copied().unwrap(), counts.values().max().copied().unwrap());
            assert!(hi - lo <= 1, "after {i} picks: {counts:?}");
        }
        for a in &addrs {
            let c = counts[a];
            assert!(c >= n / addrs.len() && c < n / addrs.len() + 2, "{a} picked {c} times");
        }
    }

    #[test]
    fn random_mode_only_picks_working() {
        let pool = ProxyPool::new(PoolConfig { rotate_per_request: false, ..cfg() });
        pool.add_untested(["10.0.0.1:80", "10.0.0.2:80"]);
        for _ in 0..3 {
            pool.report_failure("http://10.0.0.1:80", None, FailureKind::Transport);
        }
        for _ in 0..20 {
            assert_eq!(pool.select(None).as_deref(), Some("http://10.0.0.2:80"));
        }
    }

    #[test]
    fn exhausted_or_disabled_pool_answers_direct() {
        let (pool, addrs) = pool_of(1);
        for _ in 0..3 {
            pool.report_failure(&addrs[0], Some("x.com"), FailureKind::Transport);
        }
        assert_eq!(pool.select(None), None);
        assert_eq!(pool.select(Some("x.com")), None);
        assert_eq!(pool.working_count(), 0);
        assert_eq!(ProxyPool::new(cfg()).select(None), None);

        let off = ProxyPool::disabled();
        off.add_untested(["10.0.0.9:80"]);
        assert_eq!(off.select(None), None);
        assert!(!off.should_bypass("x.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_cools_down_then_recovers() {
        let pool = ProxyPool::new(PoolConfig { temp_ban_secs: 60, ..cfg() });
        pool.add_untested(["10.0.0.1:80"]);
        pool.report_failure("http://10.0.0.1:80", None, FailureKind::RateLimited);
        assert_eq!(pool.select(None), None);
        assert_eq!(pool.stats().temp_banned, 1);
        assert!(pool.records()[0].blacklisted_until_ms.is_some());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(pool.select(None).as_deref(), Some("http://10.0.0.1:80"));
        assert_eq!(pool.stats().temp_banned, 0);
    }

    #[tokio::test]
    async fn initialize_merges_custom_and_tested_free_proxies() {
        let checker = FakeChecker {
            lists: HashMap::from([
                ("https://list.example/a".to_string(), "1.1.1.1:80 2.2.2.2:3128 1.1.1.1:80".to_string()),
            ]),
            alive: HashSet::from(["http://9.9.9.9:80".to_string(), "http://2.2.2.2:3128".to_string()]),
        };
        let pool = ProxyPool::new(PoolConfig {
            use_free_proxies: true,
            test_before_use: true,
            custom_proxies: vec!["9.9.9.9:80".into()],
            free_proxy_sources: vec!["https://list.example/a".into(), "https://list.example/down".into()],
            ..cfg()
        });
        assert_eq!(pool.initialize(&checker).await, 2);
        let stats = pool.stats();
        assert_eq!((stats.total, stats.working), (3, 2));
        assert_eq!(pool.select(None).as_deref(), Some("http://9.9.9.9:80"));
    }

    #[tokio::test]
    async fn initialize_is_a_no_op_when_disabled() {
        let checker = FakeChecker { lists: HashMap::new(), alive: HashSet::new() };
        assert_eq!(ProxyPool::disabled().initialize(&checker).await, 0);
    }
}
