use crate::{JobSource, Publisher};
use filters::FilterPolicy;
use futures::StreamExt;
use jobs_sqlite::{Db, RunStatus};
use jobwatch_core::{now_ms, CanonicalJob, RunStatistics, SourceError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Most jobs published per run; the rest wait for the next one.
    pub publish_batch_size: usize,
    pub max_age: Duration,
    pub send_summary: bool,
    /// CSV and JSON snapshots are written here after each run when set.
    pub export_dir: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings {
            publish_batch_size: 20,
            max_age: Duration::from_secs(30 * 24 * 3600),
            send_summary: false,
            export_dir: None,
        }
    }
}

pub struct Orchestrator {
    store: Arc<Db>,
    policy: FilterPolicy,
    sources: Vec<Box<dyn JobSource>>,
    publisher: Option<Arc<dyn Publisher>>,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(store: Arc<Db>, policy: FilterPolicy, settings: RunSettings) -> Self {
        Orchestrator { store, policy, sources: Vec::new(), publisher: None, settings }
    }

    pub fn with_source(mut self, source: Box<dyn JobSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn store(&self) -> &Arc<Db> { &self.store }

    /// One full pass: every source, then publish, purge, log. Failures inside a source
    /// or a single job only move counters; the run itself always completes.
    pub async fn run_once(&self, cancel: &CancellationToken) -> RunStatistics {
        let mut stats = RunStatistics::start(Uuid::now_v7().to_string(), now_ms());
        tracing::info!(run_id = %stats.run_id, sources = self.sources.len(), "run started");

        for source in &self.sources {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            self.collect(source.as_ref(), cancel, &mut stats).await;
        }
        stats.cancelled |= cancel.is_cancelled();

        if !stats.cancelled {
            self.publish_backlog(cancel, &mut stats).await;
        }
        match self.store.purge_older_than(self.settings.max_age) {
            Ok(n) => stats.purged = n,
            Err(e) => tracing::error!(error = %e, "purge failed"),
        }

        stats.finish(now_ms());
        let status = if stats.cancelled { RunStatus::Cancelled } else { RunStatus::Completed };
        if let Err(e) = self.store.record_run(&stats, status) {
            tracing::error!(error = %e, "failed to record run statistics");
        }
        if let Some(dir) = &self.settings.export_dir {
            self.export(dir);
        }
        if self.settings.send_summary && !stats.cancelled {
            if let Some(p) = self.publisher.as_ref().filter(|p| !p.is_suppressed()) {
                if let Err(e) = p.announce(&stats.summary()).await {
                    tracing::warn!(error = %e, "failed to publish run summary");
                }
            }
        }

        tracing::info!(
            run_id = %stats.run_id,
            found = stats.total_found(),
            new = stats.total_new(),
            duplicate = stats.total_duplicate(),
            errors = stats.total_errors(),
            published = stats.published,
            status = status.as_str(),
            "run finished"
        );
        stats
    }

    async fn collect(&self, source: &dyn JobSource, cancel: &CancellationToken, stats: &mut RunStatistics) {
        let name = source.name().to_string();
        tracing::info!(source = %name, "scraping");
        let mut accepted: Vec<CanonicalJob> = Vec::new();
        let mut errors = 0u64;
        {
            let st = stats.source_mut(&name);
            let mut stream = source.produce();
            while !cancel.is_cancelled() {
                let Some(item) = stream.next().await else { break };
                match item {
                    Ok(raw) => {
                        st.found += 1;
                        if !raw.is_eligible() {
                            st.discarded += 1;
                            continue;
                        }
                        if let Err(reason) = self.policy.evaluate(&raw) {
                            tracing::debug!(source = %name, title = %raw.title, %reason, "filtered");
                            st.filtered += 1;
                            continue;
                        }
                        if let Some(job) = CanonicalJob::from_raw(&raw, now_ms()) {
                            st.accepted += 1;
                            accepted.push(job);
                        }
                    }
                    Err(e @ SourceError::AuthenticationFailed { .. }) => {
                        tracing::error!(source = %name, error = %e, "source needs authentication, skipping");
                        errors += 1;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(source = %name, error = %e, "source error");
                        errors += 1;
                    }
                }
            }
        }

        let outcome = self.store.upsert_many(&accepted);
        let st = stats.source_mut(&name);
        st.new += outcome.new;
        st.duplicate += outcome.duplicate;
        st.errors += errors + outcome.errors;
        tracing::info!(source = %name, found = st.found, new = st.new, duplicate = st.duplicate, errors = st.errors, "source done");
    }

    async fn publish_backlog(&self, cancel: &CancellationToken, stats: &mut RunStatistics) {
        let Some(publisher) = &self.publisher else { return };
        if publisher.is_suppressed() {
            tracing::info!("quiet hours, holding back publishing");
            stats.publish_suppressed = true;
            return;
        }
        let backlog = match self.store.unpublished(self.settings.publish_batch_size) {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "could not load unpublished jobs");
                return;
            }
        };
        for job in backlog {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            match publisher.publish(&job).await {
                Ok(delivery_id) => {
                    stats.published += 1;
                    if let Err(e) = self.store.mark_published(&job.fingerprint, &delivery_id, now_ms()) {
                        tracing::warn!(fingerprint = %job.fingerprint, error = %e, "published but not marked");
                    }
                }
                Err(e) => {
                    stats.publish_failures += 1;
                    tracing::warn!(title = %job.title, error = %e, "publish failed");
                }
            }
        }
    }

    fn export(&self, dir: &std::path::Path) {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot create export dir");
            return;
        }
        match self.store.export_csv(&dir.join("jobs.csv")) {
            Ok(n) => tracing::debug!(rows = n, "exported csv"),
            Err(e) => tracing::warn!(error = %e, "csv export failed"),
        }
        match self.store.export_json(&dir.join("jobs.json")) {
            Ok(n) => tracing::debug!(rows = n, "exported json"),
            Err(e) => tracing::warn!(error = %e, "json export failed"),
        }
    }

    /// Runs, sleeps `interval`, repeats until `cancel` fires. `on_run` sees every run.
    /// Returns how many runs were made.
    pub async fn run_forever<F>(&self, interval: Duration, cancel: &CancellationToken, mut on_run: F) -> u64
    where
        F: FnMut(&RunStatistics),
    {
        let mut runs = 0;
        loop {
            let stats = self.run_once(cancel).await;
            runs += 1;
            on_run(&stats);
            if cancel.is_cancelled() {
                break;
            }
            tracing::info!(next_in_secs = interval.as_secs(), "sleeping until next run");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        runs
    }
}
