use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fetcher::Fetcher;
use jobs_sqlite::{Db, ProxyStatRow};
use jobwatch_core::{now_ms, CanonicalJob, RunStatistics};
use pipeline::{CancellationToken, Orchestrator, RunSettings};
use proxy_pool::{HttpChecker, ProxyPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod sources;
mod telegram;

use config::Config;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ExportFormat { Csv, Json }

#[derive(Debug, Parser)]
#[command(name = "jobwatch", version, about = "Entry-level job board watcher and channel publisher")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./jobwatch.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Scrape every enabled source once, then publish and purge
    Run {
        /// Collect and store only
        #[arg(long)]
        no_publish: bool,
    },
    /// Repeat runs on a schedule until interrupted
    Watch {
        /// Overrides schedule.run_interval_hours
        #[arg(long)]
        interval_hours: Option<f64>,
        #[arg(long)]
        no_publish: bool,
    },
    /// Stored job counts and the latest runs
    Stats {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Jobs seen within the last N hours
    Recent {
        #[arg(long, default_value_t = 24)]
        hours: u64,
        /// Only jobs from this source
        #[arg(long)]
        source: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Substring search over title, company and location
    Search {
        query: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Delete jobs not seen for N days (defaults to data.max_age_days)
    Purge {
        #[arg(long)]
        days: Option<u64>,
    },
    /// Write every stored job to a file
    Export {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
    },
    /// Load and test the proxy pool, then print its health
    Proxies {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_store(cfg: &Config) -> Result<Arc<Db>> {
    let path = &cfg.data.database_path;
    let db = Db::open_or_create(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(db))
}

async fn prepare_pool(cfg: &Config) -> Result<Arc<ProxyPool>> {
    let pool = Arc::new(ProxyPool::new(cfg.proxy.clone()));
    if pool.is_enabled() {
        let checker = HttpChecker::new(Duration::from_secs(cfg.scraping.request_timeout_secs), cfg.scraping.accept_invalid_certs)?;
        let loaded = pool.initialize(&checker).await;
        if loaded == 0 {
            tracing::warn!("proxy pool is enabled but empty, requests go direct");
        }
    }
    Ok(pool)
}

fn save_proxy_snapshot(store: &Db, pool: &ProxyPool) {
    if !pool.is_enabled() {
        return;
    }
    let rows: Vec<ProxyStatRow> = pool
        .records()
        .into_iter()
        .map(|r| ProxyStatRow {
            address: r.address,
            total_successes: r.total_successes,
            total_failures: r.total_failures,
            consecutive_failures: r.consecutive_failures,
            blacklisted: r.blacklisted,
            blacklisted_until_ms: r.blacklisted_until_ms,
        })
        .collect();
    if let Err(e) = store.save_proxy_stats(&rows, now_ms()) {
        tracing::warn!(error = %e, "failed to save proxy stats");
    }
}

fn build_orchestrator(cfg: &Config, store: Arc<Db>, fetcher: &Arc<Fetcher>, publish: bool) -> Result<Orchestrator> {
    let settings = RunSettings {
        publish_batch_size: cfg.telegram.batch_size,
        max_age: cfg.data.max_age(),
        send_summary: cfg.telegram.send_summary,
        export_dir: cfg.data.export_after_each_run.then(|| cfg.data.export_dir.clone()),
    };
    let mut orch = Orchestrator::new(store, cfg.filters.clone(), settings);
    for source in sources::build_sources(&cfg.sources, fetcher) {
        orch = orch.with_source(source);
    }
    if publish && cfg.telegram.enabled {
        let publisher = telegram::TelegramPublisher::new(&cfg.telegram, &cfg.schedule)?;
        orch = orch.with_publisher(Arc::new(publisher));
    } else if publish {
        tracing::info!("telegram disabled, jobs are stored only");
    }
    Ok(orch)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current request");
            t.cancel();
        }
    });
    token
}

fn report_run(stats: &RunStatistics, fetcher: &Fetcher) {
    let m = fetcher.metrics();
    tracing::info!(
        attempts = m.attempts,
        successes = m.successes,
        transport_errors = m.transport_errors,
        blocked = m.blocked,
        rate_limited = m.rate_limited,
        direct_fallbacks = m.direct_fallbacks,
        "fetch totals"
    );
    println!("{}", stats.summary());
}

fn print_jobs(jobs: &[CanonicalJob], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for j in jobs {
                let loc = if j.location.is_empty() { String::new() } else { format!(" ({})", j.location) };
                println!("[{}] {} at {}{} {}", j.source, j.title, j.company, loc, j.url);
            }
            println!("{} job(s)", jobs.len());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(jobs)?),
        OutputFormat::Jsonl => {
            for j in jobs {
                println!("{}", serde_json::to_string(j)?);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Version => {
            println!("jobwatch {} (core {})", env!("CARGO_PKG_VERSION"), jobwatch_core::version());
        }
        Commands::Run { no_publish } => {
            let problems = cfg.validate();
            if !problems.is_empty() {
                bail!("invalid configuration:\n  {}", problems.join("\n  "));
            }
            let store = open_store(&cfg)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let pool = prepare_pool(&cfg).await?;
                let fetcher = Arc::new(Fetcher::with_reqwest(cfg.scraping.clone(), pool.clone()));
                let orch = build_orchestrator(&cfg, store.clone(), &fetcher, !no_publish)?;
                let cancel = cancel_on_ctrl_c();
                let stats = orch.run_once(&cancel).await;
                save_proxy_snapshot(&store, &pool);
                report_run(&stats, &fetcher);
                anyhow::Ok(())
            })?;
        }
        Commands::Watch { interval_hours, no_publish } => {
            let mut cfg = cfg;
            if let Some(h) = interval_hours {
                cfg.schedule.run_interval_hours = h;
            }
            let problems = cfg.validate();
            if !problems.is_empty() {
                bail!("invalid configuration:\n  {}", problems.join("\n  "));
            }
            let interval = cfg.schedule.interval();
            let store = open_store(&cfg)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let pool = prepare_pool(&cfg).await?;
                let fetcher = Arc::new(Fetcher::with_reqwest(cfg.scraping.clone(), pool.clone()));
                let orch = build_orchestrator(&cfg, store.clone(), &fetcher, !no_publish)?;
                let cancel = cancel_on_ctrl_c();
                let runs = orch
                    .run_forever(interval, &cancel, |stats| {
                        save_proxy_snapshot(&store, &pool);
                        report_run(stats, &fetcher);
                    })
                    .await;
                tracing::info!(runs, "watch stopped");
                anyhow::Ok(())
            })?;
        }
        Commands::Stats { runs, format } => {
            let store = open_store(&cfg)?;
            let total = store.count()?;
            let by_source = store.counts_by_source()?;
            let recent = store.recent_runs(runs)?;
            match format {
                OutputFormat::Text => {
                    println!("{} job(s) stored", total);
                    for (source, n) in &by_source {
                        println!("  {}: {}", source, n);
                    }
                    for r in &recent {
                        println!();
                        println!("run {} ({})", r.run_id, r.status);
                        println!("{}", r.stats.summary());
                    }
                }
                OutputFormat::Json | OutputFormat::Jsonl => {
                    let sources: serde_json::Map<String, serde_json::Value> =
                        by_source.into_iter().map(|(s, n)| (s, n.into())).collect();
                    let obj = serde_json::json!({ "total": total, "by_source": sources, "runs": recent });
                    if format == OutputFormat::Json {
                        println!("{}", serde_json::to_string_pretty(&obj)?);
                    } else {
                        println!("{}", serde_json::to_string(&obj)?);
                    }
                }
            }
        }
        Commands::Recent { hours, source, format } => {
            let store = open_store(&cfg)?;
            let mut jobs = store.query_recent(Duration::from_secs(hours.saturating_mul(3600)))?;
            if let Some(s) = source {
                let s = s.to_lowercase();
                jobs.retain(|j| j.source == s);
            }
            print_jobs(&jobs, format)?;
        }
        Commands::Search { query, limit, format } => {
            let store = open_store(&cfg)?;
            print_jobs(&store.search(&query, limit)?, format)?;
        }
        Commands::Purge { days } => {
            let store = open_store(&cfg)?;
            let age = days.map(|d| Duration::from_secs(d.saturating_mul(24 * 3600))).unwrap_or_else(|| cfg.data.max_age());
            let n = store.purge_older_than(age)?;
            println!("purged {} job(s)", n);
        }
        Commands::Export { out, format } => {
            let store = open_store(&cfg)?;
            if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let n = match format {
                ExportFormat::Csv => store.export_csv(&out)?,
                ExportFormat::Json => store.export_json(&out)?,
            };
            println!("exported {} job(s) to {}", n, out.display());
        }
        Commands::Proxies { format } => {
            if !cfg.proxy.enabled {
                println!("proxy pool is disabled (proxy.enabled: false)");
                return Ok(());
            }
            let rt = tokio::runtime::Runtime::new()?;
            let pool = rt.block_on(prepare_pool(&cfg))?;
            let stats = pool.stats();
            match format {
                OutputFormat::Text => {
                    println!(
                        "{} proxies: {} working, {} blacklisted, {} cooling down",
                        stats.total, stats.working, stats.blacklisted, stats.temp_banned
                    );
                    for r in pool.records() {
                        println!("  {}", r.address);
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&pool.records())?),
                OutputFormat::Jsonl => {
                    for r in pool.records() {
                        println!("{}", serde_json::to_string(&r)?);
                    }
                }
            }
            if let Ok(store) = open_store(&cfg) {
                save_proxy_snapshot(&store, &pool);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["jobwatch", "--config", "x.yaml", "run", "--no-publish"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("x.yaml")));
        assert!(matches!(cli.command, Commands::Run { no_publish: true }));

        let cli = Cli::try_parse_from(["jobwatch", "search", "rust", "--limit", "5", "--format", "jsonl", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Search { ref query, limit: 5, format: OutputFormat::Jsonl } if query == "rust"));

        let cli = Cli::try_parse_from(["jobwatch", "export", "--out", "jobs.json", "--format", "json"]).unwrap();
        assert!(matches!(cli.command, Commands::Export { format: ExportFormat::Json, .. }));
        assert!(Cli::try_parse_from(["jobwatch", "bogus"]).is_err());
    }

    #[tokio::test]
    async fn orchestrator_without_telegram_has_only_sources() {
        let mut cfg = Config::default();
        cfg.sources.indeed.enabled = false;
        let store = Arc::new(Db::open_in_memory().unwrap());
        let fetcher = Arc::new(Fetcher::with_reqwest(cfg.scraping.clone(), Arc::new(ProxyPool::disabled())));
        assert_eq!(sources::build_sources(&cfg.sources, &fetcher).len(), 2);
        assert!(build_orchestrator(&cfg, store, &fetcher, true).is_ok());
    }
}
