use anyhow::{bail, Context, Result};
use fetcher::FetchConfig;
use filters::FilterPolicy;
use pipeline::QuietHours;
use proxy_pool::PoolConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TOKEN_ENV: &str = "JOBWATCH_TELEGRAM_TOKEN";

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub proxy: PoolConfig,
    pub scraping: FetchConfig,
    pub filters: FilterPolicy,
    pub data: DataConfig,
    pub schedule: ScheduleConfig,
    pub telegram: TelegramConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    pub database_path: PathBuf,
    pub max_age_days: u64,
    pub export_dir: PathBuf,
    pub export_after_each_run: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            database_path: PathBuf::from("data/jobs.db"),
            max_age_days: 30,
            export_dir: PathBuf::from("data/exports"),
            export_after_each_run: false,
        }
    }
}

impl DataConfig {
    pub fn max_age(&self) -> Duration { Duration::from_secs(self.max_age_days.saturating_mul(24 * 3600)) }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub run_interval_hours: f64,
    pub quiet_hours_start: u8,
    pub quiet_hours_end: u8,
    pub utc_offset_minutes: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig { run_interval_hours: 6.0, quiet_hours_start: 23, quiet_hours_end: 7, utc_offset_minutes: 330 }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.run_interval_hours * 3600.0).unwrap_or(Duration::ZERO)
    }

    pub fn quiet_hours(&self) -> QuietHours {
        QuietHours {
            start_hour: self.quiet_hours_start,
            end_hour: self.quiet_hours_end,
            utc_offset_minutes: self.utc_offset_minutes,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: Option<String>,
    pub channel_id: String,
    pub post_delay_min: f64,
    pub post_delay_max: f64,
    pub batch_size: usize,
    pub send_summary: bool,
    pub max_retries: u32,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        TelegramConfig {
            enabled: false,
            bot_token: None,
            channel_id: String::new(),
            post_delay_min: 2.0,
            post_delay_max: 5.0,
            batch_size: 20,
            send_summary: true,
            max_retries: 3,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl TelegramConfig {
    /// The environment wins over the file so tokens can stay out of config.
    pub fn token(&self) -> Option<String> { resolve_token(std::env::var(TOKEN_ENV).ok(), self.bot_token.as_deref()) }
}

fn resolve_token(from_env: Option<String>, from_file: Option<&str>) -> Option<String> {
    from_env
        .filter(|t| !t.trim().is_empty())
        .or_else(|| from_file.map(str::to_string).filter(|t| !t.trim().is_empty()))
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    pub max_pages: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            enabled: true,
            keywords: vec!["software engineer fresher".into(), "python developer fresher".into(), "data analyst fresher".into()],
            locations: vec!["India".into()],
            max_pages: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SupersetConfig {
    pub enabled: bool,
    pub session_cookie: Option<String>,
    pub jobs_url: String,
}

impl Default for SupersetConfig {
    fn default() -> Self {
        SupersetConfig { enabled: false, session_cookie: None, jobs_url: "https://app.joinsuperset.com/students/jobprofiles".into() }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    pub linkedin: SearchConfig,
    pub indeed: SearchConfig,
    pub naukri: SearchConfig,
    pub superset: SupersetConfig,
}

impl Config {
    /// Problems that make a scraping run pointless or a publish impossible.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.telegram.enabled {
            if self.telegram.token().is_none() {
                problems.push(format!("telegram.bot_token (or {TOKEN_ENV}) is required when telegram is enabled"));
            }
            if self.telegram.channel_id.trim().is_empty() {
                problems.push("telegram.channel_id is required when telegram is enabled".to_string());
            }
        }
        if self.scraping.request_delay_min > self.scraping.request_delay_max {
            problems.push("scraping.request_delay_min is greater than request_delay_max".to_string());
        }
        let hours = self.schedule.run_interval_hours;
        if !hours.is_finite() || hours <= 0.0 {
            problems.push("schedule.run_interval_hours must be a positive number".to_string());
        }
        if self.proxy.max_failures_before_blacklist == 0 {
            problems.push("proxy.max_failures_before_blacklist must be at least 1".to_string());
        }
        let s = &self.sources;
        if !(s.linkedin.enabled || s.indeed.enabled || s.naukri.enabled || s.superset.enabled) {
            problems.push("no job source is enabled".to_string());
        }
        problems
    }
}

/// Reads `path`, or `./jobwatch.yaml` when no path is given and that file exists.
/// With neither, built-in defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("jobwatch.yaml");
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = serde_yaml::from_str(&s).with_context(|| format!("parsing {}", path.display()))?;
    if cfg.schedule.quiet_hours_start > 23 || cfg.schedule.quiet_hours_end > 23 {
        bail!("schedule quiet hours must be between 0 and 23");
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
proxy:
  enabled: true
  custom_proxies: ["10.0.0.1:8080"]
  rotate_per_request: false
scraping:
  request_delay_min: 0.5
  request_delay_max: 1.5
filters:
  exclude_companies: ["Spam Corp"]
  max_experience_years: 1
data:
  max_age_days: 7
sources:
  indeed:
    enabled: false
  superset:
    enabled: true
    session_cookie: "abc"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.proxy.enabled);
        assert!(!cfg.proxy.rotate_per_request);
        assert_eq!(cfg.proxy.max_failures_before_blacklist, 3);
        assert_eq!(cfg.scraping.timeout_escalation_secs, vec![15, 20, 30]);
        assert_eq!(cfg.filters.max_experience_years, 1.0);
        assert!(cfg.filters.exclude_title_keywords.contains(&"senior".to_string()));
        assert_eq!(cfg.data.max_age(), Duration::from_secs(7 * 24 * 3600));
        assert!(!cfg.sources.indeed.enabled);
        assert!(cfg.sources.linkedin.enabled);
        assert_eq!(cfg.sources.superset.session_cookie.as_deref(), Some("abc"));
        assert_eq!(cfg.telegram.batch_size, 20);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn file_loading() {
        let dir = std::env::temp_dir().join(format!("jobwatch-cfg-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let good = dir.join("good.yaml");
        fs::write(&good, "schedule:\n  run_interval_hours: 2\n").unwrap();
        assert_eq!(load_config(Some(&good)).unwrap().schedule.interval(), Duration::from_secs(7200));

        let bad = dir.join("bad.yaml");
        fs::write(&bad, "schedule:\n  quiet_hours_start: 25\n").unwrap();
        assert!(load_config(Some(&bad)).is_err());
        assert!(load_config(Some(&dir.join("missing.yaml"))).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn validation_flags_unusable_settings() {
        let mut cfg = Config::default();
        cfg.telegram.enabled = true;
        cfg.telegram.bot_token = Some("t".into());
        cfg.scraping.request_delay_min = 9.0;
        let problems = cfg.validate();
        assert!(problems.iter().any(|p| p.contains("channel_id")));
        assert!(problems.iter().any(|p| p.contains("request_delay_min")));
        assert!(!problems.iter().any(|p| p.contains("run_interval_hours")));
    }

    #[test]
    fn run_interval_must_be_positive_and_finite() {
        for hours in [0.0, -1.0, f64::INFINITY, f64::NAN] {
            let mut cfg = Config::default();
            cfg.schedule.run_interval_hours = hours;
            assert!(cfg.validate().iter().any(|p| p.contains("run_interval_hours")), "{hours} accepted");
            assert_eq!(cfg.schedule.interval(), Duration::ZERO);
        }
        let mut cfg = Config::default();
        cfg.schedule.run_interval_hours = 0.5;
        assert_eq!(cfg.schedule.interval(), Duration::from_secs(1800));
    }

    #[test]
    fn env_token_wins_over_file() {
        assert_eq!(resolve_token(Some("env".into()), Some("file")).as_deref(), Some("env"));
        assert_eq!(resolve_token(Some(" ".into()), Some("file")).as_deref(), Some("file"));
        assert_eq!(resolve_token(None, None), None);
    }

    #[test]
    fn quiet_hours_from_schedule() {
        let q = ScheduleConfig::default().quiet_hours();
        assert_eq!((q.start_hour, q.end_hour, q.utc_offset_minutes), (23, 7, 330));
    }
}
