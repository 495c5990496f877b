use crate::config::{ScheduleConfig, TelegramConfig};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use jobwatch_core::{CanonicalJob, Pacer, PublishError};
use pipeline::{Publisher, QuietHours};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

const DESCRIPTION_LIMIT: usize = 300;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Posts jobs to a channel through the Bot API, spaced by a jittered delay and held
/// back during quiet hours.
pub struct TelegramPublisher {
    client: reqwest::Client,
    endpoint: String,
    channel_id: String,
    pacer: Pacer,
    quiet: QuietHours,
    max_retries: u32,
    base_delay: Duration,
}

impl TelegramPublisher {
    pub fn new(cfg: &TelegramConfig, schedule: &ScheduleConfig) -> Result<Self> {
        let token = cfg.token().ok_or_else(|| anyhow!("telegram bot token is not configured"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building telegram client")?;
        Ok(TelegramPublisher {
            client,
            endpoint: format!("{}/bot{}/sendMessage", cfg.api_base.trim_end_matches('/'), token),
            channel_id: cfg.channel_id.clone(),
            pacer: Pacer::from_secs(cfg.post_delay_min, cfg.post_delay_max),
            quiet: schedule.quiet_hours(),
            max_retries: cfg.max_retries,
            base_delay: Duration::from_secs(1),
        })
    }

    async fn send_once(&self, text: &str) -> Result<String, PublishError> {
        let body = serde_json::json!({
            "chat_id": self.channel_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.without_url().to_string()))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| PublishError::Transport(e.without_url().to_string()))?;
        interpret(status, &text)
    }

    async fn send(&self, text: &str) -> Result<String, PublishError> {
        with_retry(self.max_retries, self.base_delay, || self.send_once(text)).await
    }
}

/// Maps a Bot API reply to the message id or a typed failure.
fn interpret(status: u16, body: &str) -> Result<String, PublishError> {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();
    if let Some(api) = &parsed {
        if api.ok {
            return api
                .result
                .as_ref()
                .map(|m| m.message_id.to_string())
                .ok_or_else(|| PublishError::Rejected("reply without message id".into()));
        }
        if let Some(secs) = api.parameters.as_ref().and_then(|p| p.retry_after) {
            return Err(PublishError::RateLimited { retry_after_secs: secs });
        }
    }
    let reason = parsed.and_then(|a| a.description).unwrap_or_else(|| format!("HTTP {status}"));
    match status {
        429 => Err(PublishError::RateLimited { retry_after_secs: 1 }),
        500..=599 => Err(PublishError::Transport(reason)),
        _ => Err(PublishError::Rejected(reason)),
    }
}

/// Runs `op` at most `max_retries + 1` times. Rate limits wait the server's
/// `retry_after`, transport errors back off exponentially, rejections are final.
pub(crate) async fn with_retry<T, F, Fut>(max_retries: u32, base_delay: Duration, mut op: F) -> Result<T, PublishError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PublishError>>,
{
    let mut attempt = 0u32;
    loop {
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e @ PublishError::Rejected(_)) => return Err(e),
            Err(e) => e,
        };
        if attempt >= max_retries {
            return Err(err);
        }
        let wait = match &err {
            PublishError::RateLimited { retry_after_secs } => Duration::from_secs((*retry_after_secs).max(1)),
            _ => base_delay.saturating_mul(1u32 << attempt.min(16)),
        };
        attempt += 1;
        tracing::warn!(attempt, error = %err, wait_secs = wait.as_secs_f64(), "telegram send failed, retrying");
        tokio::time::sleep(wait).await;
    }
}

pub(crate) fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

pub(crate) fn format_job(job: &CanonicalJob) -> String {
    let mut lines = vec![format!("<b>{}</b>", escape_html(&job.title)), format!("Company: {}", escape_html(&job.company))];
    if !job.location.is_empty() {
        lines.push(format!("Location: {}", escape_html(&job.location)));
    }
    if let Some(exp) = &job.experience {
        lines.push(format!("Experience: {}", escape_html(exp)));
    }
    if let Some(salary) = &job.salary {
        lines.push(format!("Salary: {}", escape_html(salary)));
    }
    if let Some(posted) = &job.posted_date {
        lines.push(format!("Posted: {}", escape_html(posted)));
    }
    if let Some(desc) = job.description.as_deref().filter(|d| !d.is_empty()) {
        lines.push(String::new());
        lines.push(escape_html(&truncate(desc, DESCRIPTION_LIMIT)));
    }
    lines.push(String::new());
    lines.push(format!("<a href=\"{}\">Apply here</a>", escape_html(&job.url)));
    lines.push(format!("#{}", job.source.replace(|c: char| !c.is_alphanumeric(), "")));
    lines.join("\n")
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, job: &CanonicalJob) -> Result<String, PublishError> {
        self.pacer.pause().await;
        let id = self.send(&format_job(job)).await?;
        tracing::info!(title = %job.title, company = %job.company, message_id = %id, "posted to telegram");
        Ok(id)
    }

    fn is_suppressed(&self) -> bool { self.quiet.is_quiet_now() }

    async fn announce(&self, text: &str) -> Result<(), PublishError> {
        self.send(&format!("<pre>{}</pre>", escape_html(text))).await.map(|_| ())
    }
}
