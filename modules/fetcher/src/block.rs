use jobwatch_core::{FailureKind, FetchError};

/// Substrings that mark a response as a block page, checked in this order against
/// the lowercased text chosen by `scanned_text`.
pub const BLOCK_PATTERNS: &[&str] = &[
    "access denied",
    "bot detected",
    "please enable javascript",
    "cloudflare",
    "captcha",
    "verify you are human",
    "your ip has been temporarily blocked",
    "too many requests",
    "forbidden",
    "unauthorized",
];

/// Successful bodies without a `<title>` are only scanned up to this size.
const SHORT_BODY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    RateLimited,
    Blocked(String),
}

impl Verdict {
    pub fn kind(&self) -> FailureKind {
        match self {
            Verdict::RateLimited => FailureKind::RateLimited,
            Verdict::Blocked(_) => FailureKind::Blocked,
        }
    }

    pub fn into_error(self, url: &str, status: u16) -> FetchError {
        match self {
            Verdict::RateLimited => FetchError::RateLimited { url: url.to_string(), status },
            Verdict::Blocked(reason) => FetchError::Blocked { url: url.to_string(), status, reason },
        }
    }
}

/// `None` means the response is usable, whatever its status.
pub fn classify(status: u16, headers: &[(String, String)], body: &str) -> Option<Verdict> {
    if status == 429 {
        return Some(Verdict::RateLimited);
    }
    if status == 401 || status == 403 {
        return Some(Verdict::Blocked(format!("status {status}")));
    }
    if headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("cf-mitigated")) {
        return Some(Verdict::Blocked("cf-mitigated".to_string()));
    }
    let lower = scanned_text(status, headers, body)?;
    BLOCK_PATTERNS
        .iter()
        .find(|p| lower.contains(*p))
        .map(|p| if *p == "too many requests" { Verdict::RateLimited } else { Verdict::Blocked((*p).to_string()) })
}

/// Error bodies are scanned whole. A successful JSON or feed body is data, never a
/// block page; a successful HTML page is judged by its `<title>` alone, and a short
/// untitled body is scanned whole.
fn scanned_text(status: u16, headers: &[(String, String)], body: &str) -> Option<String> {
    let lower = body.to_lowercase();
    if !(200..300).contains(&status) {
        return Some(lower);
    }
    let content_type = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.to_ascii_lowercase())
        .unwrap_or_default();
    if content_type.contains("json") || content_type.contains("xml") || content_type.contains("rss") {
        return None;
    }
    if let Some(title) = html_title(&lower) {
        return Some(title.to_string());
    }
    (lower.len() <= SHORT_BODY).then_some(lower)
}

fn html_title(lower: &str) -> Option<&str> {
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title>")?;
    Some(&lower[start..end])
}
