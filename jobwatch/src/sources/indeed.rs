use super::{build_url, queries, status_error};
use crate::config::SearchConfig;
use async_stream::stream;
use fetcher::Fetcher;
use futures::stream::BoxStream;
use jobwatch_core::{RawPosting, SourceError};
use pipeline::JobSource;
use regex::Regex;
use std::sync::{Arc, OnceLock};

const RSS_URL: &str = "https://www.indeed.com/rss";
const PAGE_SIZE: u32 = 20;

fn item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<item\b[^>]*>(.*?)</item>").expect("item regex"))
}

fn markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("markup regex"))
}

/// RSS feed of recent postings, newest first.
pub struct Indeed {
    fetcher: Arc<Fetcher>,
    search: SearchConfig,
}

impl Indeed {
    pub fn new(fetcher: Arc<Fetcher>, search: SearchConfig) -> Self { Indeed { fetcher, search } }
}

fn feed_url(keyword: &str, location: &str, page: u32) -> Result<String, SourceError> {
    build_url(
        RSS_URL,
        &[
            ("q", keyword.to_string()),
            ("l", location.to_string()),
            ("fromage", "1".to_string()),
            ("sort", "date".to_string()),
            ("start", (page * PAGE_SIZE).to_string()),
        ],
    )
}

/// Text of the first `<name>` element in `xml`, CDATA unwrapped and entities decoded.
fn tag(xml: &str, name: &str) -> Option<String> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let start = xml.find(&open)?;
    let body_start = start + xml[start..].find('>')? + 1;
    let end = body_start + xml[body_start..].find(&close)?;
    let mut raw = xml[body_start..end].trim();
    if let Some(inner) = raw.strip_prefix("<![CDATA[").and_then(|r| r.strip_suffix("]]>")) {
        raw = inner;
    }
    let text = decode_entities(raw);
    let text = text.trim();
    if text.is_empty() { None } else { Some(text.to_string()) }
}

pub(crate) fn decode_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|&i| i <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|h| u32::from_str_radix(h, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// "Title - Company - Location" into its parts. Titles may themselves contain " - ".
fn split_title(full: &str) -> (String, Option<String>, Option<String>) {
    let mut parts: Vec<&str> = full.rsplitn(3, " - ").collect();
    parts.reverse();
    match parts.as_slice() {
        [title, company, location] => (title.trim().to_string(), Some(company.trim().to_string()), Some(location.trim().to_string())),
        [title, company] => (title.trim().to_string(), Some(company.trim().to_string()), None),
        _ => (full.trim().to_string(), None, None),
    }
}

pub(crate) fn parse_feed(xml: &str, keyword: &str) -> Vec<RawPosting> {
    item_re()
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| {
            let item = m.as_str();
            let (title, company, location) = split_title(&tag(item, "title").unwrap_or_default());
            let company = tag(item, "source").or(company).unwrap_or_default();
            let url = tag(item, "link").or_else(|| tag(item, "guid")).unwrap_or_default();
            let mut p = RawPosting::new("indeed", &title, &company, &url).with_location(&location.unwrap_or_default());
            p.description = tag(item, "description").map(|d| markup_re().replace_all(&d, " ").into_owned());
            p.posted_date = tag(item, "pubDate");
            p.keyword_matched = keyword.to_string();
            p
        })
        .collect()
}

impl JobSource for Indeed {
    fn name(&self) -> &str { "indeed" }

    fn produce(&self) -> BoxStream<'_, Result<RawPosting, SourceError>> {
        Box::pin(stream! {
            for (keyword, location) in queries(&self.search) {
                for page in 0..self.search.max_pages.max(1) {
                    let url = match feed_url(&keyword, &location, page) {
                        Ok(u) => u,
                        Err(e) => { yield Err(e); break; }
                    };
                    tracing::debug!(%keyword, %location, page, "indeed feed");
                    let resp = match self.fetcher.get(&url).await {
                        Ok(r) => r,
                        Err(e) => { yield Err(e.into()); break; }
                    };
                    if !resp.is_success() {
                        yield Err(status_error("indeed", resp.status));
                        break;
                    }
                    let postings = parse_feed(&resp.body, &keyword);
                    if postings.is_empty() {
                        break;
                    }
                    for p in postings {
                        yield Ok(p);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
<title>Indeed.com - fresher jobs</title>
<item>
  <title>Junior Developer - Front-End - Initech - Pune, Maharashtra</title>
  <link>https://www.indeed.com/viewjob?jk=abc123</link>
  <source>Initech</source>
  <guid isPermaLink="false">abc123</guid>
  <pubDate>Fri, 01 Mar 2024 10:00:00 GMT</pubDate>
  <description><![CDATA[Freshers welcome. <b>0-1 years</b> &amp; good vibes]]></description>
</item>
<item>
  <title>Support Engineer - Hooli</title>
  <link>https://www.indeed.com/viewjob?jk=def456</link>
</item>
</channel></rss>"#;

    #[test]
    fn parses_rss_items() {
        let jobs = parse_feed(FEED, "fresher");
        assert_eq!(jobs.len(), 2);
        let a = &jobs[0];
        assert_eq!(a.title, "Junior Developer - Front-End");
        assert_eq!(a.company, "Initech");
        assert_eq!(a.location, "Pune, Maharashtra");
        assert_eq!(a.url, "https://www.indeed.com/viewjob?jk=abc123");
        assert_eq!(a.posted_date.as_deref(), Some("Fri, 01 Mar 2024 10:00:00 GMT"));
        let desc = a.description.as_deref().unwrap();
        assert!(desc.contains("0-1 years") && desc.contains("& good vibes") && !desc.contains("<b>"));

        let b = &jobs[1];
        assert_eq!((b.title.as_str(), b.company.as_str()), ("Support Engineer", "Hooli"));
        assert!(b.location.is_empty());
    }

    #[test]
    fn entities() {
        assert_eq!(decode_entities("R&amp;D &lt;team&gt; &#39;x&#39; &#x41;"), "R&D <team> 'x' A");
        assert_eq!(decode_entities("AT&T & co"), "AT&T & co");
        assert_eq!(decode_entities("&bogus;"), "&bogus;");
    }

    #[test]
    fn title_without_separators() {
        assert_eq!(split_title("Intern"), ("Intern".to_string(), None, None));
    }

    #[test]
    fn empty_feed() {
        assert!(parse_feed("<rss><channel></channel></rss>", "x").is_empty());
    }
}
