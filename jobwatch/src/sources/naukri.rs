use super::{absolute, build_url, queries, status_error};
use crate::config::SearchConfig;
use async_stream::stream;
use fetcher::Fetcher;
use futures::stream::BoxStream;
use jobwatch_core::{RawPosting, SourceError};
use pipeline::JobSource;
use serde::Deserialize;
use std::sync::Arc;

const SEARCH_URL: &str = "https://www.naukri.com/jobapi/v3/search";
const ORIGIN: &str = "https://www.naukri.com";
const PAGE_SIZE: u32 = 20;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    #[serde(rename = "jobDetails")]
    job_details: Vec<JobDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct JobDetail {
    title: String,
    company_name: String,
    job_id: String,
    #[serde(rename = "jdURL")]
    jd_url: String,
    job_description: Option<String>,
    footer_placeholder_label: Option<String>,
    placeholders: Vec<Placeholder>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Placeholder {
    #[serde(rename = "type")]
    kind: String,
    label: String,
}

impl JobDetail {
    fn placeholder(&self, kind: &str) -> Option<String> {
        self.placeholders.iter().find(|p| p.kind == kind).map(|p| p.label.clone()).filter(|l| !l.trim().is_empty())
    }

    fn url(&self) -> String {
        if !self.jd_url.trim().is_empty() {
            absolute(ORIGIN, &self.jd_url, false)
        } else if !self.job_id.is_empty() {
            format!("{ORIGIN}/job-listings-{}", self.job_id)
        } else {
            String::new()
        }
    }
}

/// Naukri's JSON search API, the one its own web client calls.
pub struct Naukri {
    fetcher: Arc<Fetcher>,
    search: SearchConfig,
}

impl Naukri {
    pub fn new(fetcher: Arc<Fetcher>, search: SearchConfig) -> Self { Naukri { fetcher, search } }
}

fn search_url(keyword: &str, location: &str, page: u32) -> Result<String, SourceError> {
    build_url(
        SEARCH_URL,
        &[
            ("noOfResults", PAGE_SIZE.to_string()),
            ("urlType", "search_by_keyword".to_string()),
            ("searchType", "adv".to_string()),
            ("keyword", keyword.to_string()),
            ("location", location.to_string()),
            ("pageNo", (page + 1).to_string()),
            ("experience", "0".to_string()),
            ("jobAge", "1".to_string()),
        ],
    )
}

pub(crate) fn parse_results(body: &str, keyword: &str) -> Result<Vec<RawPosting>, SourceError> {
    let resp: SearchResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Parse { what: "naukri search".into(), message: e.to_string() })?;
    Ok(resp
        .job_details
        .iter()
        .map(|d| {
            let mut p = RawPosting::new("naukri", &d.title, &d.company_name, &d.url())
                .with_location(&d.placeholder("location").unwrap_or_default());
            p.experience = d.placeholder("experience");
            p.salary = d.placeholder("salary");
            p.description = d.job_description.clone();
            p.posted_date = d.footer_placeholder_label.clone();
            p.keyword_matched = keyword.to_string();
            p
        })
        .collect())
}

impl JobSource for Naukri {
    fn name(&self) -> &str { "naukri" }

    fn produce(&self) -> BoxStream<'_, Result<RawPosting, SourceError>> {
        Box::pin(stream! {
            for (keyword, location) in queries(&self.search) {
                for page in 0..self.search.max_pages.max(1) {
                    let url = match search_url(&keyword, &location, page) {
                        Ok(u) => u,
                        Err(e) => { yield Err(e); break; }
                    };
                    let opts = self
                        .fetcher
                        .options()
                        .header("Accept", "application/json")
                        .header("appid", "109")
                        .header("systemid", "Naukri")
                        .header("Referer", "https://www.naukri.com/");
                    tracing::debug!(%keyword, %location, page, "naukri search");
                    let resp = match self.fetcher.fetch(fetcher::Method::GET, &url, opts).await {
                        Ok(r) => r,
                        Err(e) => { yield Err(e.into()); break; }
                    };
                    if !resp.is_success() {
                        yield Err(status_error("naukri", resp.status));
                        break;
                    }
                    let postings = match parse_results(&resp.body, &keyword) {
                        Ok(p) => p,
                        Err(e) => { yield Err(e); break; }
                    };
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
