use super::{absolute, build_url, first_attr, first_text, queries, selectors, status_error};
use crate::config::SearchConfig;
use async_stream::stream;
use fetcher::Fetcher;
use futures::stream::BoxStream;
use jobwatch_core::{RawPosting, SourceError};
use pipeline::JobSource;
use scraper::Html;
use std::sync::Arc;

const SEARCH_URL: &str = "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search";
const ORIGIN: &str = "https://www.linkedin.com";
const PAGE_SIZE: u32 = 25;

const CARD: &[&str] = &["div.base-card", "div.job-search-card", "li.job-result-card"];
const TITLE: &[&str] = &["h3.base-search-card__title", "h3.base-card__title", "h3[class*=\"title\"]"];
const COMPANY: &[&str] = &["h4.base-search-card__subtitle", "h4.base-card__subtitle", "span[class*=\"company\"]"];
const LOCATION: &[&str] = &["span.job-search-card__location", "span[class*=\"location\"]"];
const POSTED: &[&str] = &["time"];
const LINK: &[&str] = &["a.base-card__full-link", "a[href]"];

/// Public guest search: HTML fragments of job cards, entry level, posted in the last day.
pub struct LinkedIn {
    fetcher: Arc<Fetcher>,
    search: SearchConfig,
}

impl LinkedIn {
    pub fn new(fetcher: Arc<Fetcher>, search: SearchConfig) -> Self { LinkedIn { fetcher, search } }
}

fn search_url(keyword: &str, location: &str, page: u32) -> Result<String, SourceError> {
    build_url(
        SEARCH_URL,
        &[
            ("keywords", keyword.to_string()),
            ("location", location.to_string()),
            ("f_E", "1,2".to_string()),
            ("f_TPR", "r86400".to_string()),
            ("start", (page * PAGE_SIZE).to_string()),
        ],
    )
}

pub(crate) fn parse_cards(html: &str, keyword: &str) -> Vec<RawPosting> {
    let doc = Html::parse_fragment(html);
    let (title, company, location, posted, link) =
        (selectors(TITLE), selectors(COMPANY), selectors(LOCATION), selectors(POSTED), selectors(LINK));
    let Some(cards) = selectors(CARD).into_iter().map(|s| doc.select(&s).collect::<Vec<_>>()).find(|c| !c.is_empty()) else {
        return Vec::new();
    };
    cards
        .iter()
        .filter_map(|card| {
            let url = absolute(ORIGIN, &first_attr(card, &link, "href")?, false);
            // missing title or company is left for the orchestrator to count as discarded
            let mut p = RawPosting::new(
                "linkedin",
                &first_text(card, &title).unwrap_or_default(),
                &first_text(card, &company).unwrap_or_default(),
                &url,
            )
            .with_location(&first_text(card, &location).unwrap_or_default());
            p.posted_date = first_attr(card, &posted, "datetime").or_else(|| first_text(card, &posted));
            p.keyword_matched = keyword.to_string();
            Some(p)
        })
        .collect()
}

impl JobSource for LinkedIn {
    fn name(&self) -> &str { "linkedin" }

    fn produce(&self) -> BoxStream<'_, Result<RawPosting, SourceError>> {
        Box::pin(stream! {
            for (keyword, location) in queries(&self.search) {
                for page in 0..self.search.max_pages.max(1) {
                    let url = match search_url(&keyword, &location, page) {
                        Ok(u) => u,
                        Err(e) => { yield Err(e); break; }
                    };
                    tracing::debug!(%keyword, %location, page, "linkedin search");
                    let resp = match self.fetcher.get(&url).await {
                        Ok(r) => r,
                        Err(e) => { yield Err(e.into()); break; }
                    };
                    if !resp.is_success() {
                        yield Err(status_error("linkedin", resp.status));
                        break;
                    }
                    let postings = parse_cards(&resp.body, &keyword);
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
