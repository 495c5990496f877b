use super::{absolute, first_attr, first_text, selectors, status_error};
use crate::config::SupersetConfig;
use async_stream::stream;
use fetcher::{FetchResponse, Fetcher};
use futures::stream::BoxStream;
use jobwatch_core::{FetchError, RawPosting, SourceError};
use pipeline::JobSource;
use scraper::Html;
use std::sync::Arc;

const ORIGIN: &str = "https://app.joinsuperset.com";

const CARD: &[&str] = &["div.opportunity-card", "div.job-card", "li.job-profile"];
const TITLE: &[&str] = &["h3.title", "h2.title", "h3.job-title", "h2.job-title", "a.title", "a.job-title"];
const COMPANY: &[&str] = &["div.company", "span.company", "div.employer", "span.employer", "div.company-name", "span.company-name"];
const LOCATION: &[&str] = &["div.location", "span.location", "div.job-location", "span.job-location"];
const EXPERIENCE: &[&str] = &["div.experience", "span.experience", "div.exp", "span.exp"];
const SALARY: &[&str] = &["div.salary", "span.salary", "div.compensation", "span.compensation"];
const LINK: &[&str] = &["a[href]"];

/// Campus placement portal. Needs a logged-in session cookie; without one the
/// source fails with `AuthenticationFailed` and the rest of the run carries on.
pub struct Superset {
    fetcher: Arc<Fetcher>,
    cfg: SupersetConfig,
}

impl Superset {
    pub fn new(fetcher: Arc<Fetcher>, cfg: SupersetConfig) -> Self { Superset { fetcher, cfg } }

    fn auth_failed(reason: impl Into<String>) -> SourceError {
        SourceError::AuthenticationFailed { source_name: "superset".into(), reason: reason.into() }
    }

    async fn load(&self, cookie: &str) -> Result<FetchResponse, SourceError> {
        let opts = self.fetcher.options().header("Cookie", cookie);
        let resp = match self.fetcher.fetch(fetcher::Method::GET, &self.cfg.jobs_url, opts).await {
            Ok(r) => r,
            Err(FetchError::Blocked { status: 401 | 403, .. }) => return Err(Self::auth_failed("session rejected")),
            Err(e) => return Err(e.into()),
        };
        if redirected_to_login(&resp.url) {
            return Err(Self::auth_failed("session expired, redirected to login"));
        }
        if !resp.is_success() {
            return Err(status_error("superset", resp.status));
        }
        Ok(resp)
    }
}

fn redirected_to_login(final_url: &str) -> bool {
    let lower = final_url.to_ascii_lowercase();
    lower.contains("/login") || lower.contains("/signin")
}

pub(crate) fn parse_cards(html: &str) -> Vec<RawPosting> {
    let doc = Html::parse_document(html);
    let (title, company, location, experience, salary, link) =
        (selectors(TITLE), selectors(COMPANY), selectors(LOCATION), selectors(EXPERIENCE), selectors(SALARY), selectors(LINK));
    let Some(cards) = selectors(CARD).into_iter().map(|s| doc.select(&s).collect::<Vec<_>>()).find(|c| !c.is_empty()) else {
        return Vec::new();
    };
    cards
        .iter()
        .map(|card| {
            let url = first_attr(card, &link, "href").map(|h| absolute(ORIGIN, &h, true)).unwrap_or_default();
            let mut p = RawPosting::new(
                "superset",
                &first_text(card, &title).unwrap_or_default(),
                &first_text(card, &company).unwrap_or_default(),
                &url,
            )
            .with_location(&first_text(card, &location).unwrap_or_default());
            p.experience = first_text(card, &experience);
            p.salary = first_text(card, &salary);
            p
        })
        .collect()
}

impl JobSource for Superset {
    fn name(&self) -> &str { "superset" }

    fn produce(&self) -> BoxStream<'_, Result<RawPosting, SourceError>> {
        Box::pin(stream! {
            let Some(cookie) = self.cfg.session_cookie.clone().filter(|c| !c.trim().is_empty()) else {
                yield Err(Self::auth_failed("no session cookie configured"));
                return;
            };
            match self.load(&cookie).await {
                Ok(resp) => {
                    for p in parse_cards(&resp.body) {
                        yield Ok(p);
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }
}
