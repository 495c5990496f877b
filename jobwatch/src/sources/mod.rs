//! Per-platform job sources. Each walks keyword x location x page lazily through the
//! shared fetcher and parses responses with plain, synchronous functions.

mod indeed;
mod linkedin;
mod naukri;
mod superset;

pub use indeed::Indeed;
pub use linkedin::LinkedIn;
pub use naukri::Naukri;
pub use superset::Superset;

use crate::config::{SearchConfig, SourcesConfig};
use fetcher::Fetcher;
use jobwatch_core::SourceError;
use pipeline::JobSource;
use scraper::{ElementRef, Selector};
use std::sync::Arc;

/// Every enabled source, in the order they run.
pub fn build_sources(cfg: &SourcesConfig, fetcher: &Arc<Fetcher>) -> Vec<Box<dyn JobSource>> {
    let mut out: Vec<Box<dyn JobSource>> = Vec::new();
    if cfg.linkedin.enabled {
        out.push(Box::new(LinkedIn::new(fetcher.clone(), cfg.linkedin.clone())));
    }
    if cfg.indeed.enabled {
        out.push(Box::new(Indeed::new(fetcher.clone(), cfg.indeed.clone())));
    }
    if cfg.naukri.enabled {
        out.push(Box::new(Naukri::new(fetcher.clone(), cfg.naukri.clone())));
    }
    if cfg.superset.enabled {
        out.push(Box::new(Superset::new(fetcher.clone(), cfg.superset.clone())));
    }
    out
}

/// Keyword/location pairs to search. No locations means one unconstrained search per keyword.
pub(crate) fn queries(search: &SearchConfig) -> Vec<(String, String)> {
    let locations: Vec<String> = if search.locations.is_empty() { vec![String::new()] } else { search.locations.clone() };
    search
        .keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .flat_map(|k| locations.iter().map(move |l| (k.clone(), l.clone())))
        .collect()
}

pub(crate) fn build_url(base: &str, params: &[(&str, String)]) -> Result<String, SourceError> {
    url::Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|e| SourceError::Parse { what: base.to_string(), message: e.to_string() })
}

pub(crate) fn status_error(source: &str, status: u16) -> SourceError {
    SourceError::Parse { what: format!("{source} response"), message: format!("unexpected HTTP {status}") }
}

/// Selectors that fail to parse are skipped; the rest are tried in order.
pub(crate) fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

pub(crate) fn first_text(el: &ElementRef<'_>, sels: &[Selector]) -> Option<String> {
    sels.iter()
        .filter_map(|s| el.select(s).next())
        .map(|e| e.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
}

pub(crate) fn first_attr(el: &ElementRef<'_>, sels: &[Selector], attr: &str) -> Option<String> {
    sels.iter()
        .filter_map(|s| el.select(s).next())
        .filter_map(|e| e.value().attr(attr))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Makes `href` absolute against `origin` and drops tracking query strings.
pub(crate) fn absolute(origin: &str, href: &str, keep_query: bool) -> String {
    let href = href.trim();
    let full = if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{}{}", origin.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", origin.trim_end_matches('/'), href)
    };
    if keep_query { full } else { full.split('?').next().unwrap_or(&full).to_string() }
}
