use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unvalidated scrape output as produced by a job source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPosting {
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub source: String,
    pub description: Option<String>,
    pub experience: Option<String>,
    pub salary: Option<String>,
    pub posted_date: Option<String>,
    pub keyword_matched: String,
}

impl RawPosting {
    pub fn new(source: &str, title: &str, company: &str, url: &str) -> Self {
        RawPosting {
            source: source.to_string(),
            title: title.to_string(),
            company: company.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = location.to_string();
        self
    }

    pub fn with_experience(mut self, experience: &str) -> Self {
        self.experience = Some(experience.to_string());
        self
    }

    /// Title, company and url are required; anything else may be missing.
    pub fn is_eligible(&self) -> bool {
        !self.title.trim().is_empty() && !self.company.trim().is_empty() && !self.url.trim().is_empty()
    }
}

/// A normalized posting keyed by its content fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalJob {
    pub fingerprint: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub source: String,
    pub description: Option<String>,
    pub experience: Option<String>,
    pub salary: Option<String>,
    pub posted_date: Option<String>,
    pub keyword_matched: String,
    /// Refreshed on every encounter.
    pub scraped_at_ms: i64,
    pub published_at_ms: Option<i64>,
    pub delivery_id: Option<String>,
}

impl CanonicalJob {
    /// Returns `None` for postings missing a title, company or url.
    pub fn from_raw(raw: &RawPosting, scraped_at_ms: i64) -> Option<Self> {
        if !raw.is_eligible() {
            return None;
        }
        let title = clean_text(&raw.title);
        let company = clean_text(&raw.company);
        let source = normalize_key(&raw.source);
        Some(CanonicalJob {
            fingerprint: fingerprint(&title, &company, &source),
            title,
            company,
            location: clean_text(&raw.location),
            url: raw.url.trim().to_string(),
            source,
            description: clean_opt(&raw.description),
            experience: clean_opt(&raw.experience),
            salary: clean_opt(&raw.salary),
            posted_date: clean_opt(&raw.posted_date),
            keyword_matched: raw.keyword_matched.trim().to_string(),
            scraped_at_ms,
            published_at_ms: None,
            delivery_id: None,
        })
    }
}

/// Collapse whitespace runs and drop control characters.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn clean_opt(v: &Option<String>) -> Option<String> {
    v.as_deref().map(clean_text).filter(|s| !s.is_empty())
}

/// Case-folded, whitespace-normalized form used for identity.
pub fn normalize_key(s: &str) -> String {
    clean_text(s).to_lowercase()
}

/// Stable duplicate identity over (title, company, source). The url is deliberately excluded.
pub fn fingerprint(title: &str, company: &str, source: &str) -> String {
    let mut h = Sha256::new();
    h.update(normalize_key(title).as_bytes());
    h.update([0x1f]);
    h.update(normalize_key(company).as_bytes());
    h.update([0x1f]);
    h.update(normalize_key(source).as_bytes());
    hex::encode(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_case_and_whitespace() {
        let a = fingerprint("Software Engineer", "Acme Corp", "linkedin");
        let b = fingerprint("  software   ENGINEER ", "acme\tcorp", "linkedin");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_depends_on_source() {
        let a = fingerprint("Software Engineer", "Acme", "linkedin");
        let b = fingerprint("Software Engineer", "Acme", "indeed");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_fields_do_not_bleed() {
        assert_ne!(fingerprint("ab", "c", "x"), fingerprint("a", "bc", "x"));
    }

    #[test]
    fn same_job_different_urls_share_identity() {
        let a = RawPosting::new("naukri", "Trainee", "Beta", "https://a.example/1");
        let b = RawPosting::new("naukri", "trainee", "BETA ", "https://b.example/2");
        let ja = CanonicalJob::from_raw(&a, 1).unwrap();
        let jb = CanonicalJob::from_raw(&b, 2).unwrap();
        assert_eq!(ja.fingerprint, jb.fingerprint);
        assert_ne!(ja.url, jb.url);
    }

    #[test]
    fn ineligible_postings_are_dropped() {
        assert!(CanonicalJob::from_raw(&RawPosting::new("x", "", "Acme", "u"), 0).is_none());
        assert!(CanonicalJob::from_raw(&RawPosting::new("x", "T", " ", "u"), 0).is_none());
        assert!(CanonicalJob::from_raw(&RawPosting::new("x", "T", "Acme", ""), 0).is_none());
    }

    #[test]
    fn clean_text_strips_controls() {
        assert_eq!(clean_text("  a\u{7}b \n c  "), "ab c");
    }
}
