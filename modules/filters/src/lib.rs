//! Declarative acceptance rules applied to raw postings before they are stored.

use jobwatch_core::RawPosting;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPolicy {
    pub exclude_title_keywords: Vec<String>,
    pub exclude_companies: Vec<String>,
    /// When non-empty, the title must contain at least one of these.
    pub require_title_keywords: Vec<String>,
    pub max_experience_years: f64,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        FilterPolicy {
            exclude_title_keywords: ["senior", "lead", "manager", "director", "principal", "staff", "architect", "5+ years", "7+ years", "10+ years"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_companies: Vec::new(),
            require_title_keywords: Vec::new(),
            max_experience_years: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    ExcludedTitle(String),
    ExcludedCompany(String),
    MissingRequiredKeyword,
    TooExperienced(f64),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::ExcludedTitle(k) => write!(f, "title contains '{k}'"),
            Rejection::ExcludedCompany(c) => write!(f, "company matches '{c}'"),
            Rejection::MissingRequiredKeyword => write!(f, "title has none of the required keywords"),
            Rejection::TooExperienced(y) => write!(f, "needs ~{y} years of experience"),
        }
    }
}

fn first_hit<'a>(haystack: &str, needles: &'a [String]) -> Option<&'a String> {
    let hay = haystack.to_lowercase();
    needles.iter().find(|n| !n.trim().is_empty() && hay.contains(&n.trim().to_lowercase()))
}

impl FilterPolicy {
    pub fn accepts(&self, posting: &RawPosting) -> bool { self.evaluate(posting).is_ok() }

    /// Checks run in a fixed order: title exclusions, company exclusions, required
    /// keywords, then the experience ceiling. The first failing check is reported.
    pub fn evaluate(&self, posting: &RawPosting) -> Result<(), Rejection> {
        if let Some(k) = first_hit(&posting.title, &self.exclude_title_keywords) {
            return Err(Rejection::ExcludedTitle(k.clone()));
        }
        if let Some(c) = first_hit(&posting.company, &self.exclude_companies) {
            return Err(Rejection::ExcludedCompany(c.clone()));
        }
        let required: Vec<String> = self.require_title_keywords.iter().filter(|k| !k.trim().is_empty()).cloned().collect();
        if !required.is_empty() && first_hit(&posting.title, &required).is_none() {
            return Err(Rejection::MissingRequiredKeyword);
        }
        let years = required_experience(posting);
        if years > self.max_experience_years {
            return Err(Rejection::TooExperienced(years));
        }
        Ok(())
    }
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:-|–|to)\s*(\d+(?:\.\d+)?)\s*\+?\s*(?:years?|yrs?)").expect("range regex")
    })
}

fn single_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*\+?\s*(?:years?|yrs?)").expect("single regex"))
}

fn fresher_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:fresher|entry[\s-]*level|trainee|graduate)").expect("fresher regex"))
}

/// Years of experience a piece of free text asks for. Patterns are tried in priority
/// order: a range gives its midpoint, a single value gives itself, fresher wording gives 0.
pub fn estimate_experience(text: &str) -> Option<f64> {
    if let Some(c) = range_re().captures(text) {
        let lo: f64 = c[1].parse().ok()?;
        let hi: f64 = c[2].parse().ok()?;
        return Some((lo + hi) / 2.0);
    }
    if let Some(c) = single_re().captures(text) {
        return c[1].parse().ok();
    }
    if fresher_re().is_match(text) {
        return Some(0.0);
    }
    None
}

/// The experience field wins over the title. Nothing recognizable means 0.
pub fn required_experience(posting: &RawPosting) -> f64 {
    posting
        .experience
        .as_deref()
        .and_then(estimate_experience)
        .or_else(|| estimate_experience(&posting.title))
        .unwrap_or(0.0)
}
