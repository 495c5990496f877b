use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters for one job source within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    /// Every posting the source yielded, eligible or not.
    pub found: u64,
    pub accepted: u64,
    pub filtered: u64,
    /// Missing title, company or url.
    pub discarded: u64,
    pub new: u64,
    pub duplicate: u64,
    /// Fetch/source errors plus per-record store failures.
    pub errors: u64,
}

/// Aggregate counters for one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub run_id: String,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub sources: BTreeMap<String, SourceStats>,
    pub published: u64,
    pub publish_failures: u64,
    /// Publishing held back by the quiet-hour window.
    pub publish_suppressed: bool,
    pub purged: u64,
    pub cancelled: bool,
}

impl RunStatistics {
    pub fn start(run_id: impl Into<String>, started_at_ms: i64) -> Self {
        RunStatistics { run_id: run_id.into(), started_at_ms, ..Default::default() }
    }

    pub fn source_mut(&mut self, name: &str) -> &mut SourceStats {
        self.sources.entry(name.to_string()).or_default()
    }

    pub fn source(&self, name: &str) -> Option<&SourceStats> { self.sources.get(name) }

    pub fn finish(&mut self, ended_at_ms: i64) { self.ended_at_ms = Some(ended_at_ms); }

    pub fn total_found(&self) -> u64 { self.sources.values().map(|s| s.found).sum() }
    pub fn total_new(&self) -> u64 { self.sources.values().map(|s| s.new).sum() }
    pub fn total_duplicate(&self) -> u64 { self.sources.values().map(|s| s.duplicate).sum() }
    pub fn total_errors(&self) -> u64 { self.sources.values().map(|s| s.errors).sum() }

    pub fn runtime_ms(&self) -> i64 {
        self.ended_at_ms.map(|e| (e - self.started_at_ms).max(0)).unwrap_or(0)
    }

    /// Human readable end-of-run report. Sources that failed entirely still get a line.
    pub fn summary(&self) -> String {
        let secs = self.runtime_ms() / 1000;
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        let mut out = String::new();
        out.push_str("Run summary\n");
        if h > 0 {
            out.push_str(&format!("Runtime: {}h {}m {}s\n", h, m, s));
        } else {
            out.push_str(&format!("Runtime: {}m {}s\n", m, s));
        }
        for (name, st) in &self.sources {
            out.push_str(&format!(
                "{}: found {}, new {}, duplicate {}, errors {}\n",
                name, st.found, st.new, st.duplicate, st.errors
            ));
        }
        out.push_str(&format!(
            "Total: found {}, new {}, duplicate {}, errors {}\n",
            self.total_found(), self.total_new(), self.total_duplicate(), self.total_errors()
        ));
        out.push_str(&format!("Published: {} ({} failed)", self.published, self.publish_failures));
        if self.publish_suppressed {
            out.push_str(", held back for quiet hours");
        }
        if self.cancelled {
            out.push_str("\nRun was cancelled before completion");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_and_summary_include_failed_sources() {
        let mut st = RunStatistics::start("r1", 1_000);
        st.source_mut("linkedin").found = 3;
        st.source_mut("linkedin").new = 2;
        st.source_mut("naukri").errors = 4;
        st.published = 2;
        st.finish(66_000);
        assert_eq!(st.total_found(), 3);
        assert_eq!(st.total_errors(), 4);
        let s = st.summary();
        assert!(s.contains("naukri: found 0, new 0, duplicate 0, errors 4"));
        assert!(s.contains("Runtime: 1m 5s"));
        assert!(s.contains("Published: 2 (0 failed)"));
    }

    #[test]
    fn runtime_is_zero_until_finished() {
        let st = RunStatistics::start("r", 10);
        assert_eq!(st.runtime_ms(), 0);
    }
}
