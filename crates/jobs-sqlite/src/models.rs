use jobwatch_core::RunStatistics;
use serde::{Deserialize, Serialize};

/// Outcome of `upsert_many`. Failed writes are counted apart from new/duplicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub new: u64,
    pub duplicate: u64,
    pub errors: u64,
}

impl BatchOutcome {
    pub fn counts(&self) -> (u64, u64) { (self.new, self.duplicate) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub status: String,
    pub stats: RunStatistics,
}

/// One proxy's health counters as last observed by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStatRow {
    pub address: String,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    pub blacklisted: bool,
    pub blacklisted_until_ms: Option<i64>,
}
