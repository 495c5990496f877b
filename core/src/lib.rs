//! Core types shared by the jobwatch crates: postings, fingerprints, run statistics and errors.

pub mod error;
pub mod model;
pub mod pacing;
pub mod stats;

pub use error::{FailureKind, FetchError, PublishError, SourceError};
pub use model::{clean_text, fingerprint, normalize_key, CanonicalJob, RawPosting};
pub use pacing::Pacer;
pub use stats::{RunStatistics, SourceStats};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Current wall-clock time as unix milliseconds.
pub fn now_ms() -> i64 {
    let now = time::OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}
