//! Run orchestration: sources feed the filter, the store and finally the publisher.

mod orchestrator;
mod quiet;

pub use orchestrator::{Orchestrator, RunSettings};
pub use quiet::QuietHours;
pub use tokio_util::sync::CancellationToken;

use async_trait::async_trait;
use futures::stream::BoxStream;
use jobwatch_core::{CanonicalJob, PublishError, RawPosting, SourceError};

/// One job board. `produce` starts a fresh, finite walk over the board every time it
/// is called and yields postings in discovery order.
pub trait JobSource: Send + Sync {
    fn name(&self) -> &str;
    fn produce(&self) -> BoxStream<'_, Result<RawPosting, SourceError>>;
}

/// Outbound channel for new jobs. Implementations pace themselves.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns the channel's delivery id for the posted message.
    async fn publish(&self, job: &CanonicalJob) -> Result<String, PublishError>;

    /// True while publishing should be held back without counting as a failure.
    fn is_suppressed(&self) -> bool { false }

    /// Free-form message such as the end-of-run summary.
    async fn announce(&self, _text: &str) -> Result<(), PublishError> { Ok(()) }
}
