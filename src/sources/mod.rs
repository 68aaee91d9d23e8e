//! Source adapters for the polling pipeline
//!
//! Each adapter implements the `PollSource` trait. A fetch is
//! infallible by contract: ordinary endpoint failures (non-2xx,
//! transport errors, malformed payloads) are recorded per endpoint in
//! the returned outcome and never propagate as errors, so the cycle
//! always completes with whatever the other endpoints yielded.

pub mod forum;
pub mod microblog;

use async_trait::async_trait;
use serde::Serialize;

use crate::schemas::RawItem;

/// One endpoint call that did not produce items.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointFailure {
    /// Which endpoint/channel failed, for log and report context.
    pub endpoint: String,
    pub reason: String,
}

impl EndpointFailure {
    pub fn new(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result of one adapter fetch: everything that could be gathered plus
/// the endpoints that failed along the way.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub items: Vec<RawItem>,
    pub failures: Vec<EndpointFailure>,
    /// True when the source was intentionally not queried (e.g. no
    /// credential configured). A skip is not a failure.
    pub skipped: bool,
}

impl FetchOutcome {
    /// Creates an empty outcome
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates an intentionally-skipped outcome
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// True when no endpoint failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Trait for all source adapters
#[async_trait]
pub trait PollSource: Send + Sync {
    /// Stable identifier used in reports and logs
    fn id(&self) -> &str;

    /// Fetches one round of items from the source. Never fails; see
    /// module docs for the partial-failure contract.
    async fn fetch(&self) -> FetchOutcome;
}

/// Re-export adapter types
pub use forum::ForumSource;
pub use microblog::MicroblogSource;
