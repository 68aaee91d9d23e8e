//! Ingestion coordinator
//!
//! Runs every configured source adapter for one poll cycle: the
//! top-level sources fetch concurrently (wait for all, collect each
//! outcome, never fail-fast), every yielded item goes through the
//! store's idempotent upsert, and the per-source accounting lands in a
//! `CycleReport`. Adapter failures are data in the report; only store
//! errors propagate and abort the cycle.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{PollError, Result};
use crate::http_client::{HttpClientConfig, ResilientHttpClient};
use crate::sources::{EndpointFailure, ForumSource, MicroblogSource, PollSource};
use crate::store::Store;

/// Outcome of one source within a cycle
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    /// Items the adapter yielded, duplicates included.
    pub fetched: usize,
    /// Rows actually written, per the store's upsert return.
    pub inserted: usize,
    pub failures: Vec<EndpointFailure>,
    pub skipped: bool,
}

impl SourceReport {
    /// True when every endpoint of this source succeeded (a skip counts
    /// as success)
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of one complete poll cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
}

impl CycleReport {
    pub fn total_inserted(&self) -> usize {
        self.sources.iter().map(|s| s.inserted).sum()
    }

    pub fn source(&self, id: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == id)
    }
}

/// Orchestrates the configured sources against the store
pub struct Coordinator {
    sources: Vec<Arc<dyn PollSource>>,
    store: Store,
}

impl Coordinator {
    pub fn new(sources: Vec<Arc<dyn PollSource>>, store: Store) -> Self {
        Self { sources, store }
    }

    /// Wires the two platform sources from configuration
    pub fn from_config(config: &Config, store: Store) -> Result<Self> {
        let http_config = HttpClientConfig {
            max_concurrent_requests: config.max_concurrent_requests,
            ..Default::default()
        };
        let http_client = Arc::new(ResilientHttpClient::new(http_config)?);

        let forum = ForumSource::new(http_client.clone(), config);
        let microblog = MicroblogSource::new(http_client, config);

        if !config.has_microblog() {
            info!("No microblog credential configured, microblog polling will be skipped");
        }

        Ok(Self::new(vec![Arc::new(forum), Arc::new(microblog)], store))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs one poll cycle across all sources
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        info!(
            cycle_id = %cycle_id,
            sources = self.sources.len(),
            "Starting poll cycle"
        );

        let tasks = self.sources.iter().map(|source| {
            let source = source.clone();
            let store = self.store.clone();

            async move {
                let outcome = source.fetch().await;
                let fetched = outcome.items.len();

                let mut inserted = 0usize;
                for item in &outcome.items {
                    if store.insert_if_absent(item).await? {
                        inserted += 1;
                    }
                }

                if outcome.skipped {
                    info!(source = source.id(), "Source skipped this cycle");
                } else if !outcome.is_clean() {
                    warn!(
                        source = source.id(),
                        failures = outcome.failures.len(),
                        inserted,
                        "Source completed with partial failures"
                    );
                }

                Ok::<SourceReport, PollError>(SourceReport {
                    source: source.id().to_string(),
                    fetched,
                    inserted,
                    failures: outcome.failures,
                    skipped: outcome.skipped,
                })
            }
        });

        // Wait for every source to finish before reporting.
        let mut sources = Vec::with_capacity(self.sources.len());
        for result in join_all(tasks).await {
            sources.push(result?);
        }

        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            sources,
        };

        info!(
            cycle_id = %report.cycle_id,
            inserted = report.total_inserted(),
            "Poll cycle complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{RawItem, Source};
    use crate::sources::FetchOutcome;
    use chrono::TimeZone;

    /// Source stand-in yielding a fixed outcome every fetch
    struct MockSource {
        id: &'static str,
        items: Vec<RawItem>,
        failures: Vec<EndpointFailure>,
        skipped: bool,
    }

    impl MockSource {
        fn with_items(id: &'static str, items: Vec<RawItem>) -> Arc<Self> {
            Arc::new(Self {
                id,
                items,
                failures: vec![],
                skipped: false,
            })
        }

        fn failing(id: &'static str, endpoint: &str) -> Arc<Self> {
            Arc::new(Self {
                id,
                items: vec![],
                failures: vec![EndpointFailure::new(endpoint, "connection refused")],
                skipped: false,
            })
        }

        fn skipped(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                items: vec![],
                failures: vec![],
                skipped: true,
            })
        }
    }

    #[async_trait::async_trait]
    impl PollSource for MockSource {
        fn id(&self) -> &str {
            self.id
        }

        async fn fetch(&self) -> FetchOutcome {
            FetchOutcome {
                items: self.items.clone(),
                failures: self.failures.clone(),
                skipped: self.skipped,
            }
        }
    }

    fn forum_post(native_id: &str) -> RawItem {
        RawItem {
            source: Source::ForumPost,
            native_id: native_id.to_string(),
            title: Some("title".to_string()),
            body: None,
            url: None,
            author: None,
            score: 0,
            origin_channel: None,
            permalink: None,
            metrics: None,
            created_at: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_duplicates_do_not_count_as_inserted() {
        let store = Store::in_memory().await.unwrap();
        // One item is already known from an earlier cycle.
        store.insert_if_absent(&forum_post("dup")).await.unwrap();

        let source = MockSource::with_items(
            "forum",
            vec![
                forum_post("new1"),
                forum_post("new2"),
                forum_post("new3"),
                forum_post("dup"),
            ],
        );

        let coordinator = Coordinator::new(vec![source], store);
        let report = coordinator.run_cycle().await.unwrap();

        let forum = report.source("forum").unwrap();
        assert_eq!(forum.fetched, 4);
        assert_eq!(forum.inserted, 3);
        assert!(forum.succeeded());
    }

    #[tokio::test]
    async fn test_one_source_failing_does_not_block_the_other() {
        let store = Store::in_memory().await.unwrap();

        let broken = MockSource::failing("forum", "new/rust");
        let healthy =
            MockSource::with_items("microblog", vec![forum_post("a"), forum_post("b")]);

        let coordinator = Coordinator::new(vec![broken, healthy], store);
        let report = coordinator.run_cycle().await.unwrap();

        assert!(!report.source("forum").unwrap().succeeded());
        assert_eq!(report.source("microblog").unwrap().inserted, 2);
        assert_eq!(report.total_inserted(), 2);
    }

    #[tokio::test]
    async fn test_skipped_source_reports_clean_zero() {
        let store = Store::in_memory().await.unwrap();

        let coordinator = Coordinator::new(vec![MockSource::skipped("microblog")], store);
        let report = coordinator.run_cycle().await.unwrap();

        let microblog = report.source("microblog").unwrap();
        assert!(microblog.skipped);
        assert!(microblog.succeeded());
        assert_eq!(microblog.inserted, 0);
    }

    #[tokio::test]
    async fn test_second_cycle_inserts_nothing_new() {
        let store = Store::in_memory().await.unwrap();

        let source = MockSource::with_items("forum", vec![forum_post("x"), forum_post("y")]);
        let coordinator = Coordinator::new(vec![source], store);

        let first = coordinator.run_cycle().await.unwrap();
        assert_eq!(first.total_inserted(), 2);

        let second = coordinator.run_cycle().await.unwrap();
        assert_eq!(second.total_inserted(), 0);
        assert_eq!(second.source("forum").unwrap().fetched, 2);
    }
}
