//! Microblog Data Source
//!
//! Runs one recent-search query against the microblogging platform's
//! v2 search endpoint. The bearer token is optional: without one the
//! fetch is an intentional skip (an empty, successful outcome), not a
//! failure.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{EndpointFailure, FetchOutcome, PollSource};
use crate::config::Config;
use crate::error::{PollError, Result};
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::schemas::{RawItem, Source};

/// Search response envelope
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default = "Vec::new")]
    data: Vec<TweetData>,
}

/// A single post as returned by the search endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TweetData {
    pub id: String,
    pub text: String,
    pub author_id: Option<String>,
    pub created_at: Option<String>,
    /// Engagement counts; absent on some tiers.
    pub public_metrics: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Microblog data source
pub struct MicroblogSource {
    client: SourceHttpClient,
    base_url: String,
    bearer_token: Option<String>,
    search_query: String,
    max_results: u32,
}

impl MicroblogSource {
    /// Creates a new microblog source
    pub fn new(http_client: Arc<ResilientHttpClient>, config: &Config) -> Self {
        let client =
            SourceHttpClient::new(http_client, "microblog", config.microblog_rate_limit_rpm);

        Self {
            client,
            base_url: config.microblog_api_url.trim_end_matches('/').to_string(),
            bearer_token: config.microblog_bearer_token.clone(),
            search_query: config.microblog_search_query.clone(),
            max_results: config.microblog_max_results,
        }
    }

    /// Runs the recent-search query
    async fn search(&self, token: &str) -> Result<Vec<RawItem>> {
        let url = format!("{}/2/tweets/search/recent", self.base_url);
        let query = [
            ("query", self.search_query.clone()),
            ("max_results", self.max_results.to_string()),
            (
                "tweet.fields",
                "created_at,author_id,public_metrics".to_string(),
            ),
        ];

        debug!(source = "microblog", query = %self.search_query, "Searching recent posts");

        let response: SearchResponse = self
            .client
            .get_with_bearer(&url, &query, token)
            .await?
            .json()
            .await
            .map_err(PollError::HttpError)?;

        Ok(response
            .data
            .into_iter()
            .filter_map(tweet_to_item)
            .collect())
    }
}

/// Converts a search hit to a normalized item
fn tweet_to_item(tweet: TweetData) -> Option<RawItem> {
    let created_at = parse_created_at(tweet.created_at.as_deref())?;

    // Engagement counts pass through verbatim; a missing field is an
    // empty map, not an error.
    let metrics = serde_json::Value::Object(tweet.public_metrics.unwrap_or_default());

    let permalink = format!("https://x.com/i/status/{}", tweet.id);

    Some(RawItem {
        source: Source::MicroblogPost,
        native_id: tweet.id,
        title: None,
        body: Some(tweet.text),
        url: None,
        author: tweet.author_id,
        // Popularity lives in the metrics payload on this platform.
        score: 0,
        origin_channel: None,
        permalink: Some(permalink),
        metrics: Some(metrics),
        created_at,
    })
}

fn parse_created_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait::async_trait]
impl PollSource for MicroblogSource {
    fn id(&self) -> &str {
        "microblog"
    }

    async fn fetch(&self) -> FetchOutcome {
        let Some(token) = self.bearer_token.clone() else {
            info!(source = "microblog", "No bearer token configured, skipping");
            return FetchOutcome::skipped();
        };

        match self.search(&token).await {
            Ok(items) => {
                info!(source = "microblog", items = items.len(), "Microblog fetch complete");
                FetchOutcome {
                    items,
                    ..FetchOutcome::empty()
                }
            }
            Err(e) => {
                warn!(source = "microblog", error = %e, "Recent search failed");
                FetchOutcome {
                    failures: vec![EndpointFailure::new("search/recent", &e)],
                    ..FetchOutcome::empty()
                }
            }
        }
    }
}
