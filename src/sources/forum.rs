//! Forum Data Source
//!
//! Polls the link-aggregation forum's public JSON listings. One fetch
//! cycle covers three endpoint kinds:
//! - the primary channel's newest-posts listing (unfiltered, because
//!   the search index lags behind fresh submissions),
//! - a keyword search scoped to each configured secondary channel,
//! - the primary channel's newest-comments listing.
//!
//! Every endpoint call is independently fault-isolated: a failed
//! channel is reported in the outcome and the rest proceed.

use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{EndpointFailure, FetchOutcome, PollSource};
use crate::config::Config;
use crate::error::{PollError, Result};
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::schemas::{RawItem, Source};

/// Comment bodies the platform substitutes for removed content.
const DELETED_BODY_SENTINELS: [&str; 2] = ["[deleted]", "[removed]"];

/// Listing envelope shared by every forum listing endpoint
#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    #[serde(default = "Vec::new")]
    children: Vec<ListingChild<T>>,
}

#[derive(Debug, Deserialize)]
struct ListingChild<T> {
    data: T,
}

/// A post as returned by the new/search listings
#[derive(Debug, Clone, Deserialize)]
pub struct ForumPostData {
    pub id: String,
    pub title: Option<String>,
    #[serde(default)]
    pub selftext: String,
    pub url: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub score: i64,
    pub subreddit: Option<String>,
    pub permalink: Option<String>,
    pub created_utc: f64,
}

/// A comment as returned by the comments listing
#[derive(Debug, Clone, Deserialize)]
pub struct ForumCommentData {
    pub id: String,
    pub body: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub score: i64,
    pub subreddit: Option<String>,
    pub permalink: Option<String>,
    /// Fullname of the post the comment belongs to.
    pub link_id: Option<String>,
    pub created_utc: f64,
}

/// Forum data source
pub struct ForumSource {
    client: SourceHttpClient,
    base_url: String,
    primary_channel: String,
    secondary_channels: Vec<String>,
    search_query: String,
    listing_limit: u32,
    search_limit: u32,
}

impl ForumSource {
    /// Creates a new forum source
    pub fn new(http_client: Arc<ResilientHttpClient>, config: &Config) -> Self {
        let client = SourceHttpClient::new(http_client, "forum", config.forum_rate_limit_rpm);

        Self {
            client,
            base_url: config.forum_api_url.trim_end_matches('/').to_string(),
            primary_channel: config.forum_primary_channel.clone(),
            secondary_channels: config.secondary_channels(),
            search_query: config.forum_search_query.clone(),
            listing_limit: config.forum_listing_limit,
            search_limit: config.forum_search_limit,
        }
    }

    /// Fetches the newest posts in a channel
    async fn fetch_new_posts(&self, channel: &str) -> Result<Vec<RawItem>> {
        let url = format!("{}/r/{}/new.json", self.base_url, channel);
        let query = [
            ("limit", self.listing_limit.to_string()),
            ("raw_json", "1".to_string()),
        ];

        debug!(source = "forum", channel = %channel, "Fetching newest posts");

        let listing: Listing<ForumPostData> = self
            .client
            .get_with_query(&url, &query)
            .await?
            .json()
            .await
            .map_err(PollError::HttpError)?;

        Ok(listing
            .data
            .children
            .into_iter()
            .filter_map(|child| self.post_to_item(child.data))
            .collect())
    }

    /// Searches a channel for the configured keyword, newest first
    async fn search_posts(&self, channel: &str) -> Result<Vec<RawItem>> {
        let url = format!("{}/r/{}/search.json", self.base_url, channel);
        let query = [
            ("q", self.search_query.clone()),
            ("restrict_sr", "on".to_string()),
            ("sort", "new".to_string()),
            ("limit", self.search_limit.to_string()),
            ("raw_json", "1".to_string()),
        ];

        debug!(source = "forum", channel = %channel, query = %self.search_query, "Searching channel");

        let listing: Listing<ForumPostData> = self
            .client
            .get_with_query(&url, &query)
            .await?
            .json()
            .await
            .map_err(PollError::HttpError)?;

        Ok(listing
            .data
            .children
            .into_iter()
            .filter_map(|child| self.post_to_item(child.data))
            .collect())
    }

    /// Fetches the newest comments in a channel
    async fn fetch_new_comments(&self, channel: &str) -> Result<Vec<RawItem>> {
        let url = format!("{}/r/{}/comments.json", self.base_url, channel);
        let query = [
            ("limit", self.listing_limit.to_string()),
            ("raw_json", "1".to_string()),
        ];

        debug!(source = "forum", channel = %channel, "Fetching newest comments");

        let listing: Listing<ForumCommentData> = self
            .client
            .get_with_query(&url, &query)
            .await?
            .json()
            .await
            .map_err(PollError::HttpError)?;

        Ok(listing
            .data
            .children
            .into_iter()
            .filter_map(|child| self.comment_to_item(child.data))
            .collect())
    }

    /// Converts a listing post to a normalized item
    fn post_to_item(&self, post: ForumPostData) -> Option<RawItem> {
        let created_at = epoch_to_datetime(post.created_utc)?;

        let body = if post.selftext.trim().is_empty() {
            None
        } else {
            Some(post.selftext)
        };

        Some(RawItem {
            source: Source::ForumPost,
            native_id: post.id,
            title: post.title,
            body,
            url: post.url,
            author: post.author,
            score: post.score,
            origin_channel: post.subreddit,
            permalink: post.permalink.map(|p| self.absolute_permalink(&p)),
            metrics: None,
            created_at,
        })
    }

    /// Converts a listing comment to a normalized item. Comments whose
    /// body carries a deleted/removed sentinel are dropped here, before
    /// they ever reach the store.
    fn comment_to_item(&self, comment: ForumCommentData) -> Option<RawItem> {
        let body = comment.body?;
        if DELETED_BODY_SENTINELS.contains(&body.trim()) {
            debug!(source = "forum", comment_id = %comment.id, "Skipping removed comment");
            return None;
        }

        let created_at = epoch_to_datetime(comment.created_utc)?;

        let metrics = comment
            .link_id
            .map(|link_id| serde_json::json!({ "thread": link_id }));

        Some(RawItem {
            source: Source::ForumComment,
            native_id: comment.id,
            title: None,
            body: Some(body),
            url: None,
            author: comment.author,
            score: comment.score,
            origin_channel: comment.subreddit,
            permalink: comment.permalink.map(|p| self.absolute_permalink(&p)),
            metrics,
            created_at,
        })
    }

    fn absolute_permalink(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }
}

/// Converts the platform's epoch-seconds timestamp (floating point on
/// the wire) to an absolute timestamp
fn epoch_to_datetime(epoch_secs: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(epoch_secs as i64, 0).single()
}

#[async_trait::async_trait]
impl PollSource for ForumSource {
    fn id(&self) -> &str {
        "forum"
    }

    async fn fetch(&self) -> FetchOutcome {
        let mut outcome = FetchOutcome::empty();

        // Primary channel newest-posts listing.
        match self.fetch_new_posts(&self.primary_channel).await {
            Ok(items) => outcome.items.extend(items),
            Err(e) => {
                warn!(source = "forum", channel = %self.primary_channel, error = %e, "Newest-posts fetch failed");
                outcome
                    .failures
                    .push(EndpointFailure::new(format!("new/{}", self.primary_channel), &e));
            }
        }

        // Keyword search across the secondary channels, concurrently.
        let searches = self
            .secondary_channels
            .iter()
            .map(|channel| async move { (channel.as_str(), self.search_posts(channel).await) });

        for (channel, result) in join_all(searches).await {
            match result {
                Ok(items) => outcome.items.extend(items),
                Err(e) => {
                    warn!(source = "forum", channel = %channel, error = %e, "Channel search failed");
                    outcome
                        .failures
                        .push(EndpointFailure::new(format!("search/{channel}"), &e));
                }
            }
        }

        // Comments poll happens after post polling completes.
        match self.fetch_new_comments(&self.primary_channel).await {
            Ok(items) => outcome.items.extend(items),
            Err(e) => {
                warn!(source = "forum", channel = %self.primary_channel, error = %e, "Comments fetch failed");
                outcome.failures.push(EndpointFailure::new(
                    format!("comments/{}", self.primary_channel),
                    &e,
                ));
            }
        }

        info!(
            source = "forum",
            items = outcome.items.len(),
            failures = outcome.failures.len(),
            "Forum fetch complete"
        );

        outcome
    }
}
