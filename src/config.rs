//! Configuration for the polling service

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Forum API
    #[serde(default = "default_forum_api")]
    pub forum_api_url: String,
    #[serde(default = "default_primary_channel")]
    pub forum_primary_channel: String,
    /// Comma-separated list of secondary channels to keyword-search.
    pub forum_secondary_channels: Option<String>,
    #[serde(default = "default_search_query")]
    pub forum_search_query: String,

    // Microblog API
    #[serde(default = "default_microblog_api")]
    pub microblog_api_url: String,
    pub microblog_bearer_token: Option<String>,
    #[serde(default = "default_search_query")]
    pub microblog_search_query: String,

    // Database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    // Polling
    #[serde(default = "default_poll_interval_minutes")]
    pub poll_interval_minutes: u64,

    // Rate limiting (requests per minute)
    #[serde(default = "default_forum_rate_limit")]
    pub forum_rate_limit_rpm: u32,
    #[serde(default = "default_microblog_rate_limit")]
    pub microblog_rate_limit_rpm: u32,

    // Per-listing fetch sizes
    #[serde(default = "default_listing_limit")]
    pub forum_listing_limit: u32,
    #[serde(default = "default_search_limit")]
    pub forum_search_limit: u32,
    #[serde(default = "default_microblog_limit")]
    pub microblog_max_results: u32,

    // Concurrency
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_forum_api() -> String {
    "https://www.reddit.com".to_string()
}

fn default_microblog_api() -> String {
    "https://api.twitter.com".to_string()
}

fn default_primary_channel() -> String {
    "rust".to_string()
}

fn default_search_query() -> String {
    "rust".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/feedpulse.db")
}

fn default_poll_interval_minutes() -> u64 {
    15
}

fn default_forum_rate_limit() -> u32 {
    60
}

fn default_microblog_rate_limit() -> u32 {
    15 // basic search tier: 15 requests per 15 min window
}

fn default_listing_limit() -> u32 {
    50
}

fn default_search_limit() -> u32 {
    25
}

fn default_microblog_limit() -> u32 {
    50
}

fn default_max_concurrent_requests() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forum_api_url: default_forum_api(),
            forum_primary_channel: default_primary_channel(),
            forum_secondary_channels: None,
            forum_search_query: default_search_query(),
            microblog_api_url: default_microblog_api(),
            microblog_bearer_token: None,
            microblog_search_query: default_search_query(),
            database_path: default_database_path(),
            poll_interval_minutes: default_poll_interval_minutes(),
            forum_rate_limit_rpm: default_forum_rate_limit(),
            microblog_rate_limit_rpm: default_microblog_rate_limit(),
            forum_listing_limit: default_listing_limit(),
            forum_search_limit: default_search_limit(),
            microblog_max_results: default_microblog_limit(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file
        dotenvy::dotenv().ok();

        // Build config from environment
        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_minutes == 0 {
            anyhow::bail!("poll_interval_minutes must be at least 1");
        }
        if self.forum_primary_channel.trim().is_empty() {
            anyhow::bail!("forum_primary_channel must not be empty");
        }
        Ok(())
    }

    /// Checks if the microblog source is configured
    pub fn has_microblog(&self) -> bool {
        self.microblog_bearer_token.is_some()
    }

    /// Polling interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes * 60)
    }

    /// Secondary channels parsed from the comma-separated list
    pub fn secondary_channels(&self) -> Vec<String> {
        self.forum_secondary_channels
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}
