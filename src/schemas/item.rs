//! The normalized item shape shared by all source adapters and the store.
//!
//! An item is created exactly once, when an adapter yields it for
//! persistence, and is never mutated afterwards. The storage ID embeds
//! the source kind so native IDs reused across feeds (a forum post and a
//! forum comment can share a numeric ID) never collide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PollError;

/// Which external feed an item came from. Immutable once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    ForumPost,
    ForumComment,
    MicroblogPost,
}

impl Source {
    /// Storage string, also the ID prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::ForumPost => "forum_post",
            Source::ForumComment => "forum_comment",
            Source::MicroblogPost => "microblog_post",
        }
    }

    pub fn all() -> [Source; 3] {
        [Source::ForumPost, Source::ForumComment, Source::MicroblogPost]
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forum_post" => Ok(Source::ForumPost),
            "forum_comment" => Ok(Source::ForumComment),
            "microblog_post" => Ok(Source::MicroblogPost),
            other => Err(PollError::ParseError(format!("unknown source: {other}"))),
        }
    }
}

/// A normalized record as yielded by a source adapter, before insertion.
///
/// `created_at` is always the source-reported creation time, never the
/// wall clock at fetch time. The store stamps `fetched_at` on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub source: Source,
    /// Platform-native identifier, unique only within its own feed.
    pub native_id: String,
    /// Present for forum posts only.
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    /// Platform popularity signal; 0 where the platform keeps metrics
    /// separately.
    pub score: i64,
    pub origin_channel: Option<String>,
    pub permalink: Option<String>,
    /// Opaque structured payload (engagement counts, thread linkage).
    /// Serialized as a blob at write time, deserialized only at the
    /// read boundary.
    pub metrics: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl RawItem {
    /// Globally unique storage key: `<source>_<native-id>`.
    pub fn storage_id(&self) -> String {
        format!("{}_{}", self.source.as_str(), self.native_id)
    }
}

/// A persisted item as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub source: Source,
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub score: i64,
    pub origin_channel: Option<String>,
    pub permalink: Option<String>,
    pub metrics: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Set by the store at insertion time.
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(source: Source, native_id: &str) -> RawItem {
        RawItem {
            source,
            native_id: native_id.to_string(),
            title: None,
            body: None,
            url: None,
            author: None,
            score: 0,
            origin_channel: None,
            permalink: None,
            metrics: None,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_storage_id_distinguishes_sources() {
        // A post and a comment sharing a native numeric ID must map to
        // two distinct storage keys.
        let post = raw(Source::ForumPost, "18abc");
        let comment = raw(Source::ForumComment, "18abc");

        assert_eq!(post.storage_id(), "forum_post_18abc");
        assert_eq!(comment.storage_id(), "forum_comment_18abc");
        assert_ne!(post.storage_id(), comment.storage_id());
    }

    #[test]
    fn test_source_round_trip() {
        for source in Source::all() {
            let parsed: Source = source.as_str().parse().unwrap();
            assert_eq!(parsed, source);
        }
        assert!("tumblr_post".parse::<Source>().is_err());
    }
}
