use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{stable_hash, text_id_sql};

/// Identity of a feed: the hash of the url it was created with.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeedId(String);

impl FeedId {
    pub fn for_url(url: &str) -> Self {
        Self(stable_hash(url.trim()))
    }

    /// Id for a url whose plain hash already belongs to another feed, which
    /// happens when a feed's url was edited and the old url is added again.
    pub fn for_url_at(url: &str, created_at: DateTime<Utc>) -> Self {
        Self(stable_hash(&format!("{}\n{}", url.trim(), created_at.timestamp_micros())))
    }
}

impl std::fmt::Display for FeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to tell feeds apart in logs
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

text_id_sql!(FeedId);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub title: String,
    pub url: String,
    pub last_fetched: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeed {
    pub title: String,
    pub url: String,
}

impl NewFeed {
    pub fn id(&self) -> FeedId {
        FeedId::for_url(&self.url)
    }
}
