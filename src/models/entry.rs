use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{stable_hash, text_id_sql, FeedId};

/// Identity of a feed entry: the hash of its guid, or of its link when the
/// feed does not provide one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(String);

impl EntryId {
    pub fn for_entry(guid: Option<&str>, link: &str) -> Option<Self> {
        let canonical = guid
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .or_else(|| Some(link.trim()).filter(|l| !l.is_empty()))?;
        Some(Self(stable_hash(canonical)))
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

text_id_sql!(EntryId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub media_type: Option<String>,
}

impl Enclosure {
    pub fn is_image(&self) -> bool {
        self.media_type
            .as_deref()
            .map(|t| t.starts_with("image/"))
            .unwrap_or(false)
    }
}

/// An entry as it came out of the feed parser, before deduplication.
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub guid: Option<String>,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub enclosures: Vec<Enclosure>,
    pub categories: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl ParsedEntry {
    pub fn id(&self) -> Option<EntryId> {
        EntryId::for_entry(self.guid.as_deref(), &self.link)
    }

    /// The row to record for this entry, if it has an identity at all.
    pub fn to_seen(&self, suppressed: bool) -> Option<NewSeenEntry> {
        Some(NewSeenEntry {
            entry_id: self.id()?,
            title: self.title.clone(),
            link: self.link.clone(),
            description: self.description.clone(),
            enclosure_url: self.preferred_enclosure().map(|e| e.url.clone()),
            category: self.categories.first().cloned(),
            published_at: self.published_at,
            suppressed,
        })
    }

    /// Images first, so the notification can show one.
    pub fn preferred_enclosure(&self) -> Option<&Enclosure> {
        self.enclosures
            .iter()
            .find(|e| e.is_image())
            .or_else(|| self.enclosures.first())
    }
}

#[derive(Debug, Clone)]
pub struct NewSeenEntry {
    pub entry_id: EntryId,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub enclosure_url: Option<String>,
    pub category: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub suppressed: bool,
}

/// An entry that has been ingested for a feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenEntry {
    pub seq: i64,
    pub entry_id: EntryId,
    pub feed_id: FeedId,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub enclosure_url: Option<String>,
    pub category: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub suppressed: bool,
}
