use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{
    Destination, DestinationId, EntryId, Feed, FeedId, NewFeed, NewSeenEntry, NewSubscription,
    SeenEntry, Subscription, SubscriptionTarget,
};

use super::schema::SCHEMA;

const FEED_COLUMNS: &str = "id, title, url, last_fetched, created_at";

const ENTRY_COLUMNS: &str = "e.seq, e.entry_id, e.feed_id, e.title, e.link, e.description, \
     e.enclosure_url, e.category, e.published_at, e.first_seen_at, e.suppressed";

const TARGET_COLUMNS: &str = "s.id, s.feed_id, s.destination_id, s.display_name, s.role_ref, \
     s.after_seq, s.created_at, d.guild_ref, d.channel_ref";

/// What happened to a batch of entries handed to [`Repository::record_seen_entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { inserted: usize },
    /// The feed was removed while the cycle was running.
    FeedGone,
}

enum SubscribeOutcome {
    Created(SubscriptionTarget),
    Exists,
    FeedMissing,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    /// Creates the feed unless one with the same url exists, and returns the stored row.
    ///
    /// A url that was edited away keeps owning its hashed id, so adding that
    /// url again gets an id derived from the url and the creation time.
    pub async fn upsert_feed(&self, feed: NewFeed) -> Result<Feed> {
        let stored = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let created_at = Utc::now();

                let existing = tx
                    .query_row(
                        &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?1"),
                        params![feed.url],
                        feed_from_row,
                    )
                    .optional()?;
                if let Some(existing) = existing {
                    return Ok(existing);
                }

                let id = feed.id();
                let id_taken = tx
                    .query_row("SELECT 1 FROM feeds WHERE id = ?1", params![id], |_| Ok(()))
                    .optional()?
                    .is_some();
                let id = if id_taken {
                    FeedId::for_url_at(&feed.url, created_at)
                } else {
                    id
                };

                tx.execute(
                    "INSERT INTO feeds (id, title, url, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![id, feed.title, feed.url, timestamp(created_at)],
                )?;
                let stored = tx.query_row(
                    &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"),
                    params![id],
                    feed_from_row,
                )?;
                tx.commit()?;
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    pub async fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let url = url.trim().to_string();
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?1"),
                        params![url],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY title"))?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    /// Points an existing feed at a new url. The feed keeps its id, and with it
    /// its seen-entry history.
    pub async fn update_feed_url(&self, old_url: &str, new_url: &str) -> Result<Feed> {
        let old = old_url.trim().to_string();
        let new = new_url.trim().to_string();
        let updated = self
            .conn
            .call(move |conn| {
                let changed =
                    conn.execute("UPDATE feeds SET url = ?1 WHERE url = ?2", params![new, old])?;
                if changed == 0 {
                    return Ok(None);
                }
                let feed = conn.query_row(
                    &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?1"),
                    params![new],
                    feed_from_row,
                )?;
                Ok(Some(feed))
            })
            .await?;
        updated.ok_or_else(|| AppError::FeedNotFound(old_url.to_string()))
    }

    pub async fn update_feed_last_fetched(&self, id: &FeedId) -> Result<()> {
        let id = id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET last_fetched = ?1 WHERE id = ?2",
                    params![timestamp(Utc::now()), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Removes a feed together with its subscriptions, seen entries and delivery records.
    pub async fn delete_feed(&self, url: &str) -> Result<()> {
        let target = url.trim().to_string();
        let removed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM feeds WHERE url = ?1", params![target])?))
            .await?;
        if removed == 0 {
            return Err(AppError::FeedNotFound(url.to_string()));
        }
        Ok(())
    }

    // Subscription operations

    /// Binds a feed to a channel, creating the destination on first use.
    pub async fn subscribe(&self, new: NewSubscription) -> Result<SubscriptionTarget> {
        let feed_id = new.feed_id.clone();
        let channel_ref = new.channel_ref.clone();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let feed_exists = tx
                    .query_row("SELECT 1 FROM feeds WHERE id = ?1", params![new.feed_id], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !feed_exists {
                    return Ok(SubscribeOutcome::FeedMissing);
                }

                tx.execute(
                    "INSERT OR IGNORE INTO destinations (guild_ref, channel_ref) VALUES (?1, ?2)",
                    params![new.guild_ref, new.channel_ref],
                )?;
                let destination_id: i64 = tx.query_row(
                    "SELECT id FROM destinations WHERE guild_ref = ?1 AND channel_ref = ?2",
                    params![new.guild_ref, new.channel_ref],
                    |row| row.get(0),
                )?;

                let inserted = tx.execute(
                    r#"INSERT OR IGNORE INTO subscriptions
                           (feed_id, destination_id, display_name, role_ref, after_seq, created_at)
                       VALUES (?1, ?2, ?3, ?4,
                           (SELECT COALESCE(MAX(seq), 0) FROM seen_entries WHERE feed_id = ?1), ?5)"#,
                    params![
                        new.feed_id,
                        destination_id,
                        new.display_name,
                        new.role_ref,
                        timestamp(Utc::now()),
                    ],
                )?;
                if inserted == 0 {
                    return Ok(SubscribeOutcome::Exists);
                }

                let target = tx.query_row(
                    &format!(
                        "SELECT {TARGET_COLUMNS} FROM subscriptions s \
                         JOIN destinations d ON d.id = s.destination_id WHERE s.id = ?1"
                    ),
                    params![tx.last_insert_rowid()],
                    |row| target_from_row(row, 0),
                )?;
                tx.commit()?;
                Ok(SubscribeOutcome::Created(target))
            })
            .await?;

        match outcome {
            SubscribeOutcome::Created(target) => Ok(target),
            SubscribeOutcome::Exists => {
                let feed_url = self
                    .feed_url(&feed_id)
                    .await?
                    .unwrap_or_else(|| feed_id.to_string());
                Err(AppError::AlreadySubscribed {
                    feed_url,
                    channel_ref,
                })
            }
            SubscribeOutcome::FeedMissing => Err(AppError::FeedNotFound(feed_id.to_string())),
        }
    }

    async fn feed_url(&self, id: &FeedId) -> Result<Option<String>> {
        let id = id.clone();
        let url = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row("SELECT url FROM feeds WHERE id = ?1", params![id], |row| row.get(0))
                    .optional()?)
            })
            .await?;
        Ok(url)
    }

    /// Removes a subscription. Its delivery records go with it; the destination stays.
    pub async fn unsubscribe(&self, id: i64) -> Result<()> {
        let removed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM subscriptions WHERE id = ?1", params![id])?)
            })
            .await?;
        if removed == 0 {
            return Err(AppError::SubscriptionNotFound(id));
        }
        Ok(())
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Option<SubscriptionTarget>> {
        let target = self
            .conn
            .call(move |conn| {
                let target = conn
                    .query_row(
                        &format!(
                            "SELECT {TARGET_COLUMNS} FROM subscriptions s \
                             JOIN destinations d ON d.id = s.destination_id WHERE s.id = ?1"
                        ),
                        params![id],
                        |row| target_from_row(row, 0),
                    )
                    .optional()?;
                Ok(target)
            })
            .await?;
        Ok(target)
    }

    /// Subscriptions with their feeds, optionally limited to one guild.
    pub async fn list_subscriptions(
        &self,
        guild_ref: Option<String>,
    ) -> Result<Vec<(SubscriptionTarget, Feed)>> {
        let listing = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TARGET_COLUMNS}, f.id, f.title, f.url, f.last_fetched, f.created_at \
                     FROM subscriptions s \
                     JOIN destinations d ON d.id = s.destination_id \
                     JOIN feeds f ON f.id = s.feed_id \
                     WHERE ?1 IS NULL OR d.guild_ref = ?1 \
                     ORDER BY d.guild_ref, d.channel_ref, s.display_name"
                ))?;
                let listing = stmt
                    .query_map(params![guild_ref], |row| {
                        Ok((target_from_row(row, 0)?, feed_from_row_at(row, 9)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(listing)
            })
            .await?;
        Ok(listing)
    }

    /// Which destinations each feed delivers to. Feeds without subscribers are absent.
    pub async fn subscriber_map(&self) -> Result<BTreeMap<FeedId, BTreeSet<DestinationId>>> {
        let pairs = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT feed_id, destination_id FROM subscriptions")?;
                let pairs = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, FeedId>(0)?, DestinationId(row.get(1)?)))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(pairs)
            })
            .await?;

        let mut map: BTreeMap<FeedId, BTreeSet<DestinationId>> = BTreeMap::new();
        for (feed_id, destination_id) in pairs {
            map.entry(feed_id).or_default().insert(destination_id);
        }
        Ok(map)
    }

    // Seen entry operations

    pub async fn seen_entry_ids(&self, feed_id: &FeedId) -> Result<HashSet<EntryId>> {
        let feed_id = feed_id.clone();
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT entry_id FROM seen_entries WHERE feed_id = ?1")?;
                let ids = stmt
                    .query_map(params![feed_id], |row| row.get::<_, EntryId>(0))?
                    .collect::<std::result::Result<HashSet<_>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Records entries in the given order inside one transaction. Entries
    /// already present are left untouched.
    pub async fn record_seen_entries(
        &self,
        feed_id: &FeedId,
        entries: Vec<NewSeenEntry>,
        first_seen_at: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        let feed_id = feed_id.clone();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let feed_exists = tx
                    .query_row("SELECT 1 FROM feeds WHERE id = ?1", params![feed_id], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !feed_exists {
                    return Ok(RecordOutcome::FeedGone);
                }

                let seen_at = timestamp(first_seen_at);
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT OR IGNORE INTO seen_entries
                               (entry_id, feed_id, title, link, description, enclosure_url,
                                category, published_at, first_seen_at, suppressed)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                    )?;
                    for entry in &entries {
                        inserted += stmt.execute(params![
                            entry.entry_id,
                            feed_id,
                            entry.title,
                            entry.link,
                            entry.description,
                            entry.enclosure_url,
                            entry.category,
                            entry.published_at.map(timestamp),
                            seen_at,
                            entry.suppressed,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(RecordOutcome::Recorded { inserted })
            })
            .await?;
        Ok(outcome)
    }

    pub async fn latest_entry(&self, feed_id: &FeedId) -> Result<Option<SeenEntry>> {
        let feed_id = feed_id.clone();
        let entry = self
            .conn
            .call(move |conn| {
                let entry = conn
                    .query_row(
                        &format!(
                            "SELECT {ENTRY_COLUMNS} FROM seen_entries e \
                             WHERE e.feed_id = ?1 ORDER BY e.seq DESC LIMIT 1"
                        ),
                        params![feed_id],
                        |row| entry_from_row(row, 0),
                    )
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    // Delivery operations

    /// Entries of a feed that still owe a notification to at least one
    /// subscription, oldest first, each with the subscriptions it owes.
    pub async fn pending_deliveries(
        &self,
        feed_id: &FeedId,
        since: DateTime<Utc>,
    ) -> Result<Vec<(SeenEntry, Vec<SubscriptionTarget>)>> {
        let feed_id = feed_id.clone();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ENTRY_COLUMNS}, {TARGET_COLUMNS} \
                     FROM seen_entries e \
                     JOIN subscriptions s ON s.feed_id = e.feed_id \
                     JOIN destinations d ON d.id = s.destination_id \
                     WHERE e.feed_id = ?1 \
                       AND e.suppressed = 0 \
                       AND e.seq > s.after_seq \
                       AND e.first_seen_at >= ?2 \
                       AND NOT EXISTS ( \
                           SELECT 1 FROM delivery_records r \
                           WHERE r.subscription_id = s.id AND r.entry_id = e.entry_id) \
                     ORDER BY e.seq ASC, s.id ASC"
                ))?;
                let rows = stmt
                    .query_map(params![feed_id, timestamp(since)], |row| {
                        Ok((entry_from_row(row, 0)?, target_from_row(row, 11)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut pending: Vec<(SeenEntry, Vec<SubscriptionTarget>)> = Vec::new();
        for (entry, target) in rows {
            match pending.last_mut() {
                Some((last, targets)) if last.seq == entry.seq => targets.push(target),
                _ => pending.push((entry, vec![target])),
            }
        }
        Ok(pending)
    }

    pub async fn is_delivered(&self, subscription_id: i64, entry_id: &EntryId) -> Result<bool> {
        let entry_id = entry_id.clone();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM delivery_records WHERE subscription_id = ?1 AND entry_id = ?2",
                    params![subscription_id, entry_id],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    /// Marks an entry as delivered to a subscription. Returns false when a
    /// record already existed or the subscription has been removed since.
    pub async fn record_delivery(&self, subscription_id: i64, entry_id: &EntryId) -> Result<bool> {
        let entry_id = entry_id.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let alive = tx
                    .query_row(
                        "SELECT 1 FROM subscriptions WHERE id = ?1",
                        params![subscription_id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                let inserted = if alive {
                    tx.execute(
                        "INSERT OR IGNORE INTO delivery_records (subscription_id, entry_id, delivered_at) VALUES (?1, ?2, ?3)",
                        params![subscription_id, entry_id, timestamp(Utc::now())],
                    )?
                } else {
                    0
                };
                tx.commit()?;
                Ok(inserted > 0)
            })
            .await?;
        Ok(inserted)
    }
}

/// Fixed-width UTC timestamps, so stored values compare correctly as text.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56.000000Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn datetime_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    feed_from_row_at(row, 0)
}

fn feed_from_row_at(row: &Row, at: usize) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(at)?,
        title: row.get(at + 1)?,
        url: row.get(at + 2)?,
        last_fetched: datetime_at(row, at + 3)?,
        created_at: datetime_at(row, at + 4)?.unwrap_or_else(Utc::now),
    })
}

fn entry_from_row(row: &Row, at: usize) -> rusqlite::Result<SeenEntry> {
    Ok(SeenEntry {
        seq: row.get(at)?,
        entry_id: row.get(at + 1)?,
        feed_id: row.get(at + 2)?,
        title: row.get(at + 3)?,
        link: row.get(at + 4)?,
        description: row.get(at + 5)?,
        enclosure_url: row.get(at + 6)?,
        category: row.get(at + 7)?,
        published_at: datetime_at(row, at + 8)?,
        first_seen_at: datetime_at(row, at + 9)?.unwrap_or_else(Utc::now),
        suppressed: row.get::<_, i64>(at + 10)? != 0,
    })
}

fn target_from_row(row: &Row, at: usize) -> rusqlite::Result<SubscriptionTarget> {
    let destination_id = DestinationId(row.get(at + 2)?);
    Ok(SubscriptionTarget {
        subscription: Subscription {
            id: row.get(at)?,
            feed_id: row.get(at + 1)?,
            destination_id,
            display_name: row.get(at + 3)?,
            role_ref: row.get(at + 4)?,
            after_seq: row.get(at + 5)?,
            created_at: datetime_at(row, at + 6)?.unwrap_or_else(Utc::now),
        },
        destination: Destination {
            id: destination_id,
            guild_ref: row.get(at + 7)?,
            channel_ref: row.get(at + 8)?,
        },
    })
}
