pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- feeds table, id is the hash of the url the feed was created with
CREATE TABLE IF NOT EXISTS feeds (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    last_fetched TEXT,
    created_at TEXT NOT NULL
);

-- destinations table
CREATE TABLE IF NOT EXISTS destinations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guild_ref TEXT NOT NULL,
    channel_ref TEXT NOT NULL,
    UNIQUE(guild_ref, channel_ref)
);

-- subscriptions table
CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    destination_id INTEGER NOT NULL REFERENCES destinations(id),
    display_name TEXT NOT NULL,
    role_ref TEXT,
    after_seq INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(feed_id, destination_id)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_feed_id ON subscriptions(feed_id);

-- seen_entries table, seq order is delivery order
CREATE TABLE IF NOT EXISTS seen_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT NOT NULL,
    feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    link TEXT NOT NULL,
    description TEXT,
    enclosure_url TEXT,
    category TEXT,
    published_at TEXT,
    first_seen_at TEXT NOT NULL,
    suppressed INTEGER NOT NULL DEFAULT 0,
    UNIQUE(feed_id, entry_id)
);

CREATE INDEX IF NOT EXISTS idx_seen_entries_feed_seq ON seen_entries(feed_id, seq);

-- delivery_records table (at most one notification per subscription and entry)
CREATE TABLE IF NOT EXISTS delivery_records (
    subscription_id INTEGER NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
    entry_id TEXT NOT NULL,
    delivered_at TEXT NOT NULL,
    PRIMARY KEY (subscription_id, entry_id)
);
"#;
