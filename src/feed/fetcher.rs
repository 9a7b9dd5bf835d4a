use std::time::Duration;

use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{Enclosure, Feed, NewFeed, ParsedEntry};

const DESCRIPTION_WIDTH: usize = 1000;

pub struct FeedFetcher {
    client: Client,
    max_concurrent: usize,
}

impl FeedFetcher {
    pub fn new(user_agent: &str, max_concurrent: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            max_concurrent: max_concurrent.max(1),
        })
    }

    /// Fetches and parses one feed. Entries come back in feed order (newest first).
    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<ParsedEntry>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        parse_entries(&bytes)
    }

    /// Fetch every feed with at most `max_concurrent` requests in flight.
    /// Results arrive in completion order, not feed order.
    pub async fn refresh_all(&self, feeds: Vec<Feed>) -> Vec<(Feed, Result<Vec<ParsedEntry>>)> {
        stream::iter(feeds)
            .map(|feed| async move {
                let result = self.fetch_feed(&feed.url).await;
                match &result {
                    Ok(entries) => {
                        tracing::debug!("Fetched {} entries from {}", entries.len(), feed.url)
                    }
                    Err(e) => tracing::warn!("Failed to fetch {}: {}", feed.url, e),
                }
                (feed, result)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await
    }

    /// Discover and create a feed from a URL
    /// If the URL is a direct RSS/Atom feed, parse it directly
    /// If it's an HTML page, look for feed links in <link> tags
    pub async fn discover_feed(&self, url: &str) -> Result<NewFeed> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Discovery(format!("HTTP {} from {}", response.status(), url)));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let bytes = response.bytes().await?;

        if let Some(title) = feed_title(&bytes) {
            return Ok(NewFeed {
                title,
                url: final_url,
            });
        }

        if content_type.contains("html") || bytes.starts_with(b"<!") || bytes.starts_with(b"<html") {
            let html = String::from_utf8_lossy(&bytes);
            if let Some(feed_url) = find_feed_link(&html, &final_url) {
                let feed_response = self.client.get(&feed_url).send().await?;
                if feed_response.status().is_success() {
                    let feed_bytes = feed_response.bytes().await?;
                    if let Some(title) = feed_title(&feed_bytes) {
                        return Ok(NewFeed {
                            title,
                            url: feed_url,
                        });
                    }
                }
            }
        }

        Err(AppError::Discovery(format!("no RSS/Atom feed found at {}", url)))
    }
}

fn feed_parser() -> parser::Parser {
    // Entries without a guid are identified by their link, so a title edit
    // does not turn them into new entries.
    parser::Builder::new()
        .id_generator(|links: &[Link], _title, _uri| {
            links.first().map(|l| l.href.clone()).unwrap_or_default()
        })
        .build()
}

fn feed_title(bytes: &[u8]) -> Option<String> {
    let feed = feed_parser().parse(bytes).ok()?;
    Some(
        feed.title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled Feed".to_string()),
    )
}

pub fn parse_entries(bytes: &[u8]) -> Result<Vec<ParsedEntry>> {
    let feed = feed_parser().parse(bytes)?;
    Ok(feed.entries.into_iter().map(parsed_entry).collect())
}

fn parsed_entry(entry: Entry) -> ParsedEntry {
    // Try summary first, then fall back to content
    let description_html = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()));

    let description = description_html
        .and_then(|html| html2text::from_read(html.as_bytes(), DESCRIPTION_WIDTH).ok())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone())
        .unwrap_or_default();

    ParsedEntry {
        guid: Some(entry.id.clone()).filter(|id| !id.trim().is_empty()),
        title: entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string()),
        link,
        description,
        enclosures: enclosures(&entry.links, &entry.media),
        categories: entry
            .categories
            .into_iter()
            .map(|c| c.label.unwrap_or(c.term))
            .filter(|c| !c.trim().is_empty())
            .collect(),
        published_at: entry.published.or(entry.updated),
    }
}

fn enclosures(links: &[Link], media: &[feed_rs::model::MediaObject]) -> Vec<Enclosure> {
    let mut found: Vec<Enclosure> = links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
        .map(|l| Enclosure {
            url: l.href.clone(),
            media_type: l.media_type.clone(),
        })
        .collect();

    for object in media {
        for content in &object.content {
            if let Some(url) = &content.url {
                found.push(Enclosure {
                    url: url.to_string(),
                    media_type: content.content_type.as_ref().map(|m| m.to_string()),
                });
            }
        }
        for thumbnail in &object.thumbnails {
            found.push(Enclosure {
                url: thumbnail.image.uri.clone(),
                media_type: Some("image/*".to_string()),
            });
        }
    }

    let mut seen = std::collections::HashSet::new();
    found.retain(|e| seen.insert(e.url.clone()));
    found
}

/// Search HTML for RSS/Atom feed links
fn find_feed_link(html: &str, base_url: &str) -> Option<String> {
    // Look for <link rel="alternate" type="application/rss+xml" href="...">
    // or <link rel="alternate" type="application/atom+xml" href="...">
    let link_re = Regex::new(
        r#"<link[^>]*rel=["']alternate["'][^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#
    ).ok()?;

    // Also try reverse order (type before rel)
    let link_re2 = Regex::new(
        r#"<link[^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#
    ).ok()?;

    let href = link_re
        .captures(html)
        .or_else(|| link_re2.captures(html))
        .and_then(|cap| cap.get(2))
        .map(|m| m.as_str().to_string())?;

    Some(resolve_url(&href, base_url))
}

/// Resolve a potentially relative URL against a base URL
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example News</title>
    <link>https://example.com/</link>
    <description>News</description>
    <item>
      <title>Second post</title>
      <link>https://example.com/b7</link>
      <guid isPermaLink="false">b7</guid>
      <description>&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
      <category>Releases</category>
      <enclosure url="https://example.com/b7.mp3" length="1" type="audio/mpeg"/>
      <media:content url="https://example.com/b7.png" medium="image" type="image/png"/>
      <pubDate>Tue, 10 Jun 2025 04:00:00 GMT</pubDate>
    </item>
    <item>
      <title>First post</title>
      <link>https://example.com/a3</link>
      <pubDate>Mon, 09 Jun 2025 04:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_items_in_feed_order() {
        let entries = parse_entries(RSS.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        let newest = &entries[0];
        assert_eq!(newest.title, "Second post");
        assert_eq!(newest.guid.as_deref(), Some("b7"));
        assert_eq!(newest.link, "https://example.com/b7");
        assert_eq!(newest.categories, vec!["Releases".to_string()]);
        assert!(newest.description.as_deref().unwrap().contains("Hello"));
        assert!(!newest.description.as_deref().unwrap().contains("<p>"));
        assert!(newest.published_at.unwrap() > entries[1].published_at.unwrap());
    }

    #[test]
    fn missing_guid_is_identified_by_link() {
        let entries = parse_entries(RSS.as_bytes()).unwrap();
        let oldest = &entries[1];
        assert_eq!(oldest.guid.as_deref(), Some("https://example.com/a3"));
        assert_eq!(
            oldest.id(),
            crate::models::EntryId::for_entry(None, "https://example.com/a3")
        );
    }

    #[test]
    fn enclosures_prefer_images() {
        let entries = parse_entries(RSS.as_bytes()).unwrap();
        let enclosure = entries[0].preferred_enclosure().unwrap();
        assert_eq!(enclosure.url, "https://example.com/b7.png");
        assert!(entries[0].enclosures.iter().any(|e| e.url.ends_with(".mp3")));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_entries(b"this is not a feed").is_err());
    }

    #[test]
    fn feed_title_reads_channel_title() {
        assert_eq!(feed_title(RSS.as_bytes()).as_deref(), Some("Example News"));
        assert!(feed_title(b"<html></html>").is_none());
    }

    #[test]
    fn finds_alternate_link_in_html() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
        </head></html>"#;
        assert_eq!(
            find_feed_link(html, "https://example.com/blog/").as_deref(),
            Some("https://example.com/feed.xml")
        );
    }

    #[test]
    fn absolute_links_are_kept() {
        assert_eq!(
            resolve_url("https://cdn.example.com/rss", "https://example.com/"),
            "https://cdn.example.com/rss"
        );
    }
}
