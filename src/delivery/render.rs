use chrono::{DateTime, Utc};

use crate::models::{SeenEntry, Subscription};

const MAX_TITLE: usize = 256;
const MAX_DESCRIPTION: usize = 4000;
const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "avif"];

/// Everything a channel is shown about one new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Name the subscription gave the feed.
    pub source: String,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// Enclosure that is not an image (podcast audio, attachments).
    pub attachment_url: Option<String>,
    pub category: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub role_mention: Option<String>,
}

impl Notification {
    pub fn render(entry: &SeenEntry, subscription: &Subscription) -> Self {
        let (image_url, attachment_url) = match entry.enclosure_url.clone() {
            Some(url) if is_image_url(&url) => (Some(url), None),
            other => (None, other),
        };

        Self {
            source: subscription.display_name.clone(),
            title: truncate(&entry.title, MAX_TITLE),
            link: entry.link.clone(),
            description: entry
                .description
                .as_deref()
                .map(|d| truncate(d, MAX_DESCRIPTION)),
            image_url,
            attachment_url,
            category: entry.category.clone(),
            published_at: entry.published_at,
            role_mention: subscription.role_ref.as_deref().and_then(role_mention),
        }
    }

    /// Message text that goes alongside an embed.
    pub fn headline(&self) -> String {
        match &self.role_mention {
            Some(mention) => format!("{} New post in '{}'", mention, self.source),
            None => format!("New post in '{}'", self.source),
        }
    }

    /// Plain Markdown rendering, for channels that get text instead of embeds.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("{}\n**{}**\n{}", self.headline(), self.title, self.link);
        if let Some(description) = &self.description {
            out.push_str("\n\n");
            out.push_str(description);
        }
        let mut details = Vec::new();
        if let Some(category) = &self.category {
            details.push(format!("Category: {}", category));
        }
        if let Some(published) = self.published_at {
            details.push(format!("Published: <t:{}:F>", published.timestamp()));
        }
        if let Some(attachment) = &self.attachment_url {
            details.push(format!("Attachment: {}", attachment));
        }
        if !details.is_empty() {
            out.push_str("\n\n");
            out.push_str(&details.join("\n"));
        }
        out
    }
}

/// `<@&id>` for a bare role id; already formatted mentions pass through.
fn role_mention(role_ref: &str) -> Option<String> {
    let role = role_ref.trim();
    if role.is_empty() {
        None
    } else if role.starts_with("<@&") {
        Some(role.to_string())
    } else {
        Some(format!("<@&{}>", role))
    }
}

fn is_image_url(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path()
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
        })
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
