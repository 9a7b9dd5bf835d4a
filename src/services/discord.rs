use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{ChannelId, CreateEmbed, CreateEmbedFooter, CreateMessage, Timestamp};
use serenity::http::Http;

use crate::config::DeliveryStyle;
use crate::delivery::{Notification, Notifier};
use crate::error::{AppError, Result};
use crate::models::Destination;
use crate::text::{split_text, DEFAULT_LIMIT};

const EMBED_COLOUR: u32 = 0xF2_6522;

/// Posts notifications to Discord channels over the REST API.
pub struct DiscordNotifier {
    http: Arc<Http>,
    style: DeliveryStyle,
}

impl DiscordNotifier {
    pub fn new(token: &str, style: DeliveryStyle) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
            style,
        }
    }

    async fn send_embed(&self, channel: ChannelId, notification: &Notification) -> Result<()> {
        let message = CreateMessage::new()
            .content(notification.headline())
            .embed(build_embed(notification));
        channel.send_message(&self.http, message).await?;
        Ok(())
    }

    async fn send_text(&self, channel: ChannelId, notification: &Notification) -> Result<()> {
        for piece in split_text(&notification.to_markdown(), DEFAULT_LIMIT) {
            if piece.trim().is_empty() {
                continue;
            }
            channel
                .send_message(&self.http, CreateMessage::new().content(piece))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn ready(&self) -> Result<()> {
        let user = self.http.get_current_user().await?;
        tracing::info!("Connected to Discord as {}", user.name);
        Ok(())
    }

    /// In the text style a failure after the first piece fails the whole
    /// delivery, so the retry posts the earlier pieces a second time.
    async fn deliver(&self, destination: &Destination, notification: &Notification) -> Result<()> {
        let channel = channel_id(&destination.channel_ref)?;
        match self.style {
            DeliveryStyle::Embed => self.send_embed(channel, notification).await,
            DeliveryStyle::Text => self.send_text(channel, notification).await,
        }
    }
}

fn channel_id(channel_ref: &str) -> Result<ChannelId> {
    match channel_ref.trim().parse::<u64>() {
        Ok(id) if id != 0 => Ok(ChannelId::new(id)),
        _ => Err(AppError::Delivery(format!(
            "'{}' is not a Discord channel id",
            channel_ref
        ))),
    }
}

fn build_embed(notification: &Notification) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&notification.title)
        .url(&notification.link)
        .colour(EMBED_COLOUR)
        .footer(CreateEmbedFooter::new(&notification.source));

    if let Some(description) = &notification.description {
        embed = embed.description(description);
    }
    if let Some(image) = &notification.image_url {
        embed = embed.image(image);
    }
    if let Some(category) = &notification.category {
        embed = embed.field("Category", category, true);
    }
    if let Some(attachment) = &notification.attachment_url {
        embed = embed.field("Attachment", attachment, false);
    }
    if let Some(timestamp) = notification
        .published_at
        .and_then(|published| Timestamp::from_unix_timestamp(published.timestamp()).ok())
    {
        embed = embed.timestamp(timestamp);
    }
    embed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_refs_must_be_snowflakes() {
        assert_eq!(channel_id("1234").unwrap(), ChannelId::new(1234));
        assert_eq!(channel_id(" 99 ").unwrap(), ChannelId::new(99));
        assert!(matches!(channel_id("0"), Err(AppError::Delivery(_))));
        assert!(matches!(channel_id("general"), Err(AppError::Delivery(_))));
    }
}
