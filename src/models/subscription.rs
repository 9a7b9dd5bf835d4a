use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Destination, DestinationId, FeedId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub feed_id: FeedId,
    pub destination_id: DestinationId,
    pub display_name: String,
    pub role_ref: Option<String>,
    /// Highest seen-entry sequence of the feed when the subscription was made.
    /// Anything at or below it is history for this subscription.
    pub after_seq: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub feed_id: FeedId,
    pub guild_ref: String,
    pub channel_ref: String,
    pub display_name: String,
    pub role_ref: Option<String>,
}

/// A subscription joined with the channel it delivers to.
#[derive(Debug, Clone)]
pub struct SubscriptionTarget {
    pub subscription: Subscription,
    pub destination: Destination,
}
