use std::collections::HashSet;
use std::ops::AddAssign;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{SeenEntry, SubscriptionTarget};

use super::{Notification, Notifier};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failed: usize,
    /// Already delivered by the time we got to it.
    pub skipped: usize,
    /// Held back because an older entry failed for the same subscription.
    pub deferred: usize,
}

impl AddAssign for FanOutReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.deferred += other.deferred;
    }
}

/// Delivers one entry to each target that has not received it yet.
///
/// A delivery record is written only after the notifier accepted the message,
/// so a failed or interrupted delivery is retried on a later cycle. Delivery
/// failures are counted, not returned; only storage errors abort.
///
/// `held_back` carries the subscriptions that failed on an older entry of the
/// same feed. They are not sent newer entries until the older one goes
/// through, and subscriptions failing here are added to it.
pub async fn fan_out(
    repo: &Repository,
    notifier: &dyn Notifier,
    entry: &SeenEntry,
    targets: &[SubscriptionTarget],
    held_back: &mut HashSet<i64>,
) -> Result<FanOutReport> {
    let mut report = FanOutReport::default();

    for target in targets {
        let subscription = &target.subscription;
        if held_back.contains(&subscription.id) {
            report.deferred += 1;
            continue;
        }
        if repo.is_delivered(subscription.id, &entry.entry_id).await? {
            report.skipped += 1;
            continue;
        }

        let notification = Notification::render(entry, subscription);
        match notifier.deliver(&target.destination, &notification).await {
            Ok(()) => {
                if repo.record_delivery(subscription.id, &entry.entry_id).await? {
                    tracing::info!(
                        "Delivered '{}' to channel {} ({})",
                        entry.title,
                        target.destination.channel_ref,
                        subscription.display_name
                    );
                } else {
                    tracing::debug!(
                        "Subscription {} went away during delivery of {}",
                        subscription.id,
                        entry.entry_id
                    );
                }
                report.delivered += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to deliver '{}' to channel {}: {}",
                    entry.title,
                    target.destination.channel_ref,
                    e
                );
                held_back.insert(subscription.id);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}
