//! Fan-out of new entries to the channels subscribed to their feed.

mod fanout;
mod render;

pub use fanout::{fan_out, FanOutReport};
pub use render::Notification;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Destination;

/// The messaging platform a notification is handed to.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Resolves once the client can deliver. The poller waits on this before
    /// its first cycle.
    async fn ready(&self) -> Result<()>;

    /// Posts one notification. `Ok` means the platform accepted it.
    async fn deliver(&self, destination: &Destination, notification: &Notification) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{Notification, Notifier};
    use crate::error::{AppError, Result};
    use crate::models::Destination;

    /// Keeps every delivery in memory; channels can be made to fail.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        delivered: Mutex<Vec<(String, String)>>,
        failing: Mutex<HashSet<String>>,
        failing_calls: Mutex<usize>,
    }

    impl RecordingNotifier {
        pub(crate) fn fail_channel(&self, channel_ref: &str) {
            self.failing.lock().unwrap().insert(channel_ref.to_string());
        }

        pub(crate) fn heal_channel(&self, channel_ref: &str) {
            self.failing.lock().unwrap().remove(channel_ref);
        }

        /// The next `calls` deliveries fail, whatever their channel.
        pub(crate) fn fail_next(&self, calls: usize) {
            *self.failing_calls.lock().unwrap() = calls;
        }

        /// (channel, entry title) pairs in delivery order.
        pub(crate) fn deliveries(&self) -> Vec<(String, String)> {
            self.delivered.lock().unwrap().clone()
        }

        pub(crate) fn titles_for(&self, channel_ref: &str) -> Vec<String> {
            self.deliveries()
                .into_iter()
                .filter(|(channel, _)| channel == channel_ref)
                .map(|(_, title)| title)
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn ready(&self) -> Result<()> {
            Ok(())
        }

        async fn deliver(&self, destination: &Destination, notification: &Notification) -> Result<()> {
            if self.failing.lock().unwrap().contains(&destination.channel_ref) {
                return Err(AppError::Delivery(format!(
                    "missing permissions in {}",
                    destination.channel_ref
                )));
            }
            {
                let mut failing_calls = self.failing_calls.lock().unwrap();
                if *failing_calls > 0 {
                    *failing_calls -= 1;
                    return Err(AppError::Delivery("rate limited".to_string()));
                }
            }
            self.delivered
                .lock()
                .unwrap()
                .push((destination.channel_ref.clone(), notification.title.clone()));
            Ok(())
        }
    }
}
