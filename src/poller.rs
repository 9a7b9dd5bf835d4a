//! The ingestion loop: fetch every subscribed feed, record what is new and
//! hand pending entries to the notifier.

use std::collections::HashSet;
use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::db::{RecordOutcome, Repository};
use crate::delivery::{fan_out, FanOutReport, Notifier};
use crate::error::Result;
use crate::feed::{dedup, FeedFetcher};
use crate::models::{Feed, FeedId, ParsedEntry};

const READY_BACKOFF_START: std::time::Duration = std::time::Duration::from_secs(5);
const READY_BACKOFF_MAX: std::time::Duration = std::time::Duration::from_secs(300);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub feeds: usize,
    pub failed_fetches: usize,
    pub new_entries: usize,
    pub deliveries: FanOutReport,
}

impl AddAssign for CycleReport {
    fn add_assign(&mut self, other: Self) {
        self.feeds += other.feeds;
        self.failed_fetches += other.failed_fetches;
        self.new_entries += other.new_entries;
        self.deliveries += other.deliveries;
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} feeds ({} failed), {} new entries, {} delivered, {} failed deliveries",
            self.feeds,
            self.failed_fetches,
            self.new_entries,
            self.deliveries.delivered,
            self.deliveries.failed
        )
    }
}

pub struct Poller {
    repo: Repository,
    fetcher: FeedFetcher,
    notifier: Arc<dyn Notifier>,
    poll_interval: std::time::Duration,
    freshness_window: Option<Duration>,
    retry_window: Duration,
    cycle: Mutex<()>,
}

impl Poller {
    pub fn new(
        repo: Repository,
        fetcher: FeedFetcher,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Self {
        Self {
            repo,
            fetcher,
            notifier,
            poll_interval: config.poll_interval(),
            freshness_window: config.freshness_window(),
            retry_window: config.delivery_retry_window(),
            cycle: Mutex::new(()),
        }
    }

    /// Waits for the notifier, then runs a cycle every poll interval until
    /// `shutdown` fires. A failed cycle is logged and the loop carries on.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if !self.wait_ready(&mut shutdown).await {
            tracing::info!("Shut down before the notifier was ready");
            return Ok(());
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            "Polling every {} minutes",
            self.poll_interval.as_secs() / 60
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            tokio::select! {
                result = self.run_cycle() => match result {
                    Ok(report) => tracing::info!("Cycle finished: {}", report),
                    Err(e) => tracing::error!("Cycle aborted: {}", e),
                },
                _ = shutdown.changed() => {
                    tracing::info!("Interrupted mid-cycle; pending deliveries will be retried");
                    break;
                }
            }
        }

        tracing::info!("Poller stopped");
        Ok(())
    }

    /// Retries `Notifier::ready` with a doubling backoff. False when shutdown
    /// came first.
    async fn wait_ready(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut backoff = READY_BACKOFF_START;
        loop {
            tokio::select! {
                ready = self.notifier.ready() => match ready {
                    Ok(()) => return true,
                    Err(e) => tracing::warn!(
                        "Notifier not ready: {}; retrying in {}s",
                        e,
                        backoff.as_secs()
                    ),
                },
                _ = shutdown.changed() => return false,
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => return false,
            }
            backoff = (backoff * 2).min(READY_BACKOFF_MAX);
        }
    }

    /// A single cycle once the notifier is ready, for one-shot refreshes.
    pub async fn run_once(&self) -> Result<CycleReport> {
        self.notifier.ready().await?;
        self.run_cycle().await
    }

    /// One pass over every feed that has at least one subscription.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle.lock().await;

        let subscribed = self.repo.subscriber_map().await?;
        let feeds: Vec<Feed> = self
            .repo
            .get_all_feeds()
            .await?
            .into_iter()
            .filter(|feed| subscribed.contains_key(&feed.id))
            .collect();

        let mut report = CycleReport::default();
        for (feed, fetched) in self.fetcher.refresh_all(feeds).await {
            report += self.process_feed(&feed, fetched, Utc::now()).await?;
        }
        Ok(report)
    }

    /// Records what is new in one fetch result and delivers everything the
    /// feed still owes, including retries from earlier cycles.
    async fn process_feed(
        &self,
        feed: &Feed,
        fetched: Result<Vec<ParsedEntry>>,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let mut report = CycleReport {
            feeds: 1,
            ..CycleReport::default()
        };

        match fetched {
            Ok(parsed) => report.new_entries = self.ingest(feed, &parsed, now).await?,
            Err(_) => report.failed_fetches = 1,
        }

        report.deliveries = self.deliver_pending(&feed.id, now).await?;
        Ok(report)
    }

    async fn ingest(&self, feed: &Feed, parsed: &[ParsedEntry], now: DateTime<Utc>) -> Result<usize> {
        let seen = self.repo.seen_entry_ids(&feed.id).await?;
        let priming = seen.is_empty();
        let fresh = dedup::select_new(parsed, &seen);
        if fresh.is_empty() {
            self.repo.update_feed_last_fetched(&feed.id).await?;
            return Ok(0);
        }

        let records = dedup::plan_records(&fresh, now, self.freshness_window, priming);
        let announced = records.iter().filter(|r| !r.suppressed).count();

        match self.repo.record_seen_entries(&feed.id, records, now).await? {
            RecordOutcome::FeedGone => {
                tracing::debug!("{} was removed during the cycle", feed.url);
                Ok(0)
            }
            RecordOutcome::Recorded { inserted } => {
                if priming {
                    tracing::info!("Primed {} with {} entries", feed.title, inserted);
                } else if inserted > 0 {
                    tracing::info!(
                        "{} new entries in {} ({} to announce)",
                        inserted,
                        feed.title,
                        announced
                    );
                }
                self.repo.update_feed_last_fetched(&feed.id).await?;
                Ok(inserted)
            }
        }
    }

    async fn deliver_pending(&self, feed_id: &FeedId, now: DateTime<Utc>) -> Result<FanOutReport> {
        let pending = self
            .repo
            .pending_deliveries(feed_id, now - self.retry_window)
            .await?;

        let mut report = FanOutReport::default();
        let mut held_back = HashSet::new();
        for (entry, targets) in pending {
            report += fan_out(
                &self.repo,
                self.notifier.as_ref(),
                &entry,
                &targets,
                &mut held_back,
            )
            .await?;
        }
        if report.deferred > 0 {
            tracing::debug!(
                "Held back {} deliveries behind failed ones for {}",
                report.deferred,
                feed_id
            );
        }
        Ok(report)
    }
}
