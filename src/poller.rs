use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::db::{Database, Feed, NewPost, PostInsert, StoreError};
use crate::fetcher::{FetchedFeed, Fetcher};

/// Upper bound on a single fetch regardless of cadence.
const MAX_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Polls feeds one at a time, stalest first, on a fixed cadence.
pub struct Poller {
    db: Database,
    fetcher: Fetcher,
    interval: Duration,
}

impl Poller {
    pub fn new(db: Database, interval: Duration) -> Self {
        // A hung remote must not block the loop past its next turn.
        let fetcher = Fetcher::new(interval.min(MAX_FETCH_TIMEOUT));
        Self {
            db,
            fetcher,
            interval,
        }
    }

    /// Poll until `shutdown` resolves. The first cycle runs immediately.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        info!(
            "collecting feeds every {}",
            humantime::format_duration(self.interval)
        );

        tokio::pin!(shutdown);
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        error!("poll cycle failed: {}", err);
                    }
                }
                _ = &mut shutdown => {
                    info!("shutting down aggregator");
                    break;
                }
            }
        }
    }

    /// One poll cycle: select the stalest feed, mark it, fetch it, ingest
    /// its items.
    pub async fn tick(&self) -> Result<(), StoreError> {
        let Some(feed) = self.db.next_stale_feed().await? else {
            debug!("no feeds to fetch");
            return Ok(());
        };

        // Mark before fetching; a feed whose fetch fails must still move
        // to the back of the rotation.
        let feed = match self.db.mark_feed_fetched(feed.id).await {
            Ok(feed) => feed,
            Err(StoreError::FeedNotFound(id)) => {
                warn!("feed {} vanished before it could be fetched", id);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let document = match self.fetcher.fetch(&feed.url).await {
            Ok(document) => document,
            Err(err) => {
                warn!("couldn't fetch feed '{}': {}", feed.name, err);
                return Ok(());
            }
        };

        self.ingest(&feed, document).await;
        Ok(())
    }

    async fn ingest(&self, feed: &Feed, document: FetchedFeed) {
        let mut created = 0;
        let mut skipped = 0;

        for item in document.items {
            let published_at = item.pub_date.as_deref().and_then(parse_pub_date);
            let post = NewPost {
                feed_id: feed.id,
                title: item.title,
                url: item.link,
                description: item.description,
                published_at,
            };
            match self.db.create_post(post).await {
                Ok(PostInsert::Created(_)) => created += 1,
                Ok(PostInsert::DuplicateSkipped) => skipped += 1,
                Err(err) => error!("couldn't store post for feed '{}': {}", feed.name, err),
            }
        }

        info!(
            "feed '{}' collected, {} new posts, {} already seen",
            feed.name, created, skipped
        );
    }
}

/// RSS dates are RFC 2822; anything else leaves the post undated.
fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
