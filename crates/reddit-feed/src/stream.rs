use async_trait::async_trait;
use listing_core::{FeedError, FeedSession, FeedSource, Submission};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use crate::{AccessToken, RedditClient};

/// Ids remembered per session. A bit over three listing pages.
const RECENT_ID_CAPACITY: usize = 301;

/// Bounded set of recently yielded ids, oldest evicted first.
#[derive(Debug, Default)]
struct RecentIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns true if `id` was not present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

/// Live stream of new submissions in one subreddit.
pub struct RedditFeed {
    client: RedditClient,
    subreddit: String,
    poll_interval: Duration,
}

impl RedditFeed {
    pub fn new(client: RedditClient, subreddit: impl Into<String>, poll_interval: Duration) -> Self {
        let subreddit = subreddit.into();
        Self {
            client,
            subreddit: subreddit.trim_start_matches("r/").to_string(),
            poll_interval,
        }
    }
}

#[async_trait]
impl FeedSource for RedditFeed {
    async fn connect(&self) -> Result<Box<dyn FeedSession>, FeedError> {
        let token = self.client.authenticate().await?;
        tracing::info!("Connected to r/{}", self.subreddit);

        Ok(Box::new(RedditSession {
            client: self.client.clone(),
            subreddit: self.subreddit.clone(),
            poll_interval: self.poll_interval,
            token,
            pending: VecDeque::new(),
            recent: RecentIds::with_capacity(RECENT_ID_CAPACITY),
            polled_once: false,
        }))
    }

    fn name(&self) -> &str {
        "reddit"
    }
}

/// One authenticated polling session.
///
/// The first poll yields the current page (up to 100 posts, oldest first), so a fresh
/// session overlaps whatever the previous one already saw. Later polls only yield
/// ids this session has not yielded before.
pub struct RedditSession {
    client: RedditClient,
    subreddit: String,
    poll_interval: Duration,
    token: AccessToken,
    pending: VecDeque<Result<Submission, FeedError>>,
    recent: RecentIds,
    polled_once: bool,
}

impl RedditSession {
    async fn poll(&mut self) -> Result<(), FeedError> {
        if self.token.is_expired() {
            tracing::debug!("Refreshing Reddit access token");
            self.token = self.client.authenticate().await?;
        }

        let page = self.client.fetch_new(&self.token, &self.subreddit).await?;
        self.polled_once = true;

        let mut fresh = 0usize;
        // Reddit lists newest first; emit in feed order.
        for item in page.into_iter().rev() {
            let id = match &item {
                Ok(submission) => Some(submission.id.clone()),
                Err(FeedError::Malformed { id, .. }) => id.clone(),
                Err(_) => None,
            };
            match id {
                Some(id) if self.recent.insert(&id) => {
                    fresh += 1;
                    self.pending.push_back(item);
                }
                Some(_) => {}
                None => tracing::warn!("Dropping listing child without an id: {:?}", item.err()),
            }
        }

        tracing::debug!("Polled r/{}: {} new item(s)", self.subreddit, fresh);
        Ok(())
    }
}

#[async_trait]
impl FeedSession for RedditSession {
    async fn next_submission(&mut self) -> Result<Option<Submission>, FeedError> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return item.map(Some);
            }
            if self.polled_once {
                tokio::time::sleep(self.poll_interval).await;
            }
            self.poll().await?;
        }
    }
}
