use async_trait::async_trait;

use crate::{FeedError, Submission};

/// Something that can open live submission sessions (e.g. a subreddit stream).
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedSession>, FeedError>;
    fn name(&self) -> &str;
}

/// One open feed session. Pulls submissions one at a time in feed order.
///
/// `Ok(None)` means the upstream ended the session; callers reconnect.
/// `Err(FeedError::Malformed { .. })` refers to one item only and the session
/// can keep being polled afterwards.
#[async_trait]
pub trait FeedSession: Send {
    async fn next_submission(&mut self) -> Result<Option<Submission>, FeedError>;
}
